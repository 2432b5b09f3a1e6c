//! A minimal SIP message parser.
//!
//! Only as much of SIP is understood as is required to canonicalize a message for signing: the
//! start line, the headers (in order, with folded continuation lines joined) and the body.


use std::fmt;


/// An error that may occur while parsing a SIP message.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum SipParseError {
    /// The message is empty.
    Empty,

    /// The first line is neither a request line nor a status line.
    InvalidStartLine { line: String },

    /// The status code of a status line is not a number.
    InvalidStatusCode { code: String },

    /// A header line has no colon separating name and value.
    InvalidHeaderLine { line: String },

    /// A continuation line appears before any header.
    OrphanContinuation { line: String },
}
impl fmt::Display for SipParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty
                => write!(f, "empty SIP message"),
            Self::InvalidStartLine { line }
                => write!(f, "invalid SIP start line {:?}", line),
            Self::InvalidStatusCode { code }
                => write!(f, "invalid SIP status code {:?}", code),
            Self::InvalidHeaderLine { line }
                => write!(f, "invalid SIP header line {:?}", line),
            Self::OrphanContinuation { line }
                => write!(f, "continuation line {:?} without preceding header", line),
        }
    }
}
impl std::error::Error for SipParseError {
}


/// The first line of a SIP message.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum StartLine {
    /// `METHOD request-uri SIP/2.0`
    Request { method: String, uri: String },

    /// `SIP/2.0 code reason`
    Response { code: u16, reason: String },
}


/// A parsed SIP message.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct SipMessage {
    pub start_line: StartLine,

    /// The headers as (name, value) pairs in the order in which they appear in the message.
    pub headers: Vec<(String, String)>,

    pub body: String,
}
impl SipMessage {
    /// Parses a SIP message from its textual form.
    ///
    /// Lines may be terminated by CRLF or LF. The headers end at the first empty line; everything
    /// after it is the body. A message without an empty line has no body.
    pub fn parse(text: &str) -> Result<Self, SipParseError> {
        let (head, body) = match text.find("\r\n\r\n") {
            Some(i) => (&text[..i], &text[i+4..]),
            None => match text.find("\n\n") {
                Some(i) => (&text[..i], &text[i+2..]),
                None => (text, ""),
            },
        };

        let mut lines = head.lines();
        let first = lines.next()
            .filter(|l| !l.trim().is_empty())
            .ok_or(SipParseError::Empty)?;
        let start_line = parse_start_line(first)?;

        let mut headers: Vec<(String, String)> = Vec::new();
        for line in lines {
            if line.starts_with(' ') || line.starts_with('\t') {
                // folded header value
                let (_, value) = headers.last_mut()
                    .ok_or_else(|| SipParseError::OrphanContinuation { line: line.to_owned() })?;
                value.push(' ');
                value.push_str(line.trim());
                continue;
            }

            let (name, value) = line.split_once(':')
                .ok_or_else(|| SipParseError::InvalidHeaderLine { line: line.to_owned() })?;
            headers.push((name.trim().to_owned(), value.trim().to_owned()));
        }

        Ok(Self {
            start_line,
            headers,
            body: body.to_owned(),
        })
    }

    /// Returns the value of the first header with the given name (compared case-insensitively).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_response(&self) -> bool {
        matches!(self.start_line, StartLine::Response { .. })
    }

    pub fn response_code(&self) -> Option<u16> {
        match &self.start_line {
            StartLine::Request { .. } => None,
            StartLine::Response { code, .. } => Some(*code),
        }
    }

    /// Returns the method of the message.
    ///
    /// For requests, this is the method from the request line; for responses, it is the method
    /// from the `CSeq` header.
    pub fn method(&self) -> Option<&str> {
        match &self.start_line {
            StartLine::Request { method, .. } => Some(method.as_str()),
            StartLine::Response { .. } => self.header("CSeq")
                .and_then(|cseq| cseq.split_once(' '))
                .map(|(_, method)| method.trim()),
        }
    }
}


fn parse_start_line(line: &str) -> Result<StartLine, SipParseError> {
    let invalid = || SipParseError::InvalidStartLine { line: line.to_owned() };

    if let Some(rest) = line.strip_prefix("SIP/") {
        let mut pieces = rest.splitn(3, ' ');
        let _version = pieces.next().ok_or_else(invalid)?;
        let code_str = pieces.next().ok_or_else(invalid)?;
        let reason = pieces.next().unwrap_or("");
        let code = code_str.parse()
            .map_err(|_| SipParseError::InvalidStatusCode { code: code_str.to_owned() })?;
        Ok(StartLine::Response { code, reason: reason.to_owned() })
    } else {
        let mut pieces = line.split(' ');
        let method = pieces.next().filter(|m| !m.is_empty()).ok_or_else(invalid)?;
        let uri = pieces.next().ok_or_else(invalid)?;
        let version = pieces.next().ok_or_else(invalid)?;
        if !version.starts_with("SIP/") || pieces.next().is_some() {
            return Err(invalid());
        }
        Ok(StartLine::Request { method: method.to_owned(), uri: uri.to_owned() })
    }
}


/// Extracts the part of a header value between `before` and the next occurrence of `after`.
///
/// If `before` does not occur in the value, returns `None`. If `after` does not occur after it,
/// the rest of the value is returned.
pub fn header_part<'a>(value: &'a str, before: &str, after: &str) -> Option<&'a str> {
    let start = value.find(before)? + before.len();
    let rest = &value[start..];
    match rest.find(after) {
        Some(end) => Some(&rest[..end]),
        None => Some(rest),
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    const RESPONSE: &str = concat!(
        "SIP/2.0 200 OK\r\n",
        "Authentication-Info: NTLM rspauth=\"0100000000000000BF2E52667DDF6DED\", srand=\"0878F41B\"\r\n",
        "From: \"Gabriel Burt\"<sip:gabriel@ocs.provo.novell.com>;tag=2947328781;epid=1234567890\r\n",
        "CSeq: 3 REGISTER\r\n",
        "Content-Length: 0\r\n",
        "\r\n",
    );

    #[test]
    fn test_parse_response() {
        let msg = SipMessage::parse(RESPONSE).unwrap();
        assert_eq!(msg.start_line, StartLine::Response { code: 200, reason: "OK".to_owned() });
        assert!(msg.is_response());
        assert_eq!(msg.response_code(), Some(200));
        assert_eq!(msg.method(), Some("REGISTER"));
        assert_eq!(msg.headers.len(), 4);
        assert_eq!(msg.header("content-length"), Some("0"));
        assert_eq!(msg.body, "");
    }

    #[test]
    fn test_parse_request_with_body() {
        let msg = SipMessage::parse("MESSAGE sip:a@b SIP/2.0\r\nCSeq: 7 MESSAGE\r\nContent-Length: 5\r\n\r\nhello").unwrap();
        assert_eq!(msg.start_line, StartLine::Request { method: "MESSAGE".to_owned(), uri: "sip:a@b".to_owned() });
        assert_eq!(msg.method(), Some("MESSAGE"));
        assert_eq!(msg.response_code(), None);
        assert_eq!(msg.body, "hello");
    }

    #[test]
    fn test_first_header_wins() {
        let msg = SipMessage::parse("OPTIONS sip:x SIP/2.0\nSupported: a\nsupported: b\n").unwrap();
        assert_eq!(msg.header("Supported"), Some("a"));
    }

    #[test]
    fn test_continuation_lines() {
        let msg = SipMessage::parse("OPTIONS sip:x SIP/2.0\r\nSubject: one\r\n  two\r\n\tthree\r\n\r\n").unwrap();
        assert_eq!(msg.header("Subject"), Some("one two three"));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(SipMessage::parse(""), Err(SipParseError::Empty));
        assert_eq!(
            SipMessage::parse("garbage\r\n\r\n"),
            Err(SipParseError::InvalidStartLine { line: "garbage".to_owned() }),
        );
        assert_eq!(
            SipMessage::parse("SIP/2.0 abc OK\r\n\r\n"),
            Err(SipParseError::InvalidStatusCode { code: "abc".to_owned() }),
        );
        assert_eq!(
            SipMessage::parse("INVITE sip:x SIP/2.0\r\nno colon here\r\n\r\n"),
            Err(SipParseError::InvalidHeaderLine { line: "no colon here".to_owned() }),
        );
        assert_eq!(
            SipMessage::parse("INVITE sip:x SIP/2.0\r\n folded\r\n\r\n"),
            Err(SipParseError::OrphanContinuation { line: " folded".to_owned() }),
        );
    }

    #[test]
    fn test_header_part() {
        let from = "\"Gabriel Burt\"<sip:gabriel@ocs.provo.novell.com>;tag=2947328781;epid=1234567890";
        assert_eq!(header_part(from, "<", ">"), Some("sip:gabriel@ocs.provo.novell.com"));
        assert_eq!(header_part(from, ";tag=", ";"), Some("2947328781"));
        assert_eq!(header_part("<sip:a@b>;tag=xyz", ";tag=", ";"), Some("xyz"));
        assert_eq!(header_part("<sip:a@b>", ";tag=", ";"), None);
        assert_eq!(header_part("NTLM srand=\"0878F41B\"", "rand=\"", "\""), Some("0878F41B"));
    }
}
