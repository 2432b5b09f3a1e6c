//! Canonical rendering of a SIP message as the input of its signature.
//!
//! Microsoft's SIP servers do not sign the message text itself. Instead, selected fields are
//! extracted, each is wrapped in angle brackets, and the concatenation is signed. Which fields are
//! included depends on the version of the authentication protocol: version 2 (Office
//! Communications Server 2005) or versions 3 and 4 (Office Communications Server 2007 and later).
//! Missing fields are rendered as empty brackets.


use tracing::debug;

use crate::sipmsg::{header_part, SipMessage};


/// Headers that may carry the authentication parameters, in order of preference.
const AUTH_HEADERS: [&str; 4] = [
    "Proxy-Authorization",
    "Proxy-Authenticate",
    "Proxy-Authentication-Info",
    "Authentication-Info",
];


/// The fields of a SIP message that take part in its signature.
///
/// All fields borrow from the parsed message or from the strings passed to
/// [`MessageBreakdown::parse`]; absent fields are empty strings.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct MessageBreakdown<'a> {
    pub protocol: &'a str,
    pub rand: &'a str,
    pub num: &'a str,
    pub realm: &'a str,
    pub target_name: &'a str,
    pub call_id: &'a str,
    pub cseq: &'a str,
    pub method: &'a str,
    pub from_url: &'a str,
    pub from_tag: &'a str,
    pub to_url: &'a str,
    pub to_tag: &'a str,
    pub p_asserted_identity_sip_uri: Option<String>,
    pub p_asserted_identity_tel_uri: Option<String>,
    pub expires: &'a str,
    pub response_code: Option<u16>,
}
impl<'a> MessageBreakdown<'a> {
    /// Extracts the signed fields from a message.
    ///
    /// The authentication protocol, random value, counter, realm and target name are taken from
    /// the first authentication header present in the message. If there is none, `realm` and
    /// `target_name` are used, and the protocol is assumed to be Kerberos if the target name is a
    /// service principal name (contains `sip/`) and NTLM otherwise.
    pub fn parse(msg: &'a SipMessage, realm: &'a str, target_name: &'a str) -> Self {
        let mut bd = Self::default();

        match AUTH_HEADERS.iter().find_map(|name| msg.header(name)) {
            Some(auth) => {
                bd.protocol = auth.split(' ').next().unwrap_or("");
                // "rand" and "num" match the client's crand/cnum as well as the server's srand/snum
                bd.rand = header_part(auth, "rand=\"", "\"").unwrap_or("");
                bd.num = header_part(auth, "num=\"", "\"").unwrap_or("");
                bd.realm = header_part(auth, "realm=\"", "\"").unwrap_or("");
                bd.target_name = header_part(auth, "targetname=\"", "\"").unwrap_or("");
            },
            None => {
                bd.protocol = if target_name.contains("sip/") { "Kerberos" } else { "NTLM" };
                bd.realm = realm;
                bd.target_name = target_name;
            },
        }

        bd.call_id = msg.header("Call-ID").unwrap_or("");

        if let Some(cseq) = msg.header("CSeq") {
            bd.cseq = cseq.split(' ').next().unwrap_or("");
        }
        bd.method = msg.method().unwrap_or("");

        if let Some(from) = msg.header("From") {
            bd.from_url = header_part(from, "<", ">").unwrap_or("");
            bd.from_tag = header_part(from, ";tag=", ";").unwrap_or("");
        }
        if let Some(to) = msg.header("To") {
            bd.to_url = header_part(to, "<", ">").unwrap_or("");
            bd.to_tag = header_part(to, ";tag=", ";").unwrap_or("");
        }

        let identity = msg.header("P-Asserted-Identity")
            .or_else(|| msg.header("P-Preferred-Identity"));
        if let Some(identity) = identity {
            bd.p_asserted_identity_sip_uri = header_part(identity, "<sip:", ">")
                .map(|uri| format!("sip:{}", uri));
            bd.p_asserted_identity_tel_uri = header_part(identity, "<tel:", ">")
                .map(|uri| format!("tel:{}", uri));
        }

        bd.expires = msg.header("Expires").unwrap_or("");
        bd.response_code = msg.response_code();

        bd
    }

    /// Renders the canonical signing string for the given version of the authentication protocol.
    ///
    /// Versions below 3 use the version 2 field set; all other versions use the version 4 field
    /// set. Returns `None` if the realm is unknown, in which case the message cannot be signed.
    pub fn signing_string(&self, version: u32) -> Option<String> {
        if self.realm.is_empty() {
            debug!("no realm known; message cannot be signed");
            return None;
        }

        let pai_sip = self.p_asserted_identity_sip_uri.as_deref().unwrap_or("");
        let pai_tel = self.p_asserted_identity_tel_uri.as_deref().unwrap_or("");

        let mut fields: Vec<&str> = vec![
            self.protocol,
            self.rand,
            self.num,
            self.realm,
            self.target_name,
            self.call_id,
            self.cseq,
            self.method,
            self.from_url,
            self.from_tag,
        ];
        if version < 3 {
            fields.extend_from_slice(&[self.to_tag, self.expires]);
        } else {
            fields.extend_from_slice(&[self.to_url, self.to_tag, pai_sip, pai_tel, self.expires]);
        }

        let mut ret: String = fields.iter()
            .map(|f| format!("<{}>", f))
            .collect();
        if let Some(code) = self.response_code {
            ret.push_str(&format!("<{}>", code));
        }
        Some(ret)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    const OCS2005_RESPONSE: &str = concat!(
        "SIP/2.0 200 OK\r\n",
        "ms-keep-alive: UAS; tcp=no; hop-hop=yes; end-end=no; timeout=300\r\n",
        "Authentication-Info: NTLM rspauth=\"0100000000000000BF2E52667DDF6DED\", srand=\"0878F41B\", snum=\"1\", opaque=\"4452DFB0\", qop=\"auth\", targetname=\"ocs1.ocs.provo.novell.com\", realm=\"SIP Communications Service\"\r\n",
        "From: \"Gabriel Burt\"<sip:gabriel@ocs.provo.novell.com>;tag=2947328781;epid=1234567890\r\n",
        "To: <sip:gabriel@ocs.provo.novell.com>;tag=B816D65C2300A32CFA6D371F2AF537FD\r\n",
        "Call-ID: 8592g5DCBa1694i5887m0D0Bt2247b3F38xAE9Fx\r\n",
        "CSeq: 3 REGISTER\r\n",
        "Via: SIP/2.0/TLS 164.99.194.49:10409;branch=z9hG4bKE0E37DBAF252C3255BAD;received=164.99.195.20;ms-received-port=10409;ms-received-cid=1E00\r\n",
        "Contact: <sip:164.99.195.20:10409;transport=tls;ms-received-cid=1E00>;expires=900\r\n",
        "Expires: 900\r\n",
        "Allow-Events: vnd-microsoft-provisioning,vnd-microsoft-roaming-contacts,vnd-microsoft-roaming-ACL,presence,presence.wpending,vnd-microsoft-roaming-self,vnd-microsoft-provisioning-v2\r\n",
        "Supported: adhoclist\r\n",
        "Server: RTC/3.0\r\n",
        "Supported: com.microsoft.msrtc.presence\r\n",
        "Content-Length: 0\r\n",
        "\r\n",
    );

    #[test]
    fn test_version_2_response() {
        let msg = SipMessage::parse(OCS2005_RESPONSE).unwrap();
        let bd = MessageBreakdown::parse(&msg, "SIP Communications Service", "ocs1.ocs.provo.novell.com");
        assert_eq!(
            bd.signing_string(2).unwrap(),
            concat!(
                "<NTLM><0878F41B><1><SIP Communications Service><ocs1.ocs.provo.novell.com>",
                "<8592g5DCBa1694i5887m0D0Bt2247b3F38xAE9Fx><3><REGISTER>",
                "<sip:gabriel@ocs.provo.novell.com><2947328781><B816D65C2300A32CFA6D371F2AF537FD><900><200>",
            ),
        );
    }

    #[test]
    fn test_version_4_response() {
        let msg = SipMessage::parse(OCS2005_RESPONSE).unwrap();
        let bd = MessageBreakdown::parse(&msg, "ignored", "ignored");
        assert_eq!(
            bd.signing_string(4).unwrap(),
            concat!(
                "<NTLM><0878F41B><1><SIP Communications Service><ocs1.ocs.provo.novell.com>",
                "<8592g5DCBa1694i5887m0D0Bt2247b3F38xAE9Fx><3><REGISTER>",
                "<sip:gabriel@ocs.provo.novell.com><2947328781>",
                "<sip:gabriel@ocs.provo.novell.com><B816D65C2300A32CFA6D371F2AF537FD><><><900><200>",
            ),
        );
        assert_eq!(bd.signing_string(3), bd.signing_string(4));
    }

    #[test]
    fn test_request_without_auth_header() {
        let msg = SipMessage::parse(concat!(
            "MESSAGE sip:bob@example.com SIP/2.0\r\n",
            "From: <sip:alice@example.com>;tag=abc\r\n",
            "To: <sip:bob@example.com>\r\n",
            "Call-ID: xyz\r\n",
            "CSeq: 12 MESSAGE\r\n",
            "P-Asserted-Identity: \"Alice\" <sip:alice@example.com>, <tel:+15551234>\r\n",
            "\r\n",
        )).unwrap();

        let bd = MessageBreakdown::parse(&msg, "SIP Communications Service", "sip/ocs.example.com");
        assert_eq!(bd.protocol, "Kerberos");
        assert_eq!(
            bd.signing_string(4).unwrap(),
            concat!(
                "<Kerberos><><><SIP Communications Service><sip/ocs.example.com><xyz><12><MESSAGE>",
                "<sip:alice@example.com><abc><sip:bob@example.com><>",
                "<sip:alice@example.com><tel:+15551234><>",
            ),
        );

        let bd = MessageBreakdown::parse(&msg, "SIP Communications Service", "ocs.example.com");
        assert_eq!(bd.protocol, "NTLM");
        assert_eq!(
            bd.signing_string(2).unwrap(),
            "<NTLM><><><SIP Communications Service><ocs.example.com><xyz><12><MESSAGE><sip:alice@example.com><abc><><>",
        );
    }

    #[test]
    fn test_preferred_identity_fallback() {
        let msg = SipMessage::parse("INFO sip:x SIP/2.0\r\nP-Preferred-Identity: <sip:me@example.com>\r\n\r\n").unwrap();
        let bd = MessageBreakdown::parse(&msg, "realm", "target");
        assert_eq!(bd.p_asserted_identity_sip_uri.as_deref(), Some("sip:me@example.com"));
        assert_eq!(bd.p_asserted_identity_tel_uri, None);
    }

    #[test]
    fn test_no_realm() {
        let msg = SipMessage::parse("INFO sip:x SIP/2.0\r\n\r\n").unwrap();
        assert_eq!(MessageBreakdown::parse(&msg, "", "target").signing_string(4), None);

        // realm taken from an auth header that lacks one
        let msg = SipMessage::parse("INFO sip:x SIP/2.0\r\nProxy-Authorization: NTLM crand=\"1\"\r\n\r\n").unwrap();
        assert_eq!(MessageBreakdown::parse(&msg, "realm", "target").signing_string(2), None);
    }

    #[test]
    fn test_parse_does_not_modify_message() {
        let msg = SipMessage::parse(OCS2005_RESPONSE).unwrap();
        let before = msg.clone();
        let _ = MessageBreakdown::parse(&msg, "r", "t").signing_string(4);
        assert_eq!(msg, before);
    }
}
