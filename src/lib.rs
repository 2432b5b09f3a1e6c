//! NTLM authentication and message signing for Microsoft SIP (MS-SIP) clients.
//!
//! Microsoft's SIP servers authenticate clients using NTLM (MS-NLMP) and then sign every SIP
//! message with a MAC calculated over a canonical rendering of selected header fields. This crate
//! implements the computations involved: the password one-way functions, the challenge responses,
//! the session key derivations, the message signatures, the canonical signing strings and the
//! derivation of the endpoint UUID. [`context::ClientContext`] ties them together for the client
//! side of one session.
//!
//! Transport, SIP dialog handling and the extraction of the challenge from the server's
//! `WWW-Authenticate`/`Proxy-Authenticate` header are left to the caller.
//!
//! Sample usage (reproducing a captured exchange with Office Communications Server 2007 R2):
//! ```
//! use sipntlm::{Credentials, Flags, NtlmVersion};
//! use sipntlm::breakdown::MessageBreakdown;
//! use sipntlm::crypto::rc4k;
//! use sipntlm::keys::ResponseKeys;
//! use sipntlm::response::compute_response;
//! use sipntlm::security::{key_exchange_key, seal_key, sign_key, sip_signature_make, Side};
//! use sipntlm::sipmsg::SipMessage;
//!
//! // all flags in force for the session; the same value is passed to every step
//! let flags
//!     = Flags::NEGOTIATE_UNICODE
//!     | Flags::REQUEST_TARGET
//!     | Flags::NEGOTIATE_SIGN
//!     | Flags::NEGOTIATE_DATAGRAM
//!     | Flags::NEGOTIATE_NTLM
//!     | Flags::NEGOTIATE_ALWAYS_SIGN
//!     | Flags::NEGOTIATE_EXTENDED_SESSIONSECURITY
//!     | Flags::NEGOTIATE_IDENTIFY
//!     | Flags::NEGOTIATE_TARGET_INFO
//!     | Flags::NEGOTIATE_VERSION
//!     | Flags::NEGOTIATE_128
//!     | Flags::NEGOTIATE_KEY_EXCH
//!     ;
//! let creds = Credentials {
//!     username: "User".to_owned(),
//!     password: "Pa$$word".to_owned(),
//!     domain: "COSMO".to_owned(),
//! };
//!
//! // from the server's challenge
//! let server_challenge = [0xdd, 0x1b, 0xaa, 0xf4, 0xe7, 0xe2, 0x18, 0xd1];
//! let target_info: Vec<u8> = Vec::new();
//! // chosen by the client
//! let client_challenge = [0xd6, 0xae, 0x87, 0x5c, 0xb0, 0xfd, 0xaa, 0x41];
//! let time = 0x01CA_B927_179A_5159;
//! let exported_session_key = [0x42; 16];
//!
//! let keys = ResponseKeys::derive(NtlmVersion::V2, &creds);
//! let response = compute_response(
//!     NtlmVersion::V2, flags, &keys,
//!     server_challenge, client_challenge, time, &target_info,
//! );
//! let kx_key = key_exchange_key(
//!     NtlmVersion::V2, flags, &response.session_base_key,
//!     &response.lm_response, server_challenge, &keys.lm,
//! );
//! // transported to the server in the AUTHENTICATE message
//! let _encrypted_session_key = rc4k(&kx_key, &exported_session_key);
//!
//! let client_sign_key = sign_key(&exported_session_key, Side::Client);
//! let client_seal_key = seal_key(flags, &exported_session_key, Side::Client);
//!
//! let request = SipMessage::parse(
//!     "REGISTER sip:cosmo.local SIP/2.0\r\n\
//!      From: <sip:user@cosmo.local>;tag=3e49177a52;epid=c8ca638a15\r\n\
//!      To: <sip:user@cosmo.local>\r\n\
//!      Call-ID: 4037df9284354df39065195bd57a4b14\r\n\
//!      CSeq: 3 REGISTER\r\n\
//!      Content-Length: 0\r\n\
//!      \r\n"
//! ).expect("failed to parse SIP message");
//! let breakdown = MessageBreakdown::parse(&request, "SIP Communications Service", "cosmo-ocs-r2.cosmo.local");
//! let signing_text = breakdown.signing_string(4)
//!     .expect("realm is known");
//!
//! let signature = sip_signature_make(flags, &signing_text, 0, &client_sign_key, &client_seal_key);
//! let response_header_param = format!("response=\"{}\"", signature);
//! assert_eq!(response_header_param.len(), "response=\"\"".len() + 32);
//! ```


#[cfg(windows)]
mod encoding_windows;

#[cfg(not(windows))]
mod encoding_utf8;

pub mod breakdown;
pub mod context;
pub mod crypto;
pub mod epid;
pub mod keys;
pub mod message;
pub mod response;
pub mod security;
pub mod sipmsg;


use std::fmt;

use bitflags::bitflags;


/// Standard NTLM credentials, consisting of username, password and domain.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Credentials {
    /// The username part of the credentials.
    pub username: String,

    /// The password part of the credentials.
    pub password: String,

    /// The domain part of the credentials.
    ///
    /// Often specified in combination with the username as `<DOMAIN>\<USERNAME>`. In credentials
    /// without a domain, the domain is an empty string.
    pub domain: String,
}


/// The version of the NTLM challenge-response algorithm in use for a session.
///
/// The version is chosen by the caller and passed explicitly to every computation that depends on
/// it; one session must use one version throughout.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum NtlmVersion {
    /// NTLMv1 (DES-based responses), optionally with extended session security.
    V1,

    /// NTLMv2 (HMAC-MD5-based responses including a client blob with target information).
    V2,
}
impl Default for NtlmVersion {
    fn default() -> Self {
        Self::V2
    }
}


bitflags! {
    /// NTLM negotiation flags.
    #[derive(Clone, Copy, Debug, Default, Hash, Eq, Ord, PartialEq, PartialOrd)]
    pub struct Flags: u32 {
        const NEGOTIATE_UNICODE = 0x0000_0001;
        const NEGOTIATE_OEM = 0x0000_0002;
        const REQUEST_TARGET = 0x0000_0004;
        const UNKNOWN_8 = 0x0000_0008;
        const NEGOTIATE_SIGN = 0x0000_0010;
        const NEGOTIATE_SEAL = 0x0000_0020;
        const NEGOTIATE_DATAGRAM = 0x0000_0040;
        const NEGOTIATE_LM_KEY = 0x0000_0080;
        const NEGOTIATE_NETWARE = 0x0000_0100;
        const NEGOTIATE_NTLM = 0x0000_0200;
        const UNKNOWN_400 = 0x0000_0400;
        const NEGOTIATE_ANONYMOUS = 0x0000_0800;
        const NEGOTIATE_DOMAIN_SUPPLIED = 0x0000_1000;
        const NEGOTIATE_WORKSTATION_SUPPLIED = 0x0000_2000;
        const NEGOTIATE_LOCAL_CALL = 0x0000_4000;
        const NEGOTIATE_ALWAYS_SIGN = 0x0000_8000;
        const TARGET_TYPE_DOMAIN = 0x0001_0000;
        const TARGET_TYPE_SERVER = 0x0002_0000;
        const TARGET_TYPE_SHARE = 0x0004_0000;
        const NEGOTIATE_EXTENDED_SESSIONSECURITY = 0x0008_0000;
        const NEGOTIATE_IDENTIFY = 0x0010_0000;
        const REQUEST_ACCEPT_RESPONSE = 0x0020_0000;
        const REQUEST_NON_NT_SESSION_KEY = 0x0040_0000;
        const NEGOTIATE_TARGET_INFO = 0x0080_0000;
        const UNKNOWN_1000000 = 0x0100_0000;
        const NEGOTIATE_VERSION = 0x0200_0000;
        const UNKNOWN_4000000 = 0x0400_0000;
        const UNKNOWN_8000000 = 0x0800_0000;
        const UNKNOWN_10000000 = 0x1000_0000;
        const NEGOTIATE_128 = 0x2000_0000;
        const NEGOTIATE_KEY_EXCH = 0x4000_0000;
        const NEGOTIATE_56 = 0x8000_0000;
    }
}


/// An error that may occur while parsing existing NTLM packets.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ParsingError {
    /// The header is shorter than expected.
    ShortHeader { expected_min_len: usize, obtained_len: usize },

    /// The magic value does not match the expected one.
    MagicMismatch { expected: [u8; 8], obtained: Vec<u8> },

    /// The message is of a different type than expected.
    UnexpectedMessageType { expected: u32, obtained: u32 },

    /// An internal item is shorter than expected.
    ItemMinLengthMismatch { expected_at_least: usize, obtained: usize },

    /// An internal item's length is not divisible by an expected divisor.
    ItemLengthNotDivisible { expected_divisor: usize, obtained_length: usize },

    /// A byte string is not valid in the OEM encoding.
    InvalidOemEncoding { value: Vec<u8> },

    /// A string of 16-bit characters could not be decoded as UTF-16.
    InvalidUtf16 { value: Vec<u16> },

    /// A security buffer points outside of the message.
    BufferOutOfRange { offset: usize, length: usize, message_length: usize },

    /// Neither Unicode nor OEM encoding was selected.
    NeitherUnicodeNorOem,
}
impl fmt::Display for ParsingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShortHeader { expected_min_len, obtained_len }
                => write!(f, "header too short (expected at least {} bytes, obtained {})", expected_min_len, obtained_len),
            Self::MagicMismatch { expected, obtained }
                => write!(f, "mismatched magic (expected {:?}, obtained {:?})", expected, obtained),
            Self::UnexpectedMessageType { expected, obtained }
                => write!(f, "unexpected message type (expected {}, obtained {})", expected, obtained),
            Self::ItemMinLengthMismatch { expected_at_least, obtained }
                => write!(f, "insufficient minimum length for an internal item (expected at least {:?}, obtained {:?})", expected_at_least, obtained),
            Self::ItemLengthNotDivisible { expected_divisor, obtained_length }
                => write!(f, "item length {} not divisible by {}", obtained_length, expected_divisor),
            Self::InvalidOemEncoding { value }
                => write!(f, "failed to decode value with the OEM encoding: {:?}", value),
            Self::InvalidUtf16 { value }
                => write!(f, "failed to decode value as UTF-16: {:?}", value),
            Self::BufferOutOfRange { offset, length, message_length }
                => write!(f, "buffer of {} bytes at offset {} exceeds message of {} bytes", length, offset, message_length),
            Self::NeitherUnicodeNorOem
                => write!(f, "neither Unicode nor OEM encoding was selected"),
        }
    }
}
impl std::error::Error for ParsingError {
}

/// An error that may occur while writing an NTLM packet.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum StoringError {
    /// The string cannot be encoded using the OEM encoding.
    NonOemEncodable { string: String },

    /// A field is too long to be described by a security buffer.
    FieldTooLong { length: usize },

    /// Neither Unicode nor OEM encoding was selected.
    NeitherUnicodeNorOem,
}
impl fmt::Display for StoringError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonOemEncodable { string }
                => write!(f, "failed to encode {:?} using OEM encoding", string),
            Self::FieldTooLong { length }
                => write!(f, "field of {} bytes does not fit into a security buffer", length),
            Self::NeitherUnicodeNorOem
                => write!(f, "neither Unicode nor OEM encoding was selected"),
        }
    }
}
impl std::error::Error for StoringError {
}


/// Encodes a string as UTF-16 in little-endian byte order, without a Byte Order Mark.
pub(crate) fn utf16_le_bytes(s: &str) -> Vec<u8> {
    s.encode_utf16()
        .flat_map(|w| w.to_le_bytes())
        .collect()
}

/// Converts UTF-16 values stored as bytes in little-endian format into a string.
pub(crate) fn utf16_le_bytes_to_string(bytes: &[u8]) -> Result<String, ParsingError> {
    if bytes.len() % 2 != 0 {
        return Err(ParsingError::ItemLengthNotDivisible { expected_divisor: 2, obtained_length: bytes.len() });
    }
    let u16s: Vec<u16> = bytes.chunks_exact(2)
        .map(|chk| u16::from_le_bytes([chk[0], chk[1]]))
        .collect();
    String::from_utf16(&u16s)
        .or(Err(ParsingError::InvalidUtf16 { value: u16s }))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_values() {
        let v1 = Flags::NEGOTIATE_KEY_EXCH
            | Flags::NEGOTIATE_56
            | Flags::NEGOTIATE_128
            | Flags::NEGOTIATE_VERSION
            | Flags::TARGET_TYPE_SERVER
            | Flags::NEGOTIATE_ALWAYS_SIGN
            | Flags::NEGOTIATE_NTLM
            | Flags::NEGOTIATE_SEAL
            | Flags::NEGOTIATE_SIGN
            | Flags::NEGOTIATE_OEM
            | Flags::NEGOTIATE_UNICODE;
        assert_eq!(v1.bits(), 0xE2028233);

        let v1_ess = (v1 | Flags::NEGOTIATE_EXTENDED_SESSIONSECURITY)
            - Flags::NEGOTIATE_KEY_EXCH
            - Flags::NEGOTIATE_128;
        assert_eq!(v1_ess.bits(), 0x820A8233);

        let v2 = v1 | Flags::NEGOTIATE_EXTENDED_SESSIONSECURITY | Flags::NEGOTIATE_TARGET_INFO;
        assert_eq!(v2.bits(), 0xE28A8233);
    }

    #[test]
    fn test_utf16_round_trip() {
        let bytes = utf16_le_bytes("Dom\u{e4}ne");
        assert_eq!(bytes, b"D\0o\0m\0\xe4\0n\0e\0");
        assert_eq!(utf16_le_bytes_to_string(&bytes).unwrap(), "Dom\u{e4}ne");
    }

    #[test]
    fn test_utf16_odd_length() {
        assert_eq!(
            utf16_le_bytes_to_string(b"abc"),
            Err(ParsingError::ItemLengthNotDivisible { expected_divisor: 2, obtained_length: 3 }),
        );
    }
}
