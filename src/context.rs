//! A client-side NTLM security context for one MS-SIP registration.
//!
//! The context answers the server's challenge and keeps the resulting session keys, with which it
//! signs outgoing messages and verifies the server's signatures. All computations use the single
//! [`SessionConfig`] the context was created with, so that the response, the key derivation and
//! the signatures always agree on the NTLM version and flags.


use std::fmt;

use rand::Rng;
use rand::rngs::OsRng;
use tracing::{debug, warn};

use crate::{Credentials, Flags, NtlmVersion, ParsingError, StoringError};
use crate::crypto::rc4k;
use crate::keys::ResponseKeys;
use crate::message::{AuthenticateMessage, ChallengeMessage, OsVersion};
use crate::response::{compute_response, ntlm_time};
use crate::security::{
    key_exchange_key, mac, seal_key, sign_key, verify_received, SealKey, Side, Signature,
    SIP_SIGNATURE_SEQUENCE,
};


/// The flags Office Communicator 2007 R2 uses for SIP authentication.
pub const MS_SIP_FLAGS: Flags = Flags::NEGOTIATE_UNICODE
    .union(Flags::REQUEST_TARGET)
    .union(Flags::NEGOTIATE_SIGN)
    .union(Flags::NEGOTIATE_DATAGRAM)
    .union(Flags::NEGOTIATE_NTLM)
    .union(Flags::NEGOTIATE_ALWAYS_SIGN)
    .union(Flags::NEGOTIATE_EXTENDED_SESSIONSECURITY)
    .union(Flags::NEGOTIATE_IDENTIFY)
    .union(Flags::NEGOTIATE_TARGET_INFO)
    .union(Flags::NEGOTIATE_VERSION)
    .union(Flags::NEGOTIATE_128)
    .union(Flags::NEGOTIATE_KEY_EXCH);

/// Capabilities that are only used if the server offers them as well.
const NEGOTIABLE_FLAGS: Flags = Flags::NEGOTIATE_UNICODE
    .union(Flags::NEGOTIATE_OEM)
    .union(Flags::NEGOTIATE_SIGN)
    .union(Flags::NEGOTIATE_SEAL)
    .union(Flags::NEGOTIATE_DATAGRAM)
    .union(Flags::NEGOTIATE_LM_KEY)
    .union(Flags::NEGOTIATE_ALWAYS_SIGN)
    .union(Flags::NEGOTIATE_EXTENDED_SESSIONSECURITY)
    .union(Flags::NEGOTIATE_IDENTIFY)
    .union(Flags::REQUEST_NON_NT_SESSION_KEY)
    .union(Flags::NEGOTIATE_TARGET_INFO)
    .union(Flags::NEGOTIATE_VERSION)
    .union(Flags::NEGOTIATE_128)
    .union(Flags::NEGOTIATE_KEY_EXCH)
    .union(Flags::NEGOTIATE_56);


/// The configuration of an NTLM session.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct SessionConfig {
    /// The NTLM version used for the challenge response.
    pub version: NtlmVersion,

    /// The flags the client requests. The flags in force for the session are these minus any
    /// capabilities the server does not offer.
    pub flags: Flags,

    /// The sequence number used for message signatures.
    pub signature_sequence: u32,

    /// The operating system version reported to the server.
    pub os_version: OsVersion,
}
impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            version: NtlmVersion::V2,
            flags: MS_SIP_FLAGS,
            signature_sequence: SIP_SIGNATURE_SEQUENCE,
            os_version: OsVersion::WINDOWS_SERVER_2003,
        }
    }
}


/// An error that may occur while using a security context.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum ContextError {
    /// The context has not answered a challenge yet and has no session keys.
    NotAuthenticated,

    /// The server's message could not be parsed.
    Parsing(ParsingError),

    /// The response could not be serialized.
    Storing(StoringError),
}
impl fmt::Display for ContextError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAuthenticated
                => write!(f, "no challenge has been answered yet"),
            Self::Parsing(e)
                => write!(f, "failed to parse NTLM message: {}", e),
            Self::Storing(e)
                => write!(f, "failed to store NTLM message: {}", e),
        }
    }
}
impl std::error::Error for ContextError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::NotAuthenticated => None,
            Self::Parsing(e) => Some(e),
            Self::Storing(e) => Some(e),
        }
    }
}
impl From<ParsingError> for ContextError {
    fn from(e: ParsingError) -> Self {
        Self::Parsing(e)
    }
}
impl From<StoringError> for ContextError {
    fn from(e: StoringError) -> Self {
        Self::Storing(e)
    }
}


/// The keys of an established session.
#[derive(Clone, Copy, Eq, Hash, PartialEq)]
pub struct SessionKeys {
    /// The flags in force for the session.
    pub flags: Flags,

    pub exported_session_key: [u8; 16],
    pub client_sign_key: [u8; 16],
    pub client_seal_key: SealKey,
    pub server_sign_key: [u8; 16],
    pub server_seal_key: SealKey,
}
impl SessionKeys {
    /// Derives the signing and sealing keys of both sides from the exported session key.
    pub fn derive(flags: Flags, exported_session_key: &[u8; 16]) -> Self {
        Self {
            flags,
            exported_session_key: *exported_session_key,
            client_sign_key: sign_key(exported_session_key, Side::Client),
            client_seal_key: seal_key(flags, exported_session_key, Side::Client),
            server_sign_key: sign_key(exported_session_key, Side::Server),
            server_seal_key: seal_key(flags, exported_session_key, Side::Server),
        }
    }
}
impl fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKeys")
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}


/// Determines the flags in force for a session from the flags requested by the client and the
/// flags offered by the server.
pub fn negotiate_flags(requested: Flags, offered: Flags) -> Flags {
    let mut flags = requested - (NEGOTIABLE_FLAGS - offered);
    if flags.contains(Flags::NEGOTIATE_EXTENDED_SESSIONSECURITY) && flags.contains(Flags::NEGOTIATE_LM_KEY) {
        // mutually exclusive; extended session security wins
        flags.remove(Flags::NEGOTIATE_LM_KEY);
    }
    if flags != requested {
        warn!(
            requested = requested.bits(),
            negotiated = flags.bits(),
            "server does not support all requested capabilities",
        );
    }
    flags
}


/// The client side of an NTLM session.
pub struct ClientContext {
    config: SessionConfig,
    creds: Credentials,
    workstation: String,
    session: Option<SessionKeys>,
}
impl ClientContext {
    pub fn new(config: SessionConfig, creds: Credentials, workstation: &str) -> Self {
        Self {
            config,
            creds,
            workstation: workstation.to_owned(),
            session: None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The keys of the session, once a challenge has been answered.
    pub fn session(&self) -> Option<&SessionKeys> {
        self.session.as_ref()
    }

    /// Answers a challenge.
    ///
    /// The client challenge and the exported session key are taken from the operating system's
    /// random number generator. The timestamp is the one sent by the server in the target
    /// information or, if there is none, the current time.
    pub fn respond(&mut self, challenge: &ChallengeMessage) -> AuthenticateMessage {
        let mut client_challenge = [0u8; 8];
        OsRng.fill(&mut client_challenge);
        let mut random_session_key = [0u8; 16];
        OsRng.fill(&mut random_session_key);
        let time = challenge.target_info().timestamp()
            .unwrap_or_else(ntlm_time);

        self.respond_with(challenge, client_challenge, random_session_key, time)
    }

    /// Answers a challenge using the given client challenge, random session key and timestamp.
    ///
    /// The random session key becomes the exported session key if key exchange is negotiated;
    /// otherwise, it is ignored and the key exchange key is used instead. Any session established
    /// by an earlier answer is replaced.
    pub fn respond_with(
        &mut self,
        challenge: &ChallengeMessage,
        client_challenge: [u8; 8],
        random_session_key: [u8; 16],
        time: u64,
    ) -> AuthenticateMessage {
        let version = self.config.version;
        let flags = negotiate_flags(self.config.flags, challenge.flags);

        let keys = ResponseKeys::derive(version, &self.creds);
        let response = compute_response(
            version, flags, &keys,
            challenge.server_challenge, client_challenge, time, &challenge.target_info,
        );
        let kx_key = key_exchange_key(
            version, flags, &response.session_base_key,
            &response.lm_response, challenge.server_challenge, &keys.lm,
        );

        let (exported_session_key, encrypted_session_key) = if flags.contains(Flags::NEGOTIATE_KEY_EXCH) {
            (random_session_key, rc4k(&kx_key, &random_session_key))
        } else {
            (kx_key, Vec::new())
        };
        self.session = Some(SessionKeys::derive(flags, &exported_session_key));
        debug!(?version, flags = flags.bits(), "answered NTLM challenge");

        AuthenticateMessage {
            lm_response: Vec::from(response.lm_response),
            nt_response: response.ntlm_response,
            domain_name: self.creds.domain.clone(),
            user_name: self.creds.username.clone(),
            workstation_name: self.workstation.clone(),
            encrypted_session_key,
            flags,
            os_version: self.config.os_version,
        }
    }

    /// Parses a serialized Challenge message, answers it and returns the serialized Authenticate
    /// message.
    pub fn respond_to_bytes(&mut self, challenge: &[u8]) -> Result<Vec<u8>, ContextError> {
        let challenge = ChallengeMessage::try_from(challenge)?;
        let authenticate = self.respond(&challenge);
        Ok(authenticate.to_bytes()?)
    }

    /// Signs a message, given its canonical signing string, with the client's keys.
    pub fn sign(&self, signing_string: &str) -> Result<Signature, ContextError> {
        let session = self.session.as_ref()
            .ok_or(ContextError::NotAuthenticated)?;
        Ok(mac(
            session.flags,
            signing_string.as_bytes(),
            &session.client_sign_key,
            &session.client_seal_key,
            0,
            self.config.signature_sequence,
        ))
    }

    /// Verifies the signature the server sent for a message, given the message's canonical signing
    /// string.
    ///
    /// A malformed signature is reported as a mismatch.
    pub fn verify(&self, signing_string: &str, signature: &str) -> Result<bool, ContextError> {
        let session = self.session.as_ref()
            .ok_or(ContextError::NotAuthenticated)?;
        Ok(verify_received(
            session.flags,
            signing_string.as_bytes(),
            &session.server_sign_key,
            &session.server_seal_key,
            signature,
            self.config.signature_sequence,
        ))
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;
    use crate::message::{AvId, TargetInfo};

    fn creds() -> Credentials {
        Credentials {
            username: "User".to_owned(),
            password: "Password".to_owned(),
            domain: "Domain".to_owned(),
        }
    }

    fn challenge(flags: u32, target_info: Vec<u8>) -> ChallengeMessage {
        ChallengeMessage {
            target_name: String::new(),
            flags: Flags::from_bits_retain(flags),
            server_challenge: hex!("0123456789abcdef"),
            target_info,
            os_version: OsVersion::default(),
        }
    }

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.version, NtlmVersion::V2);
        assert_eq!(config.flags.bits(), 0x62988255);
        assert_eq!(config.signature_sequence, 100);
    }

    #[test]
    fn test_negotiate_flags() {
        // what OCS 2007 R2 offers
        assert_eq!(negotiate_flags(MS_SIP_FLAGS, Flags::from_bits_retain(0xE29882F3)), MS_SIP_FLAGS);

        let without_key_exchange = Flags::from_bits_retain(0xE29882F3) - Flags::NEGOTIATE_KEY_EXCH;
        assert_eq!(
            negotiate_flags(MS_SIP_FLAGS, without_key_exchange),
            MS_SIP_FLAGS - Flags::NEGOTIATE_KEY_EXCH,
        );

        let both = MS_SIP_FLAGS | Flags::NEGOTIATE_LM_KEY;
        assert_eq!(negotiate_flags(both, Flags::all()), MS_SIP_FLAGS);
    }

    #[test]
    fn test_sign_requires_session() {
        let ctx = ClientContext::new(SessionConfig::default(), creds(), "WORKSTATION");
        assert_eq!(ctx.sign("<NTLM>"), Err(ContextError::NotAuthenticated));
        assert_eq!(ctx.verify("<NTLM>", "01000000000000000000000000000000"), Err(ContextError::NotAuthenticated));
        assert!(ctx.session().is_none());
    }

    #[test]
    fn test_respond_v2_key_exchange() {
        let mut ctx = ClientContext::new(SessionConfig::default(), creds(), "WORKSTATION");
        let target_info = TargetInfo::encode(&[(AvId::NbDomainName, &b"D\0o\0m\0a\0i\0n\0"[..])]).unwrap();
        let auth = ctx.respond_with(&challenge(0xE29882F3, target_info.clone()), [0xaa; 8], [0x55; 16], 0);

        assert_eq!(auth.flags, MS_SIP_FLAGS);
        assert_eq!(auth.nt_response.len(), 16 + 32 + target_info.len());
        assert_eq!(auth.user_name, "User");
        assert_eq!(auth.workstation_name, "WORKSTATION");
        assert_eq!(auth.os_version, OsVersion::WINDOWS_SERVER_2003);

        // the server recovers the exported session key with the key exchange key
        let session = ctx.session().unwrap();
        assert_eq!(session.exported_session_key, [0x55; 16]);
        assert_eq!(auth.encrypted_session_key.len(), 16);
        assert_ne!(auth.encrypted_session_key, [0x55; 16]);
    }

    #[test]
    fn test_respond_v1_without_key_exchange() {
        let config = SessionConfig {
            version: NtlmVersion::V1,
            flags: Flags::from_bits_retain(0xE2028233) - Flags::NEGOTIATE_KEY_EXCH,
            ..SessionConfig::default()
        };
        let mut ctx = ClientContext::new(config, creds(), "");
        let auth = ctx.respond_with(&challenge(0xE2028233, Vec::new()), [0xaa; 8], [0x55; 16], 0);

        assert_eq!(auth.lm_response, hex!("98def7b87f88aa5dafe2df779688a172def11c7d5ccdef13"));
        assert_eq!(auth.nt_response, hex!("67c43011f30298a2ad35ece64f16331c44bdbed927841f94"));
        assert!(auth.encrypted_session_key.is_empty());
        // without key exchange, the key exchange key is the exported session key
        assert_eq!(ctx.session().unwrap().exported_session_key, hex!("d87262b0cde4b1cb7499becccdf10784"));
    }

    #[test]
    fn test_respond_uses_server_timestamp() {
        let time = 0x01CAB927179A5159u64;
        let target_info = TargetInfo::encode(&[(AvId::Timestamp, &time.to_le_bytes()[..])]).unwrap();
        let mut ctx = ClientContext::new(SessionConfig::default(), creds(), "WORKSTATION");
        let auth = ctx.respond(&challenge(0xE29882F3, target_info));
        assert_eq!(&auth.nt_response[24..32], &time.to_le_bytes()[..]);
    }

    #[test]
    fn test_respond_randomizes() {
        let mut ctx = ClientContext::new(SessionConfig::default(), creds(), "WORKSTATION");
        let first = ctx.respond(&challenge(0xE29882F3, Vec::new()));
        let second = ctx.respond(&challenge(0xE29882F3, Vec::new()));
        assert_ne!(first.encrypted_session_key, second.encrypted_session_key);
        assert_ne!(first.lm_response, second.lm_response);
    }

    #[test]
    fn test_respond_to_bytes() {
        let mut ctx = ClientContext::new(SessionConfig::default(), creds(), "WORKSTATION");
        let challenge_bytes = challenge(0xE29882F3, Vec::new()).to_bytes().unwrap();
        let authenticate_bytes = ctx.respond_to_bytes(&challenge_bytes).unwrap();
        assert_eq!(&authenticate_bytes[0..12], b"NTLMSSP\0\x03\0\0\0");

        assert!(matches!(ctx.respond_to_bytes(b"garbage"), Err(ContextError::Parsing(_))));
    }

    #[test]
    fn test_sign_and_verify() {
        let mut ctx = ClientContext::new(SessionConfig::default(), creds(), "WORKSTATION");
        ctx.respond_with(&challenge(0xE29882F3, Vec::new()), [0xaa; 8], [0x55; 16], 0);
        let session = *ctx.session().unwrap();
        let text = "<NTLM><1><1><SIP Communications Service><server><callid><1><REGISTER><sip:user@example.com><tag><sip:user@example.com><><><><>";

        let client_signature = ctx.sign(text).unwrap();
        let expected = mac(session.flags, text.as_bytes(), &session.client_sign_key, &session.client_seal_key, 0, 100);
        assert_eq!(client_signature, expected);

        // a server signature is made with the server's keys
        let server_signature = mac(session.flags, text.as_bytes(), &session.server_sign_key, &session.server_seal_key, 0, 100);
        assert_ne!(server_signature, client_signature);
        assert_eq!(ctx.verify(text, &server_signature.to_string()), Ok(true));
        assert_eq!(ctx.verify(text, &server_signature.to_string().to_lowercase()), Ok(true));
        assert_eq!(ctx.verify(text, &client_signature.to_string()), Ok(false));
        assert_eq!(ctx.verify("<NTLM>", &server_signature.to_string()), Ok(false));
        assert_eq!(ctx.verify(text, "nonsense"), Ok(false));
    }
}
