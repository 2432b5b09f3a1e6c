//! One-way functions turning a password (and, for NTLMv2, the user and domain) into the response
//! keys from which all further NTLM key material is derived.


use tracing::warn;

use crate::{Credentials, NtlmVersion, utf16_le_bytes};
use crate::crypto::{des_encrypt, hmac_md5, md4};

#[cfg(windows)]
use crate::encoding_windows::rust_string_to_oem;

#[cfg(not(windows))]
use crate::encoding_utf8::rust_string_to_oem;


/// The fixed plaintext encrypted by both halves of the LM hash.
const LM_MAGIC: [u8; 8] = *b"KGS!@#$%";


/// The pair of response keys computed once per credential.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ResponseKeys {
    /// The key from which the NT challenge response is calculated (`ResponseKeyNT`).
    pub nt: [u8; 16],

    /// The key from which the LM challenge response is calculated (`ResponseKeyLM`).
    pub lm: [u8; 16],
}
impl ResponseKeys {
    /// Derives both response keys from the credentials using the one-way functions of the given
    /// NTLM version.
    ///
    /// For NTLMv1, the LM key is `LMOWFv1` and the NT key is `NTOWFv1`; for NTLMv2, both keys are
    /// `NTOWFv2`.
    pub fn derive(version: NtlmVersion, creds: &Credentials) -> Self {
        match version {
            NtlmVersion::V1 => Self {
                nt: ntowf_v1(&creds.password),
                lm: lmowf_v1(&creds.password),
            },
            NtlmVersion::V2 => {
                let key = ntowf_v2(&creds.password, &creds.username, &creds.domain);
                Self {
                    nt: key,
                    lm: key,
                }
            },
        }
    }
}


/// Derives the encryption key from a password according to the LMv1 scheme (`LMOWFv1`).
///
/// The LMv1 scheme consists of the following:
///
/// ```plain
///            ┌────────────┐  ┌───────────────┐  ┌─────────────┐
/// password ──┤ convert to ├──┤ encode using  ├──┤ truncate or ├──┐
///            │ uppercase  │  │ OEM codepage  │  │ pad to 14 B │  │
///            └────────────┘  └───────────────┘  └─────────────┘  │
///           ┌────────────────────────────────────────────────────┘
///           │┌───────┐
///           └┤ split │           "KGS!@#$%"
///            └─┬───┬─┘               │ input
///         0..7 │   │ 7..14    key ┌──┴──┐ output
///              │   └──────────────┤ DES ├────────────┐
///              │                  └─────┘            │ 8..16
///              │                                  ┌──┴───┐
///              │                 "KGS!@#$%"       │ join ├──── key
///              │                     │ input      └──┬───┘
///              │              key ┌──┴──┐ output     │ 0..8
///              └──────────────────┤ DES ├────────────┘
///                                 └─────┘
/// ```
///
/// A password that cannot be represented in the OEM codepage is hashed as if it were empty.
pub fn lmowf_v1(password: &str) -> [u8; 16] {
    let uppercase_password = password.to_uppercase();
    let mut password_bytes = match rust_string_to_oem(&uppercase_password) {
        Some(bs) => bs,
        None => {
            warn!("password not representable in the OEM codepage; LM hash degenerates");
            Vec::new()
        },
    };
    password_bytes.resize(14, 0x00);

    let mut half0 = [0u8; 7];
    let mut half1 = [0u8; 7];
    half0.copy_from_slice(&password_bytes[0..7]);
    half1.copy_from_slice(&password_bytes[7..14]);

    let mut output = [0u8; 16];
    output[0..8].copy_from_slice(&des_encrypt(&half0, LM_MAGIC));
    output[8..16].copy_from_slice(&des_encrypt(&half1, LM_MAGIC));
    output
}

/// Derives the encryption key from a password according to the NTLMv1 scheme (`NTOWFv1`).
///
/// The NTLMv1 scheme encodes the password as UTF-16 in little-endian byte order (without the Byte
/// Order Mark) and hashes it using MD4.
pub fn ntowf_v1(password: &str) -> [u8; 16] {
    md4(&utf16_le_bytes(password))
}

/// Derives the encryption key from a password according to the NTLMv2 scheme (`NTOWFv2`).
///
/// The NTLMv2 scheme is a HMAC-MD5 scheme whose key is the encryption key derived from the password
/// using the NTLMv1 scheme and whose plaintext is a concatenation of uppercase username and
/// unchanged-case domain, each encoded as UTF-16 in little-endian byte order without the Byte Order
/// Mark.
pub fn ntowf_v2(password: &str, username: &str, domain: &str) -> [u8; 16] {
    // only the username is case-folded; the domain is used as supplied
    let mut user_dom = utf16_le_bytes(&username.to_uppercase());
    user_dom.extend_from_slice(&utf16_le_bytes(domain));
    hmac_md5(&ntowf_v1(password), &user_dom)
}


#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_lmowf_v1() {
        assert_eq!(lmowf_v1("Password"), hex!("e52cac67419a9a224a3b108f3fa6cb6d"));
    }

    #[test]
    fn test_lmowf_v1_ignores_case_and_excess() {
        assert_eq!(lmowf_v1("password"), lmowf_v1("PASSWORD"));
        assert_eq!(lmowf_v1("ABCDEFGHIJKLMN"), lmowf_v1("ABCDEFGHIJKLMNOP"));
    }

    #[test]
    fn test_lmowf_v1_empty_password() {
        assert_eq!(lmowf_v1(""), hex!("aad3b435b51404eeaad3b435b51404ee"));
    }

    #[test]
    fn test_ntowf_v1() {
        assert_eq!(ntowf_v1("Password"), hex!("a4f49c406510bdcab6824ee7c30fd852"));
    }

    #[test]
    fn test_ntowf_v2() {
        assert_eq!(ntowf_v2("Password", "User", "Domain"), hex!("0c868a403bfd7a93a3001ef22ef02e3f"));
    }

    #[test]
    fn test_ntowf_v2_case_handling() {
        let reference = ntowf_v2("Password", "User", "Domain");

        // deterministic
        assert_eq!(ntowf_v2("Password", "User", "Domain"), reference);

        // username is case-folded
        assert_eq!(ntowf_v2("Password", "USER", "Domain"), reference);
        assert_eq!(ntowf_v2("Password", "user", "Domain"), reference);

        // the domain is not
        assert_ne!(ntowf_v2("Password", "User", "DOMAIN"), reference);
        assert_ne!(ntowf_v2("Password", "User", "Domain2"), reference);
    }

    #[test]
    fn test_ntowf_v2_empty_user_and_domain() {
        // empty strings contribute nothing to the HMAC input
        assert_eq!(ntowf_v2("Password", "", ""), hmac_md5(&ntowf_v1("Password"), b""));
    }

    #[test]
    fn test_response_keys() {
        let creds = Credentials {
            username: "User".to_owned(),
            password: "Password".to_owned(),
            domain: "Domain".to_owned(),
        };

        let v1 = ResponseKeys::derive(NtlmVersion::V1, &creds);
        assert_eq!(v1.nt, hex!("a4f49c406510bdcab6824ee7c30fd852"));
        assert_eq!(v1.lm, hex!("e52cac67419a9a224a3b108f3fa6cb6d"));

        let v2 = ResponseKeys::derive(NtlmVersion::V2, &creds);
        assert_eq!(v2.nt, hex!("0c868a403bfd7a93a3001ef22ef02e3f"));
        assert_eq!(v2.lm, v2.nt);
    }
}
