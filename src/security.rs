//! Session key derivation and message integrity/confidentiality.
//!
//! After authentication, each side signs its messages using a MAC keyed from the exported session
//! key. Two MAC schemes exist: with extended session security, the checksum is a truncated
//! HMAC-MD5 keyed with the signing key; without it, the checksum is an RC4-encrypted CRC-32 (the
//! "legacy" scheme), keyed with the sealing key alone.


use std::fmt;
use std::str::FromStr;

use hmac::Mac;
use tracing::{debug, trace, warn};

use crate::{Flags, NtlmVersion};
use crate::crypto::{crc32, des_encrypt, md5, new_hmac_md5, Rc4Handle};


/// The sequence number used for all MS-SIP message signatures.
pub const SIP_SIGNATURE_SEQUENCE: u32 = 100;

/// The version number at the start of every signature.
pub const SIGNATURE_VERSION: u32 = 1;

const CLIENT_SIGNING_MAGIC: &[u8] = b"session key to client-to-server signing key magic constant\0";
const SERVER_SIGNING_MAGIC: &[u8] = b"session key to server-to-client signing key magic constant\0";
const CLIENT_SEALING_MAGIC: &[u8] = b"session key to client-to-server sealing key magic constant\0";
const SERVER_SEALING_MAGIC: &[u8] = b"session key to server-to-client sealing key magic constant\0";


/// The side of the conversation a key belongs to.
///
/// Client keys protect client-to-server traffic, server keys protect server-to-client traffic.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Side {
    Client,
    Server,
}


/// Calculates the key exchange key (`KXKEY`) from the results of the challenge response.
///
/// The key exchange key encrypts the exported session key on its way to the server; if no key
/// exchange is negotiated, it is the exported session key.
pub fn key_exchange_key(
    version: NtlmVersion,
    flags: Flags,
    session_base_key: &[u8; 16],
    lm_response: &[u8; 24],
    server_challenge: [u8; 8],
    response_key_lm: &[u8; 16],
) -> [u8; 16] {
    if version == NtlmVersion::V2 {
        return *session_base_key;
    }

    if flags.contains(Flags::NEGOTIATE_EXTENDED_SESSIONSECURITY) {
        let mut hmac_md5 = new_hmac_md5(session_base_key);
        hmac_md5.update(&server_challenge);
        hmac_md5.update(&lm_response[0..8]);
        hmac_md5.finalize().into_bytes().into()
    } else if flags.contains(Flags::NEGOTIATE_LM_KEY) {
        let mut lm_block = [0u8; 8];
        lm_block.copy_from_slice(&lm_response[0..8]);

        let mut key0 = [0u8; 7];
        key0.copy_from_slice(&response_key_lm[0..7]);
        let key1 = [response_key_lm[7], 0xBD, 0xBD, 0xBD, 0xBD, 0xBD, 0xBD];

        let mut kx_key = [0u8; 16];
        kx_key[0..8].copy_from_slice(&des_encrypt(&key0, lm_block));
        kx_key[8..16].copy_from_slice(&des_encrypt(&key1, lm_block));
        kx_key
    } else if flags.contains(Flags::REQUEST_NON_NT_SESSION_KEY) {
        let mut kx_key = [0u8; 16];
        kx_key[0..8].copy_from_slice(&response_key_lm[0..8]);
        kx_key
    } else {
        *session_base_key
    }
}


/// Derives the signing key (`SIGNKEY`) for one side from the exported session key.
///
/// Only the extended session security MAC uses the signing key; the legacy MAC is keyed with the
/// sealing key alone.
pub fn sign_key(exported_session_key: &[u8; 16], side: Side) -> [u8; 16] {
    let magic = match side {
        Side::Client => CLIENT_SIGNING_MAGIC,
        Side::Server => SERVER_SIGNING_MAGIC,
    };
    let mut input = Vec::with_capacity(16 + magic.len());
    input.extend_from_slice(exported_session_key);
    input.extend_from_slice(magic);
    md5(&input)
}


/// A sealing key, which keys the RC4 cipher used to seal messages and to encrypt checksums.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SealKey {
    /// A 128-bit key.
    Full([u8; 16]),

    /// A key with 40 or 56 bits of entropy, padded with fixed bytes to 64 bits.
    Weakened([u8; 8]),
}
impl SealKey {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Full(key) => key,
            Self::Weakened(key) => key,
        }
    }

    /// Starts a new RC4 keystream keyed with this key.
    pub fn handle(&self) -> Rc4Handle {
        match self {
            Self::Full(key) => Rc4Handle::new(key),
            Self::Weakened(key) => Rc4Handle::new_weakened(key),
        }
    }

    /// Starts the RC4 keystream that protects the message with the given sequence number.
    ///
    /// In datagram (connectionless) mode with extended session security, each message is protected
    /// by its own keystream, keyed with the MD5 hash of the sealing key and the sequence number. In
    /// all other modes, this is the same as [`SealKey::handle`].
    pub fn handle_for(&self, flags: Flags, sequence: u32) -> Rc4Handle {
        let per_message = flags.contains(Flags::NEGOTIATE_EXTENDED_SESSIONSECURITY)
            && flags.contains(Flags::NEGOTIATE_DATAGRAM);
        if per_message {
            let mut input = Vec::with_capacity(self.as_bytes().len() + 4);
            input.extend_from_slice(self.as_bytes());
            input.extend_from_slice(&sequence.to_le_bytes());
            Rc4Handle::new(&md5(&input))
        } else {
            self.handle()
        }
    }
}


/// Derives the sealing key (`SEALKEY`) for one side from the exported session key.
///
/// With extended session security, the key is an MD5 hash over a prefix of the exported session key
/// (16, 7 or 5 bytes, according to the negotiated key strength) and a side-specific constant. Else,
/// if the LM key is negotiated, the exported session key is weakened to 56 or 40 bits and padded
/// to 8 bytes. Otherwise, the exported session key is used unchanged.
pub fn seal_key(flags: Flags, exported_session_key: &[u8; 16], side: Side) -> SealKey {
    if flags.contains(Flags::NEGOTIATE_EXTENDED_SESSIONSECURITY) {
        let prefix_len = if flags.contains(Flags::NEGOTIATE_128) {
            16
        } else if flags.contains(Flags::NEGOTIATE_56) {
            7
        } else {
            5
        };
        let magic = match side {
            Side::Client => CLIENT_SEALING_MAGIC,
            Side::Server => SERVER_SEALING_MAGIC,
        };
        debug!(prefix_len, ?side, "deriving sealing key with extended session security");

        let mut input = Vec::with_capacity(prefix_len + magic.len());
        input.extend_from_slice(&exported_session_key[0..prefix_len]);
        input.extend_from_slice(magic);
        SealKey::Full(md5(&input))
    } else if flags.contains(Flags::NEGOTIATE_LM_KEY) {
        let mut key = [0u8; 8];
        if flags.contains(Flags::NEGOTIATE_56) {
            key[0..7].copy_from_slice(&exported_session_key[0..7]);
            key[7] = 0xA0;
        } else {
            key[0..5].copy_from_slice(&exported_session_key[0..5]);
            key[5..8].copy_from_slice(&[0xE5, 0x38, 0xB0]);
        }
        debug!(?side, "deriving weakened sealing key from LM key");
        SealKey::Weakened(key)
    } else {
        SealKey::Full(*exported_session_key)
    }
}


/// A 16-byte NTLM message signature.
///
/// The layout is the version (always 1), followed either by the random pad and the encrypted
/// checksum (legacy scheme) or by the checksum (extended session security), followed by the
/// sequence number; all integers are little-endian.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Signature(pub [u8; 16]);
impl Signature {
    fn assemble(middle: [u8; 8], tail: [u8; 4]) -> Self {
        let mut bytes = [0u8; 16];
        bytes[0..4].copy_from_slice(&SIGNATURE_VERSION.to_le_bytes());
        bytes[4..12].copy_from_slice(&middle);
        bytes[12..16].copy_from_slice(&tail);
        Self(bytes)
    }

    fn u32_at(&self, offset: usize) -> u32 {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&self.0[offset..offset+4]);
        u32::from_le_bytes(buf)
    }

    pub fn version(&self) -> u32 {
        self.u32_at(0)
    }

    /// The random pad field of a legacy signature.
    pub fn random_pad(&self) -> u32 {
        self.u32_at(4)
    }

    /// The checksum of an extended session security signature.
    pub fn checksum(&self) -> [u8; 8] {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.0[4..12]);
        buf
    }

    /// The last four bytes, which carry the sequence number (encrypted, for legacy signatures).
    pub fn sequence(&self) -> u32 {
        self.u32_at(12)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}
impl fmt::Display for Signature {
    /// Formats the signature as 32 uppercase hexadecimal digits, as transported in SIP headers.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode_upper(self.0))
    }
}
impl FromStr for Signature {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 16];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}


/// Calculates the signature of a message using a fresh keystream.
///
/// This is the stateless form used by MS-SIP, where each message is signed independently.
pub fn mac(
    flags: Flags,
    message: &[u8],
    sign_key: &[u8; 16],
    seal_key: &SealKey,
    random_pad: u32,
    sequence: u32,
) -> Signature {
    let mut handle = seal_key.handle_for(flags, sequence);
    mac_continued(flags, message, sign_key, &mut handle, random_pad, sequence)
}

/// Calculates the signature of a message, continuing the given keystream.
///
/// With extended session security, the checksum is the truncated HMAC-MD5 of the sequence number
/// and the message; it is encrypted with the keystream only if key exchange is negotiated. Only the
/// eight checksum bytes consume keystream; the sequence number is stored in clear. Without
/// extended session security, the CRC-32 of the message is encrypted along with the sequence
/// number (see [`legacy_mac_with_crc`]).
pub fn mac_continued(
    flags: Flags,
    message: &[u8],
    sign_key: &[u8; 16],
    handle: &mut Rc4Handle,
    random_pad: u32,
    sequence: u32,
) -> Signature {
    if flags.contains(Flags::NEGOTIATE_EXTENDED_SESSIONSECURITY) {
        let mut hmac_md5 = new_hmac_md5(sign_key);
        hmac_md5.update(&sequence.to_le_bytes());
        hmac_md5.update(message);
        let digest = hmac_md5.finalize().into_bytes();

        let mut checksum = [0u8; 8];
        checksum.copy_from_slice(&digest[0..8]);
        if flags.contains(Flags::NEGOTIATE_KEY_EXCH) {
            handle.apply(&mut checksum);
        }
        trace!(sequence, "calculated extended session security MAC");
        Signature::assemble(checksum, sequence.to_le_bytes())
    } else {
        legacy_mac_with_crc(handle, crc32(message), random_pad, sequence)
    }
}

/// Calculates a legacy signature from a precalculated CRC-32 of the message.
///
/// The twelve bytes `0, crc, sequence` (little-endian) are encrypted with the keystream. The first
/// encrypted dword is discarded; the random pad is stored in its place unencrypted.
pub fn legacy_mac_with_crc(handle: &mut Rc4Handle, crc: u32, random_pad: u32, sequence: u32) -> Signature {
    let mut plain = [0u8; 12];
    plain[4..8].copy_from_slice(&crc.to_le_bytes());
    plain[8..12].copy_from_slice(&sequence.to_le_bytes());
    handle.apply(&mut plain);

    let mut middle = [0u8; 8];
    middle[0..4].copy_from_slice(&random_pad.to_le_bytes());
    middle[4..8].copy_from_slice(&plain[4..8]);
    let mut tail = [0u8; 4];
    tail.copy_from_slice(&plain[8..12]);

    trace!(sequence, "calculated legacy MAC");
    Signature::assemble(middle, tail)
}


/// Seals (encrypts and signs) a message.
///
/// The message is encrypted with the keystream first; the signature then continues the same
/// keystream.
///
/// Without extended session security, only the first message sealed on a handle has been checked
/// against Windows output.
pub fn seal(
    flags: Flags,
    message: &[u8],
    sign_key: &[u8; 16],
    handle: &mut Rc4Handle,
    random_pad: u32,
    sequence: u32,
) -> (Vec<u8>, Signature) {
    let sealed = handle.process(message);
    let signature = mac_continued(flags, message, sign_key, handle, random_pad, sequence);
    (sealed, signature)
}

/// Unseals (decrypts and verifies) a message sealed by [`seal`].
///
/// Returns `None` if the signature does not match the decrypted message.
pub fn unseal(
    flags: Flags,
    sealed: &[u8],
    sign_key: &[u8; 16],
    handle: &mut Rc4Handle,
    sequence: u32,
    signature: &Signature,
) -> Option<Vec<u8>> {
    let message = handle.process(sealed);
    let expected = mac_continued(flags, &message, sign_key, handle, signature.random_pad(), sequence);
    if &expected == signature {
        Some(message)
    } else {
        warn!(sequence, "sealed message failed verification");
        None
    }
}


/// Calculates the signature of an MS-SIP signing string, formatted as it is transported in SIP
/// headers.
pub fn sip_signature_make(
    flags: Flags,
    signing_string: &str,
    random_pad: u32,
    sign_key: &[u8; 16],
    seal_key: &SealKey,
) -> Signature {
    mac(flags, signing_string.as_bytes(), sign_key, seal_key, random_pad, SIP_SIGNATURE_SEQUENCE)
}

/// Compares a calculated signature with a received one.
///
/// Both are expected as 32 hexadecimal digits; letter case is ignored. Malformed input never
/// matches.
pub fn verify_signature(calculated: &str, received: &str) -> bool {
    match (Signature::from_str(calculated), Signature::from_str(received)) {
        (Ok(c), Ok(r)) => c == r,
        _ => false,
    }
}

/// Checks the signature a peer sent for an MS-SIP signing string.
///
/// The random pad of a legacy signature is not protected by the MAC and is taken over from the
/// received signature.
pub fn sip_signature_verify(
    flags: Flags,
    signing_string: &str,
    sign_key: &[u8; 16],
    seal_key: &SealKey,
    received: &str,
) -> bool {
    verify_received(flags, signing_string.as_bytes(), sign_key, seal_key, received, SIP_SIGNATURE_SEQUENCE)
}

/// Checks a signature received as text against a message signed with the given sequence number.
pub(crate) fn verify_received(
    flags: Flags,
    message: &[u8],
    sign_key: &[u8; 16],
    seal_key: &SealKey,
    received: &str,
    sequence: u32,
) -> bool {
    let received = match Signature::from_str(received) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "received signature is malformed");
            return false;
        },
    };
    let calculated = mac(flags, message, sign_key, seal_key, received.random_pad(), sequence);
    if calculated != received {
        warn!(sequence, "received signature does not match");
        return false;
    }
    true
}
