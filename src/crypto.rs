//! Cryptographic primitives the NTLM computations are built from.
//!
//! Hashing and DES are delegated to the RustCrypto crates; this module pins down the input and
//! output sizes NTLM works with and provides [`Rc4Handle`], an RC4 keystream that may be carried
//! over from one call to the next.


use std::fmt;

use cipher::{BlockEncrypt, KeyInit, StreamCipher};
use cipher::generic_array::GenericArray;
use cipher::generic_array::typenum::{U8, U16};
use des::Des;
use digest::Digest;
use hmac::{Hmac, Mac};
use md4::Md4;
use md5::Md5;
use rc4::Rc4;


/// Calculates the MD4 digest (RFC 1320) of the given data.
pub fn md4(data: &[u8]) -> [u8; 16] {
    let mut md4_state = <Md4 as Digest>::new();
    md4_state.update(data);
    md4_state.finalize().into()
}

/// Calculates the MD5 digest (RFC 1321) of the given data.
pub fn md5(data: &[u8]) -> [u8; 16] {
    let mut md5_state = <Md5 as Digest>::new();
    md5_state.update(data);
    md5_state.finalize().into()
}

/// Calculates the HMAC-MD5 value (RFC 2104) of the given data using the given key.
pub fn hmac_md5(key: &[u8], data: &[u8]) -> [u8; 16] {
    let mut hmac_md5 = new_hmac_md5(key);
    hmac_md5.update(data);
    hmac_md5.finalize().into_bytes().into()
}

/// Prepares an HMAC-MD5 state for callers that feed the data in several pieces.
pub(crate) fn new_hmac_md5(key: &[u8]) -> Hmac<Md5> {
    <Hmac<Md5> as Mac>::new_from_slice(key)
        .expect("HMAC accepts keys of any length")
}

/// Calculates the CRC-32 checksum (reflected polynomial 0xEDB88320) of the given data.
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Encrypts (or, equivalently, decrypts) the data using a freshly keyed RC4 cipher.
///
/// This is the `RC4K` function of MS-NLMP. To continue a keystream across multiple calls, use an
/// [`Rc4Handle`] instead.
pub fn rc4k(key: &[u8; 16], data: &[u8]) -> Vec<u8> {
    Rc4Handle::new(key).process(data)
}


/// A running RC4 keystream.
///
/// Creating a handle runs the RC4 key schedule. Every call to [`Rc4Handle::apply`] or
/// [`Rc4Handle::process`] continues the keystream at the position where the previous call stopped;
/// to restart the keystream, create a new handle from the same key.
///
/// A handle is owned by exactly one logical stream (for example, one direction of one session) and
/// must not be shared between streams.
pub struct Rc4Handle {
    cipher: Rc4Cipher,
}

enum Rc4Cipher {
    Weakened(Rc4<U8>),
    Full(Rc4<U16>),
}

impl Rc4Handle {
    /// Creates a keystream from a full 128-bit key.
    pub fn new(key: &[u8; 16]) -> Self {
        let rc4 = <Rc4<U16> as KeyInit>::new(GenericArray::from_slice(key));
        Self { cipher: Rc4Cipher::Full(rc4) }
    }

    /// Creates a keystream from a weakened 64-bit key (40-bit or 56-bit of entropy padded with
    /// fixed bytes).
    pub fn new_weakened(key: &[u8; 8]) -> Self {
        let rc4 = <Rc4<U8> as KeyInit>::new(GenericArray::from_slice(key));
        Self { cipher: Rc4Cipher::Weakened(rc4) }
    }

    /// Encrypts or decrypts the data in place, advancing the keystream by `data.len()` bytes.
    pub fn apply(&mut self, data: &mut [u8]) {
        match &mut self.cipher {
            Rc4Cipher::Weakened(rc4) => rc4.apply_keystream(data),
            Rc4Cipher::Full(rc4) => rc4.apply_keystream(data),
        }
    }

    /// Encrypts or decrypts a copy of the data, advancing the keystream by `data.len()` bytes.
    pub fn process(&mut self, data: &[u8]) -> Vec<u8> {
        let mut buf = Vec::from(data);
        self.apply(&mut buf);
        buf
    }
}
impl fmt::Debug for Rc4Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key_bits = match self.cipher {
            Rc4Cipher::Weakened(_) => 64,
            Rc4Cipher::Full(_) => 128,
        };
        f.debug_struct("Rc4Handle")
            .field("key_bits", &key_bits)
            .finish_non_exhaustive()
    }
}


/// Spreads 56 key bits over the 8 bytes of a DES key, leaving the (ignored) parity bits zero.
fn des_expand_key(key: &[u8; 7]) -> [u8; 8] {
    [
        key[0],
        (key[0] << 7) | (key[1] >> 1),
        (key[1] << 6) | (key[2] >> 2),
        (key[2] << 5) | (key[3] >> 3),
        (key[3] << 4) | (key[4] >> 4),
        (key[4] << 3) | (key[5] >> 5),
        (key[5] << 2) | (key[6] >> 6),
        key[6] << 1,
    ].map(|b| b & 0xFE)
}

/// Encrypts a single 8-byte block with DES, using a 7-byte key.
pub(crate) fn des_encrypt(key: &[u8; 7], block: [u8; 8]) -> [u8; 8] {
    let expanded_key = des_expand_key(key);
    let des_state = Des::new(GenericArray::from_slice(&expanded_key));

    let mut buf: GenericArray<u8, U8> = GenericArray::from(block);
    des_state.encrypt_block(&mut buf);
    buf.into()
}

/// Performs the NTLMv1 DES encryption (`DESL`) to calculate a response value to a challenge.
///
/// The 16-byte key is padded to 21 bytes and split into three 7-byte DES keys, each of which
/// encrypts the same 8-byte challenge; the three results are concatenated.
pub fn desl(key: &[u8; 16], data: [u8; 8]) -> [u8; 24] {
    let mut padded_key = [0u8; 21];
    padded_key[0..16].copy_from_slice(key);

    let mut ret = [0u8; 24];
    for (i, chunk) in ret.chunks_exact_mut(8).enumerate() {
        let mut sub_key = [0u8; 7];
        sub_key.copy_from_slice(&padded_key[7*i..7*(i+1)]);
        chunk.copy_from_slice(&des_encrypt(&sub_key, data));
    }
    ret
}
