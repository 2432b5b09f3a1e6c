//! Calculation of the LM and NT challenge responses and of the session base key.


use chrono::{NaiveDate, Utc};
use hmac::Mac;

use crate::{Flags, NtlmVersion};
use crate::crypto::{desl, md4, md5, new_hmac_md5};
use crate::keys::ResponseKeys;


/// The length of the fixed part of the NTLMv2 client blob (everything except the target
/// information).
pub const NTLM_V2_BLOB_FIXED_LEN: usize = 32;

/// The length of the HMAC value (`NTProofStr`) at the start of an NTLMv2 NT response.
pub const NT_PROOF_LEN: usize = 16;


/// The response to an NTLM challenge.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ChallengeResponse {
    /// The classic LanManager (LM) response.
    pub lm_response: [u8; 24],

    /// The NT LanManager (NTLM) response.
    ///
    /// 24 bytes long for NTLMv1. For NTLMv2, it is `16 + 32 + target_info.len()` bytes long and
    /// starts with the 16-byte HMAC value, followed by the client blob.
    pub ntlm_response: Vec<u8>,

    /// The session base key, from which the key exchange key is derived.
    pub session_base_key: [u8; 16],
}
impl ChallengeResponse {
    /// Returns the `NTProofStr` of an NTLMv2 response (the first 16 bytes of the NT response).
    ///
    /// Returns `None` for NTLMv1 responses.
    pub fn nt_proof(&self) -> Option<&[u8]> {
        if self.ntlm_response.len() >= NT_PROOF_LEN + NTLM_V2_BLOB_FIXED_LEN {
            Some(&self.ntlm_response[0..NT_PROOF_LEN])
        } else {
            None
        }
    }
}


/// Obtains the current NTLM timestamp: tenths of a microsecond since 1601-01-01T00:00:00Z.
pub fn ntlm_time() -> u64 {
    let windows_epoch = NaiveDate::from_ymd_opt(1601, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc());
    let windows_epoch = match windows_epoch {
        Some(we) => we,
        None => return 0,
    };
    let delta = Utc::now() - windows_epoch;
    // the requested format is "tenths of a microsecond"
    delta.num_microseconds()
        .and_then(|us| us.checked_mul(10))
        .and_then(|ticks| ticks.try_into().ok())
        .unwrap_or(0)
}


/// Assembles the NTLMv2 client blob (`temp` in MS-NLMP) that is HMACed into the NT response.
///
/// The layout is: response version (1), high response version (1), six zero bytes, the timestamp
/// (little-endian), the client challenge, four zero bytes, the target information as supplied by
/// the server, and four zero bytes.
pub fn ntlm_v2_blob(time: u64, client_challenge: [u8; 8], target_info: &[u8]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(NTLM_V2_BLOB_FIXED_LEN + target_info.len());
    blob.push(0x01); // response version
    blob.push(0x01); // highest supported response version
    blob.extend_from_slice(&[0u8; 6]);
    blob.extend_from_slice(&time.to_le_bytes());
    blob.extend_from_slice(&client_challenge);
    blob.extend_from_slice(&[0u8; 4]);
    blob.extend_from_slice(target_info);
    blob.extend_from_slice(&[0u8; 4]);
    blob
}


/// Calculates the LM and NT responses to a server challenge, as well as the session base key.
///
/// The NTLM version and the extended session security flag decide which algorithm is used; they
/// are never inferred from the shape of the challenge. `time` and `target_info` are only used by
/// NTLMv2 and ignored for NTLMv1.
///
/// The flags passed here must be the same ones later passed to the key derivation and signing
/// functions; a mismatch does not fail but leads to signatures the peer will reject.
pub fn compute_response(
    version: NtlmVersion,
    flags: Flags,
    keys: &ResponseKeys,
    server_challenge: [u8; 8],
    client_challenge: [u8; 8],
    time: u64,
    target_info: &[u8],
) -> ChallengeResponse {
    match version {
        NtlmVersion::V1 => compute_response_v1(flags, keys, server_challenge, client_challenge),
        NtlmVersion::V2 => compute_response_v2(keys, server_challenge, client_challenge, time, target_info),
    }
}

fn compute_response_v1(
    flags: Flags,
    keys: &ResponseKeys,
    server_challenge: [u8; 8],
    client_challenge: [u8; 8],
) -> ChallengeResponse {
    let (lm_response, ntlm_response) = if flags.contains(Flags::NEGOTIATE_EXTENDED_SESSIONSECURITY) {
        // the NT response answers a challenge mixed from both sides;
        // the LM response field only transports the client challenge
        let mut challenges = [0u8; 16];
        challenges[0..8].copy_from_slice(&server_challenge);
        challenges[8..16].copy_from_slice(&client_challenge);
        let digest = md5(&challenges);

        let mut desl_plaintext = [0u8; 8];
        desl_plaintext.copy_from_slice(&digest[0..8]);

        let mut lm_response = [0u8; 24];
        lm_response[0..8].copy_from_slice(&client_challenge);

        (lm_response, desl(&keys.nt, desl_plaintext))
    } else {
        (desl(&keys.lm, server_challenge), desl(&keys.nt, server_challenge))
    };

    ChallengeResponse {
        lm_response,
        ntlm_response: Vec::from(ntlm_response),
        session_base_key: md4(&keys.nt),
    }
}

fn compute_response_v2(
    keys: &ResponseKeys,
    server_challenge: [u8; 8],
    client_challenge: [u8; 8],
    time: u64,
    target_info: &[u8],
) -> ChallengeResponse {
    let blob = ntlm_v2_blob(time, client_challenge, target_info);

    let nt_proof_string: [u8; 16] = {
        let mut hmac_md5 = new_hmac_md5(&keys.nt);
        hmac_md5.update(&server_challenge);
        hmac_md5.update(&blob);
        hmac_md5.finalize().into_bytes().into()
    };

    let mut ntlm_response = Vec::with_capacity(NT_PROOF_LEN + blob.len());
    ntlm_response.extend_from_slice(&nt_proof_string);
    ntlm_response.extend_from_slice(&blob);

    let mut lm_response = [0u8; 24];
    {
        let mut hmac_md5 = new_hmac_md5(&keys.lm);
        hmac_md5.update(&server_challenge);
        hmac_md5.update(&client_challenge);
        lm_response[0..16].copy_from_slice(hmac_md5.finalize().into_bytes().as_slice());
    }
    lm_response[16..24].copy_from_slice(&client_challenge);

    let session_base_key: [u8; 16] = {
        let mut hmac_md5 = new_hmac_md5(&keys.nt);
        hmac_md5.update(&nt_proof_string);
        hmac_md5.finalize().into_bytes().into()
    };

    ChallengeResponse {
        lm_response,
        ntlm_response,
        session_base_key,
    }
}
