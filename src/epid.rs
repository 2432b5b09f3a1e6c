//! Derivation of the stable instance UUID (`+sip.instance`) from an endpoint ID.


use sha1::{Digest, Sha1};
use uuid::{Builder, Uuid, Variant, Version};


/// The namespace under which endpoint IDs are hashed.
pub const EPID_NAMESPACE: Uuid = uuid::uuid!("fcacfb03-8a73-46ef-91b1-e5ebeeaba4fe");


/// Derives the UUID of an endpoint from its endpoint ID.
///
/// This is a name-based (SHA-1) UUID with a twist: both the namespace UUID fed into the hash and
/// the first three fields read from the digest use little-endian byte order.
pub fn uuid_from_epid(epid: &str) -> Uuid {
    let mut sha1 = Sha1::new();
    sha1.update(EPID_NAMESPACE.to_bytes_le());
    sha1.update(epid.as_bytes());
    let digest = sha1.finalize();

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[0..16]);

    Builder::from_bytes_le(bytes)
        .with_version(Version::Sha1)
        .with_variant(Variant::RFC4122)
        .into_uuid()
}

/// Derives the UUID of an endpoint from its endpoint ID and returns it in its lowercase hyphenated
/// text form.
pub fn generate_uuid_from_epid(epid: &str) -> String {
    uuid_from_epid(epid)
        .hyphenated()
        .to_string()
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_epid() {
        assert_eq!(generate_uuid_from_epid("01010101"), "4b1682a8-f968-5701-83fc-7c6741dc6697");
    }

    #[test]
    fn test_empty_epid() {
        assert_eq!(generate_uuid_from_epid(""), "ce9661a5-5f7f-50e1-9b6e-e02f092fca91");
    }

    #[test]
    fn test_deterministic_and_well_formed() {
        for epid in ["c8ca638a15", "1234567890", "01010101"] {
            let uuid = uuid_from_epid(epid);
            assert_eq!(uuid, uuid_from_epid(epid));
            assert_eq!(uuid.get_version(), Some(Version::Sha1));
            assert_eq!(uuid.get_variant(), Variant::RFC4122);
        }
        assert_ne!(uuid_from_epid("01010101"), uuid_from_epid("01010102"));
    }

    #[test]
    fn test_namespace_byte_order() {
        assert_eq!(
            EPID_NAMESPACE.to_bytes_le(),
            [0x03, 0xfb, 0xac, 0xfc, 0x73, 0x8a, 0xef, 0x46, 0x91, 0xb1, 0xe5, 0xeb, 0xee, 0xab, 0xa4, 0xfe],
        );
    }
}
