//! OEM encoding used on operating systems other than Windows.
//!
//! Other operating systems do not have a concept of an OEM code page. While a custom character set
//! may be chosen, the absolute majority of systems use UTF-8, which is also what MS-SIP clients on
//! these platforms feed into the LM hash.


/// Converts the given Rust string into an OEM string.
pub fn rust_string_to_oem(rust_str: &str) -> Option<Vec<u8>> {
    // naive UTF-8 conversion
    Some(Vec::from(rust_str.as_bytes()))
}

/// Converts the given OEM string into a Rust string.
pub fn oem_to_rust_string(oem_bytes: &[u8]) -> Option<String> {
    String::from_utf8(Vec::from(oem_bytes)).ok()
}
