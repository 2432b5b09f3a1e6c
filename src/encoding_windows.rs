//! Windows-specific OEM encoding.
//!
//! On Windows, the LM hash is calculated over the password encoded in the configured OEM code page.
//! The operating system provides functions to convert from Unicode into this code page; we use
//! them to turn a Rust string (re-encoded as UTF-16) into the bytes fed to the LM hash, and to
//! decode strings of NTLM messages sent without Unicode support.


use windows::Win32::Foundation::BOOL;
use windows::Win32::Globalization::{
    CP_OEMCP, MB_ERR_INVALID_CHARS, MultiByteToWideChar, WC_NO_BEST_FIT_CHARS, WideCharToMultiByte,
};


/// Converts the given Rust string into an OEM string.
///
/// Returns `None` if the string contains characters the OEM code page cannot represent.
pub fn rust_string_to_oem(rust_str: &str) -> Option<Vec<u8>> {
    if rust_str.is_empty() {
        return Some(Vec::new());
    }

    let unicode: Vec<u16> = rust_str.encode_utf16().collect();

    // how many bytes will we require?
    let byte_count = unsafe {
        WideCharToMultiByte(
            CP_OEMCP,
            WC_NO_BEST_FIT_CHARS,
            &unicode,
            None,
            None,
            None,
        )
    };
    let byte_count_usize: usize = byte_count.try_into().ok()?;
    if byte_count_usize == 0 {
        return None;
    }

    let mut buf = vec![0u8; byte_count_usize];
    let mut used_default_char = BOOL(0);
    let bytes_written = unsafe {
        WideCharToMultiByte(
            CP_OEMCP,
            WC_NO_BEST_FIT_CHARS,
            &unicode,
            Some(buf.as_mut_slice()),
            None,
            Some(&mut used_default_char as *mut BOOL),
        )
    };
    let bytes_written_usize: usize = bytes_written.try_into().ok()?;
    if bytes_written_usize == 0 || used_default_char.as_bool() {
        // a character was replaced by '?'; such a password cannot be hashed faithfully
        return None;
    }
    buf.truncate(bytes_written_usize);

    Some(buf)
}


/// Converts the given OEM string into a Rust string.
///
/// Returns `None` if the bytes are not valid in the OEM code page.
pub fn oem_to_rust_string(oem_bytes: &[u8]) -> Option<String> {
    if oem_bytes.is_empty() {
        return Some(String::new());
    }

    let wide_char_count = unsafe {
        MultiByteToWideChar(CP_OEMCP, MB_ERR_INVALID_CHARS, oem_bytes, None)
    };
    let wide_char_count_usize: usize = wide_char_count.try_into().ok()?;
    if wide_char_count_usize == 0 {
        return None;
    }

    let mut buf = vec![0u16; wide_char_count_usize];
    let chars_written = unsafe {
        MultiByteToWideChar(CP_OEMCP, MB_ERR_INVALID_CHARS, oem_bytes, Some(buf.as_mut_slice()))
    };
    let chars_written_usize: usize = chars_written.try_into().ok()?;
    if chars_written_usize == 0 {
        return None;
    }
    buf.truncate(chars_written_usize);

    String::from_utf16(&buf).ok()
}
