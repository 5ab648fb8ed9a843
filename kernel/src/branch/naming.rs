//! Mapping between head names and job names.
//!
//! Job names must be usable as path segments, so characters that are
//! meaningful in paths or URLs are percent-encoded.

use super::RegistryError;

fn must_encode(c: char) -> bool {
    c.is_control() || matches!(c, '%' | '/' | '\\' | ':' | '?' | '#' | '*' | '<' | '>' | '|' | '"')
}

/// Checks that a head name can be materialized as a job.
///
/// # Errors
/// Returns `RegistryError::MalformedHead` for empty names, names made of dots
/// only, and names containing control characters.
pub fn validate_head_name(name: &str) -> Result<(), RegistryError> {
    let reason = if name.trim().is_empty() {
        Some("empty name")
    } else if name == "." || name == ".." {
        Some("reserved name")
    } else if name.chars().any(char::is_control) {
        Some("control character in name")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(RegistryError::MalformedHead {
            head: name.escape_debug().to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

/// Encodes a head name into a job name.
#[must_use]
pub fn encode_job_name(head: &str) -> String {
    let mut encoded = String::with_capacity(head.len());
    for c in head.chars() {
        if must_encode(c) {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                encoded.push_str(&format!("%{byte:02X}"));
            }
        } else {
            encoded.push(c);
        }
    }
    encoded
}

/// Decodes a job name produced by [`encode_job_name`].
///
/// Returns `None` if the name contains an invalid escape sequence.
#[must_use]
pub fn decode_job_name(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = name.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}
