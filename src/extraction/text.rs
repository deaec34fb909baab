//! Free-text path: first integer-or-decimal token in a string.

use super::Candidate;

/// Scans for the first `\d+(\.\d+)?` token.
pub fn first_number(text: &str) -> Option<f64> {
    let bytes = text.as_bytes();
    let start = bytes.iter().position(u8::is_ascii_digit)?;

    let mut end = start;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }

    // Only take the fraction when a digit follows the dot ("3." stays "3").
    if end + 1 < bytes.len() && bytes[end] == b'.' && bytes[end + 1].is_ascii_digit() {
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
    }

    text[start..end].parse::<f64>().ok().filter(|v| v.is_finite())
}

pub fn extract_from_text(text: &str) -> Option<Candidate> {
    first_number(text).map(|value| Candidate {
        value,
        round_id: None,
    })
}
