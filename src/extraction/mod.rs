//! Turns intercepted payloads and DOM text into round candidates.
//!
//! Everything here is pure and total: any input, however malformed, yields
//! either a candidate or `None`. Callers feed untrusted page data straight in.

use serde_json::Value;

mod message;
mod text;

pub use message::{coerce_f64, extract_from_message, LIST_KEYS, ROUND_ID_KEYS, VALUE_KEYS};
pub use text::{extract_from_text, first_number};

/// One extracted observation.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub value: f64,
    pub round_id: Option<String>,
}

/// Best-effort JSON parse: the whole payload first, then from the first `[`
/// to recover framed payloads behind a prefix (e.g. `42["tick",{...}]`).
pub fn parse_payload(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }
    let start = trimmed.find('[')?;
    serde_json::from_str::<Value>(&trimmed[start..]).ok()
}

/// Raw captured payload: structured path when it parses, text scan otherwise.
pub fn extract_from_raw(raw: &str) -> Option<Candidate> {
    match parse_payload(raw) {
        Some(value) => extract_from_message(&value),
        None => extract_from_text(raw),
    }
}

/// Uses the page-side parse when present, falling back to the raw text.
pub fn extract_event(parsed: Option<&Value>, raw: &str) -> Option<Candidate> {
    match parsed {
        Some(value) if !value.is_null() => extract_from_message(value),
        _ => extract_from_raw(raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn raw_json_uses_structured_path() {
        let c = extract_from_raw(r#"{"multiplier": 2.35}"#).unwrap();
        assert_eq!(c.value, 2.35);
        assert_eq!(c.round_id, None);
    }

    #[test]
    fn raw_prefixed_array_is_recovered() {
        let c = extract_from_raw(r#"42["round_end",{"crash":4.1,"id":"r9"}]"#).unwrap();
        assert_eq!(c.value, 4.1);
        assert_eq!(c.round_id.as_deref(), Some("r9"));
    }

    #[test]
    fn parsed_json_without_value_does_not_fall_back_to_text() {
        // The digits belong to a timestamp, not a result.
        assert_eq!(extract_from_raw(r#"{"ts": 1712345678}"#), None);
    }

    #[test]
    fn unparseable_raw_falls_back_to_text() {
        assert_eq!(extract_from_raw("2.35x").map(|c| c.value), Some(2.35));
        assert_eq!(extract_from_raw("no numbers here"), None);
        assert_eq!(extract_from_raw("{broken json 3.3"), Some(Candidate { value: 3.3, round_id: None }));
    }

    #[test]
    fn page_side_parse_takes_priority() {
        let parsed = json!({"crash": 1.8});
        let c = extract_event(Some(&parsed), "garbage 9.9").unwrap();
        assert_eq!(c.value, 1.8);

        let c = extract_event(Some(&Value::Null), r#"{"x": 6}"#).unwrap();
        assert_eq!(c.value, 6.0);
    }

    #[test]
    fn arbitrary_input_never_panics() {
        let inputs = [
            "", "[", "]", "[[[[", "{\"a\":", "\u{0}", "42[", "[1,{", "null", "true",
            "1e999", "-", ".5", "[\"e\", null]",
        ];
        for input in inputs {
            let _ = extract_from_raw(input);
        }
    }
}
