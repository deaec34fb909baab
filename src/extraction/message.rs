//! Structured message path: pulls a round result out of a JSON payload whose
//! shape is not known up front.

use serde_json::{Map, Value};

use super::Candidate;

/// Keys that carry the round result, in lookup priority.
pub const VALUE_KEYS: &[&str] = &[
    "multiplier",
    "crash",
    "crashPoint",
    "crash_point",
    "result",
    "coefficient",
    "coef",
    "odds",
    "value",
    "x",
];

/// Keys that carry an external round identifier, in lookup priority.
pub const ROUND_ID_KEYS: &[&str] = &["round_id", "roundId", "gameId", "game_id", "id"];

/// Keys under which a payload may nest its list of recent rounds.
pub const LIST_KEYS: &[&str] = &["rounds", "history", "results", "data", "items", "games"];

/// The payload shapes the extractor understands, in precedence order.
#[derive(Debug)]
enum MessageShape<'a> {
    /// A mapping that may hold a value key directly.
    Keyed(&'a Map<String, Value>),
    /// A mapping with a nested list of round records.
    NestedList(&'a [Value]),
    /// `[event_name, payload]` framing.
    Framed(&'a Map<String, Value>),
    /// A bare list of round records.
    SequenceOfMappings(&'a [Value]),
}

impl<'a> MessageShape<'a> {
    fn resolve(&self) -> Option<Candidate> {
        match self {
            MessageShape::Keyed(map) => lookup(map),
            MessageShape::NestedList(items) => match items.last() {
                Some(Value::Object(map)) => lookup(map),
                _ => None,
            },
            MessageShape::Framed(map) => lookup_with_nested(map),
            MessageShape::SequenceOfMappings(items) => items.iter().rev().find_map(|item| {
                item.as_object().and_then(lookup)
            }),
        }
    }
}

fn classify(payload: &Value) -> Vec<MessageShape<'_>> {
    let mut shapes = Vec::new();
    match payload {
        Value::Object(map) => {
            shapes.push(MessageShape::Keyed(map));
            if let Some(items) = nested_list(map) {
                shapes.push(MessageShape::NestedList(items));
            }
        }
        Value::Array(items) => {
            if let Some(Value::Object(map)) = items.get(1) {
                shapes.push(MessageShape::Framed(map));
            }
            if items.iter().any(Value::is_object) {
                shapes.push(MessageShape::SequenceOfMappings(items));
            }
        }
        _ => {}
    }
    shapes
}

/// Runs the decision table; the first shape that yields a value wins.
pub fn extract_from_message(payload: &Value) -> Option<Candidate> {
    classify(payload).iter().find_map(MessageShape::resolve)
}

fn nested_list(map: &Map<String, Value>) -> Option<&[Value]> {
    LIST_KEYS
        .iter()
        .find_map(|key| map.get(*key).and_then(Value::as_array))
        .map(Vec::as_slice)
}

fn lookup_with_nested(map: &Map<String, Value>) -> Option<Candidate> {
    lookup(map).or_else(|| match nested_list(map)?.last() {
        Some(Value::Object(inner)) => lookup(inner),
        _ => None,
    })
}

/// Only the first present value key counts; if it does not coerce, the
/// mapping yields nothing here and the next shape gets its turn.
fn lookup(map: &Map<String, Value>) -> Option<Candidate> {
    let value = VALUE_KEYS
        .iter()
        .find_map(|key| map.get(*key))
        .and_then(coerce_f64)?;

    Some(Candidate {
        value,
        round_id: round_id(map),
    })
}

fn round_id(map: &Map<String, Value>) -> Option<String> {
    ROUND_ID_KEYS.iter().find_map(|key| match map.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Numbers pass through; strings like `"2.35"` or `"2.35x"` are parsed.
pub fn coerce_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let trimmed = s.trim();
            let trimmed = trimmed
                .strip_suffix('x')
                .or_else(|| trimmed.strip_suffix('X'))
                .unwrap_or(trimmed)
                .trim_end();
            trimmed.parse::<f64>().ok()
        }
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn extract(payload: Value) -> Option<(f64, Option<String>)> {
        extract_from_message(&payload).map(|c| (c.value, c.round_id))
    }

    #[test]
    fn keyed_mapping() {
        assert_eq!(extract(json!({"multiplier": 2.35})), Some((2.35, None)));
    }

    #[test]
    fn framed_event_with_round_id() {
        assert_eq!(
            extract(json!(["round_end", {"crash": 4.1, "id": "r9"}])),
            Some((4.1, Some("r9".into())))
        );
    }

    #[test]
    fn mapping_without_value_keys_yields_nothing() {
        assert_eq!(extract(json!({"type": "ping", "ts": 12345})), None);
        assert_eq!(extract(json!({})), None);
    }

    #[test]
    fn failed_coercion_does_not_try_later_keys() {
        assert_eq!(extract(json!({"multiplier": "pending", "value": 5})), None);
        assert_eq!(extract(json!({"multiplier": "pending", "crash": "3.5x"})), None);
    }

    #[test]
    fn later_key_used_when_earlier_keys_absent() {
        assert_eq!(extract(json!({"status": "end", "crash": "3.5x"})), Some((3.5, None)));
    }

    #[test]
    fn failed_coercion_falls_through_to_nested_list() {
        assert_eq!(
            extract(json!({"multiplier": null, "history": [{"crash": 1.2}, {"crash": 5.0, "roundId": 77}]})),
            Some((5.0, Some("77".into())))
        );
    }

    #[test]
    fn direct_key_beats_nested_list() {
        assert_eq!(
            extract(json!({"multiplier": 2.0, "rounds": [{"multiplier": 9.0}]})),
            Some((2.0, None))
        );
    }

    #[test]
    fn nested_list_uses_only_last_entry() {
        assert_eq!(
            extract(json!({"rounds": [{"multiplier": 1.5}, {"status": "running"}]})),
            None
        );
    }

    #[test]
    fn sequence_of_mappings_scans_backward() {
        assert_eq!(
            extract(json!([{"x": 1.1}, {"x": 2.2}, {"noise": true}])),
            Some((2.2, None))
        );
    }

    #[test]
    fn framed_payload_with_nested_list() {
        assert_eq!(
            extract(json!(["history", {"results": [{"coef": "1.9", "game_id": "g1"}]}])),
            Some((1.9, Some("g1".into())))
        );
    }

    #[test]
    fn scalars_and_odd_shapes_yield_nothing() {
        assert_eq!(extract(json!(42)), None);
        assert_eq!(extract(json!("2.5")), None);
        assert_eq!(extract(json!(null)), None);
        assert_eq!(extract(json!([1, 2, 3])), None);
        assert_eq!(extract(json!(["evt", "payload"])), None);
        assert_eq!(extract(json!({"multiplier": true})), None);
    }
}
