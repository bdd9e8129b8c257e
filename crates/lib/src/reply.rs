//! Lenient extraction of the assistant's text from a chat endpoint payload.
//!
//! Backends disagree on the field name, and some answer with plain text. A present but
//! malformed reply is still shown to the user instead of failing the exchange.

use crate::message::EMPTY_REPLY_FALLBACK;
use serde_json::Value;

/// Field names tried in order on a JSON object payload.
pub const REPLY_FIELDS: [&str; 3] = ["reply", "text", "message"];

/// Extract reply text from a raw response body. Never returns an empty string.
///
/// Precedence: first non-blank string among [`REPLY_FIELDS`] of a JSON object; a bare JSON
/// string; the raw body when it is not JSON at all; otherwise [`EMPTY_REPLY_FALLBACK`].
pub fn extract_reply(payload: &str) -> String {
    let parsed = match serde_json::from_str::<Value>(payload) {
        Ok(v) => v,
        Err(_) => return non_blank(payload).unwrap_or_else(fallback),
    };
    match parsed {
        Value::Object(map) => REPLY_FIELDS
            .iter()
            .find_map(|field| map.get(*field).and_then(Value::as_str).and_then(non_blank))
            .unwrap_or_else(fallback),
        Value::String(s) => non_blank(&s).unwrap_or_else(fallback),
        _ => fallback(),
    }
}

fn non_blank(s: &str) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

fn fallback() -> String {
    EMPTY_REPLY_FALLBACK.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_field_wins() {
        assert_eq!(
            extract_reply(r#"{"message":"m","text":"t","reply":"r"}"#),
            "r"
        );
    }

    #[test]
    fn falls_through_blank_and_non_string_fields() {
        assert_eq!(extract_reply(r#"{"reply":"  ","text":42,"message":"m"}"#), "m");
        assert_eq!(extract_reply(r#"{"text":"t","message":"m"}"#), "t");
    }

    #[test]
    fn object_without_known_fields_uses_fallback() {
        assert_eq!(extract_reply(r#"{"answer":"x"}"#), EMPTY_REPLY_FALLBACK);
        assert_eq!(extract_reply("[1,2]"), EMPTY_REPLY_FALLBACK);
        assert_eq!(extract_reply("null"), EMPTY_REPLY_FALLBACK);
    }

    #[test]
    fn bare_json_string_is_the_reply() {
        assert_eq!(extract_reply(r#""take rest""#), "take rest");
    }

    #[test]
    fn non_json_body_is_used_raw() {
        assert_eq!(extract_reply("Plain answer\n"), "Plain answer");
        assert_eq!(extract_reply("   "), EMPTY_REPLY_FALLBACK);
        assert_eq!(extract_reply(""), EMPTY_REPLY_FALLBACK);
    }
}
