//! Free-text events
//!
//! Revision 2 legacy logs record each event as a line of text instead of a
//! typed payload, for example `Riding: V_(Pack: 110V, Cell: 3.9V)`. A line is
//! split into a message and its conditions, and the condition shapes the
//! firmware uses repeatedly are broken out into individual fields.

use super::fields::compact_hex;
use super::DecodedPayload;
use crate::types::{FieldValue, Fields};

/// Type code reported for free-text events, which carry none on the wire
pub const TEXT_EVENT_CODE: u8 = 0x00;

/// Separates the text of an event from an optional binary tail
const DATA_SEPARATOR: [u8; 2] = [0x00, 0xB2];

/// Message used when the text is too short to mean anything
const UNKNOWN_MESSAGE: &str = "Unknown";

/// Decode the text and binary tail that follow an event's fencepost
///
/// The message becomes the entry name. Parsed conditions become text fields;
/// conditions that match no known shape are kept whole in `conditions`.
pub fn decode_text_event(payload: &[u8]) -> DecodedPayload {
    let text = clean_text(payload);
    let event = parse_event(&text);

    let mut fields = event.values;
    fields.insert("message".to_string(), FieldValue::Text(event.message.clone()));
    if !event.conditions.is_empty() {
        fields.insert("conditions".to_string(), FieldValue::Text(event.conditions));
    }
    if let Some(pos) = memchr::memmem::find(payload, &DATA_SEPARATOR) {
        let data = &payload[pos + DATA_SEPARATOR.len()..];
        if !data.is_empty() {
            fields.insert("data".to_string(), FieldValue::Text(compact_hex(data)));
        }
    }

    DecodedPayload {
        name: event.message,
        fields,
        truncated: false,
        min_len: 0,
        known: true,
    }
}

/// Printable text up to the first NUL, with line breaks flattened
fn clean_text(payload: &[u8]) -> String {
    let raw = payload.split(|&b| b == 0).next().unwrap_or_default();
    String::from_utf8_lossy(raw)
        .chars()
        .map(|c| if matches!(c, '\t' | '\n' | '\r') { ' ' } else { c })
        .filter(|&c| !c.is_control() && c != char::REPLACEMENT_CHARACTER)
        .collect::<String>()
        .trim()
        .to_string()
}

#[derive(Debug, Default, PartialEq)]
struct TextEvent {
    message: String,
    /// Condition text not broken out into `values`
    conditions: String,
    values: Fields,
}

fn parse_event(text: &str) -> TextEvent {
    let mut event = TextEvent::default();

    if text.chars().count() < 2 {
        event.message = UNKNOWN_MESSAGE.to_string();
        return event;
    }

    if text.contains(". ") {
        // The last sentence holds the conditions
        let sentences: Vec<&str> = text.split(". ").collect();
        let (rest, last) = sentences.split_at(sentences.len() - 1);
        event.message = rest.join(". ");
        event.conditions = last.concat();
    } else if let Some(body) = text.strip_prefix("I_(") {
        match prefixed_values("I_", body, false) {
            Some(values) => {
                event.message = "Current".to_string();
                event.values = values;
            }
            None => event.message = text.to_string(),
        }
        return event;
    } else if let Some((message, conditions)) = text.split_once(": ") {
        event.message = message.to_string();
        event.conditions = conditions.to_string();
    } else if let Some((message, conditions)) = text.split_once(" = ") {
        event.message = message.to_string();
        event.conditions = conditions.to_string();
    } else if text.contains(" from ") && text.contains(" to ") {
        let (message, change) = text.split_once(" from ").unwrap_or((text, ""));
        event.message = message.to_string();
        match change.rsplit_once(" to ") {
            Some((from, to)) => {
                event.values.insert("from".to_string(), from.into());
                event.values.insert("to".to_string(), to.into());
            }
            None => event.conditions = change.to_string(),
        }
        return event;
    } else {
        match parenthesized(text) {
            Some((message, conditions)) => {
                event.message = message.to_string();
                event.conditions = conditions.to_string();
            }
            None => event.message = text.to_string(),
        }
    }

    split_conditions(&mut event);
    event
}

/// `message (conditions)` where neither part contains parentheses
fn parenthesized(text: &str) -> Option<(&str, &str)> {
    let open = text.find('(')?;
    let message = text[..open].strip_suffix(' ')?;
    let rest = &text[open + 1..];
    let close = rest.find(')')?;
    let inner = &rest[..close];
    let valid = !message.is_empty()
        && !message.contains(')')
        && !inner.is_empty()
        && !inner.contains('(');
    valid.then_some((message, inner))
}

/// Fields of a `PREFIX(key: value, ...)suffix` list, given the text after `PREFIX(`
///
/// The suffix is a unit shared by every value and is appended to each.
fn prefixed_values(prefix: &str, body: &str, trim_comma: bool) -> Option<Fields> {
    let close = body.rfind(')')?;
    let mut suffix = &body[close + 1..];
    if trim_comma {
        suffix = suffix.trim_end_matches(',');
    }

    let mut values = Fields::new();
    for part in body[..close].split(", ") {
        if let Some((key, value)) = part.split_once(": ") {
            values.insert(
                format!("{}{}", prefix, key),
                FieldValue::Text(format!("{}{}", value, suffix)),
            );
        }
    }
    Some(values)
}

/// Break recognised condition shapes out into fields
fn split_conditions(event: &mut TextEvent) {
    let conditions = event.conditions.as_str();

    if let Some(body) = conditions.strip_prefix("V_(") {
        if let Some(values) = prefixed_values("V_", body, true) {
            if !values.is_empty() {
                event.values = values;
                event.conditions.clear();
            }
        }
    } else if conditions.contains("Old: ") && conditions.contains("New: ") {
        if let Some((old, new)) = old_new_bits(conditions) {
            event.values.insert("old".to_string(), old.into());
            event.values.insert("new".to_string(), new.into());
            event.conditions.clear();
        }
    } else if conditions.contains(", ") {
        for part in conditions.split(", ").map(str::trim) {
            let (key, value) = match part.split_once(": ") {
                Some(pair) => pair,
                None => {
                    let words: Vec<&str> = part.split(' ').collect();
                    match words.as_slice() {
                        [key, value] => (*key, *value),
                        _ => (part, ""),
                    }
                }
            };
            event.values.insert(key.to_string(), value.into());
        }
        event.conditions.clear();
    }
}

/// `Old: 0x.. New: 0x..` rendered as bit strings of equal width
fn old_new_bits(conditions: &str) -> Option<(String, String)> {
    let start = conditions.find("Old: 0x")? + "Old: 0x".len();
    let (old, rest) = split_hex(&conditions[start..])?;
    let (new, _) = split_hex(rest.strip_prefix(" New: 0x")?)?;

    let width = bit_width(old).max(bit_width(new));
    Some((format!("{:0w$b}", old, w = width), format!("{:0w$b}", new, w = width)))
}

fn split_hex(text: &str) -> Option<(u64, &str)> {
    let len = text.find(|c: char| !c.is_ascii_hexdigit()).unwrap_or(text.len());
    let value = u64::from_str_radix(&text[..len], 16).ok()?;
    Some((value, &text[len..]))
}

fn bit_width(value: u64) -> usize {
    (u64::BITS - value.leading_zeros()).max(1) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(fields: &Fields, name: &str) -> Option<String> {
        fields.get(name).and_then(FieldValue::as_str).map(str::to_string)
    }

    #[test]
    fn test_voltage_list_conditions() {
        let decoded = decode_text_event(b"Riding: V_(Pack: 110, Cell: 3.9)V\0\0\0");
        assert_eq!(decoded.name, "Riding");
        assert_eq!(text(&decoded.fields, "V_Pack").as_deref(), Some("110V"));
        assert_eq!(text(&decoded.fields, "V_Cell").as_deref(), Some("3.9V"));
        assert!(decoded.fields.get("conditions").is_none());
    }

    #[test]
    fn test_current_list() {
        let decoded = decode_text_event(b"I_(Motor: 12, Pack: 40)A\0");
        assert_eq!(decoded.name, "Current");
        assert_eq!(text(&decoded.fields, "I_Motor").as_deref(), Some("12A"));
        assert_eq!(text(&decoded.fields, "I_Pack").as_deref(), Some("40A"));
    }

    #[test]
    fn test_sentences_keep_last_as_conditions() {
        let decoded = decode_text_event(b"Contactor was Closed. Bike On");
        assert_eq!(decoded.name, "Contactor was Closed");
        assert_eq!(text(&decoded.fields, "conditions").as_deref(), Some("Bike On"));

        let event = parse_event("One. Two. Three");
        assert_eq!(event.message, "One. Two");
        assert_eq!(event.conditions, "Three");
    }

    #[test]
    fn test_from_to_change() {
        let decoded = decode_text_event(b"Mode changed from Eco to Sport");
        assert_eq!(decoded.name, "Mode changed");
        assert_eq!(text(&decoded.fields, "from").as_deref(), Some("Eco"));
        assert_eq!(text(&decoded.fields, "to").as_deref(), Some("Sport"));
    }

    #[test]
    fn test_parenthesized_and_list_conditions() {
        let event = parse_event("Charger 6 Connected (SN 1234, Fw 17)");
        assert_eq!(event.message, "Charger 6 Connected");
        assert_eq!(event.values.get("SN").and_then(FieldValue::as_str), Some("1234"));
        assert_eq!(event.values.get("Fw").and_then(FieldValue::as_str), Some("17"));
        assert!(event.conditions.is_empty());
    }

    #[test]
    fn test_old_new_bits_are_aligned() {
        let event = parse_event("Fault flags changed: Old: 0x1 New: 0x1A");
        assert_eq!(event.message, "Fault flags changed");
        assert_eq!(event.values.get("old").and_then(FieldValue::as_str), Some("00001"));
        assert_eq!(event.values.get("new").and_then(FieldValue::as_str), Some("11010"));
    }

    #[test]
    fn test_plain_and_short_text() {
        let decoded = decode_text_event(b"Key On\0");
        assert_eq!(decoded.name, "Key On");
        assert_eq!(decoded.fields.len(), 1);

        let decoded = decode_text_event(b"\x01\0");
        assert_eq!(decoded.name, "Unknown");
    }

    #[test]
    fn test_binary_tail_is_kept_as_hex() {
        let decoded = decode_text_event(b"Stats\0\xB2\x01\x02\x03");
        assert_eq!(decoded.name, "Stats");
        assert_eq!(text(&decoded.fields, "data").as_deref(), Some("010203"));
    }
}
