use lapin::types::{AMQPValue, FieldTable};

use crate::error::DecodeError;

pub const X_DEATH_HEADER: &str = "x-death";

/// Where a dead-lettered message was headed before it died, taken from the
/// most recent `x-death` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeathRecord {
    pub original_exchange: String,
    /// String values of the entry's `routing-keys`, in order.
    pub candidate_routing_keys: Vec<String>,
    pub queue: Option<String>,
    pub reason: Option<String>,
    pub count: Option<i64>,
}

impl DeathRecord {
    /// The first candidate is the key the message was originally routed with.
    pub fn routing_key(&self) -> Option<&str> {
        self.candidate_routing_keys.first().map(String::as_str)
    }
}

pub fn decode(headers: Option<&FieldTable>) -> Result<DeathRecord, DecodeError> {
    let history = headers
        .and_then(|headers| field(headers, X_DEATH_HEADER))
        .ok_or(DecodeError::MissingHistory)?;

    let history = match history {
        AMQPValue::FieldArray(entries) => entries.as_slice(),
        _ => return Err(DecodeError::MalformedHistory),
    };

    // Newest death first.
    let entry = match history.first() {
        Some(AMQPValue::FieldTable(entry)) => entry,
        Some(_) => return Err(DecodeError::MalformedEntry),
        None => return Err(DecodeError::EmptyHistory),
    };

    let original_exchange = match field(entry, "exchange") {
        Some(value) => as_string(value).ok_or(DecodeError::MalformedField("exchange"))?,
        None => return Err(DecodeError::MissingField("exchange")),
    };

    let routing_keys = match field(entry, "routing-keys") {
        Some(AMQPValue::FieldArray(keys)) => keys.as_slice(),
        Some(_) => return Err(DecodeError::MalformedField("routing-keys")),
        None => return Err(DecodeError::MissingField("routing-keys")),
    };

    let candidate_routing_keys: Vec<String> = routing_keys.iter().filter_map(as_string).collect();
    if candidate_routing_keys.is_empty() {
        return Err(DecodeError::NoStringRoutingKey);
    }

    Ok(DeathRecord {
        original_exchange,
        candidate_routing_keys,
        queue: field(entry, "queue").and_then(as_string),
        reason: field(entry, "reason").and_then(as_string),
        count: field(entry, "count").and_then(as_integer),
    })
}

fn field<'a>(table: &'a FieldTable, name: &str) -> Option<&'a AMQPValue> {
    table
        .inner()
        .iter()
        .find(|(key, _)| key.as_str() == name)
        .map(|(_, value)| value)
}

fn as_string(value: &AMQPValue) -> Option<String> {
    match value {
        AMQPValue::LongString(value) => String::from_utf8(value.as_bytes().to_vec()).ok(),
        AMQPValue::ShortString(value) => Some(value.as_str().to_string()),
        _ => None,
    }
}

fn as_integer(value: &AMQPValue) -> Option<i64> {
    match value {
        AMQPValue::LongLongInt(count) => Some(*count),
        AMQPValue::LongInt(count) => Some(i64::from(*count)),
        AMQPValue::ShortInt(count) => Some(i64::from(*count)),
        _ => None,
    }
}
