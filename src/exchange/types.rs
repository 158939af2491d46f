use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Unique identifier of one exchange, a UUID v4 string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ExchangeId(pub String);

impl ExchangeId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for ExchangeId {
    fn default() -> Self {
        Self::new()
    }
}

/// A header value in one of the shapes dispatchers understand.
///
/// Deserialized untagged: JSON integers become `Int`, strings `Text`, arrays
/// of strings `Keys`, anything else is kept as `Json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum HeaderValue {
    Int(i64),
    Text(String),
    Keys(BTreeSet<String>),
    Json(Value),
}

impl HeaderValue {
    /// A blank string, an empty key set and JSON `null` or empty
    /// string/array/object are empty. Numbers and booleans never are.
    pub fn is_empty(&self) -> bool {
        match self {
            HeaderValue::Int(_) => false,
            HeaderValue::Text(text) => text.trim().is_empty(),
            HeaderValue::Keys(keys) => keys.is_empty(),
            HeaderValue::Json(value) => match value {
                Value::Null => true,
                Value::String(text) => text.trim().is_empty(),
                Value::Array(items) => items.is_empty(),
                Value::Object(fields) => fields.is_empty(),
                Value::Bool(_) | Value::Number(_) => false,
            },
        }
    }

    /// Short name of the shape, used in error messages.
    pub fn shape(&self) -> &'static str {
        match self {
            HeaderValue::Int(_) => "an integer",
            HeaderValue::Text(_) => "a string",
            HeaderValue::Keys(_) => "a set of keys",
            HeaderValue::Json(_) => "a JSON value",
        }
    }

    pub fn into_json(self) -> Value {
        match self {
            HeaderValue::Int(n) => Value::from(n),
            HeaderValue::Text(text) => Value::String(text),
            HeaderValue::Keys(keys) => Value::Array(keys.into_iter().map(Value::String).collect()),
            HeaderValue::Json(value) => value,
        }
    }
}

impl fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderValue::Int(n) => write!(f, "{}", n),
            HeaderValue::Text(text) => f.write_str(text),
            other => write!(f, "{}", other.clone().into_json()),
        }
    }
}

impl From<i64> for HeaderValue {
    fn from(value: i64) -> Self {
        HeaderValue::Int(value)
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        HeaderValue::Text(value.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        HeaderValue::Text(value)
    }
}

impl From<BTreeSet<String>> for HeaderValue {
    fn from(value: BTreeSet<String>) -> Self {
        HeaderValue::Keys(value)
    }
}

impl From<Value> for HeaderValue {
    fn from(value: Value) -> Self {
        HeaderValue::Json(value)
    }
}

/// Case-sensitive mapping from header name to value.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Headers(BTreeMap<String, HeaderValue>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&HeaderValue> {
        self.0.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<HeaderValue>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<HeaderValue> {
        self.0.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &HeaderValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<HeaderValue>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        )
    }
}

/// Headers plus body, as received from the pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub headers: Headers,
    /// `Value::Null` when the message carries no body.
    #[serde(default)]
    pub body: Value,
}

/// The write side of an exchange.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Outbound {
    pub headers: Headers,
    /// `None` until some stage writes a body. `Some(Value::Null)` is a written
    /// absent marker, e.g. a lookup that found nothing.
    pub body: Option<Value>,
}

/// One message travelling through the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Exchange {
    pub id: ExchangeId,
    pub inbound: Message,
    pub outbound: Outbound,
}

impl Exchange {
    pub fn new(headers: Headers, body: Value) -> Self {
        Self {
            id: ExchangeId::new(),
            inbound: Message { headers, body },
            outbound: Outbound::default(),
        }
    }

    pub fn set_out_body(&mut self, body: Value) {
        self.outbound.body = Some(body);
    }
}
