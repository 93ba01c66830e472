//! Parsed application message.
//!
//! A [`Message`] wraps one validated [`Frame`] together with the values
//! hooks derive from it. Values are kept in insertion order; writing an
//! existing key replaces the value in place.

use crate::codec::Frame;
use crate::pipeline::id::ConnectionId;
use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Serialize, Serializer};
use std::sync::OnceLock;

/// A value derived from a frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric view; integers widen to `f64`.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(v) => f.write_str(v),
        }
    }
}

/// One parsed frame plus derived values.
pub struct Message {
    frame: Frame,
    connection_id: ConnectionId,
    timestamp_us: u64,
    sequence: u64,
    values: Vec<(String, Value)>,
    json: OnceLock<String>,
}

impl Message {
    pub fn new(frame: Frame, connection_id: ConnectionId, timestamp_us: u64, sequence: u64) -> Self {
        Self {
            frame,
            connection_id,
            timestamp_us,
            sequence,
            values: Vec::new(),
            json: OnceLock::new(),
        }
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn payload(&self) -> &[u8] {
        self.frame.payload()
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Arrival time in microseconds since the connection opened.
    pub fn timestamp_us(&self) -> u64 {
        self.timestamp_us
    }

    /// Per-connection frame counter, starting at 0.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn add_int_value(&mut self, key: impl Into<String>, value: i64) {
        self.set_value(key.into(), Value::Int(value));
    }

    pub fn add_float_value(&mut self, key: impl Into<String>, value: f64) {
        self.set_value(key.into(), Value::Float(value));
    }

    pub fn add_string_value(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.set_value(key.into(), Value::Text(value.into()));
    }

    pub fn set_value(&mut self, key: String, value: Value) {
        self.json.take();
        match self.values.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.values.push((key, value)),
        }
    }

    /// `None` when the key was never written.
    pub fn get_value(&self, key: &str) -> Option<&Value> {
        self.values.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn values(&self) -> &[(String, Value)] {
        &self.values
    }

    pub fn clear_values(&mut self) {
        self.json.take();
        self.values.clear();
    }

    /// Values as a JSON object, in insertion order. Computed once and cached
    /// until the next write.
    pub fn values_json(&self) -> &str {
        self.json.get_or_init(|| {
            serde_json::to_string(&OrderedValues(&self.values)).unwrap_or_else(|_| "{}".to_string())
        })
    }
}

impl Clone for Message {
    fn clone(&self) -> Self {
        Self {
            frame: self.frame.clone(),
            connection_id: self.connection_id,
            timestamp_us: self.timestamp_us,
            sequence: self.sequence,
            values: self.values.clone(),
            json: OnceLock::new(),
        }
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("connection_id", &self.connection_id)
            .field("sequence", &self.sequence)
            .field("timestamp_us", &self.timestamp_us)
            .field("frame", &self.frame)
            .field("values", &self.values)
            .finish()
    }
}

struct OrderedValues<'a>(&'a [(String, Value)]);

impl Serialize for OrderedValues<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("Message", 6)?;
        s.serialize_field("connection", &self.connection_id)?;
        s.serialize_field("sequence", &self.sequence)?;
        s.serialize_field("timestamp_us", &self.timestamp_us)?;
        s.serialize_field("offset", &self.frame.span().start)?;
        s.serialize_field("payload", &hex::encode_upper(self.frame.payload()))?;
        s.serialize_field("values", &OrderedValues(&self.values))?;
        s.end()
    }
}
