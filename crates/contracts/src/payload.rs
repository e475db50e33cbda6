//! Field access over decoded payload entries.
//!
//! Every layout decodes into the same [`JsonPayload`] entry type, so routing
//! and change detection look fields up by name instead of through per-layout
//! accessors.

use serde_json::Value;

use crate::ContractError;

/// Named field lookup on one payload entry.
///
/// Every accessor returns `None` when the field is absent, null, or cannot be
/// represented as the requested type.
pub trait FieldAccess {
    /// String form of a field. Numbers and booleans are rendered as text,
    /// arrays and objects as compact JSON.
    fn get_str(&self, key: &str) -> Option<String>;

    fn get_f64(&self, key: &str) -> Option<f64>;

    fn get_i64(&self, key: &str) -> Option<i64>;

    fn get_bool(&self, key: &str) -> Option<bool>;
}

/// One decoded entry of a payload (a single JSON object in practice)
#[derive(Debug, Clone, PartialEq)]
pub struct JsonPayload {
    value: Value,
}

impl JsonPayload {
    pub fn new(value: Value) -> Self {
        Self { value }
    }

    /// Decode a body into entries.
    ///
    /// An object yields one entry and an array yields one entry per element.
    /// Any other JSON value is rejected.
    pub fn entries(origin: &str, body: &[u8]) -> Result<Vec<JsonPayload>, ContractError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| ContractError::payload_parse(origin, e.to_string()))?;

        match value {
            Value::Array(items) => Ok(items.into_iter().map(JsonPayload::new).collect()),
            Value::Object(_) => Ok(vec![JsonPayload::new(value)]),
            other => Err(ContractError::payload_parse(
                origin,
                format!("expected a JSON object or array, got {}", kind_of(&other)),
            )),
        }
    }

    /// Decode a body that must be a JSON array, one entry per element
    pub fn array_entries(origin: &str, body: &[u8]) -> Result<Vec<JsonPayload>, ContractError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| ContractError::payload_parse(origin, e.to_string()))?;

        match value {
            Value::Array(items) => Ok(items.into_iter().map(JsonPayload::new).collect()),
            other => Err(ContractError::payload_parse(
                origin,
                format!("expected a JSON array, got {}", kind_of(&other)),
            )),
        }
    }

    pub fn as_value(&self) -> &Value {
        &self.value
    }

    fn field(&self, key: &str) -> Option<&Value> {
        match self.value.get(key) {
            None | Some(Value::Null) => None,
            Some(v) => Some(v),
        }
    }
}

impl From<Value> for JsonPayload {
    fn from(value: Value) -> Self {
        Self::new(value)
    }
}

impl FieldAccess for JsonPayload {
    fn get_str(&self, key: &str) -> Option<String> {
        match self.field(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            other => serde_json::to_string(other).ok(),
        }
    }

    fn get_f64(&self, key: &str) -> Option<f64> {
        match self.field(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn get_i64(&self, key: &str) -> Option<i64> {
        match self.field(key)? {
            Value::Number(n) => n.as_i64().or_else(|| {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                    .map(|f| f as i64)
            }),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        match self.field(key)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
