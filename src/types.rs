//! Core types for the record store.

use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;

/// Field value that callers send to mean "leave this field as it is".
pub const NOOP_SENTINEL: &str = "null";

/// A single schema-free record.
///
/// The store only interprets the uniqueness key field configured for the
/// record's kind; every other field is carried through untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    /// Create an empty record.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Build a record from any serializable value that encodes as a JSON object.
    pub fn json(value: &impl Serialize) -> Result<Self> {
        Self::from_value(serde_json::to_value(value)?)
    }

    /// Build a record from a JSON value.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(fields) => Ok(Self(fields)),
            other => Err(StoreError::InvalidRecord(format!(
                "expected a JSON object, got {}",
                json_type_name(&other)
            ))),
        }
    }

    /// Builder-style field assignment.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(field.into(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Get a field as a string slice, if present and a string.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    /// Value of the uniqueness key, or `InvalidRecord` if it is missing or not a string.
    pub fn key(&self, key_field: &str) -> Result<&str> {
        match self.0.get(key_field) {
            Some(Value::String(key)) => Ok(key),
            Some(other) => Err(StoreError::InvalidRecord(format!(
                "key field '{}' must be a string, got {}",
                key_field,
                json_type_name(other)
            ))),
            None => Err(StoreError::InvalidRecord(format!(
                "missing key field '{}'",
                key_field
            ))),
        }
    }

    /// Fill every field of `defaults` that this record does not set.
    pub fn apply_defaults(&mut self, defaults: &Record) {
        for (field, value) in defaults.fields() {
            if !self.0.contains_key(field) {
                self.0.insert(field.clone(), value.clone());
            }
        }
    }

    /// Iterate over fields in insertion order.
    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Record {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

/// A partial update: only the fields present are written.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecordPatch(Map<String, Value>);

impl RecordPatch {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Builder-style field assignment.
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    /// Builder-style assignment that skips `None`.
    pub fn set_opt(self, field: impl Into<String>, value: Option<impl Into<Value>>) -> Self {
        match value {
            Some(value) => self.set(field, value),
            None => self,
        }
    }

    /// Build a patch from request-shaped JSON.
    ///
    /// Fields whose value is the [`NOOP_SENTINEL`] string are dropped, so they
    /// leave the stored field untouched.
    pub fn from_wire(value: Value) -> Result<Self> {
        let fields = match value {
            Value::Object(fields) => fields,
            other => {
                return Err(StoreError::InvalidRecord(format!(
                    "patch must be a JSON object, got {}",
                    json_type_name(&other)
                )))
            }
        };

        Ok(Self(
            fields
                .into_iter()
                .filter(|(_, v)| v.as_str() != Some(NOOP_SENTINEL))
                .collect(),
        ))
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Write every patched field into `record`.
    pub fn apply_to(&self, record: &mut Record) {
        for (field, value) in &self.0 {
            record.set(field.clone(), value.clone());
        }
    }
}

/// SHA-256 digest of a recovery secret.
///
/// The token registry is keyed by digest so raw secrets are never retained.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SecretDigest(pub [u8; 32]);

impl SecretDigest {
    /// Compute the digest of a secret string.
    pub fn of(secret: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(secret.as_bytes());
        SecretDigest(hasher.finalize().into())
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for SecretDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretDigest({}...)", &self.to_hex()[..8])
    }
}

/// Record counts per kind.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub kinds: Vec<(String, usize)>,
    pub total_records: usize,
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
