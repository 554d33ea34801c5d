//! Named state-transformation functions.
//!
//! The cloud model carries transformation sources keyed by name
//! (`read.<parent>`, `write.<parent>`). The broker compiles them once at
//! startup and runs them against values flowing through read responses,
//! write requests and connector notifications.
//!
//! [`ScriptEngine`] is a capability interface; the crate ships a rhai-backed
//! implementation in [`engine`]. Values cross the boundary as the
//! language-neutral [`ScriptValue`].

pub mod engine;

use std::collections::BTreeMap;

use serde_json::{Map, Number, Value};

pub const EXECUTE_DEADLINE: std::time::Duration = std::time::Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("function not found: {0}")]
    NotFound(String),
    #[error("compile {name}: {message}")]
    Compile { name: String, message: String },
    #[error("execute {name}: {message}")]
    Runtime { name: String, message: String },
    #[error("unsupported script value: {0}")]
    Value(String),
}

/// Compile-once / execute-many transformation functions.
pub trait ScriptEngine: Send + Sync {
    /// Compile `source` under `name`, replacing any previous function.
    fn add(&self, name: &str, source: &str) -> Result<(), ScriptError>;

    /// Run the named function with `value` bound to `param`. Executions run
    /// in a fresh scope with a hard deadline.
    fn execute(&self, name: &str, value: ScriptValue) -> Result<ScriptValue, ScriptError>;
}

/// A language-neutral tagged value passed into and out of scripts.
///
/// `Bytes` exists because base64-decoded payloads enter scripts as raw
/// binary (for `binary_to_num`); when converted back to JSON, valid UTF-8
/// bytes become a string and anything else is re-encoded as base64.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<ScriptValue>),
    Map(BTreeMap<String, ScriptValue>),
}

impl ScriptValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else {
                    Self::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::String(s) => Self::Str(s),
            Value::Array(items) => Self::List(items.into_iter().map(Self::from_json).collect()),
            Value::Object(map) => Self::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub fn into_json(self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(b),
            Self::Int(i) => Value::Number(i.into()),
            Self::Float(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
            Self::Str(s) => Value::String(s),
            Self::Bytes(b) => match String::from_utf8(b) {
                Ok(s) => Value::String(s),
                Err(e) => {
                    use base64::Engine as _;
                    Value::String(base64::engine::general_purpose::STANDARD.encode(e.into_bytes()))
                }
            },
            Self::List(items) => Value::Array(items.into_iter().map(Self::into_json).collect()),
            Self::Map(map) => {
                let mut out = Map::new();
                for (k, v) in map {
                    out.insert(k, v.into_json());
                }
                Value::Object(out)
            }
        }
    }
}
