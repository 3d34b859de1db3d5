//! Portable structured values.
//!
//! [`Value`] is the structural schema used for policy parameters, shared
//! metadata and the dynamic metadata handed back to the transport. It mirrors
//! a JSON/protobuf `Struct` value: null, bool, number, string, list or map.
//!
//! [`AnalyticsValue`] is what policies and the engine put into analytics
//! metadata. Besides plain structural values it carries typed collections
//! (header multimaps, string lists) that have no direct structural form.
//! Those are flattened to their canonical JSON string when the metadata is
//! emitted; analytics consumers downstream depend on that encoding.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Parameter / metadata map. Ordered so that serialized output is stable.
pub type Map = BTreeMap<String, Value>;

/// A structural value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<Value>),
    Map(Map),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Map> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<Map> for Value {
    fn from(m: Map) -> Self {
        Value::Map(m)
    }
}

impl From<Vec<Value>> for Value {
    fn from(l: Vec<Value>) -> Self {
        Value::List(l)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(s) => f.write_str(&s),
            Err(_) => f.write_str("<unprintable>"),
        }
    }
}

/// A value recorded into analytics metadata.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalyticsValue {
    /// Already in structural form.
    Structural(Value),
    /// A plain list of strings.
    StringList(Vec<String>),
    /// A string to list-of-strings map, e.g. a header set.
    Multimap(BTreeMap<String, Vec<String>>),
}

impl AnalyticsValue {
    /// Converts into the structural schema.
    ///
    /// Typed collections are not representable there and are encoded as a
    /// JSON string instead of being dropped.
    pub fn to_structural(&self) -> Value {
        match self {
            AnalyticsValue::Structural(v) => v.clone(),
            AnalyticsValue::StringList(list) => json_string(list),
            AnalyticsValue::Multimap(map) => json_string(map),
        }
    }
}

fn json_string<T: Serialize>(value: &T) -> Value {
    match serde_json::to_string(value) {
        Ok(s) => Value::String(s),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to encode analytics value");
            Value::Null
        }
    }
}

impl From<Value> for AnalyticsValue {
    fn from(v: Value) -> Self {
        AnalyticsValue::Structural(v)
    }
}

impl From<&str> for AnalyticsValue {
    fn from(s: &str) -> Self {
        AnalyticsValue::Structural(Value::from(s))
    }
}

impl From<String> for AnalyticsValue {
    fn from(s: String) -> Self {
        AnalyticsValue::Structural(Value::String(s))
    }
}

impl From<bool> for AnalyticsValue {
    fn from(b: bool) -> Self {
        AnalyticsValue::Structural(Value::Bool(b))
    }
}

impl From<f64> for AnalyticsValue {
    fn from(n: f64) -> Self {
        AnalyticsValue::Structural(Value::Number(n))
    }
}

impl From<Vec<String>> for AnalyticsValue {
    fn from(l: Vec<String>) -> Self {
        AnalyticsValue::StringList(l)
    }
}

impl From<BTreeMap<String, Vec<String>>> for AnalyticsValue {
    fn from(m: BTreeMap<String, Vec<String>>) -> Self {
        AnalyticsValue::Multimap(m)
    }
}
