//! Configuration value types
//!
//! Represents data returned by providers before and after interpolation.
//! Values can be scalars (string, int, float, bool, null, binary),
//! sequences (arrays), mappings (objects), deferred expressions that are
//! resolved against the scope when a value leaves the engine, or tagged
//! values carried through from YAML tags.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use std::fmt;

use crate::error::{Error, Result};
use crate::key::Segment;

/// A configuration value that may contain unresolved interpolations
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// Null value
    #[default]
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value (may contain interpolations like %{scope("x")})
    String(String),
    /// Raw bytes, rendered as base64 in text outputs
    Binary(Vec<u8>),
    /// Sequence of values
    Sequence(Vec<Value>),
    /// Mapping of string keys to values, insertion order preserved
    Mapping(IndexMap<String, Value>),
    /// An expression resolved against the scope just before the value
    /// leaves the engine
    Deferred(String),
    /// A tagged value (YAML `!tag`), kept structural so merges see through it
    Typed(String, Box<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Value::String(_))
    }

    pub fn is_sequence(&self) -> bool {
        matches!(self, Value::Sequence(_))
    }

    pub fn is_mapping(&self) -> bool {
        matches!(self, Value::Mapping(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[Value]> {
        match self {
            Value::Sequence(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Mapping(m) => Some(m),
            _ => None,
        }
    }

    /// Returns the type name of this value
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Binary(_) => "binary",
            Value::Sequence(_) => "sequence",
            Value::Mapping(_) => "mapping",
            Value::Deferred(_) => "deferred",
            Value::Typed(..) => "typed",
        }
    }

    /// Navigate into this value along key segments.
    ///
    /// A sequence requires an in-range integer segment. A mapping accepts
    /// either kind; integer segments are stringified for the lookup since
    /// mapping keys are strings. A missing segment yields `None`.
    pub fn dig(&self, segments: &[Segment]) -> Option<&Value> {
        let mut current = self;
        for segment in segments {
            current = match (current, segment) {
                (Value::Sequence(seq), Segment::Index(ix)) => {
                    if *ix < 0 {
                        return None;
                    }
                    seq.get(*ix as usize)?
                }
                (Value::Mapping(map), Segment::Index(ix)) => map.get(ix.to_string().as_str())?,
                (Value::Mapping(map), Segment::Name(name)) => map.get(name.as_str())?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// True if any string leaf of this value contains an interpolation
    pub fn needs_interpolation(&self) -> bool {
        match self {
            Value::String(s) => s.contains("%{"),
            Value::Deferred(_) => true,
            Value::Sequence(seq) => seq.iter().any(Value::needs_interpolation),
            Value::Mapping(map) => map.values().any(Value::needs_interpolation),
            Value::Typed(_, inner) => inner.needs_interpolation(),
            _ => false,
        }
    }

    /// Convert from a parsed YAML value.
    ///
    /// YAML tags become `Typed`, except `!binary` whose payload is base64
    /// decoded into `Binary`.
    pub fn from_yaml(yaml: serde_yaml::Value) -> Result<Value> {
        Ok(match yaml {
            serde_yaml::Value::Null => Value::Null,
            serde_yaml::Value::Bool(b) => Value::Bool(b),
            serde_yaml::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_yaml::Value::String(s) => Value::String(s),
            serde_yaml::Value::Sequence(seq) => Value::Sequence(
                seq.into_iter()
                    .map(Value::from_yaml)
                    .collect::<Result<Vec<_>>>()?,
            ),
            serde_yaml::Value::Mapping(map) => {
                let mut out = IndexMap::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(yaml_key_to_string(k)?, Value::from_yaml(v)?);
                }
                Value::Mapping(out)
            }
            serde_yaml::Value::Tagged(tagged) => {
                let tag = tagged.tag.to_string();
                let inner = Value::from_yaml(tagged.value)?;
                if tag == "!binary" {
                    let text = inner
                        .as_str()
                        .ok_or_else(|| Error::parse("!binary tag requires a string payload"))?;
                    let bytes = BASE64
                        .decode(text.trim().as_bytes())
                        .map_err(|e| Error::parse(format!("invalid base64 in !binary: {}", e)))?;
                    Value::Binary(bytes)
                } else {
                    Value::Typed(tag, Box::new(inner))
                }
            }
        })
    }

    /// Convert from a parsed JSON value
    pub fn from_json(json: serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(seq) => {
                Value::Sequence(seq.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => {
                let mut out = IndexMap::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k, Value::from_json(v));
                }
                Value::Mapping(out)
            }
        }
    }

    /// Parse a YAML document into a value
    pub fn parse_yaml(text: &str) -> Result<Value> {
        let yaml: serde_yaml::Value =
            serde_yaml::from_str(text).map_err(|e| Error::parse(e.to_string()))?;
        Value::from_yaml(yaml)
    }

    /// Parse a JSON document into a value
    pub fn parse_json(text: &str) -> Result<Value> {
        let json: serde_json::Value =
            serde_json::from_str(text).map_err(|e| Error::parse(e.to_string()))?;
        Ok(Value::from_json(json))
    }
}

fn yaml_key_to_string(key: serde_yaml::Value) -> Result<String> {
    match key {
        serde_yaml::Value::String(s) => Ok(s),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        serde_yaml::Value::Bool(b) => Ok(b.to_string()),
        other => Err(Error::parse(format!(
            "unsupported mapping key type: {:?}",
            other
        ))),
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::String(s) => serializer.serialize_str(s),
            Value::Binary(bytes) => serializer.serialize_str(&BASE64.encode(bytes)),
            Value::Sequence(seq) => {
                let mut s = serializer.serialize_seq(Some(seq.len()))?;
                for v in seq {
                    s.serialize_element(v)?;
                }
                s.end()
            }
            Value::Mapping(map) => {
                let mut m = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map {
                    m.serialize_entry(k, v)?;
                }
                m.end()
            }
            Value::Deferred(expr) => serializer.serialize_str(expr),
            Value::Typed(_, inner) => inner.serialize(serializer),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{}", s),
            Value::Binary(bytes) => write!(f, "{}", BASE64.encode(bytes)),
            Value::Sequence(seq) => {
                write!(f, "[")?;
                for (i, v) in seq.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            Value::Mapping(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
            Value::Deferred(expr) => write!(f, "{}", expr),
            Value::Typed(_, inner) => write!(f, "{}", inner),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Sequence(v.into_iter().map(Into::into).collect())
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(m: IndexMap<String, Value>) -> Self {
        Value::Mapping(m)
    }
}
