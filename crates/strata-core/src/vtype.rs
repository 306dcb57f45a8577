//! Declared value types
//!
//! Lookup options and the CLI can declare a type for the resolved value
//! (`String`, `Array[Integer]`, ...). Assertion is strict: a found value
//! that does not satisfy the declared type is an error, it is never
//! silently converted and the default is not substituted.

use std::fmt;

use crate::error::{Error, Result};
use crate::value::Value;

/// A declared type for a looked-up value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueType {
    Any,
    String,
    Integer,
    Float,
    Boolean,
    Binary,
    Array(Box<ValueType>),
    Hash(Box<ValueType>),
}

impl ValueType {
    /// Parse a type string such as `String` or `Array[Integer]`
    pub fn parse(s: &str) -> Result<ValueType> {
        let s = s.trim();
        if let Some(rest) = s.strip_prefix("Array") {
            return Ok(ValueType::Array(Box::new(parse_element(rest, s)?)));
        }
        if let Some(rest) = s.strip_prefix("Hash") {
            return Ok(ValueType::Hash(Box::new(parse_element(rest, s)?)));
        }
        match s {
            "Any" => Ok(ValueType::Any),
            "String" => Ok(ValueType::String),
            "Integer" => Ok(ValueType::Integer),
            "Float" => Ok(ValueType::Float),
            "Boolean" => Ok(ValueType::Boolean),
            "Binary" => Ok(ValueType::Binary),
            _ => Err(Error::parse(format!("unknown type '{}'", s))),
        }
    }

    /// True when the value satisfies this type
    pub fn check(&self, value: &Value) -> bool {
        match (self, value) {
            (ValueType::Any, _) => true,
            (ValueType::String, Value::String(_)) => true,
            (ValueType::Integer, Value::Int(_)) => true,
            (ValueType::Float, Value::Float(_)) => true,
            (ValueType::Boolean, Value::Bool(_)) => true,
            (ValueType::Binary, Value::Binary(_)) => true,
            (ValueType::Array(elem), Value::Sequence(seq)) => {
                seq.iter().all(|v| elem.check(v))
            }
            (ValueType::Hash(elem), Value::Mapping(map)) => {
                map.values().all(|v| elem.check(v))
            }
            (t, Value::Typed(_, inner)) => t.check(inner),
            _ => false,
        }
    }

    /// Assert that the value satisfies this type
    pub fn assert_value(&self, value: &Value) -> Result<()> {
        if self.check(value) {
            Ok(())
        } else {
            Err(Error::type_mismatch(self.to_string(), value.type_name()))
        }
    }

    /// Convert a value into this type where a faithful conversion exists.
    /// Used for defaults supplied as strings on the command line.
    pub fn coerce(&self, value: Value) -> Result<Value> {
        if self.check(&value) {
            return Ok(value);
        }
        let coerced = match (self, &value) {
            (ValueType::String, v) if !v.is_sequence() && !v.is_mapping() => {
                Some(Value::String(v.to_string()))
            }
            (ValueType::Integer, Value::String(s)) => s.parse::<i64>().ok().map(Value::Int),
            (ValueType::Float, Value::Int(i)) => Some(Value::Float(*i as f64)),
            (ValueType::Float, Value::String(s)) => s.parse::<f64>().ok().map(Value::Float),
            (ValueType::Boolean, Value::String(s)) => match s.to_lowercase().as_str() {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            },
            _ => None,
        };
        coerced.ok_or_else(|| Error::type_mismatch(self.to_string(), value.type_name()))
    }
}

fn parse_element(rest: &str, whole: &str) -> Result<ValueType> {
    let rest = rest.trim();
    if rest.is_empty() {
        return Ok(ValueType::Any);
    }
    let inner = rest
        .strip_prefix('[')
        .and_then(|r| r.strip_suffix(']'))
        .ok_or_else(|| Error::parse(format!("unknown type '{}'", whole)))?;
    ValueType::parse(inner)
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Any => write!(f, "Any"),
            ValueType::String => write!(f, "String"),
            ValueType::Integer => write!(f, "Integer"),
            ValueType::Float => write!(f, "Float"),
            ValueType::Boolean => write!(f, "Boolean"),
            ValueType::Binary => write!(f, "Binary"),
            ValueType::Array(e) => write!(f, "Array[{}]", e),
            ValueType::Hash(e) => write!(f, "Hash[{}]", e),
        }
    }
}
