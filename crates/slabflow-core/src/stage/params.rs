use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::StageError;

/// A stage constructor parameter value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<ParamValue>),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "\"{v}\""),
            Self::List(items) => {
                let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<usize> for ParamValue {
    fn from(v: usize) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// Named constructor parameters for one stage.
pub type Params = BTreeMap<String, ParamValue>;

/// Compile-time default of a declared parameter.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ParamDefault {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(&'static str),
}

impl ParamDefault {
    pub fn to_value(self) -> ParamValue {
        match self {
            Self::Bool(v) => ParamValue::Bool(v),
            Self::Int(v) => ParamValue::Int(v),
            Self::Float(v) => ParamValue::Float(v),
            Self::Text(v) => ParamValue::Text(v.to_string()),
        }
    }
}

/// A parameter a stage type accepts, with its default.
#[derive(Clone, Copy, Debug)]
pub struct ParamSpec {
    pub name: &'static str,
    pub default: ParamDefault,
    pub help: &'static str,
}

impl ParamSpec {
    pub const fn new(name: &'static str, default: ParamDefault, help: &'static str) -> Self {
        Self {
            name,
            default,
            help,
        }
    }
}

/// Keys in `params` that `specs` does not declare.
pub fn undeclared_keys(params: &Params, specs: &[ParamSpec]) -> Vec<String> {
    params
        .keys()
        .filter(|key| !specs.iter().any(|s| s.name == key.as_str()))
        .cloned()
        .collect()
}

/// Typed access to parameters, falling back to declared defaults.
pub struct ParamReader<'a> {
    params: &'a Params,
    specs: &'a [ParamSpec],
}

impl<'a> ParamReader<'a> {
    pub fn new(params: &'a Params, specs: &'a [ParamSpec]) -> Self {
        Self { params, specs }
    }

    pub fn value(&self, name: &str) -> Result<ParamValue, StageError> {
        if let Some(v) = self.params.get(name) {
            return Ok(v.clone());
        }
        self.specs
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.default.to_value())
            .ok_or_else(|| StageError::invalid(name, "not a declared parameter"))
    }

    pub fn bool(&self, name: &str) -> Result<bool, StageError> {
        match self.value(name)? {
            ParamValue::Bool(v) => Ok(v),
            other => Err(StageError::invalid(name, format!("expected a boolean, got {other}"))),
        }
    }

    pub fn int(&self, name: &str) -> Result<i64, StageError> {
        match self.value(name)? {
            ParamValue::Int(v) => Ok(v),
            other => Err(StageError::invalid(name, format!("expected an integer, got {other}"))),
        }
    }

    pub fn usize(&self, name: &str) -> Result<usize, StageError> {
        let v = self.int(name)?;
        usize::try_from(v).map_err(|_| StageError::invalid(name, format!("must be >= 0, got {v}")))
    }

    /// Floats accept integer values too.
    pub fn float(&self, name: &str) -> Result<f64, StageError> {
        match self.value(name)? {
            ParamValue::Float(v) => Ok(v),
            ParamValue::Int(v) => Ok(v as f64),
            other => Err(StageError::invalid(name, format!("expected a number, got {other}"))),
        }
    }

    pub fn text(&self, name: &str) -> Result<String, StageError> {
        match self.value(name)? {
            ParamValue::Text(v) => Ok(v),
            other => Err(StageError::invalid(name, format!("expected a string, got {other}"))),
        }
    }
}
