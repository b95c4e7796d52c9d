//! Argument coercion.
//!
//! Every callback declares a [`Signature`]. Before the callback's action
//! runs, the raised [`Args`] are converted parameter by parameter:
//!
//! 1. untyped parameters ([`ParamType::Any`]) pass through;
//! 2. a value that already has the declared type passes through;
//! 3. primitive and container types are constructed from the raw value;
//! 4. custom types run their registered parser ([`Parsable`]); types
//!    without a parser fail with [`CoercionError::NotParsable`];
//! 5. a union coerces through its first alternative;
//! 6. surplus positionals and unknown keywords pass through.
//!
//! ```rust
//! use herald_events::{args, coerce, ParamType, Signature, Value};
//!
//! let signature = Signature::new().param("count", ParamType::Integer);
//! let coerced = coerce(&signature, args!["42"]).unwrap();
//! assert_eq!(coerced.get(0), Some(&Value::Int(42)));
//! ```

use crate::value::{Args, Value, short_type_name};
use std::any::{Any, TypeId, type_name};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Failure reported by a [`Parsable`] implementation.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ParseError(String);

impl ParseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Errors raised while adapting arguments to a signature.
#[derive(Debug, Clone, Error)]
pub enum CoercionError {
    #[error("Cannot convert {value} to {expected} for parameter '{param}': {reason}")]
    Invalid {
        param: String,
        value: String,
        expected: String,
        reason: String,
    },

    /// The declared type has neither a primitive conversion nor a parser
    #[error("Parameter '{param}' expects {expected}, which cannot be parsed from {value}")]
    NotParsable {
        param: String,
        value: String,
        expected: String,
    },
}

impl CoercionError {
    /// Name of the offending parameter.
    pub fn param(&self) -> &str {
        match self {
            CoercionError::Invalid { param, .. } | CoercionError::NotParsable { param, .. } => {
                param
            }
        }
    }
}

/// Types that can be built from a raw argument value.
///
/// ```rust
/// use herald_events::{Parsable, ParseError, Value};
///
/// struct Port(u16);
///
/// impl Parsable for Port {
///     fn parse(value: &Value) -> Result<Self, ParseError> {
///         match value {
///             Value::Int(n) => u16::try_from(*n).map(Port).map_err(|e| ParseError::new(e.to_string())),
///             other => Err(ParseError::new(format!("not a port: {}", other))),
///         }
///     }
/// }
/// ```
pub trait Parsable: Any + Send + Sync + Sized {
    fn parse(value: &Value) -> Result<Self, ParseError>;
}

pub type ParseFn = Arc<dyn Fn(&Value) -> Result<Value, ParseError> + Send + Sync>;

/// A host type registered for coercion.
#[derive(Clone)]
pub struct CustomType {
    name: &'static str,
    type_id: TypeId,
    parser: Option<ParseFn>,
}

impl CustomType {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_parsable(&self) -> bool {
        self.parser.is_some()
    }
}

impl fmt::Debug for CustomType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomType")
            .field("name", &self.name)
            .field("parsable", &self.parser.is_some())
            .finish()
    }
}

/// Declared type of a callback parameter.
#[derive(Debug, Clone)]
pub enum ParamType {
    Any,
    Text,
    Integer,
    Float,
    Mapping,
    Sequence,
    Set,
    Tuple,
    Custom(CustomType),
    Union(Vec<ParamType>),
}

impl ParamType {
    /// A host type built through its [`Parsable`] implementation.
    pub fn parsable<T: Parsable>() -> Self {
        ParamType::Custom(CustomType {
            name: short_type_name(type_name::<T>()),
            type_id: TypeId::of::<T>(),
            parser: Some(Arc::new(|value: &Value| T::parse(value).map(Value::object))),
        })
    }

    /// A host type only accepted when already supplied as a `T`.
    pub fn instance_of<T: Any + Send + Sync>() -> Self {
        ParamType::Custom(CustomType {
            name: short_type_name(type_name::<T>()),
            type_id: TypeId::of::<T>(),
            parser: None,
        })
    }

    pub fn union(alternatives: impl IntoIterator<Item = ParamType>) -> Self {
        ParamType::Union(alternatives.into_iter().collect())
    }

    /// Whether `value` already has this type.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (ParamType::Any, _) => true,
            (ParamType::Text, Value::Text(_))
            | (ParamType::Integer, Value::Int(_) | Value::Bool(_))
            | (ParamType::Float, Value::Float(_))
            | (ParamType::Mapping, Value::Map(_))
            | (ParamType::Sequence, Value::List(_))
            | (ParamType::Set, Value::Set(_))
            | (ParamType::Tuple, Value::Tuple(_)) => true,
            (ParamType::Custom(custom), Value::Object(opaque)) => opaque.holds(custom.type_id),
            (ParamType::Union(alternatives), value) => {
                alternatives.iter().any(|alt| alt.accepts(value))
            }
            _ => false,
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamType::Any => f.write_str("any"),
            ParamType::Text => f.write_str("text"),
            ParamType::Integer => f.write_str("integer"),
            ParamType::Float => f.write_str("float"),
            ParamType::Mapping => f.write_str("mapping"),
            ParamType::Sequence => f.write_str("sequence"),
            ParamType::Set => f.write_str("set"),
            ParamType::Tuple => f.write_str("tuple"),
            ParamType::Custom(custom) => f.write_str(custom.name),
            ParamType::Union(alternatives) => {
                let names: Vec<String> = alternatives.iter().map(ToString::to_string).collect();
                f.write_str(&names.join(" | "))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub ty: ParamType,
}

/// Declared parameters of a callback, in declaration order.
///
/// `receiver` marks a leading bound-instance parameter; it is never coerced.
#[derive(Debug, Clone, Default)]
pub struct Signature {
    receiver: bool,
    params: Vec<Param>,
}

impl Signature {
    /// A signature without receiver or declared parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// A signature whose first positional is the bound instance.
    pub fn method() -> Self {
        Self {
            receiver: true,
            params: Vec::new(),
        }
    }

    pub fn param(mut self, name: impl Into<String>, ty: ParamType) -> Self {
        self.params.push(Param {
            name: name.into(),
            ty,
        });
        self
    }

    pub fn has_receiver(&self) -> bool {
        self.receiver
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }
}

/// Coerce `args` to `signature`.
///
/// The receiver, if any, is expected to be prefixed after coercion, so
/// `args` here holds only the raised arguments.
pub fn coerce(signature: &Signature, args: Args) -> Result<Args, CoercionError> {
    let (positional, keyword) = args.into_parts();
    let params = signature.params();

    let positional = positional
        .into_iter()
        .enumerate()
        .map(|(index, value)| match params.get(index) {
            Some(param) => coerce_value(&param.name, &param.ty, value),
            None => Ok(value),
        })
        .collect::<Result<Vec<_>, _>>()?;

    let keyword = keyword
        .into_iter()
        .map(|(name, value)| {
            let value = match params.iter().find(|param| param.name == name) {
                Some(param) => coerce_value(&param.name, &param.ty, value)?,
                None => value,
            };
            Ok((name, value))
        })
        .collect::<Result<BTreeMap<_, _>, CoercionError>>()?;

    Ok(Args::from_parts(positional, keyword))
}

/// Coerce a single value to `ty`.
pub fn coerce_value(param: &str, ty: &ParamType, value: Value) -> Result<Value, CoercionError> {
    if ty.accepts(&value) {
        return Ok(value);
    }

    let converted = match ty {
        ParamType::Any => return Ok(value),
        ParamType::Text => to_text(&value),
        ParamType::Integer => to_int(&value),
        ParamType::Float => to_float(&value),
        ParamType::Mapping => to_map(&value),
        ParamType::Sequence => items_of(&value).map(Value::List),
        ParamType::Set => items_of(&value).map(Value::set_of),
        ParamType::Tuple => items_of(&value).map(Value::Tuple),
        ParamType::Custom(custom) => match &custom.parser {
            Some(parse) => parse(&value).map_err(|e| e.to_string()),
            None => {
                return Err(CoercionError::NotParsable {
                    param: param.to_string(),
                    value: value.repr(),
                    expected: custom.name.to_string(),
                });
            }
        },
        ParamType::Union(alternatives) => match alternatives.first() {
            Some(first) => return coerce_value(param, first, value),
            None => return Ok(value),
        },
    };

    converted.map_err(|reason| CoercionError::Invalid {
        param: param.to_string(),
        value: value.repr(),
        expected: ty.to_string(),
        reason,
    })
}

fn to_text(value: &Value) -> Result<Value, String> {
    match value {
        Value::Object(opaque) => Err(format!("{} has no text form", opaque.short_name())),
        other => Ok(Value::Text(other.to_string())),
    }
}

fn to_int(value: &Value) -> Result<Value, String> {
    match value {
        Value::Text(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|e| e.to_string()),
        Value::Float(x) if x.is_finite() && x.trunc().abs() < i64::MAX as f64 => {
            Ok(Value::Int(x.trunc() as i64))
        }
        Value::Float(x) => Err(format!("{} is out of integer range", x)),
        other => Err(format!("{} is not a number", other.kind())),
    }
}

fn to_float(value: &Value) -> Result<Value, String> {
    match value {
        Value::Bool(b) => Ok(Value::Float(if *b { 1.0 } else { 0.0 })),
        Value::Int(i) => Ok(Value::Float(*i as f64)),
        Value::Text(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|e| e.to_string()),
        other => Err(format!("{} is not a number", other.kind())),
    }
}

fn to_map(value: &Value) -> Result<Value, String> {
    let items = value
        .as_items()
        .ok_or_else(|| format!("{} is not a mapping", value.kind()))?;

    let mut map = BTreeMap::new();
    for (index, item) in items.iter().enumerate() {
        match item.as_items() {
            Some([key, val]) => {
                let key = match key {
                    Value::Text(s) => s.clone(),
                    Value::Object(_) => return Err(format!("element #{} has an opaque key", index)),
                    other => other.to_string(),
                };
                map.insert(key, val.clone());
            }
            Some(pair) => {
                return Err(format!(
                    "element #{} has length {}; 2 is required",
                    index,
                    pair.len()
                ));
            }
            None => return Err(format!("element #{} is not a sequence", index)),
        }
    }
    Ok(Value::Map(map))
}

fn items_of(value: &Value) -> Result<Vec<Value>, String> {
    match value {
        Value::List(items) | Value::Tuple(items) | Value::Set(items) => Ok(items.clone()),
        Value::Text(s) => Ok(s.chars().map(|c| Value::Text(c.to_string())).collect()),
        Value::Map(map) => Ok(map.keys().cloned().map(Value::Text).collect()),
        other => Err(format!("{} is not iterable", other.kind())),
    }
}
