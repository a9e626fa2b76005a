//! Request-to-argument binding for service operations.
//!
//! Every service operation declares a [`MethodSignature`]: an ordered list of
//! [`ParamSpec`]s giving each parameter's name, semantic type and optional
//! default. [`bind`] walks that list against the request [`Params`] and yields
//! one value per parameter, in declaration order:
//!
//! 1. a request value under the parameter's name is coerced to the declared
//!    type (or, when no type is declared, to the type named in the signature's
//!    `@param` documentation);
//! 2. otherwise the declared default is used;
//! 3. otherwise the argument is `null`.
//!
//! Binding never fails because an argument is missing. It fails only when a
//! value is present but cannot be coerced, and that failure is reported as a
//! [`BindError`], which the dispatcher classifies as an unexpected failure.
//!
//! | Declared type   | Accepted input                                         |
//! |-----------------|--------------------------------------------------------|
//! | `string`        | strings; numbers and booleans are stringified          |
//! | `int`           | integral numbers, decimal strings (`" 42 "`)           |
//! | `float`         | numbers, numeric strings                               |
//! | `bool`          | booleans, `1/0`, `true/false`, `on/off`, `yes/no`      |
//! | `array`         | arrays and objects, passed through                     |
//! | any other name  | decoded by the [`Converters`] entry of that name        |
//!
//! Empty strings bind as `null` for `int`, `float` and `bool` parameters.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Number, Value};
use thiserror::Error;

use crate::context::Params;

/// Errors raised while binding request values to parameters.
#[derive(Debug, Error)]
pub enum BindError {
    #[error("parameter `{param}` expects {expected}, got {value}")]
    Coercion {
        param: String,
        expected: ParamType,
        value: Value,
    },

    #[error("parameter `{param}` has type `{type_name}` but no converter is registered for it")]
    NoConverter { param: String, type_name: String },

    #[error("converter `{type_name}` rejected parameter `{param}`: {message}")]
    Converter {
        param: String,
        type_name: String,
        message: String,
    },

    #[error("argument `{param}` could not be decoded: {source}")]
    Decode {
        param: String,
        #[source]
        source: serde_json::Error,
    },
}

/// The semantic type of a service parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
    Float,
    Boolean,
    Array,
    /// A domain type, decoded by the converter registered under this name.
    Object(String),
}

impl ParamType {
    /// Parses a declared type name. A leading `?` (nullable) is ignored.
    ///
    /// ```
    /// use simplectl::binder::ParamType;
    ///
    /// assert_eq!(ParamType::parse("?int"), Some(ParamType::Integer));
    /// assert_eq!(ParamType::parse("Money"), Some(ParamType::Object("Money".into())));
    /// assert_eq!(ParamType::parse("mixed"), None);
    /// ```
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim().trim_start_matches('?');
        let ty = match name.to_ascii_lowercase().as_str() {
            "" | "mixed" => return None,
            "string" | "str" => Self::String,
            "int" | "integer" | "i64" => Self::Integer,
            "float" | "double" | "f64" => Self::Float,
            "bool" | "boolean" => Self::Boolean,
            "array" | "list" | "map" => Self::Array,
            _ => Self::Object(name.to_owned()),
        };
        Some(ty)
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => f.write_str("string"),
            Self::Integer => f.write_str("int"),
            Self::Float => f.write_str("float"),
            Self::Boolean => f.write_str("bool"),
            Self::Array => f.write_str("array"),
            Self::Object(name) => f.write_str(name),
        }
    }
}

/// One declared parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub ty: Option<ParamType>,
    pub default: Option<Value>,
}

impl ParamSpec {
    /// An untyped parameter; its type may come from the signature docs.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: None,
            default: None,
        }
    }

    pub fn typed(name: impl Into<String>, ty: ParamType) -> Self {
        Self::new(name).ty(ty)
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::typed(name, ParamType::String)
    }

    pub fn int(name: impl Into<String>) -> Self {
        Self::typed(name, ParamType::Integer)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::typed(name, ParamType::Float)
    }

    pub fn bool(name: impl Into<String>) -> Self {
        Self::typed(name, ParamType::Boolean)
    }

    pub fn array(name: impl Into<String>) -> Self {
        Self::typed(name, ParamType::Array)
    }

    pub fn object(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self::typed(name, ParamType::Object(type_name.into()))
    }

    #[must_use]
    pub fn ty(mut self, ty: ParamType) -> Self {
        self.ty = Some(ty);
        self
    }

    #[must_use]
    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// The parameter schema of one service operation.
///
/// ```
/// use simplectl::binder::{MethodSignature, ParamSpec, ParamType};
///
/// let sig = MethodSignature::new()
///     .param(ParamSpec::int("id"))
///     .param(ParamSpec::new("tags"))
///     .doc("Loads an item.\n@param array $tags labels to filter by");
///
/// assert_eq!(sig.declared_type(&sig.params()[1]), Some(ParamType::Array));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MethodSignature {
    params: Vec<ParamSpec>,
    doc: Option<String>,
}

impl MethodSignature {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.params.push(spec);
        self
    }

    /// Attaches documentation whose `@param <type> $<name>` lines type untyped parameters.
    #[must_use]
    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    /// The parameter's type: the declared one, else the documented one.
    pub fn declared_type(&self, spec: &ParamSpec) -> Option<ParamType> {
        spec.ty
            .clone()
            .or_else(|| self.doc.as_deref().and_then(|doc| doc_type(doc, &spec.name)))
    }
}

// Finds `@param <type> $<name>` (the `$` is optional) in a doc block.
fn doc_type(doc: &str, name: &str) -> Option<ParamType> {
    doc.lines().find_map(|line| {
        let line = line.trim().trim_start_matches(['*', '/']).trim();
        let mut words = line.strip_prefix("@param")?.split_whitespace();
        let ty = words.next()?;
        let param = words.next()?.trim_start_matches('$');
        if param == name {
            ParamType::parse(ty)
        } else {
            None
        }
    })
}

type ConvertFn = dyn Fn(&Value) -> Result<Value, String> + Send + Sync;

/// Decoders for domain-typed parameters, keyed by declared type name.
#[derive(Clone, Default)]
pub struct Converters {
    by_type: HashMap<String, Arc<ConvertFn>>,
}

impl fmt::Debug for Converters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.by_type.keys()).finish()
    }
}

impl Converters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a converter for `type_name`, replacing any earlier one.
    pub fn register<F>(&mut self, type_name: impl Into<String>, convert: F) -> &mut Self
    where
        F: Fn(&Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.by_type.insert(type_name.into(), Arc::new(convert));
        self
    }

    /// Registers a converter that validates the raw value by deserializing it as `T`.
    pub fn register_serde<T>(&mut self, type_name: impl Into<String>) -> &mut Self
    where
        T: DeserializeOwned + serde::Serialize + 'static,
    {
        self.register(type_name, |raw| {
            let decoded: T = match raw {
                // Form input carries structured values as JSON text.
                Value::String(s) => serde_json::from_str(s).map_err(|e| e.to_string())?,
                other => serde_json::from_value(other.clone()).map_err(|e| e.to_string())?,
            };
            serde_json::to_value(decoded).map_err(|e| e.to_string())
        })
    }

    fn convert(&self, param: &str, type_name: &str, raw: &Value) -> Result<Value, BindError> {
        let convert = self
            .by_type
            .get(type_name)
            .ok_or_else(|| BindError::NoConverter {
                param: param.to_owned(),
                type_name: type_name.to_owned(),
            })?;
        convert(raw).map_err(|message| BindError::Converter {
            param: param.to_owned(),
            type_name: type_name.to_owned(),
            message,
        })
    }
}

/// Bound arguments, one per declared parameter, in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundArgs {
    args: Vec<(String, Value)>,
}

impl BoundArgs {
    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// The argument at declaration position `index`.
    pub fn at(&self, index: usize) -> Option<&Value> {
        self.args.get(index).map(|(_, v)| v)
    }

    /// The argument bound to parameter `name`.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.args.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_i64)
    }

    pub fn float(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(Value::as_f64)
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(Value::as_bool)
    }

    pub fn array(&self, name: &str) -> Option<&Vec<Value>> {
        self.get(name).and_then(Value::as_array)
    }

    /// Deserializes the argument into `T`. A missing argument decodes from `null`.
    pub fn decode<T: DeserializeOwned>(&self, name: &str) -> Result<T, BindError> {
        let value = self.get(name).cloned().unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(|source| BindError::Decode {
            param: name.to_owned(),
            source,
        })
    }

    /// Values only, in declaration order.
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.args.iter().map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.args.iter().map(|(n, v)| (n.as_str(), v))
    }
}

/// Binds request parameters to `signature`.
///
/// ```
/// use simplectl::binder::{bind, Converters, MethodSignature, ParamSpec};
/// use simplectl::context::Params;
/// use serde_json::json;
///
/// let sig = MethodSignature::new()
///     .param(ParamSpec::int("id"))
///     .param(ParamSpec::string("name").default("default"));
/// let params: Params = [("id", "42")].into_iter().collect();
///
/// let args = bind(&sig, &params, &Converters::new()).unwrap();
/// assert_eq!(args.values().cloned().collect::<Vec<_>>(), vec![json!(42), json!("default")]);
/// ```
pub fn bind(
    signature: &MethodSignature,
    params: &Params,
    converters: &Converters,
) -> Result<BoundArgs, BindError> {
    let mut args = Vec::with_capacity(signature.params().len());

    for spec in signature.params() {
        let value = match params.get(&spec.name) {
            Some(raw) => match signature.declared_type(spec) {
                Some(ty) => coerce(&spec.name, &ty, raw, converters)?,
                None => raw.clone(),
            },
            None => spec.default.clone().unwrap_or(Value::Null),
        };
        args.push((spec.name.clone(), value));
    }

    Ok(BoundArgs { args })
}

fn coerce(
    param: &str,
    ty: &ParamType,
    raw: &Value,
    converters: &Converters,
) -> Result<Value, BindError> {
    let mismatch = || BindError::Coercion {
        param: param.to_owned(),
        expected: ty.clone(),
        value: raw.clone(),
    };

    if raw.is_null() {
        return Ok(Value::Null);
    }

    match ty {
        ParamType::String => match raw {
            Value::String(_) => Ok(raw.clone()),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            _ => Err(mismatch()),
        },
        ParamType::Integer => match raw {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(raw.clone()),
            Value::String(s) if s.trim().is_empty() => Ok(Value::Null),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| mismatch()),
            Value::Bool(b) => Ok(Value::from(i64::from(*b))),
            _ => Err(mismatch()),
        },
        ParamType::Float => match raw {
            Value::Number(n) => n
                .as_f64()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(mismatch),
            Value::String(s) if s.trim().is_empty() => Ok(Value::Null),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(mismatch),
            _ => Err(mismatch()),
        },
        ParamType::Boolean => match raw {
            Value::Bool(_) => Ok(raw.clone()),
            Value::Number(n) => Ok(Value::Bool(n.as_f64().is_some_and(|f| f != 0.0))),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "" => Ok(Value::Null),
                "1" | "true" | "on" | "yes" => Ok(Value::Bool(true)),
                "0" | "false" | "off" | "no" => Ok(Value::Bool(false)),
                _ => Err(mismatch()),
            },
            _ => Err(mismatch()),
        },
        ParamType::Array => match raw {
            Value::Array(_) | Value::Object(_) => Ok(raw.clone()),
            _ => Err(mismatch()),
        },
        ParamType::Object(type_name) => converters.convert(param, type_name, raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    fn params(pairs: &[(&str, Value)]) -> Params {
        pairs.iter().map(|(k, v)| (*k, v.clone())).collect()
    }

    fn values(args: &BoundArgs) -> Vec<Value> {
        args.values().cloned().collect()
    }

    fn id_and_name() -> MethodSignature {
        MethodSignature::new()
            .param(ParamSpec::int("id"))
            .param(ParamSpec::string("name").default("default"))
    }

    #[test]
    fn default_fills_missing_optional() {
        let args = bind(&id_and_name(), &params(&[("id", json!("42"))]), &Converters::new()).unwrap();
        assert_eq!(values(&args), vec![json!(42), json!("default")]);
        assert_eq!(args.int("id"), Some(42));
        assert_eq!(args.str("name"), Some("default"));
    }

    #[test]
    fn non_numeric_integer_is_a_coercion_error() {
        let err = bind(&id_and_name(), &params(&[("id", json!("abc"))]), &Converters::new())
            .unwrap_err();
        match err {
            BindError::Coercion { param, expected, value } => {
                assert_eq!(param, "id");
                assert_eq!(expected, ParamType::Integer);
                assert_eq!(value, json!("abc"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn missing_without_default_is_null() {
        let sig = MethodSignature::new().param(ParamSpec::int("page"));
        let args = bind(&sig, &Params::new(), &Converters::new()).unwrap();
        assert_eq!(values(&args), vec![Value::Null]);
    }

    #[test]
    fn arguments_follow_declaration_order() {
        let sig = MethodSignature::new()
            .param(ParamSpec::string("z"))
            .param(ParamSpec::string("a"));
        let args = bind(
            &sig,
            &params(&[("a", json!("1")), ("z", json!("2"))]),
            &Converters::new(),
        )
        .unwrap();
        assert_eq!(args.iter().map(|(n, _)| n).collect::<Vec<_>>(), vec!["z", "a"]);
        assert_eq!(args.at(0), Some(&json!("2")));
    }

    #[test]
    fn scalar_coercions() {
        let sig = MethodSignature::new()
            .param(ParamSpec::float("price"))
            .param(ParamSpec::bool("on"))
            .param(ParamSpec::bool("off"))
            .param(ParamSpec::string("code"))
            .param(ParamSpec::int("blank"))
            .param(ParamSpec::int("n"));
        let args = bind(
            &sig,
            &params(&[
                ("price", json!(" 9.5 ")),
                ("on", json!("Yes")),
                ("off", json!("0")),
                ("code", json!(17)),
                ("blank", json!("")),
                ("n", json!(3)),
            ]),
            &Converters::new(),
        )
        .unwrap();

        assert_eq!(args.float("price"), Some(9.5));
        assert_eq!(args.bool("on"), Some(true));
        assert_eq!(args.bool("off"), Some(false));
        assert_eq!(args.str("code"), Some("17"));
        assert_eq!(args.get("blank"), Some(&Value::Null));
        assert_eq!(args.int("n"), Some(3));
    }

    #[test]
    fn unparsable_boolean_and_float_fail() {
        let sig = MethodSignature::new().param(ParamSpec::bool("flag"));
        assert!(bind(&sig, &params(&[("flag", json!("maybe"))]), &Converters::new()).is_err());

        let sig = MethodSignature::new().param(ParamSpec::float("x"));
        assert!(bind(&sig, &params(&[("x", json!("NaN"))]), &Converters::new()).is_err());
    }

    #[test]
    fn arrays_pass_through_and_reject_scalars() {
        let sig = MethodSignature::new().param(ParamSpec::array("tags"));
        let args = bind(&sig, &params(&[("tags", json!(["a", "b"]))]), &Converters::new()).unwrap();
        assert_eq!(args.array("tags").map(Vec::len), Some(2));

        let err = bind(&sig, &params(&[("tags", json!("a"))]), &Converters::new()).unwrap_err();
        assert!(matches!(err, BindError::Coercion { .. }));
    }

    #[test]
    fn doc_block_types_untyped_parameters() {
        let sig = MethodSignature::new()
            .param(ParamSpec::new("id"))
            .param(ParamSpec::new("raw"))
            .doc("/**\n * Finds a user.\n *\n * @param int $id the user id\n */");
        let args = bind(
            &sig,
            &params(&[("id", json!("7")), ("raw", json!("x"))]),
            &Converters::new(),
        )
        .unwrap();
        assert_eq!(args.get("id"), Some(&json!(7)));
        assert_eq!(args.get("raw"), Some(&json!("x")));
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Money {
        amount: i64,
        currency: String,
    }

    #[test]
    fn domain_types_use_converters() {
        let mut converters = Converters::new();
        converters.register_serde::<Money>("Money");

        let sig = MethodSignature::new().param(ParamSpec::object("price", "Money"));
        let args = bind(
            &sig,
            &params(&[("price", json!(r#"{"amount":5,"currency":"EUR"}"#))]),
            &converters,
        )
        .unwrap();

        let price: Money = args.decode("price").unwrap();
        assert_eq!(
            price,
            Money {
                amount: 5,
                currency: "EUR".into()
            }
        );

        let bad = bind(&sig, &params(&[("price", json!({ "amount": "x" }))]), &converters);
        assert!(matches!(bad, Err(BindError::Converter { .. })));
    }

    #[test]
    fn unknown_domain_type_is_reported() {
        let sig = MethodSignature::new().param(ParamSpec::object("when", "Date"));
        let err = bind(&sig, &params(&[("when", json!("2024-01-01"))]), &Converters::new())
            .unwrap_err();
        assert!(matches!(err, BindError::NoConverter { type_name, .. } if type_name == "Date"));
    }
}
