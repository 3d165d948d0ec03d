//! Request inputs and their non-failing typed extractors.

use serde_json::{Map, Value};

use crate::error::{Result, SurfaceError};

/// Outcome of looking up one input.
#[derive(Debug, Clone, PartialEq)]
pub enum Param<T> {
    /// The input was not supplied.
    Missing,
    /// The input was supplied but is null or of the wrong type.
    Null,
    Found(T),
}

impl<T> Param<T> {
    pub fn is_found(&self) -> bool {
        !matches!(self, Param::Missing)
    }

    pub fn value(self) -> Option<T> {
        match self {
            Param::Found(v) => Some(v),
            _ => None,
        }
    }

    /// The value, or a validation error naming the input.
    pub fn required(self, name: &str) -> Result<T> {
        match self {
            Param::Found(v) => Ok(v),
            Param::Missing => Err(SurfaceError::validation(format!("{} is required", name))),
            Param::Null => Err(SurfaceError::validation(format!("{} is wrong", name))),
        }
    }
}

/// Named request inputs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputMap {
    values: Map<String, Value>,
}

impl InputMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a JSON object.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `value` is not an object.
    pub fn from_json(value: Value) -> Result<Self> {
        match value {
            Value::Object(values) => Ok(Self { values }),
            Value::Null => Ok(Self::default()),
            _ => Err(SurfaceError::validation("operation input must be a JSON object")),
        }
    }

    /// Build from raw `name=value` pairs, such as a query string. Each value
    /// is decoded as JSON when it parses and kept as a string otherwise.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        let values = pairs
            .into_iter()
            .map(|(k, v)| {
                let raw = v.as_ref();
                let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
                (k.into(), value)
            })
            .collect();
        Self { values }
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn lookup<T>(&self, name: &str, convert: impl FnOnce(&Value) -> Option<T>) -> Param<T> {
        match self.values.get(name) {
            None => Param::Missing,
            Some(Value::Null) => Param::Null,
            Some(value) => convert(value).map_or(Param::Null, Param::Found),
        }
    }

    /// A number, or a string holding one (including `"NaN"`).
    pub fn try_double(&self, name: &str) -> Param<f64> {
        self.lookup(name, |v| match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
    }

    /// An integer, or a string holding one.
    pub fn try_long(&self, name: &str) -> Param<i64> {
        self.lookup(name, |v| match v {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
    }

    /// A boolean, or the string `true`/`false` in any case.
    pub fn try_bool(&self, name: &str) -> Param<bool> {
        self.lookup(name, |v| match v {
            Value::Bool(b) => Some(*b),
            Value::String(s) if s.eq_ignore_ascii_case("true") => Some(true),
            Value::String(s) if s.eq_ignore_ascii_case("false") => Some(false),
            _ => None,
        })
    }

    pub fn try_string(&self, name: &str) -> Param<String> {
        self.lookup(name, |v| v.as_str().map(str::to_string))
    }

    pub fn try_array(&self, name: &str) -> Param<Vec<Value>> {
        self.lookup(name, |v| v.as_array().cloned())
    }

    /// A nested object, returned whole so it can be parsed as a geometry.
    pub fn try_sub_object(&self, name: &str) -> Param<Value> {
        self.lookup(name, |v| v.is_object().then(|| v.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_pairs_decodes_json() {
        let inputs = InputMap::from_pairs([
            ("lon", "138.5"),
            ("units", "Degrees"),
            ("geometry", r#"{"x": 1, "y": 2}"#),
            ("flag", "true"),
        ]);
        assert_eq!(inputs.get("lon"), Some(&json!(138.5)));
        assert_eq!(inputs.get("units"), Some(&json!("Degrees")));
        assert_eq!(inputs.try_sub_object("geometry").value(), Some(json!({"x": 1, "y": 2})));
        assert_eq!(inputs.try_bool("flag"), Param::Found(true));
    }

    #[test]
    fn test_missing_null_found() {
        let inputs = InputMap::from_json(json!({"a": null, "b": "x", "c": 4})).unwrap();
        assert_eq!(inputs.try_double("z"), Param::Missing);
        assert_eq!(inputs.try_double("a"), Param::Null);
        assert_eq!(inputs.try_double("b"), Param::Null);
        assert_eq!(inputs.try_double("c"), Param::Found(4.0));
        assert_eq!(inputs.try_long("c"), Param::Found(4));
        assert!(inputs.try_string("a").is_found());
    }

    #[test]
    fn test_nan_string_is_a_double() {
        let inputs = InputMap::from_pairs([("offset", "NaN")]);
        let offset = inputs.try_double("offset").value().unwrap();
        assert!(offset.is_nan());
    }

    #[test]
    fn test_required() {
        let inputs = InputMap::from_json(json!({"rows": "ten"})).unwrap();
        let err = inputs.try_long("rows").required("rows").unwrap_err();
        assert!(err.to_string().contains("rows"));
        let err = inputs.try_long("columns").required("columns").unwrap_err();
        assert!(err.to_string().contains("required"));
    }

    #[test]
    fn test_long_accepts_integral_float() {
        let inputs = InputMap::from_json(json!({"hint": 3.0, "bad": 2.5})).unwrap();
        assert_eq!(inputs.try_long("hint"), Param::Found(3));
        assert_eq!(inputs.try_long("bad"), Param::Null);
    }

    #[test]
    fn test_non_object_input() {
        assert!(InputMap::from_json(json!([1, 2])).is_err());
        assert!(InputMap::from_json(Value::Null).unwrap().is_empty());
    }
}
