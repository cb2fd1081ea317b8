//! Conversion between wire `params`/`result` values and handler types.
//!
//! Named params (a JSON object) map onto struct fields by name; positional
//! params (a JSON array) map onto struct fields in declaration order, which
//! `serde` derives support out of the box. Fields the type does not know are
//! dropped unless the type carries a `#[serde(flatten)]` map to collect them.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::types::{Error, Result};

/// Convert `params` into the handler's declared parameter type.
///
/// Absent params are offered to the type first as `null` (for `()` and
/// `Option<_>`), then as an empty object (for structs whose fields all have
/// defaults).
pub fn from_params<P: DeserializeOwned>(params: Option<Value>) -> Result<P> {
    let Some(params) = params else {
        return from_absent();
    };

    match serde_json::from_value::<P>(params.clone()) {
        Ok(p) => Ok(p),
        Err(first) => match params {
            // `[x]` for a handler that takes `x` directly
            Value::Array(mut items) if items.len() == 1 => {
                serde_json::from_value(items.remove(0)).map_err(|_| Error::invalid_params(first.to_string()))
            }
            // `{}` and `[]` carry nothing; treat them like absent params
            Value::Array(items) if items.is_empty() => {
                from_absent().map_err(|_| Error::invalid_params(first.to_string()))
            }
            Value::Object(fields) if fields.is_empty() => {
                from_absent().map_err(|_| Error::invalid_params(first.to_string()))
            }
            _ => Err(Error::invalid_params(first.to_string())),
        },
    }
}

/// Absent params: `null` first (for `()` and `Option<_>`), then an empty
/// object (for structs whose fields all have defaults).
fn from_absent<P: DeserializeOwned>() -> Result<P> {
    serde_json::from_value(Value::Null)
        .or_else(|_| serde_json::from_value(Value::Object(Map::new())))
        .map_err(|e| Error::invalid_params(format!("params required: {}", e)))
}

/// Convert a handler result into its wire value.
pub fn to_result<R: Serialize>(result: R) -> Result<Value> {
    serde_json::to_value(result)
        .map_err(|e| Error::internal(format!("failed to serialize result: {}", e)))
}

/// Convert a reply `result` into the type the caller asked for.
pub fn from_result<R: DeserializeOwned>(result: Value) -> Result<R> {
    serde_json::from_value(result)
        .map_err(|e| Error::internal(format!("unexpected result shape: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Position {
        line: u32,
        character: u32,
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct WithExtra {
        uri: String,
        #[serde(flatten)]
        extra: Map<String, Value>,
    }

    #[derive(Debug, Default, Deserialize, PartialEq)]
    #[serde(default)]
    struct AllDefault {
        verbose: bool,
    }

    #[test]
    fn test_named_params() {
        let p: Position = from_params(Some(json!({"line": 1, "character": 4}))).unwrap();
        assert_eq!(p, Position { line: 1, character: 4 });
    }

    #[test]
    fn test_positional_params() {
        let p: Position = from_params(Some(json!([2, 5]))).unwrap();
        assert_eq!(p, Position { line: 2, character: 5 });
    }

    #[test]
    fn test_single_positional_unwrapped() {
        let s: String = from_params(Some(json!(["file:///a"]))).unwrap();
        assert_eq!(s, "file:///a");
    }

    #[test]
    fn test_extra_fields_pass_through() {
        let p: WithExtra = from_params(Some(json!({"uri": "u", "version": 3}))).unwrap();
        assert_eq!(p.uri, "u");
        assert_eq!(p.extra.get("version"), Some(&json!(3)));
    }

    #[test]
    fn test_absent_params() {
        from_params::<()>(None).unwrap();
        let opt: Option<Position> = from_params(None).unwrap();
        assert_eq!(opt, None);
        let d: AllDefault = from_params(None).unwrap();
        assert_eq!(d, AllDefault::default());
        assert!(matches!(from_params::<Position>(None), Err(Error::InvalidParams(_))));
    }

    #[test]
    fn test_empty_params_match_absent() {
        from_params::<()>(Some(json!({}))).unwrap();
        from_params::<()>(Some(json!([]))).unwrap();
        let opt: Option<Position> = from_params(Some(json!([]))).unwrap();
        assert_eq!(opt, None);
        let d: AllDefault = from_params(Some(json!([]))).unwrap();
        assert_eq!(d, AllDefault::default());
        let d: AllDefault = from_params(Some(json!({}))).unwrap();
        assert_eq!(d, AllDefault::default());
        assert!(matches!(from_params::<Position>(Some(json!({}))), Err(Error::InvalidParams(_))));
    }

    #[test]
    fn test_wrong_shape_is_invalid_params() {
        let err = from_params::<Position>(Some(json!({"line": "x"}))).unwrap_err();
        assert!(matches!(err, Error::InvalidParams(_)));
        assert_eq!(err.code(), -32602);
    }

    #[test]
    fn test_free_form_value() {
        let v: Value = from_params(Some(json!({"anything": [1, 2]}))).unwrap();
        assert_eq!(v, json!({"anything": [1, 2]}));
    }
}
