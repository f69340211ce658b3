//! A minimal structural check for the `params_schema` an action may declare
//! via `ActionDef::with_params_schema`. Shorthand is Moleculer-style:
//! `{"field": "type"}` or `{"field": "type|optional"}`, `type` one of
//! `string`, `number`, `boolean`, `array`, `object`, `any`.

use serde_json::Value;

/// Checks `params` against `schema`. `None`/non-object schemas mean
/// "nothing declared" and always pass. Returns the first field that fails.
pub fn validate(schema: &Value, params: &Value) -> Result<(), String> {
    let Value::Object(fields) = schema else {
        return Ok(());
    };

    for (field, descriptor) in fields {
        let Value::String(descriptor) = descriptor else {
            continue;
        };
        let mut parts = descriptor.split('|');
        let kind = parts.next().unwrap_or("any");
        let optional = parts.any(|modifier| modifier == "optional");

        let value = match params.get(field) {
            Some(v) if !v.is_null() => v,
            _ if optional => continue,
            _ => return Err(format!("field `{field}` is required")),
        };

        let type_matches = match kind {
            "string" => value.is_string(),
            "number" => value.is_number(),
            "boolean" => value.is_boolean(),
            "array" => value.is_array(),
            "object" => value.is_object(),
            _ => true, // "any" and unrecognized descriptors pass through
        };
        if !type_matches {
            return Err(format!("field `{field}` must be of type `{kind}`"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_required_field_fails() {
        let schema = json!({"a": "number", "b": "string"});
        let err = validate(&schema, &json!({"a": 1})).unwrap_err();
        assert!(err.contains('b'));
    }

    #[test]
    fn optional_field_may_be_absent() {
        let schema = json!({"a": "number", "b": "string|optional"});
        assert!(validate(&schema, &json!({"a": 1})).is_ok());
    }

    #[test]
    fn wrong_type_fails() {
        let schema = json!({"a": "number"});
        let err = validate(&schema, &json!({"a": "not-a-number"})).unwrap_err();
        assert!(err.contains("type"));
    }

    #[test]
    fn no_schema_always_passes() {
        assert!(validate(&Value::Null, &json!({"anything": true})).is_ok());
    }
}
