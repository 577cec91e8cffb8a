use glint_core::value::Value;

/// Parse JSON text into a value.
pub fn parse(text: &str) -> Result<Value, serde_json::Error> {
    serde_json::from_str::<serde_json::Value>(text).map(to_value)
}

/// Integral numbers become `Int`, other numbers `Float`.
pub fn to_value(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(value) => Value::Bool(value),
        serde_json::Value::Number(number) => match number.as_i64() {
            Some(value) => Value::Int(value),
            None => Value::Float(number.as_f64().unwrap_or(f64::NAN)),
        },
        serde_json::Value::String(value) => Value::String(value),
        serde_json::Value::Array(items) => Value::list(items.into_iter().map(to_value)),
        serde_json::Value::Object(entries) => Value::map(
            entries
                .into_iter()
                .map(|(key, value)| (Value::String(key), to_value(value))),
        ),
    }
}

/// Render a value as JSON.
pub fn render(value: &Value) -> Result<String, serde_json::Error> {
    serde_json::to_string(value)
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn json_values() {
        let value = parse(r#"{"a": [1, 2.5, "x", null, true]}"#).unwrap();
        assert_eq!(value.to_string(), "{a: [1, 2.5, x, null, true]}");
        assert_eq!(render(&value).unwrap(), r#"{"a":[1,2.5,"x",null,true]}"#);
        assert!(parse("{").is_err());
    }
}
