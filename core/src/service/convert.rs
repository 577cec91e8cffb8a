use crate::{
    Error,
    types::{Primitive, Type, builtin},
    value::Value,
};

/// Boolean coercion and casting rules.
pub trait ConversionProvider: Send + Sync {
    /// Truthiness of a value.
    fn to_bool(&self, value: &Value) -> bool;

    /// Convert a value to the target type.
    /// `null` converts to `null`.
    fn convert(&self, value: Value, target: &Type) -> Result<Value, Error>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultConversions;

impl ConversionProvider for DefaultConversions {
    fn to_bool(&self, value: &Value) -> bool {
        match value {
            Value::Null => false,
            Value::Bool(value) => *value,
            Value::Int(value) => *value != 0,
            Value::Float(value) => *value != 0.0,
            Value::Char(value) => *value != '\0',
            _ => true,
        }
    }

    fn convert(&self, value: Value, target: &Type) -> Result<Value, Error> {
        if value.is_null() {
            return Ok(value);
        }

        let Some(primitive) = target.primitive() else {
            return Ok(value);
        };

        #[cfg(feature = "tracing")]
        tracing::trace!(kind = value.kind_name(), target = target.name(), "convert");

        let fail = |value: &Value| Error::conversion(value, target.name());
        match primitive {
            Primitive::String => match value {
                Value::String(_) => Ok(value),
                value => Ok(Value::String(value.to_string())),
            },

            Primitive::Char => match &value {
                Value::Char(_) => Ok(value),
                Value::Int(code) => u32::try_from(*code)
                    .ok()
                    .and_then(char::from_u32)
                    .map(Value::Char)
                    .ok_or_else(|| fail(&value)),
                Value::String(text) => {
                    let mut chars = text.chars();
                    match (chars.next(), chars.next()) {
                        (Some(ch), None) => Ok(Value::Char(ch)),
                        _ => Err(fail(&value)),
                    }
                }
                _ => Err(fail(&value)),
            },

            Primitive::Int => match &value {
                Value::Int(_) => Ok(value),
                Value::Float(number) => {
                    let number = number.trunc();
                    if number.is_finite() && number >= i64::MIN as f64 && number <= i64::MAX as f64
                    {
                        Ok(Value::Int(number as i64))
                    } else {
                        Err(fail(&value))
                    }
                }
                Value::Char(ch) => Ok(Value::Int(*ch as i64)),
                Value::Bool(flag) => Ok(Value::Int(*flag as i64)),
                Value::String(text) => text
                    .trim()
                    .parse::<i64>()
                    .map(Value::Int)
                    .map_err(|_| fail(&value)),
                Value::DateTime(date) => Ok(Value::Int(date.timestamp_millis())),
                _ => Err(fail(&value)),
            },

            Primitive::Float => match &value {
                Value::Float(_) => Ok(value),
                Value::Int(number) => Ok(Value::Float(*number as f64)),
                Value::Char(ch) => Ok(Value::Float(*ch as u32 as f64)),
                Value::Bool(flag) => Ok(Value::Float(if *flag { 1.0 } else { 0.0 })),
                Value::String(text) => text
                    .trim()
                    .parse::<f64>()
                    .map(Value::Float)
                    .map_err(|_| fail(&value)),
                _ => Err(fail(&value)),
            },

            Primitive::Bool => match &value {
                Value::Bool(_) => Ok(value),
                Value::String(text) => Ok(Value::Bool(text.trim().eq_ignore_ascii_case("true"))),
                Value::Int(_) | Value::Float(_) | Value::Char(_) => {
                    Ok(Value::Bool(self.to_bool(&value)))
                }
                _ => Err(fail(&value)),
            },

            Primitive::Date => match &value {
                Value::DateTime(_) => Ok(value),
                Value::Int(millis) => chrono::DateTime::from_timestamp_millis(*millis)
                    .map(Value::DateTime)
                    .ok_or_else(|| fail(&value)),
                Value::String(text) => builtin::parse_date(text).ok_or_else(|| fail(&value)),
                _ => Err(fail(&value)),
            },
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::types::builtins;

    #[test]
    fn truthiness() {
        let c = DefaultConversions;
        assert!(!c.to_bool(&Value::Null));
        assert!(!c.to_bool(&Value::Int(0)));
        assert!(!c.to_bool(&Value::Float(0.0)));
        assert!(!c.to_bool(&Value::Char('\0')));
        assert!(!c.to_bool(&Value::Bool(false)));
        assert!(c.to_bool(&Value::Int(-1)));
        assert!(c.to_bool(&Value::string("")));
        assert!(c.to_bool(&Value::list([])));
    }

    #[test]
    fn primitives() {
        let c = DefaultConversions;
        let b = builtins();
        assert_eq!(c.convert(Value::string(" 42 "), &b.int).unwrap(), Value::Int(42));
        assert_eq!(c.convert(Value::Float(2.9), &b.int).unwrap(), Value::Int(2));
        assert_eq!(c.convert(Value::Int(2), &b.float).unwrap(), Value::Float(2.0));
        assert_eq!(c.convert(Value::Int(65), &b.char).unwrap(), Value::Char('A'));
        assert_eq!(
            c.convert(Value::Float(1.5), &b.string).unwrap(),
            Value::string("1.5")
        );
        assert_eq!(
            c.convert(Value::string("TRUE"), &b.boolean).unwrap(),
            Value::Bool(true)
        );
        assert!(matches!(
            c.convert(Value::string("x"), &b.int),
            Err(Error::Conversion { .. })
        ));
        assert!(c.convert(Value::string("ab"), &b.char).is_err());
    }

    #[test]
    fn passthrough() {
        let c = DefaultConversions;
        let b = builtins();
        assert_eq!(c.convert(Value::Null, &b.int).unwrap(), Value::Null);

        let list = Value::list([Value::Int(1)]);
        let converted = c.convert(list.clone(), &b.map).unwrap();
        assert!(converted.same(&list));
    }
}
