use crate::{
    Error,
    value::{Map, Value},
};

/// Uniform access to collection-like values.
pub trait CollectionProvider: Send + Sync {
    /// If elements of the value can be read.
    fn is_readable(&self, value: &Value) -> bool;

    /// If elements of the value can be assigned.
    fn is_writable(&self, value: &Value) -> bool;

    /// Element at `key`.
    /// Sequences take a numeric index in any representation,
    /// maps use the key as is.
    fn get(&self, collection: &Value, key: &Value) -> Result<Value, Error>;

    fn set(&self, collection: &Value, key: &Value, value: Value) -> Result<(), Error>;

    /// Elements of the collection.
    /// Maps produce `{key, value}` entries, strings produce characters.
    /// `null` produces nothing.
    fn iter(&self, collection: &Value) -> Result<Box<dyn Iterator<Item = Value>>, Error>;

    /// If the collection holds the value.
    /// For maps the value is tested against the keys.
    fn contains(&self, collection: &Value, value: &Value) -> Result<bool, Error>;
}

/// Collections over `list`, `map`, and `string` values.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultCollections;

impl CollectionProvider for DefaultCollections {
    fn is_readable(&self, value: &Value) -> bool {
        matches!(value, Value::List(_) | Value::Map(_) | Value::String(_))
    }

    fn is_writable(&self, value: &Value) -> bool {
        matches!(value, Value::List(_) | Value::Map(_))
    }

    fn get(&self, collection: &Value, key: &Value) -> Result<Value, Error> {
        match collection {
            Value::List(list) => {
                let items = list.read();
                let idx = element_index(key, items.len())?;
                Ok(items[idx].clone())
            }
            Value::Map(map) => Ok(map.get(key).unwrap_or_default()),
            Value::String(value) => {
                let len = value.chars().count();
                let idx = element_index(key, len)?;
                Ok(value.chars().nth(idx).map(Value::Char).unwrap_or_default())
            }
            _ => Err(not_a_collection(collection)),
        }
    }

    fn set(&self, collection: &Value, key: &Value, value: Value) -> Result<(), Error> {
        match collection {
            Value::List(list) => {
                let mut items = list.write();
                let idx = element_index(key, items.len())?;
                items[idx] = value;
                Ok(())
            }
            Value::Map(map) => {
                map.insert(key.clone(), value);
                Ok(())
            }
            _ => Err(Error::invalid_operation(format!(
                "can not assign elements of `{}`",
                collection.kind_name()
            ))),
        }
    }

    fn iter(&self, collection: &Value) -> Result<Box<dyn Iterator<Item = Value>>, Error> {
        match collection {
            Value::Null => Ok(Box::new(std::iter::empty())),
            Value::List(list) => Ok(Box::new(list.to_vec().into_iter())),
            Value::Map(map) => Ok(Box::new(map.entries().into_iter().map(|(key, value)| {
                Value::Map(Map::from_entries([
                    (Value::string("key"), key),
                    (Value::string("value"), value),
                ]))
            }))),
            Value::String(value) => Ok(Box::new(
                value.chars().map(Value::Char).collect::<Vec<_>>().into_iter(),
            )),
            _ => Err(not_a_collection(collection)),
        }
    }

    fn contains(&self, collection: &Value, value: &Value) -> Result<bool, Error> {
        match collection {
            Value::Null => Ok(false),
            Value::List(list) => Ok(list.read().iter().any(|item| item == value)),
            Value::Map(map) => Ok(map.contains_key(value)),
            Value::String(text) => Ok(text.contains(&value.to_string())),
            _ => Err(not_a_collection(collection)),
        }
    }
}

fn not_a_collection(value: &Value) -> Error {
    Error::invalid_operation(format!("`{}` is not a collection", value.kind_name()))
}

/// Parse a sequence index from any numeric or textual representation.
fn element_index(key: &Value, len: usize) -> Result<usize, Error> {
    let index = match key {
        Value::Int(value) => Some(*value),
        Value::Float(value) if value.fract() == 0.0 => Some(*value as i64),
        Value::String(value) => value.trim().parse::<i64>().ok(),
        _ => None,
    };
    let Some(index) = index else {
        return Err(Error::conversion(key, "index"));
    };

    usize::try_from(index)
        .ok()
        .filter(|idx| *idx < len)
        .ok_or(Error::IndexOutOfBounds { index, len })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn get_by_any_index() {
        let c = DefaultCollections;
        let list = Value::list([Value::Int(10), Value::Int(20)]);
        assert_eq!(c.get(&list, &Value::Int(1)).unwrap(), Value::Int(20));
        assert_eq!(c.get(&list, &Value::string("0")).unwrap(), Value::Int(10));
        assert_eq!(c.get(&list, &Value::Float(1.0)).unwrap(), Value::Int(20));
        assert!(matches!(
            c.get(&list, &Value::Int(2)),
            Err(Error::IndexOutOfBounds { index: 2, len: 2 })
        ));
        assert!(c.get(&list, &Value::string("x")).is_err());

        let s = Value::string("abc");
        assert_eq!(c.get(&s, &Value::Int(2)).unwrap(), Value::Char('c'));
    }

    #[test]
    fn map_keys_are_verbatim() {
        let c = DefaultCollections;
        let map = Value::map([(Value::Int(1), Value::string("int"))]);
        assert_eq!(c.get(&map, &Value::Int(1)).unwrap(), Value::string("int"));
        assert_eq!(c.get(&map, &Value::string("1")).unwrap(), Value::Null);

        c.set(&map, &Value::string("1"), Value::Bool(true)).unwrap();
        assert_eq!(c.get(&map, &Value::string("1")).unwrap(), Value::Bool(true));
    }

    #[test]
    fn writability() {
        let c = DefaultCollections;
        let s = Value::string("abc");
        assert!(c.is_readable(&s));
        assert!(!c.is_writable(&s));
        assert!(c.set(&s, &Value::Int(0), Value::Char('x')).is_err());
        assert!(!c.is_readable(&Value::Int(1)));
    }

    #[test]
    fn iterate() {
        let c = DefaultCollections;
        let chars = c.iter(&Value::string("ab")).unwrap().collect::<Vec<_>>();
        assert_eq!(chars, vec![Value::Char('a'), Value::Char('b')]);

        let map = Value::map([(Value::string("k"), Value::Int(1))]);
        let entries = c.iter(&map).unwrap().collect::<Vec<_>>();
        assert_eq!(entries.len(), 1);
        let entry = entries[0].as_map().unwrap();
        assert_eq!(entry.get(&Value::string("key")), Some(Value::string("k")));
        assert_eq!(entry.get(&Value::string("value")), Some(Value::Int(1)));

        assert_eq!(c.iter(&Value::Null).unwrap().count(), 0);
        assert!(c.iter(&Value::Int(1)).is_err());
    }

    #[test]
    fn membership() {
        let c = DefaultCollections;
        let list = Value::list([Value::Int(1), Value::string("a")]);
        assert!(c.contains(&list, &Value::string("a")).unwrap());
        assert!(!c.contains(&list, &Value::Int(2)).unwrap());
        assert!(c.contains(&Value::string("hello"), &Value::string("ell")).unwrap());
        assert!(!c.contains(&Value::Null, &Value::Int(1)).unwrap());
    }
}
