//! Types always available to expressions.
use super::{Primitive, Type};
use crate::{
    Error,
    value::{List, Map, Value},
};
use chrono::{Datelike, Timelike};
use std::{
    fmt::Write,
    sync::{Arc, LazyLock},
};

static BUILTINS: LazyLock<Builtins> = LazyLock::new(Builtins::new);

pub fn builtins() -> &'static Builtins {
    &BUILTINS
}

/// Runtime type of a value.
/// `null` has type `object`.
pub fn type_of(value: &Value) -> Arc<Type> {
    let b = builtins();
    match value {
        Value::Null => b.object.clone(),
        Value::Bool(_) => b.boolean.clone(),
        Value::Char(_) => b.char.clone(),
        Value::Int(_) => b.int.clone(),
        Value::Float(_) => b.float.clone(),
        Value::String(_) => b.string.clone(),
        Value::DateTime(_) => b.date.clone(),
        Value::List(_) => b.list.clone(),
        Value::Map(_) => b.map.clone(),
        Value::Object(object) => object.ty().clone(),
        Value::Function(_) => b.function.clone(),
        Value::Type(_) => b.ty.clone(),
    }
}

pub struct Builtins {
    pub object: Arc<Type>,
    pub string: Arc<Type>,
    pub char: Arc<Type>,
    pub int: Arc<Type>,
    pub float: Arc<Type>,
    pub boolean: Arc<Type>,
    pub date: Arc<Type>,
    pub list: Arc<Type>,
    pub map: Arc<Type>,
    pub function: Arc<Type>,
    pub ty: Arc<Type>,
}

impl Builtins {
    fn new() -> Self {
        let object = object();
        let int = int(&object);
        let float = float(&object, &int);
        let string = string(&object, &int);
        let boolean = boolean(&object, &string);
        let char = char(&object);
        let date = date(&object, &int, &string);
        let list = list(&object, &int);
        let map = map(&object);
        let function = Type::builder("function")
            .extends(&object)
            .variadic_method("call", &[], |this, args| match this {
                Value::Function(function) => function.call(args),
                _ => Err(receiver_error("call", "function", this)),
            })
            .method("getName", &[], |this, _| match this {
                Value::Function(function) => Ok(Value::string(function.name())),
                _ => Err(receiver_error("getName", "function", this)),
            })
            .build();
        let ty = Type::builder("type")
            .extends(&object)
            .method("getName", &[], |this, _| match this {
                Value::Type(ty) => Ok(Value::string(ty.name())),
                _ => Err(receiver_error("getName", "type", this)),
            })
            .method("getSimpleName", &[], |this, _| match this {
                Value::Type(ty) => Ok(Value::string(ty.simple_name())),
                _ => Err(receiver_error("getSimpleName", "type", this)),
            })
            .method("getParent", &[], |this, _| match this {
                Value::Type(ty) => Ok(ty.parent().cloned().map(Value::Type).unwrap_or_default()),
                _ => Err(receiver_error("getParent", "type", this)),
            })
            .method("isInstance", &[&object], |this, args| match this {
                Value::Type(ty) => {
                    let value = arg(&args, 0);
                    Ok(Value::Bool(
                        !value.is_null() && type_of(value).is_subtype_of(ty),
                    ))
                }
                _ => Err(receiver_error("isInstance", "type", this)),
            })
            .build();

        Self {
            object,
            string,
            char,
            int,
            float,
            boolean,
            date,
            list,
            map,
            function,
            ty,
        }
    }

    /// Built-in type by its short name, including the `long` and `double` aliases.
    pub fn by_name(&self, name: &str) -> Option<&Arc<Type>> {
        match name {
            "object" => Some(&self.object),
            "string" => Some(&self.string),
            "char" => Some(&self.char),
            "int" | "long" => Some(&self.int),
            "float" | "double" => Some(&self.float),
            "boolean" => Some(&self.boolean),
            "date" => Some(&self.date),
            "list" => Some(&self.list),
            "map" => Some(&self.map),
            "function" => Some(&self.function),
            "type" => Some(&self.ty),
            _ => None,
        }
    }
}

fn object() -> Arc<Type> {
    // Parameter types refer to `object` itself, so its methods convert nothing.
    Type::builder("object")
        .detached()
        .method("toString", &[], |this, _| Ok(Value::string(this.to_string())))
        .method("getType", &[], |this, _| Ok(Value::Type(type_of(this))))
        .variadic_method("equals", &[], |this, args| {
            Ok(Value::Bool(args.len() == 1 && *this == args[0]))
        })
        .build()
}

fn int(object: &Arc<Type>) -> Arc<Type> {
    Type::builder("int")
        .extends(object)
        .primitive(Primitive::Int)
        .constant("MAX_VALUE", object, Value::Int(i64::MAX))
        .constant("MIN_VALUE", object, Value::Int(i64::MIN))
        .method("abs", &[], |this, _| {
            let value = this_int(this, "abs")?;
            value.checked_abs().map(Value::Int).ok_or(Error::Overflow)
        })
        .static_method("parse", &[object], |_, args| {
            let value = arg(&args, 0).to_string();
            value
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| Error::conversion(&value, "int"))
        })
        .build()
}

fn float(object: &Arc<Type>, int: &Arc<Type>) -> Arc<Type> {
    Type::builder("float")
        .extends(object)
        .primitive(Primitive::Float)
        .constant("MAX_VALUE", object, Value::Float(f64::MAX))
        .constant("MIN_VALUE", object, Value::Float(f64::MIN_POSITIVE))
        .constant("NaN", object, Value::Float(f64::NAN))
        .method("abs", &[], |this, _| {
            Ok(Value::Float(this_float(this, "abs")?.abs()))
        })
        .method("floor", &[], |this, _| {
            Ok(Value::Float(this_float(this, "floor")?.floor()))
        })
        .method("ceil", &[], |this, _| {
            Ok(Value::Float(this_float(this, "ceil")?.ceil()))
        })
        .method("round", &[], |this, _| {
            let value = this_float(this, "round")?.round();
            if value.is_finite() && value >= i64::MIN as f64 && value <= i64::MAX as f64 {
                Ok(Value::Int(value as i64))
            } else {
                Err(Error::Overflow)
            }
        })
        .method("isNaN", &[], |this, _| {
            Ok(Value::Bool(this_float(this, "isNaN")?.is_nan()))
        })
        .method("pow", &[int], |this, args| {
            let exp = int_arg(&args, 0, "pow")?;
            let exp = i32::try_from(exp).map_err(|_| Error::Overflow)?;
            Ok(Value::Float(this_float(this, "pow")?.powi(exp)))
        })
        .static_method("parse", &[object], |_, args| {
            let value = arg(&args, 0).to_string();
            value
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| Error::conversion(&value, "float"))
        })
        .build()
}

/// Text parameters are declared as `object` and rendered with their string form.
fn string(object: &Arc<Type>, int: &Arc<Type>) -> Arc<Type> {
    let s = object;
    Type::builder("string")
        .extends(object)
        .primitive(Primitive::String)
        .computed("length", int, |this| {
            Ok(Value::Int(this_str(this, "length")?.chars().count() as i64))
        })
        .method("length", &[], |this, _| {
            Ok(Value::Int(this_str(this, "length")?.chars().count() as i64))
        })
        .method("isEmpty", &[], |this, _| {
            Ok(Value::Bool(this_str(this, "isEmpty")?.is_empty()))
        })
        .method("charAt", &[int], |this, args| {
            let value = this_str(this, "charAt")?;
            let idx = int_arg(&args, 0, "charAt")?;
            let len = value.chars().count();
            let idx = index(idx, len)?;
            Ok(value.chars().nth(idx).map(Value::Char).unwrap_or_default())
        })
        .method("substring", &[int], |this, args| {
            let value = this_str(this, "substring")?;
            let start = int_arg(&args, 0, "substring")?;
            let len = value.chars().count();
            let start = bound(start, len)?;
            Ok(Value::string(value.chars().skip(start).collect::<String>()))
        })
        .method("substring", &[int, int], |this, args| {
            let value = this_str(this, "substring")?;
            let len = value.chars().count();
            let start = bound(int_arg(&args, 0, "substring")?, len)?;
            let end = bound(int_arg(&args, 1, "substring")?, len)?;
            if start > end {
                return Err(Error::IndexOutOfBounds {
                    index: start as i64,
                    len: end,
                });
            }
            Ok(Value::string(
                value.chars().skip(start).take(end - start).collect::<String>(),
            ))
        })
        .method("indexOf", &[s], |this, args| {
            let value = this_str(this, "indexOf")?;
            let needle = text_arg(&args, 0);
            Ok(Value::Int(match value.find(&needle) {
                Some(pos) => value[..pos].chars().count() as i64,
                None => -1,
            }))
        })
        .method("contains", &[s], |this, args| {
            let needle = text_arg(&args, 0);
            Ok(Value::Bool(this_str(this, "contains")?.contains(&needle)))
        })
        .method("startsWith", &[s], |this, args| {
            let prefix = text_arg(&args, 0);
            Ok(Value::Bool(this_str(this, "startsWith")?.starts_with(&prefix)))
        })
        .method("endsWith", &[s], |this, args| {
            let suffix = text_arg(&args, 0);
            Ok(Value::Bool(this_str(this, "endsWith")?.ends_with(&suffix)))
        })
        .method("toUpperCase", &[], |this, _| {
            Ok(Value::string(this_str(this, "toUpperCase")?.to_uppercase()))
        })
        .method("toLowerCase", &[], |this, _| {
            Ok(Value::string(this_str(this, "toLowerCase")?.to_lowercase()))
        })
        .method("trim", &[], |this, _| {
            Ok(Value::string(this_str(this, "trim")?.trim()))
        })
        .method("replace", &[s, s], |this, args| {
            let from = text_arg(&args, 0);
            let to = text_arg(&args, 1);
            Ok(Value::string(this_str(this, "replace")?.replace(&from, &to)))
        })
        .method("split", &[s], |this, args| {
            let sep = text_arg(&args, 0);
            Ok(Value::list(
                this_str(this, "split")?.split(&sep).map(Value::string),
            ))
        })
        .static_method("valueOf", &[object], |_, args| {
            Ok(Value::string(arg(&args, 0).to_string()))
        })
        .build()
}

fn boolean(object: &Arc<Type>, string: &Arc<Type>) -> Arc<Type> {
    Type::builder("boolean")
        .extends(object)
        .primitive(Primitive::Bool)
        .static_method("parse", &[string], |_, args| {
            let value = str_arg(&args, 0, "parse")?;
            Ok(Value::Bool(value.trim().eq_ignore_ascii_case("true")))
        })
        .build()
}

fn char(object: &Arc<Type>) -> Arc<Type> {
    Type::builder("char")
        .extends(object)
        .primitive(Primitive::Char)
        .method("isDigit", &[], |this, _| {
            Ok(Value::Bool(this_char(this, "isDigit")?.is_ascii_digit()))
        })
        .method("isLetter", &[], |this, _| {
            Ok(Value::Bool(this_char(this, "isLetter")?.is_alphabetic()))
        })
        .method("isWhitespace", &[], |this, _| {
            Ok(Value::Bool(this_char(this, "isWhitespace")?.is_whitespace()))
        })
        .build()
}

fn date(object: &Arc<Type>, int: &Arc<Type>, string: &Arc<Type>) -> Arc<Type> {
    Type::builder("date")
        .extends(object)
        .primitive(Primitive::Date)
        .constructor(&[], |_, _| Ok(Value::DateTime(chrono::Utc::now())))
        .constructor(&[int], |_, args| {
            let millis = int_arg(&args, 0, "date")?;
            chrono::DateTime::from_timestamp_millis(millis)
                .map(Value::DateTime)
                .ok_or_else(|| Error::conversion(millis, "date"))
        })
        .static_method("now", &[], |_, _| Ok(Value::DateTime(chrono::Utc::now())))
        .static_method("parse", &[string], |_, args| {
            let value = str_arg(&args, 0, "parse")?;
            parse_date(value).ok_or_else(|| Error::conversion(value, "date"))
        })
        .method("getYear", &[], |this, _| {
            Ok(Value::Int(this_date(this, "getYear")?.year() as i64))
        })
        .method("getMonth", &[], |this, _| {
            Ok(Value::Int(this_date(this, "getMonth")?.month() as i64))
        })
        .method("getDay", &[], |this, _| {
            Ok(Value::Int(this_date(this, "getDay")?.day() as i64))
        })
        .method("getHour", &[], |this, _| {
            Ok(Value::Int(this_date(this, "getHour")?.hour() as i64))
        })
        .method("getTime", &[], |this, _| {
            Ok(Value::Int(this_date(this, "getTime")?.timestamp_millis()))
        })
        .method("format", &[string], |this, args| {
            let date = this_date(this, "format")?;
            let pattern = str_arg(&args, 0, "format")?;
            let mut out = String::new();
            write!(out, "{}", date.format(pattern))
                .map_err(|_| Error::invocation("format", format!("invalid pattern `{pattern}`")))?;
            Ok(Value::String(out))
        })
        .build()
}

/// Parse an RFC 3339 date time, or a plain `YYYY-MM-DD` date at midnight UTC.
pub(crate) fn parse_date(value: &str) -> Option<Value> {
    let value = value.trim();
    if let Ok(date) = chrono::DateTime::parse_from_rfc3339(value) {
        return Some(Value::DateTime(date.with_timezone(&chrono::Utc)));
    }

    chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|date| Value::DateTime(date.and_utc()))
}

fn list(object: &Arc<Type>, int: &Arc<Type>) -> Arc<Type> {
    Type::builder("list")
        .extends(object)
        .constructor(&[], |_, _| Ok(Value::List(List::default())))
        .method("size", &[], |this, _| {
            Ok(Value::Int(this_list(this, "size")?.len() as i64))
        })
        .method("isEmpty", &[], |this, _| {
            Ok(Value::Bool(this_list(this, "isEmpty")?.is_empty()))
        })
        .method("get", &[int], |this, args| {
            let list = this_list(this, "get")?;
            let idx = index(int_arg(&args, 0, "get")?, list.len())?;
            Ok(list.get(idx).unwrap_or_default())
        })
        .method("set", &[int, object], |this, args| {
            let list = this_list(this, "set")?;
            let mut items = list.write();
            let idx = index(int_arg(&args, 0, "set")?, items.len())?;
            Ok(std::mem::replace(&mut items[idx], arg(&args, 1).clone()))
        })
        .method("add", &[object], |this, args| {
            this_list(this, "add")?.push(arg(&args, 0).clone());
            Ok(Value::Bool(true))
        })
        .method("remove", &[int], |this, args| {
            let list = this_list(this, "remove")?;
            let mut items = list.write();
            let idx = index(int_arg(&args, 0, "remove")?, items.len())?;
            Ok(items.remove(idx))
        })
        .method("contains", &[object], |this, args| {
            let needle = arg(&args, 0);
            Ok(Value::Bool(
                this_list(this, "contains")?.read().iter().any(|item| item == needle),
            ))
        })
        .method("indexOf", &[object], |this, args| {
            let needle = arg(&args, 0);
            Ok(Value::Int(
                this_list(this, "indexOf")?
                    .read()
                    .iter()
                    .position(|item| item == needle)
                    .map_or(-1, |idx| idx as i64),
            ))
        })
        .method("clear", &[], |this, _| {
            this_list(this, "clear")?.write().clear();
            Ok(Value::Null)
        })
        .build()
}

fn map(object: &Arc<Type>) -> Arc<Type> {
    Type::builder("map")
        .extends(object)
        .constructor(&[], |_, _| Ok(Value::Map(Map::new())))
        .method("size", &[], |this, _| {
            Ok(Value::Int(this_map(this, "size")?.len() as i64))
        })
        .method("isEmpty", &[], |this, _| {
            Ok(Value::Bool(this_map(this, "isEmpty")?.is_empty()))
        })
        .method("get", &[object], |this, args| {
            Ok(this_map(this, "get")?.get(arg(&args, 0)).unwrap_or_default())
        })
        .method("put", &[object, object], |this, args| {
            let map = this_map(this, "put")?;
            Ok(map
                .insert(arg(&args, 0).clone(), arg(&args, 1).clone())
                .unwrap_or_default())
        })
        .method("containsKey", &[object], |this, args| {
            Ok(Value::Bool(this_map(this, "containsKey")?.contains_key(arg(&args, 0))))
        })
        .method("remove", &[object], |this, args| {
            Ok(this_map(this, "remove")?.remove(arg(&args, 0)).unwrap_or_default())
        })
        .method("keySet", &[], |this, _| {
            let map = this_map(this, "keySet")?;
            Ok(Value::list(map.read().keys().map(|key| key.0.clone())))
        })
        .method("values", &[], |this, _| {
            let map = this_map(this, "values")?;
            Ok(Value::list(map.read().values().cloned()))
        })
        .method("clear", &[], |this, _| {
            this_map(this, "clear")?.write().clear();
            Ok(Value::Null)
        })
        .build()
}

fn receiver_error(member: &str, expected: &str, found: &Value) -> Error {
    Error::invocation(
        member,
        format!("expected a `{expected}` receiver, found `{}`", found.kind_name()),
    )
}

fn arg(args: &[Value], idx: usize) -> &Value {
    const NULL: &Value = &Value::Null;
    args.get(idx).unwrap_or(NULL)
}

fn int_arg(args: &[Value], idx: usize, member: &str) -> Result<i64, Error> {
    arg(args, idx)
        .as_int()
        .ok_or_else(|| Error::invocation(member, format!("argument {idx} must be an int")))
}

fn text_arg(args: &[Value], idx: usize) -> String {
    arg(args, idx).to_string()
}

fn str_arg<'a>(args: &'a [Value], idx: usize, member: &str) -> Result<&'a str, Error> {
    arg(args, idx)
        .as_str()
        .ok_or_else(|| Error::invocation(member, format!("argument {idx} must be a string")))
}

fn this_int(this: &Value, member: &str) -> Result<i64, Error> {
    this.as_int().ok_or_else(|| receiver_error(member, "int", this))
}

fn this_float(this: &Value, member: &str) -> Result<f64, Error> {
    this.as_number()
        .ok_or_else(|| receiver_error(member, "float", this))
}

fn this_str<'a>(this: &'a Value, member: &str) -> Result<&'a str, Error> {
    this.as_str().ok_or_else(|| receiver_error(member, "string", this))
}

fn this_char(this: &Value, member: &str) -> Result<char, Error> {
    match this {
        Value::Char(value) => Ok(*value),
        _ => Err(receiver_error(member, "char", this)),
    }
}

fn this_date<'a>(
    this: &'a Value,
    member: &str,
) -> Result<&'a chrono::DateTime<chrono::Utc>, Error> {
    match this {
        Value::DateTime(value) => Ok(value),
        _ => Err(receiver_error(member, "date", this)),
    }
}

fn this_list<'a>(this: &'a Value, member: &str) -> Result<&'a List, Error> {
    this.as_list().ok_or_else(|| receiver_error(member, "list", this))
}

fn this_map<'a>(this: &'a Value, member: &str) -> Result<&'a Map, Error> {
    this.as_map().ok_or_else(|| receiver_error(member, "map", this))
}

/// Validate an element index.
fn index(idx: i64, len: usize) -> Result<usize, Error> {
    usize::try_from(idx)
        .ok()
        .filter(|idx| *idx < len)
        .ok_or(Error::IndexOutOfBounds { index: idx, len })
}

/// Validate a range bound, which may equal `len`.
fn bound(idx: i64, len: usize) -> Result<usize, Error> {
    usize::try_from(idx)
        .ok()
        .filter(|idx| *idx <= len)
        .ok_or(Error::IndexOutOfBounds { index: idx, len })
}

#[cfg(test)]
mod test {
    use super::*;

    fn call(this: Value, name: &str, args: Vec<Value>) -> Result<Value, Error> {
        let ty = type_of(&this);
        let method = ty
            .method(name, args.len())
            .unwrap_or_else(|| panic!("no method {name}/{}", args.len()));
        method.invoke(&this, args)
    }

    #[test]
    fn string_members() {
        let s = Value::string("Hello");
        assert_eq!(call(s.clone(), "length", vec![]).unwrap(), Value::Int(5));
        assert_eq!(
            call(s.clone(), "substring", vec![Value::Int(1), Value::Int(3)]).unwrap(),
            Value::string("el")
        );
        assert_eq!(
            call(s.clone(), "substring", vec![Value::Int(3)]).unwrap(),
            Value::string("lo")
        );
        assert!(matches!(
            call(s.clone(), "substring", vec![Value::Int(9)]),
            Err(Error::IndexOutOfBounds { index: 9, len: 5 })
        ));
        assert_eq!(
            call(s.clone(), "charAt", vec![Value::Int(0)]).unwrap(),
            Value::Char('H')
        );
        assert_eq!(
            call(s.clone(), "indexOf", vec![Value::string("l")]).unwrap(),
            Value::Int(2)
        );

        let length = builtins().string.field("length").unwrap();
        assert_eq!(length.get(&s).unwrap(), Value::Int(5));
    }

    #[test]
    fn list_members() {
        let list = Value::list([Value::Int(1)]);
        call(list.clone(), "add", vec![Value::Int(2)]).unwrap();
        assert_eq!(call(list.clone(), "size", vec![]).unwrap(), Value::Int(2));
        assert_eq!(
            call(list.clone(), "get", vec![Value::Int(1)]).unwrap(),
            Value::Int(2)
        );
        assert!(call(list.clone(), "get", vec![Value::Int(2)]).is_err());
        assert_eq!(
            call(list, "contains", vec![Value::Int(1)]).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn map_members() {
        let map = Value::map([]);
        call(map.clone(), "put", vec![Value::string("a"), Value::Int(1)]).unwrap();
        assert_eq!(
            call(map.clone(), "get", vec![Value::string("a")]).unwrap(),
            Value::Int(1)
        );
        assert_eq!(
            call(map, "keySet", vec![]).unwrap(),
            Value::list([Value::string("a")])
        );
    }

    #[test]
    fn aliases() {
        let b = builtins();
        assert_eq!(b.by_name("long").unwrap().id(), b.int.id());
        assert_eq!(b.by_name("double").unwrap().id(), b.float.id());
        assert!(b.by_name("Long").is_none());
        assert!(b.int.is_subtype_of(&b.object));
    }

    #[test]
    fn date_parse() {
        let Some(Value::DateTime(date)) = parse_date("2024-02-03") else {
            panic!("invalid date");
        };
        assert_eq!((date.year(), date.month(), date.day()), (2024, 2, 3));
        assert!(parse_date("2024-02-03T04:05:06Z").is_some());
        assert!(parse_date("yesterday").is_none());
    }
}
