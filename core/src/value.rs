use crate::{Error, types::Type};
use indexmap::IndexMap;
use std::{
    any::Any,
    fmt,
    hash::{Hash, Hasher},
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

/// External variables supplied to an evaluation.
pub type Variables = IndexMap<String, Value>;

#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Char(char),
    Int(i64),
    Float(f64),
    String(String),
    DateTime(chrono::DateTime<chrono::Utc>),
    List(List),
    Map(Map),
    Object(Object),
    Function(Function),
    Type(Arc<Type>),
}

impl Value {
    pub fn string(value: impl Into<String>) -> Self {
        Self::String(value.into())
    }

    pub fn list(values: impl IntoIterator<Item = Value>) -> Self {
        Self::List(List::new(values.into_iter().collect()))
    }

    pub fn map(entries: impl IntoIterator<Item = (Value, Value)>) -> Self {
        Self::Map(Map::from_entries(entries))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn is_int(&self) -> bool {
        matches!(self, Self::Int(_))
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Self::Float(_))
    }

    /// If the value is an `Int`, `Float`, or `Char`.
    pub fn is_number(&self) -> bool {
        matches!(self, Self::Int(_) | Self::Float(_) | Self::Char(_))
    }

    /// Value as an integer.
    /// `Char` is converted to its code point.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            Self::Char(value) => Some(*value as i64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        if let Self::Float(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    /// Value as a number.
    /// Converts `Int` and `Char` to `f64` value.
    /// Does **not** attempt to parse `String`.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Float(value) => Some(*value),
            Self::Int(value) => Some(*value as f64),
            Self::Char(value) => Some(*value as u32 as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        if let Self::Bool(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        if let Self::String(value) = self {
            Some(value)
        } else {
            None
        }
    }

    pub fn as_list(&self) -> Option<&List> {
        if let Self::List(value) = self {
            Some(value)
        } else {
            None
        }
    }

    pub fn as_map(&self) -> Option<&Map> {
        if let Self::Map(value) = self {
            Some(value)
        } else {
            None
        }
    }

    /// Name of the value's kind, for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Char(_) => "char",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::DateTime(_) => "date",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Object(_) => "object",
            Self::Function(_) => "function",
            Self::Type(_) => "type",
        }
    }

    /// Reference identity for shared values, value equality for scalars.
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::List(left), Self::List(right)) => left.ptr_eq(right),
            (Self::Map(left), Self::Map(right)) => left.ptr_eq(right),
            (Self::Object(left), Self::Object(right)) => left.ptr_eq(right),
            (Self::Function(left), Self::Function(right)) => left.ptr_eq(right),
            (Self::Type(left), Self::Type(right)) => left.id() == right.id(),
            (left, right) => left == right,
        }
    }
}

/// Structural equality.
/// Shared values compare by content, except objects and functions which
/// compare by identity.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(left), Self::Bool(right)) => left == right,
            (Self::Char(left), Self::Char(right)) => left == right,
            (Self::Int(left), Self::Int(right)) => left == right,
            (Self::Float(left), Self::Float(right)) => left == right,
            (Self::String(left), Self::String(right)) => left == right,
            (Self::DateTime(left), Self::DateTime(right)) => left == right,
            (Self::List(left), Self::List(right)) => {
                left.ptr_eq(right) || *left.read() == *right.read()
            }
            (Self::Map(left), Self::Map(right)) => {
                left.ptr_eq(right) || *left.read() == *right.read()
            }
            (Self::Object(left), Self::Object(right)) => left.ptr_eq(right),
            (Self::Function(left), Self::Function(right)) => left.ptr_eq(right),
            (Self::Type(left), Self::Type(right)) => left.id() == right.id(),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Char(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            // `Debug` keeps the fractional part, e.g. `1.0`.
            Self::Float(value) => write!(f, "{value:?}"),
            Self::String(value) => write!(f, "{value}"),
            Self::DateTime(value) => write!(f, "{}", value.to_rfc3339()),
            Self::List(list) => {
                write!(f, "[")?;
                for (idx, item) in list.read().iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Map(map) => {
                write!(f, "{{")?;
                for (idx, (key, value)) in map.read().iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {value}", key.0)?;
                }
                write!(f, "}}")
            }
            Self::Object(object) => {
                write!(f, "{}{{", object.ty().name())?;
                for (idx, (name, value)) in object.fields().iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}: {value}")?;
                }
                write!(f, "}}")
            }
            Self::Function(function) => write!(f, "fn {}", function.name()),
            Self::Type(ty) => write!(f, "{}", ty.name()),
        }
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Self::$variant(value.into())
                }
            }
        )*
    };
}

impl_from! {
    bool => Bool,
    char => Char,
    i32 => Int,
    i64 => Int,
    u32 => Int,
    f64 => Float,
    String => String,
    &str => String,
    chrono::DateTime<chrono::Utc> => DateTime,
    List => List,
    Map => Map,
    Object => Object,
    Function => Function,
    Arc<Type> => Type,
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or_default()
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Self::List(List::new(value))
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Shared, growable sequence.
/// Clones share the same storage.
#[derive(Clone, Default)]
pub struct List(Arc<RwLock<Vec<Value>>>);

impl List {
    pub fn new(values: Vec<Value>) -> Self {
        Self(Arc::new(RwLock::new(values)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Vec<Value>> {
        read_lock(&self.0)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Vec<Value>> {
        write_lock(&self.0)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<Value> {
        self.read().get(idx).cloned()
    }

    pub fn push(&self, value: Value) {
        self.write().push(value);
    }

    /// Copy of the current elements.
    pub fn to_vec(&self) -> Vec<Value> {
        self.read().clone()
    }

    pub fn ptr_eq(&self, other: &List) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for List {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.read().iter()).finish()
    }
}

/// Map key.
/// Scalars hash by value, shared values by identity.
#[derive(Debug, Clone)]
pub struct Key(pub Value);

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (Value::Float(left), Value::Float(right)) => left.to_bits() == right.to_bits(),
            (left, right) => left.same(right),
        }
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(&self.0).hash(state);
        match &self.0 {
            Value::Null => {}
            Value::Bool(value) => value.hash(state),
            Value::Char(value) => value.hash(state),
            Value::Int(value) => value.hash(state),
            Value::Float(value) => value.to_bits().hash(state),
            Value::String(value) => value.hash(state),
            Value::DateTime(value) => value.hash(state),
            Value::List(value) => (Arc::as_ptr(&value.0) as usize).hash(state),
            Value::Map(value) => (Arc::as_ptr(&value.0) as usize).hash(state),
            Value::Object(value) => (Arc::as_ptr(&value.0) as usize).hash(state),
            Value::Function(value) => (Arc::as_ptr(&value.0) as *const () as usize).hash(state),
            Value::Type(value) => value.id().hash(state),
        }
    }
}

impl<T: Into<Value>> From<T> for Key {
    fn from(value: T) -> Self {
        Self(value.into())
    }
}

/// Shared, insertion ordered map.
/// Clones share the same storage.
#[derive(Clone, Default)]
pub struct Map(Arc<RwLock<IndexMap<Key, Value>>>);

impl Map {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (Value, Value)>) -> Self {
        let entries = entries
            .into_iter()
            .map(|(key, value)| (Key(key), value))
            .collect();
        Self(Arc::new(RwLock::new(entries)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, IndexMap<Key, Value>> {
        read_lock(&self.0)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, IndexMap<Key, Value>> {
        write_lock(&self.0)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn get(&self, key: &Value) -> Option<Value> {
        self.read().get(&Key(key.clone())).cloned()
    }

    pub fn contains_key(&self, key: &Value) -> bool {
        self.read().contains_key(&Key(key.clone()))
    }

    /// Insert a value, returning the previous one.
    pub fn insert(&self, key: impl Into<Value>, value: Value) -> Option<Value> {
        self.write().insert(Key(key.into()), value)
    }

    pub fn remove(&self, key: &Value) -> Option<Value> {
        self.write().shift_remove(&Key(key.clone()))
    }

    /// Copy of the current entries.
    pub fn entries(&self) -> Vec<(Value, Value)> {
        self.read()
            .iter()
            .map(|(key, value)| (key.0.clone(), value.clone()))
            .collect()
    }

    pub fn ptr_eq(&self, other: &Map) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl From<&Variables> for Map {
    fn from(variables: &Variables) -> Self {
        Self::from_entries(
            variables
                .iter()
                .map(|(name, value)| (Value::string(name), value.clone())),
        )
    }
}

impl fmt::Debug for Map {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.read().iter().map(|(key, value)| (&key.0, value)))
            .finish()
    }
}

/// Instance of a host registered [`Type`].
#[derive(Clone)]
pub struct Object(Arc<ObjectData>);

struct ObjectData {
    ty: Arc<Type>,
    fields: RwLock<IndexMap<String, Value>>,
    native: Option<Arc<dyn Any + Send + Sync>>,
}

impl Object {
    /// Create an instance with every declared instance field set to `null`.
    pub fn new(ty: Arc<Type>) -> Self {
        Self::build(ty, None)
    }

    /// Create an instance wrapping host data.
    pub fn with_native(ty: Arc<Type>, native: impl Any + Send + Sync) -> Self {
        Self::build(ty, Some(Arc::new(native)))
    }

    fn build(ty: Arc<Type>, native: Option<Arc<dyn Any + Send + Sync>>) -> Self {
        let fields = ty
            .storage_fields()
            .map(|name| (name.to_string(), Value::Null))
            .collect();
        Self(Arc::new(ObjectData {
            ty,
            fields: RwLock::new(fields),
            native,
        }))
    }

    pub fn ty(&self) -> &Arc<Type> {
        &self.0.ty
    }

    pub fn native<T: Any>(&self) -> Option<&T> {
        self.0
            .native
            .as_deref()
            .and_then(|native| native.downcast_ref())
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        read_lock(&self.0.fields).get(name).cloned()
    }

    pub fn set(&self, name: impl Into<String>, value: Value) {
        write_lock(&self.0.fields).insert(name.into(), value);
    }

    /// Copy of the current field values.
    pub fn fields(&self) -> Vec<(String, Value)> {
        read_lock(&self.0.fields)
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    pub fn ptr_eq(&self, other: &Object) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("ty", &self.ty().name())
            .field("fields", &read_lock(&self.0.fields))
            .finish()
    }
}

/// Something that can be invoked with arguments.
pub trait Callable: Send + Sync {
    fn call(&self, args: Vec<Value>) -> Result<Value, Error>;

    fn name(&self) -> &str {
        "anonymous"
    }
}

struct NativeFunction<F> {
    name: String,
    func: F,
}

impl<F> Callable for NativeFunction<F>
where
    F: Fn(Vec<Value>) -> Result<Value, Error> + Send + Sync,
{
    fn call(&self, args: Vec<Value>) -> Result<Value, Error> {
        (self.func)(args)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Clone)]
pub struct Function(Arc<dyn Callable>);

impl Function {
    pub fn new(callable: impl Callable + 'static) -> Self {
        Self(Arc::new(callable))
    }

    /// Wrap a host closure.
    pub fn native<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Value, Error> + Send + Sync + 'static,
    {
        Self::new(NativeFunction {
            name: name.into(),
            func,
        })
    }

    pub fn call(&self, args: Vec<Value>) -> Result<Value, Error> {
        self.0.call(args)
    }

    pub fn name(&self) -> &str {
        self.0.name()
    }

    pub fn ptr_eq(&self, other: &Function) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Function({})", self.name())
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Value {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::{SerializeMap, SerializeSeq};

        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(value) => serializer.serialize_bool(*value),
            Self::Char(value) => serializer.serialize_char(*value),
            Self::Int(value) => serializer.serialize_i64(*value),
            Self::Float(value) => serializer.serialize_f64(*value),
            Self::String(value) => serializer.serialize_str(value),
            Self::DateTime(value) => serializer.serialize_str(&value.to_rfc3339()),
            Self::List(list) => {
                let list = list.read();
                let mut seq = serializer.serialize_seq(Some(list.len()))?;
                for item in list.iter() {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Map(map) => {
                let map = map.read();
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (key, value) in map.iter() {
                    out.serialize_entry(&key.0.to_string(), value)?;
                }
                out.end()
            }
            Self::Object(object) => {
                let fields = object.fields();
                let mut out = serializer.serialize_map(Some(fields.len()))?;
                for (name, value) in fields.iter() {
                    out.serialize_entry(name, value)?;
                }
                out.end()
            }
            Self::Function(_) | Self::Type(_) => serializer.serialize_str(&self.to_string()),
        }
    }
}
