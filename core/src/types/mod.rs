//! Runtime types and their members.
//!
//! Types are immutable once built. Host code registers its own types with
//! [`Type::builder`]; the built-in types live in [`builtin`].
pub mod builtin;

use crate::{Error, value::Value};
use indexmap::IndexMap;
use std::{
    fmt,
    sync::{
        Arc, PoisonError, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

pub use builtin::{builtins, type_of};

static NEXT_TYPE_ID: AtomicU64 = AtomicU64::new(1);

/// Process unique type identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
pub struct TypeId(u64);

impl TypeId {
    fn next() -> Self {
        Self(NEXT_TYPE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Types with built-in conversion rules.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Primitive {
    String,
    Char,
    Int,
    Float,
    Bool,
    Date,
}

pub type MethodFn = Arc<dyn Fn(&Value, Vec<Value>) -> Result<Value, Error> + Send + Sync>;
pub type ConstructorFn = Arc<dyn Fn(&Arc<Type>, Vec<Value>) -> Result<Value, Error> + Send + Sync>;
pub type GetterFn = Arc<dyn Fn(&Value) -> Result<Value, Error> + Send + Sync>;

pub struct Type {
    id: TypeId,
    name: String,
    primitive: Option<Primitive>,
    parent: Option<Arc<Type>>,
    fields: IndexMap<String, Arc<Field>>,
    methods: Vec<Arc<Method>>,
    constructors: Vec<Arc<Constructor>>,
}

impl Type {
    pub fn builder(name: impl Into<String>) -> TypeBuilder {
        TypeBuilder::new(name)
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Fully qualified name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name without its package prefix.
    /// e.g. `app.model.User` -> `User`.
    pub fn simple_name(&self) -> &str {
        self.name
            .rsplit_once('.')
            .map_or(self.name.as_str(), |(_, name)| name)
    }

    pub fn primitive(&self) -> Option<Primitive> {
        self.primitive
    }

    pub fn parent(&self) -> Option<&Arc<Type>> {
        self.parent.as_ref()
    }

    /// Iterator over the type and its ancestors, nearest first.
    pub fn ancestry(&self) -> impl Iterator<Item = &Type> {
        std::iter::successors(Some(self), |ty| ty.parent.as_deref())
    }

    /// If `self` is `other` or derives from it.
    pub fn is_subtype_of(&self, other: &Type) -> bool {
        self.ancestry().any(|ty| ty.id == other.id)
    }

    /// Field declared on the type or one of its ancestors.
    pub fn field(&self, name: &str) -> Option<&Arc<Field>> {
        self.ancestry().find_map(|ty| ty.fields.get(name))
    }

    /// Names of the instance fields stored on objects of this type,
    /// ancestors first.
    pub fn storage_fields(&self) -> impl Iterator<Item = &str> {
        let mut names = self
            .ancestry()
            .flat_map(|ty| {
                ty.fields
                    .values()
                    .rev()
                    .filter(|field| matches!(field.slot, FieldSlot::Instance))
                    .map(|field| field.name.as_str())
            })
            .collect::<Vec<_>>();
        names.reverse();
        names.into_iter()
    }

    /// Method accepting `arity` arguments.
    /// Exact arity matches are preferred over variadic ones, and
    /// the type is searched before its ancestors.
    pub fn method(&self, name: &str, arity: usize) -> Option<&Arc<Method>> {
        self.ancestry()
            .find_map(|ty| {
                ty.methods
                    .iter()
                    .find(|method| method.name == name && !method.variadic && method.arity() == arity)
            })
            .or_else(|| {
                self.ancestry().find_map(|ty| {
                    ty.methods
                        .iter()
                        .find(|method| method.name == name && method.accepts(arity))
                })
            })
    }

    pub fn constructor(&self, arity: usize) -> Option<&Arc<Constructor>> {
        self.constructors
            .iter()
            .find(|constructor| constructor.params.len() == arity)
    }

    pub fn methods(&self) -> &[Arc<Method>] {
        &self.methods
    }

    pub fn fields(&self) -> impl Iterator<Item = &Arc<Field>> {
        self.fields.values()
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Type")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

pub struct TypeBuilder {
    name: String,
    primitive: Option<Primitive>,
    parent: Option<Arc<Type>>,
    detached: bool,
    fields: IndexMap<String, Arc<Field>>,
    methods: Vec<Arc<Method>>,
    constructors: Vec<Arc<Constructor>>,
}

impl TypeBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primitive: None,
            parent: None,
            detached: false,
            fields: IndexMap::new(),
            methods: vec![],
            constructors: vec![],
        }
    }

    /// Do not derive from `object`.
    pub(crate) fn detached(mut self) -> Self {
        self.detached = true;
        self
    }

    pub(crate) fn primitive(mut self, primitive: Primitive) -> Self {
        self.primitive = Some(primitive);
        self
    }

    /// Set the parent type.
    /// Defaults to `object`.
    pub fn extends(mut self, parent: &Arc<Type>) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    /// Instance field stored on each object.
    pub fn field(self, name: impl Into<String>, ty: &Arc<Type>) -> Self {
        self.add_field(name, ty, FieldSlot::Instance, false)
    }

    /// Writable field shared by the type.
    pub fn static_field(self, name: impl Into<String>, ty: &Arc<Type>, value: Value) -> Self {
        self.add_field(name, ty, FieldSlot::Static(RwLock::new(value)), false)
    }

    /// Read only field shared by the type.
    pub fn constant(self, name: impl Into<String>, ty: &Arc<Type>, value: Value) -> Self {
        self.add_field(name, ty, FieldSlot::Static(RwLock::new(value)), true)
    }

    /// Read only instance field derived from the receiver.
    pub fn computed(
        self,
        name: impl Into<String>,
        ty: &Arc<Type>,
        getter: impl Fn(&Value) -> Result<Value, Error> + Send + Sync + 'static,
    ) -> Self {
        self.add_field(name, ty, FieldSlot::Computed(Arc::new(getter)), true)
    }

    fn add_field(
        mut self,
        name: impl Into<String>,
        ty: &Arc<Type>,
        slot: FieldSlot,
        is_final: bool,
    ) -> Self {
        let name = name.into();
        let field = Field {
            name: name.clone(),
            ty: ty.clone(),
            slot,
            is_final,
        };
        self.fields.insert(name, Arc::new(field));
        self
    }

    pub fn method(
        self,
        name: impl Into<String>,
        params: &[&Arc<Type>],
        body: impl Fn(&Value, Vec<Value>) -> Result<Value, Error> + Send + Sync + 'static,
    ) -> Self {
        self.add_method(name, params, false, false, Arc::new(body))
    }

    /// Method invoked without a receiver.
    pub fn static_method(
        self,
        name: impl Into<String>,
        params: &[&Arc<Type>],
        body: impl Fn(&Value, Vec<Value>) -> Result<Value, Error> + Send + Sync + 'static,
    ) -> Self {
        self.add_method(name, params, false, true, Arc::new(body))
    }

    /// Method taking `params` followed by any number of extra arguments.
    /// Extra arguments are passed through unconverted.
    pub fn variadic_method(
        self,
        name: impl Into<String>,
        params: &[&Arc<Type>],
        body: impl Fn(&Value, Vec<Value>) -> Result<Value, Error> + Send + Sync + 'static,
    ) -> Self {
        self.add_method(name, params, true, false, Arc::new(body))
    }

    fn add_method(
        mut self,
        name: impl Into<String>,
        params: &[&Arc<Type>],
        variadic: bool,
        is_static: bool,
        body: MethodFn,
    ) -> Self {
        self.methods.push(Arc::new(Method {
            name: name.into(),
            params: params.iter().map(|ty| Arc::clone(ty)).collect(),
            variadic,
            is_static,
            body,
        }));
        self
    }

    pub fn constructor(
        mut self,
        params: &[&Arc<Type>],
        body: impl Fn(&Arc<Type>, Vec<Value>) -> Result<Value, Error> + Send + Sync + 'static,
    ) -> Self {
        self.constructors.push(Arc::new(Constructor {
            params: params.iter().map(|ty| Arc::clone(ty)).collect(),
            body: Arc::new(body),
        }));
        self
    }

    /// Zero argument constructor creating an [`Object`](crate::value::Object)
    /// with every field set to `null`.
    pub fn default_constructor(self) -> Self {
        self.constructor(&[], |ty, _| {
            Ok(Value::Object(crate::value::Object::new(ty.clone())))
        })
    }

    pub fn build(self) -> Arc<Type> {
        let parent = match self.parent {
            Some(parent) => Some(parent),
            None if self.detached => None,
            None => Some(builtins().object.clone()),
        };

        Arc::new(Type {
            id: TypeId::next(),
            name: self.name,
            primitive: self.primitive,
            parent,
            fields: self.fields,
            methods: self.methods,
            constructors: self.constructors,
        })
    }
}

enum FieldSlot {
    Instance,
    Static(RwLock<Value>),
    Computed(GetterFn),
}

pub struct Field {
    name: String,
    ty: Arc<Type>,
    slot: FieldSlot,
    is_final: bool,
}

impl Field {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared type, used to convert assigned values.
    pub fn ty(&self) -> &Arc<Type> {
        &self.ty
    }

    pub fn is_static(&self) -> bool {
        matches!(self.slot, FieldSlot::Static(_))
    }

    pub fn is_writable(&self) -> bool {
        !self.is_final
    }

    pub fn get(&self, receiver: &Value) -> Result<Value, Error> {
        match &self.slot {
            FieldSlot::Instance => match receiver {
                Value::Object(object) => Ok(object.get(&self.name).unwrap_or_default()),
                _ => Err(Error::invalid_operation(format!(
                    "`{}` is not an object with field `{}`",
                    receiver.kind_name(),
                    self.name
                ))),
            },
            FieldSlot::Static(value) => {
                Ok(value.read().unwrap_or_else(PoisonError::into_inner).clone())
            }
            FieldSlot::Computed(getter) => getter(receiver),
        }
    }

    pub fn set(&self, receiver: &Value, value: Value) -> Result<(), Error> {
        if self.is_final {
            return Err(Error::invalid_operation(format!(
                "field `{}` is read only",
                self.name
            )));
        }

        match &self.slot {
            FieldSlot::Instance => match receiver {
                Value::Object(object) => {
                    object.set(self.name.clone(), value);
                    Ok(())
                }
                _ => Err(Error::invalid_operation(format!(
                    "`{}` is not an object with field `{}`",
                    receiver.kind_name(),
                    self.name
                ))),
            },
            FieldSlot::Static(slot) => {
                *slot.write().unwrap_or_else(PoisonError::into_inner) = value;
                Ok(())
            }
            FieldSlot::Computed(_) => unreachable!("computed fields are final"),
        }
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Field({}: {})", self.name, self.ty.name())
    }
}

pub struct Method {
    name: String,
    params: Vec<Arc<Type>>,
    variadic: bool,
    is_static: bool,
    body: MethodFn,
}

impl Method {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared parameter types.
    /// For variadic methods, only the fixed parameters.
    pub fn params(&self) -> &[Arc<Type>] {
        &self.params
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub fn is_variadic(&self) -> bool {
        self.variadic
    }

    pub fn is_static(&self) -> bool {
        self.is_static
    }

    /// If the method can be called with `arity` arguments.
    pub fn accepts(&self, arity: usize) -> bool {
        if self.variadic {
            self.params.len() <= arity
        } else {
            self.params.len() == arity
        }
    }

    /// Invoke the method.
    /// `receiver` is `null` for static methods.
    pub fn invoke(&self, receiver: &Value, args: Vec<Value>) -> Result<Value, Error> {
        (self.body)(receiver, args)
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Method({}/{}", self.name, self.params.len())?;
        if self.variadic {
            write!(f, "+")?;
        }
        write!(f, ")")
    }
}

pub struct Constructor {
    params: Vec<Arc<Type>>,
    body: ConstructorFn,
}

impl Constructor {
    pub fn params(&self) -> &[Arc<Type>] {
        &self.params
    }

    pub fn invoke(&self, ty: &Arc<Type>, args: Vec<Value>) -> Result<Value, Error> {
        (self.body)(ty, args)
    }
}

impl fmt::Debug for Constructor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Constructor/{}", self.params.len())
    }
}

/// Resolved property accessor.
#[derive(Debug, Clone)]
pub enum Property {
    /// `getName()` or `isName()`.
    Getter(Arc<Method>),
    /// `setName(value)`.
    Setter(Arc<Method>),
    Field(Arc<Field>),
}

impl Property {
    pub fn get(&self, receiver: &Value) -> Result<Value, Error> {
        match self {
            Self::Getter(method) => method.invoke(receiver, vec![]),
            Self::Field(field) => field.get(receiver),
            Self::Setter(method) => Err(Error::invalid_operation(format!(
                "`{}` is a setter",
                method.name()
            ))),
        }
    }

    pub fn set(&self, receiver: &Value, value: Value) -> Result<(), Error> {
        match self {
            Self::Setter(method) => method.invoke(receiver, vec![value]).map(|_| ()),
            Self::Field(field) => field.set(receiver, value),
            Self::Getter(method) => Err(Error::invalid_operation(format!(
                "`{}` is a getter",
                method.name()
            ))),
        }
    }

    /// Declared type of the value accepted by a setter.
    pub fn value_type(&self) -> Option<&Arc<Type>> {
        match self {
            Self::Setter(method) => method.params().first(),
            Self::Field(field) => Some(field.ty()),
            Self::Getter(_) => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::value::Object;

    fn point() -> Arc<Type> {
        let b = builtins();
        Type::builder("geo.Point")
            .field("x", &b.int)
            .field("y", &b.int)
            .constant("ORIGIN", &b.string, Value::string("0,0"))
            .default_constructor()
            .method("norm", &[], |this, _| {
                let Value::Object(this) = this else {
                    return Err(Error::invalid_operation("not a point"));
                };
                let x = this.get("x").and_then(|v| v.as_int()).unwrap_or(0);
                let y = this.get("y").and_then(|v| v.as_int()).unwrap_or(0);
                Ok(Value::Int(x.abs() + y.abs()))
            })
            .variadic_method("sum", &[], |_, args| {
                Ok(Value::Int(args.iter().filter_map(Value::as_int).sum()))
            })
            .build()
    }

    #[test]
    fn builder() {
        let ty = point();
        assert_eq!(ty.name(), "geo.Point");
        assert_eq!(ty.simple_name(), "Point");
        assert!(ty.is_subtype_of(&builtins().object));
        assert!(!ty.is_subtype_of(&builtins().string));
        assert_eq!(ty.storage_fields().collect::<Vec<_>>(), vec!["x", "y"]);
    }

    #[test]
    fn method_lookup() {
        let ty = point();
        assert!(ty.method("norm", 0).is_some());
        assert!(ty.method("norm", 1).is_none());
        let sum = ty.method("sum", 3).unwrap();
        assert!(sum.is_variadic());
        assert_eq!(
            sum.invoke(&Value::Null, vec![Value::Int(1), Value::Int(2), Value::Int(3)])
                .unwrap(),
            Value::Int(6)
        );

        // inherited from `object`
        assert!(ty.method("toString", 0).is_some());
    }

    #[test]
    fn fields() {
        let ty = point();
        let object = Object::new(ty.clone());
        let this = Value::Object(object.clone());
        let x = ty.field("x").unwrap();
        assert_eq!(x.get(&this).unwrap(), Value::Null);
        x.set(&this, Value::Int(3)).unwrap();
        assert_eq!(object.get("x"), Some(Value::Int(3)));

        let origin = ty.field("ORIGIN").unwrap();
        assert!(origin.is_static());
        assert_eq!(origin.get(&Value::Null).unwrap(), Value::string("0,0"));
        assert!(origin.set(&Value::Null, Value::Null).is_err());
    }
}
