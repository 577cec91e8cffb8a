use crate::{
    Error,
    cache::SnapshotCache,
    types::{self, Constructor, Method, Property, Type, builtins},
    utils,
    value::Value,
};
use indexmap::IndexMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Resolves type names and the members of types.
///
/// Member lookups follow bean conventions, see [`TypeResolver::find_getter`]
/// and [`TypeResolver::find_setter`].
pub trait TypeResolver: Send + Sync {
    /// Resolve a type name.
    ///
    /// # Errors
    /// + [`Error::UnresolvedType`] if the name is not known.
    fn resolve(&self, name: &str) -> Result<Arc<Type>, Error>;

    /// Runtime type of a value.
    fn type_of(&self, value: &Value) -> Arc<Type> {
        types::type_of(value)
    }

    /// If the value is an instance of the type.
    /// `null` is not an instance of any type.
    fn is_instance(&self, value: &Value, ty: &Type) -> bool {
        !value.is_null() && self.type_of(value).is_subtype_of(ty)
    }

    /// `getName()`, then `isName()`, then the field `name`.
    fn find_getter(&self, ty: &Arc<Type>, name: &str) -> Option<Property> {
        let cap = utils::capitalize(name);
        if let Some(method) = ty.method(&format!("get{cap}"), 0) {
            return Some(Property::Getter(method.clone()));
        }
        if let Some(method) = ty.method(&format!("is{cap}"), 0) {
            return Some(Property::Getter(method.clone()));
        }
        ty.field(name).cloned().map(Property::Field)
    }

    /// `setName(value)`, then the writable field `name`.
    fn find_setter(&self, ty: &Arc<Type>, name: &str) -> Option<Property> {
        let cap = utils::capitalize(name);
        if let Some(method) = ty.method(&format!("set{cap}"), 1) {
            return Some(Property::Setter(method.clone()));
        }
        ty.field(name)
            .filter(|field| field.is_writable())
            .cloned()
            .map(Property::Field)
    }

    fn find_method(&self, ty: &Arc<Type>, name: &str, arity: usize) -> Option<Arc<Method>> {
        ty.method(name, arity).cloned()
    }

    fn find_constructor(&self, ty: &Arc<Type>, arity: usize) -> Option<Arc<Constructor>> {
        ty.constructor(arity).cloned()
    }
}

/// Resolver over the built-in types and host registered types.
///
/// Names resolve against, in order,
/// 1. built-in short names (`string`, `int`, `long`, ...),
/// 2. registered aliases,
/// 3. registered fully qualified names,
/// 4. each search path prefix joined with the name.
///
/// Successful resolutions are cached for the lifetime of the resolver,
/// so types should be registered before they are first used.
#[derive(Default)]
pub struct DefaultTypeResolver {
    types: RwLock<IndexMap<String, Arc<Type>>>,
    aliases: RwLock<IndexMap<String, String>>,
    search_path: RwLock<Vec<String>>,
    cache: SnapshotCache<String, Arc<Type>>,
}

impl DefaultTypeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type under its fully qualified name.
    pub fn register(&self, ty: Arc<Type>) {
        #[cfg(feature = "tracing")]
        tracing::debug!(name = ty.name(), "register type");

        self.types
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(ty.name().to_string(), ty);
    }

    /// Make `alias` resolve to the type named `target`.
    pub fn alias(&self, alias: impl Into<String>, target: impl Into<String>) {
        self.aliases
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(alias.into(), target.into());
    }

    /// Add a package prefix to try for names that do not resolve directly.
    /// e.g. With `app.model`, `User` resolves to `app.model.User`.
    pub fn add_search_path(&self, prefix: impl Into<String>) {
        self.search_path
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(prefix.into());
    }

    /// Number of cached resolutions.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    fn lookup(&self, name: &str) -> Result<Arc<Type>, Error> {
        if let Some(ty) = builtins().by_name(name) {
            return Ok(ty.clone());
        }

        let types = self.types.read().unwrap_or_else(PoisonError::into_inner);
        let aliases = self.aliases.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(target) = aliases.get(name) {
            if let Some(ty) = types.get(target) {
                return Ok(ty.clone());
            }
            if let Some(ty) = builtins().by_name(target) {
                return Ok(ty.clone());
            }
        }

        if let Some(ty) = types.get(name) {
            return Ok(ty.clone());
        }

        let search_path = self
            .search_path
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        search_path
            .iter()
            .find_map(|prefix| types.get(&format!("{prefix}.{name}")))
            .cloned()
            .ok_or_else(|| Error::UnresolvedType(name.to_string()))
    }
}

impl TypeResolver for DefaultTypeResolver {
    fn resolve(&self, name: &str) -> Result<Arc<Type>, Error> {
        self.cache.get_or_try_insert_with(&name.to_string(), || {
            #[cfg(feature = "tracing")]
            tracing::debug!(?name, "resolve type");

            self.lookup(name)
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn user() -> Arc<Type> {
        let b = builtins();
        Type::builder("app.model.User")
            .field("name", &b.string)
            .field("admin", &b.boolean)
            .method("isAdmin", &[], |this, _| {
                let Value::Object(this) = this else {
                    return Ok(Value::Bool(false));
                };
                Ok(Value::Bool(this.get("admin") == Some(Value::Bool(true))))
            })
            .default_constructor()
            .build()
    }

    #[test]
    fn resolution_order() {
        let resolver = DefaultTypeResolver::new();
        let user = user();
        resolver.register(user.clone());

        assert_eq!(resolver.resolve("long").unwrap().id(), builtins().int.id());
        assert_eq!(resolver.resolve("app.model.User").unwrap().id(), user.id());
        assert!(matches!(
            resolver.resolve("User"),
            Err(Error::UnresolvedType(name)) if name == "User"
        ));

        resolver.add_search_path("app.model");
        assert_eq!(resolver.resolve("User").unwrap().id(), user.id());

        resolver.alias("Person", "app.model.User");
        assert_eq!(resolver.resolve("Person").unwrap().id(), user.id());
        assert_eq!(resolver.cached(), 4);
    }

    #[test]
    fn bean_getters() {
        let resolver = DefaultTypeResolver::new();
        let user = user();

        let Some(Property::Getter(getter)) = resolver.find_getter(&user, "admin") else {
            panic!("expected `isAdmin`");
        };
        assert_eq!(getter.name(), "isAdmin");

        let Some(Property::Field(field)) = resolver.find_getter(&user, "name") else {
            panic!("expected field");
        };
        assert_eq!(field.name(), "name");
        assert!(resolver.find_getter(&user, "missing").is_none());
        assert!(matches!(
            resolver.find_setter(&user, "name"),
            Some(Property::Field(_))
        ));
    }

    #[test]
    fn instances() {
        let resolver = DefaultTypeResolver::new();
        let b = builtins();
        assert!(resolver.is_instance(&Value::Int(1), &b.int));
        assert!(resolver.is_instance(&Value::Int(1), &b.object));
        assert!(!resolver.is_instance(&Value::Int(1), &b.string));
        assert!(!resolver.is_instance(&Value::Null, &b.object));
    }
}
