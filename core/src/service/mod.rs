//! Services consulted while evaluating.
mod collection;
mod convert;
mod resolver;

pub use collection::{CollectionProvider, DefaultCollections};
pub use convert::{ConversionProvider, DefaultConversions};
pub use resolver::{DefaultTypeResolver, TypeResolver};

use std::{
    fmt,
    sync::{Arc, LazyLock},
};

static DEFAULT_SERVICES: LazyLock<Services> = LazyLock::new(|| Services {
    collections: Arc::new(DefaultCollections),
    types: Arc::new(DefaultTypeResolver::new()),
    conversions: Arc::new(DefaultConversions),
});

/// Bundle of the pluggable runtime services.
///
/// `Services::default()` returns the process wide bundle.
/// Replace individual services with the `with_*` methods.
#[derive(Clone)]
pub struct Services {
    pub collections: Arc<dyn CollectionProvider>,
    pub types: Arc<dyn TypeResolver>,
    pub conversions: Arc<dyn ConversionProvider>,
}

impl Services {
    pub fn with_collections(mut self, collections: Arc<dyn CollectionProvider>) -> Self {
        self.collections = collections;
        self
    }

    pub fn with_types(mut self, types: Arc<dyn TypeResolver>) -> Self {
        self.types = types;
        self
    }

    pub fn with_conversions(mut self, conversions: Arc<dyn ConversionProvider>) -> Self {
        self.conversions = conversions;
        self
    }
}

impl Default for Services {
    fn default() -> Self {
        DEFAULT_SERVICES.clone()
    }
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services").finish_non_exhaustive()
    }
}
