//! Registry of named thread-local accessors.

use super::{FnAccessor, LocalKeyAccessor, ThreadLocalAccessor, ValueSlot};
use crate::errors::AccessorError;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::thread::LocalKey;
use tracing::debug;

static GLOBAL_REGISTRY: OnceLock<RwLock<Arc<AccessorRegistry>>> = OnceLock::new();

fn global_slot() -> &'static RwLock<Arc<AccessorRegistry>> {
    GLOBAL_REGISTRY.get_or_init(|| RwLock::new(Arc::new(AccessorRegistry::new())))
}

/// Registry of thread-local accessors keyed by name.
///
/// Keys are enumerated in sorted order.
#[derive(Default)]
pub struct AccessorRegistry {
    accessors: RwLock<BTreeMap<String, Arc<dyn ThreadLocalAccessor>>>,
}

impl AccessorRegistry {
    /// Creates a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the process-wide registry.
    #[must_use]
    pub fn global() -> Arc<Self> {
        Arc::clone(&global_slot().read())
    }

    /// Replaces the process-wide registry, returning the previous one.
    pub fn set_global(registry: Arc<Self>) -> Arc<Self> {
        std::mem::replace(&mut *global_slot().write(), registry)
    }

    /// Adds an accessor and returns `self`, for building registries inline.
    #[must_use]
    pub fn with_accessor(self, accessor: impl ThreadLocalAccessor + 'static) -> Self {
        self.register(Arc::new(accessor));
        self
    }

    /// Registers an accessor, replacing any accessor with the same key.
    pub fn register(
        &self,
        accessor: Arc<dyn ThreadLocalAccessor>,
    ) -> Option<Arc<dyn ThreadLocalAccessor>> {
        let key = accessor.key().to_string();
        debug!(key = %key, "Registering thread-local accessor");
        self.accessors.write().insert(key, accessor)
    }

    /// Registers an accessor for a `thread_local!` slot.
    pub fn register_local(&self, key: impl Into<String>, slot: &'static LocalKey<ValueSlot>) {
        self.register(Arc::new(LocalKeyAccessor::new(key, slot)));
    }

    /// Registers an accessor from getter, setter and reset closures.
    pub fn register_fn<G, S, R>(&self, key: impl Into<String>, getter: G, setter: S, resetter: R)
    where
        G: Fn() -> Option<Value> + Send + Sync + 'static,
        S: Fn(Value) + Send + Sync + 'static,
        R: Fn() + Send + Sync + 'static,
    {
        self.register(Arc::new(FnAccessor::new(key, getter, setter, resetter)));
    }

    /// Removes an accessor. Returns true if one was registered.
    pub fn remove(&self, key: &str) -> bool {
        self.accessors.write().remove(key).is_some()
    }

    /// Gets an accessor by key.
    #[must_use]
    pub fn accessor(&self, key: &str) -> Option<Arc<dyn ThreadLocalAccessor>> {
        self.accessors.read().get(key).cloned()
    }

    /// Checks if a key is registered.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.accessors.read().contains_key(key)
    }

    /// Returns the keys accepted by `predicate`, in sorted order.
    ///
    /// The predicate runs without the registry lock held, so it may register
    /// or remove accessors.
    pub fn matching_keys(&self, predicate: impl Fn(&str) -> bool) -> Vec<String> {
        let mut keys = self.keys();
        keys.retain(|key| predicate(key.as_str()));
        keys
    }

    /// Reads the calling thread's value for `key`.
    #[must_use]
    pub fn read(&self, key: &str) -> Option<Value> {
        self.accessor(key).and_then(|a| a.get_value())
    }

    /// Writes a value for `key`. Unknown keys are ignored.
    pub fn write(&self, key: &str, value: Value) -> Result<(), AccessorError> {
        match self.accessor(key) {
            Some(accessor) => accessor.set_value(value),
            None => Ok(()),
        }
    }

    /// Resets `key`. Unknown keys are ignored.
    pub fn reset(&self, key: &str) -> Result<(), AccessorError> {
        match self.accessor(key) {
            Some(accessor) => accessor.reset(),
            None => Ok(()),
        }
    }

    /// Returns all registered keys.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.accessors.read().keys().cloned().collect()
    }

    /// Returns the number of accessors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.accessors.read().len()
    }

    /// Returns true if no accessors are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.accessors.read().is_empty()
    }
}

impl fmt::Debug for AccessorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessorRegistry")
            .field("keys", &self.keys())
            .finish()
    }
}
