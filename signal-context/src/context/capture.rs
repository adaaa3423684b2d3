//! Capture of thread-local values into a [`Context`].

use super::Context;
use crate::accessor::AccessorRegistry;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// Predicate selecting which accessor keys are captured.
pub type KeyPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

static DEFAULT_CAPTURE: OnceLock<Arc<ContextCapture>> = OnceLock::new();

/// Returns the shared capture function: every key, global registry.
///
/// Repeated calls return the same instance.
#[must_use]
pub fn context_capture() -> Arc<ContextCapture> {
    Arc::clone(DEFAULT_CAPTURE.get_or_init(|| Arc::new(ContextCapture::new(None, None))))
}

/// Returns a new capture function over the global registry using `predicate`.
pub fn context_capture_with<P>(predicate: P) -> Arc<ContextCapture>
where
    P: Fn(&str) -> bool + Send + Sync + 'static,
{
    Arc::new(ContextCapture::new(Some(Arc::new(predicate)), None))
}

enum RegistrySource {
    /// Resolved on every capture so a swapped global registry is honored.
    Global,
    Explicit(Arc<AccessorRegistry>),
}

/// Turns a registry and a key predicate into a context snapshot.
///
/// Applying the capture reads the calling thread's current value for every
/// selected accessor and writes it into a copy of the given context, together
/// with the capture marker. Accessors holding no value are skipped.
pub struct ContextCapture {
    predicate: Option<KeyPredicate>,
    registry: RegistrySource,
}

impl ContextCapture {
    /// Creates a capture function.
    ///
    /// A missing predicate selects every key; a missing registry means the
    /// global registry.
    #[must_use]
    pub fn new(predicate: Option<KeyPredicate>, registry: Option<Arc<AccessorRegistry>>) -> Self {
        Self {
            predicate,
            registry: registry.map_or(RegistrySource::Global, RegistrySource::Explicit),
        }
    }

    /// Creates a capture function selecting every key of `registry`.
    #[must_use]
    pub fn with_registry(registry: Arc<AccessorRegistry>) -> Self {
        Self::new(None, Some(registry))
    }

    /// Returns the registry this capture reads from.
    #[must_use]
    pub fn registry(&self) -> Arc<AccessorRegistry> {
        match &self.registry {
            RegistrySource::Global => AccessorRegistry::global(),
            RegistrySource::Explicit(registry) => Arc::clone(registry),
        }
    }

    /// Returns true if this capture follows the global registry.
    #[must_use]
    pub fn uses_global_registry(&self) -> bool {
        matches!(self.registry, RegistrySource::Global)
    }

    /// Returns true if `key` is selected.
    #[must_use]
    pub fn selects(&self, key: &str) -> bool {
        self.predicate.as_ref().map_or(true, |p| p(key))
    }

    /// Captures the selected values into a copy of `context`.
    #[must_use]
    pub fn apply(&self, context: &Context) -> Context {
        let registry = self.registry();
        let captured: Vec<_> = registry
            .matching_keys(|key| self.selects(key))
            .into_iter()
            .filter_map(|key| {
                let value = registry.read(&key)?;
                Some((key, value))
            })
            .collect();

        debug!(
            captured = captured.len(),
            registered = registry.len(),
            "Captured thread-local context"
        );

        context.with_captured(captured)
    }
}

impl fmt::Debug for ContextCapture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextCapture")
            .field("filtered", &self.predicate.is_some())
            .field("global_registry", &self.uses_global_registry())
            .finish()
    }
}
