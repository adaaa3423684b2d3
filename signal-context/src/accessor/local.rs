//! Thread-local accessor trait and implementations.

use crate::errors::AccessorError;
use serde_json::Value;
use std::cell::RefCell;
use std::fmt;
use std::thread::LocalKey;

/// Storage type for thread-local slots read by [`LocalKeyAccessor`].
///
/// ```rust,ignore
/// thread_local! {
///     static REQUEST_ID: ValueSlot = const { RefCell::new(None) };
/// }
/// ```
pub type ValueSlot = RefCell<Option<Value>>;

/// Read/write/reset capability for one named piece of thread-bound state.
///
/// Implementations must behave as a single logical slot per execution
/// context: a value written on one thread is invisible to other threads.
pub trait ThreadLocalAccessor: Send + Sync {
    /// Returns the unique key of this accessor.
    fn key(&self) -> &str;

    /// Reads the value currently held by the calling thread.
    fn get_value(&self) -> Option<Value>;

    /// Writes a value for the calling thread.
    fn set_value(&self, value: Value) -> Result<(), AccessorError>;

    /// Clears the calling thread's value.
    fn reset(&self) -> Result<(), AccessorError>;

    /// Puts back the value observed before a scoped write.
    ///
    /// Resets when there was no previous value.
    fn restore(&self, previous: Option<Value>) -> Result<(), AccessorError> {
        match previous {
            Some(value) => self.set_value(value),
            None => self.reset(),
        }
    }
}

/// Accessor backed by a `thread_local!` slot.
pub struct LocalKeyAccessor {
    key: String,
    slot: &'static LocalKey<ValueSlot>,
}

impl LocalKeyAccessor {
    /// Creates an accessor for the given slot.
    #[must_use]
    pub fn new(key: impl Into<String>, slot: &'static LocalKey<ValueSlot>) -> Self {
        Self {
            key: key.into(),
            slot,
        }
    }

    fn replace(&self, value: Option<Value>) -> Result<(), String> {
        self.slot
            .try_with(|cell| {
                cell.try_borrow_mut()
                    .map(|mut current| *current = value)
                    .map_err(|_| "slot is borrowed".to_string())
            })
            .map_err(|_| "thread-local slot destroyed".to_string())?
    }
}

impl ThreadLocalAccessor for LocalKeyAccessor {
    fn key(&self) -> &str {
        &self.key
    }

    fn get_value(&self) -> Option<Value> {
        self.slot
            .try_with(|cell| cell.try_borrow().ok().and_then(|v| v.clone()))
            .ok()
            .flatten()
    }

    fn set_value(&self, value: Value) -> Result<(), AccessorError> {
        self.replace(Some(value))
            .map_err(|msg| AccessorError::write(&self.key, msg))
    }

    fn reset(&self) -> Result<(), AccessorError> {
        self.replace(None)
            .map_err(|msg| AccessorError::reset(&self.key, msg))
    }
}

impl fmt::Debug for LocalKeyAccessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalKeyAccessor")
            .field("key", &self.key)
            .finish()
    }
}

type Getter = Box<dyn Fn() -> Option<Value> + Send + Sync>;
type Setter = Box<dyn Fn(Value) + Send + Sync>;
type Resetter = Box<dyn Fn() + Send + Sync>;

/// Accessor built from getter, setter and reset closures.
pub struct FnAccessor {
    key: String,
    getter: Getter,
    setter: Setter,
    resetter: Resetter,
}

impl FnAccessor {
    /// Creates an accessor from closures.
    pub fn new<G, S, R>(key: impl Into<String>, getter: G, setter: S, resetter: R) -> Self
    where
        G: Fn() -> Option<Value> + Send + Sync + 'static,
        S: Fn(Value) + Send + Sync + 'static,
        R: Fn() + Send + Sync + 'static,
    {
        Self {
            key: key.into(),
            getter: Box::new(getter),
            setter: Box::new(setter),
            resetter: Box::new(resetter),
        }
    }
}

impl ThreadLocalAccessor for FnAccessor {
    fn key(&self) -> &str {
        &self.key
    }

    fn get_value(&self) -> Option<Value> {
        (self.getter)()
    }

    fn set_value(&self, value: Value) -> Result<(), AccessorError> {
        (self.setter)(value);
        Ok(())
    }

    fn reset(&self) -> Result<(), AccessorError> {
        (self.resetter)();
        Ok(())
    }
}

impl fmt::Debug for FnAccessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnAccessor").field("key", &self.key).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;

    thread_local! {
        static SLOT: ValueSlot = const { RefCell::new(None) };
    }

    #[test]
    fn test_local_key_accessor_roundtrip() {
        let accessor = LocalKeyAccessor::new("slot", &SLOT);
        assert_eq!(accessor.get_value(), None);

        accessor.set_value(json!("v")).unwrap();
        assert_eq!(accessor.get_value(), Some(json!("v")));

        accessor.reset().unwrap();
        assert_eq!(accessor.get_value(), None);
    }

    #[test]
    fn test_local_key_accessor_is_per_thread() {
        let accessor = Arc::new(LocalKeyAccessor::new("slot", &SLOT));
        accessor.set_value(json!("main")).unwrap();

        let other = Arc::clone(&accessor);
        let seen = std::thread::spawn(move || other.get_value()).join().unwrap();

        assert_eq!(seen, None);
        assert_eq!(accessor.get_value(), Some(json!("main")));
        accessor.reset().unwrap();
    }

    #[test]
    fn test_local_key_accessor_borrowed_slot_fails() {
        let accessor = LocalKeyAccessor::new("slot", &SLOT);
        let err = SLOT.with(|cell| {
            let _held = cell.borrow();
            accessor.set_value(json!(1)).unwrap_err()
        });
        assert_eq!(err.key, "slot");
        assert_eq!(err.operation, crate::errors::AccessorOperation::Write);
    }

    #[test]
    fn test_restore_default() {
        let accessor = LocalKeyAccessor::new("slot", &SLOT);
        accessor.set_value(json!("scoped")).unwrap();

        accessor.restore(Some(json!("before"))).unwrap();
        assert_eq!(accessor.get_value(), Some(json!("before")));

        accessor.restore(None).unwrap();
        assert_eq!(accessor.get_value(), None);
    }

    #[test]
    fn test_fn_accessor() {
        let cell = Arc::new(Mutex::new(Some(json!("init"))));
        let (get, set, reset) = (cell.clone(), cell.clone(), cell.clone());
        let accessor = FnAccessor::new(
            "fn",
            move || get.lock().clone(),
            move |v| *set.lock() = Some(v),
            move || *reset.lock() = None,
        );

        assert_eq!(accessor.get_value(), Some(json!("init")));
        accessor.set_value(json!(2)).unwrap();
        assert_eq!(*cell.lock(), Some(json!(2)));
        accessor.reset().unwrap();
        assert_eq!(*cell.lock(), None);
    }
}
