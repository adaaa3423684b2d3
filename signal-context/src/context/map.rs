//! Immutable, copy-on-write subscriber context.

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// A key in a [`Context`].
///
/// Caller-chosen keys are always [`ContextKey::Named`]. The capture marker is a
/// distinct variant, so it can never collide with a name and no public write
/// path accepts it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ContextKey {
    /// A caller-chosen key.
    Named(Arc<str>),
    /// The reserved entry written by context capture.
    CaptureMarker,
}

impl ContextKey {
    /// Creates a named key.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(Arc::from(name.into()))
    }

    /// Returns the name for named keys.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Named(name) => Some(name),
            Self::CaptureMarker => None,
        }
    }

    /// Returns true for the capture marker.
    #[must_use]
    pub fn is_capture_marker(&self) -> bool {
        matches!(self, Self::CaptureMarker)
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => write!(f, "{name}"),
            Self::CaptureMarker => write!(f, "<captured-context>"),
        }
    }
}

/// An immutable key/value context attached to a subscription.
///
/// Every write returns a new context; clones share storage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Context {
    entries: Arc<BTreeMap<ContextKey, Value>>,
}

impl Context {
    /// Returns the empty context.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates a context holding a single entry.
    #[must_use]
    pub fn of(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::empty().put(key, value)
    }

    /// Gets a value by name.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(&ContextKey::named(key))
    }

    /// Gets a value by key, including the capture marker.
    #[must_use]
    pub fn get_key(&self, key: &ContextKey) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Checks if a named key exists.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Returns a new context with the entry added or replaced.
    #[must_use]
    pub fn put(&self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with_entries(std::iter::once((ContextKey::named(key), value.into())))
    }

    /// Returns a new context with every named entry of `other` added.
    ///
    /// The capture marker of `other` is not copied.
    #[must_use]
    pub fn put_all(&self, other: &Self) -> Self {
        self.with_entries(
            other
                .entries
                .iter()
                .filter(|(key, _)| !key.is_capture_marker())
                .map(|(key, value)| (key.clone(), value.clone())),
        )
    }

    /// Returns a new context without the named entry.
    #[must_use]
    pub fn delete(&self, key: &str) -> Self {
        let key = ContextKey::named(key);
        if !self.entries.contains_key(&key) {
            return self.clone();
        }
        let mut entries = (*self.entries).clone();
        entries.remove(&key);
        Self {
            entries: Arc::new(entries),
        }
    }

    /// Returns true if a capture has been recorded in this context.
    #[must_use]
    pub fn has_capture_marker(&self) -> bool {
        matches!(
            self.entries.get(&ContextKey::CaptureMarker),
            Some(Value::Bool(true))
        )
    }

    /// Returns the number of entries, including the capture marker.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the context has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over all entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&ContextKey, &Value)> {
        self.entries.iter()
    }

    /// Iterates over named entries only.
    pub fn named_entries(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries
            .iter()
            .filter_map(|(key, value)| key.name().map(|name| (name, value)))
    }

    /// Calls `f` for every entry, including the capture marker.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&ContextKey, &Value),
    {
        for (key, value) in self.entries.iter() {
            f(key, value);
        }
    }

    /// Returns a copy of the named entries.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, Value> {
        self.named_entries()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    /// Returns true if both contexts share the same storage.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries)
    }

    /// Writes captured entries and the capture marker in one copy.
    pub(crate) fn with_captured<I>(&self, captured: I) -> Self
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        self.with_entries(
            captured
                .into_iter()
                .map(|(name, value)| (ContextKey::named(name), value))
                .chain(std::iter::once((ContextKey::CaptureMarker, Value::Bool(true)))),
        )
    }

    fn with_entries<I>(&self, added: I) -> Self
    where
        I: IntoIterator<Item = (ContextKey, Value)>,
    {
        let mut entries = (*self.entries).clone();
        entries.extend(added);
        Self {
            entries: Arc::new(entries),
        }
    }
}
