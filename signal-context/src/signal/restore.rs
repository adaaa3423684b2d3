//! Listener decorator that restores captured thread-locals around each callback.

use super::{FusionMode, ListenerResult, SignalListener, SignalType};
use crate::accessor::{AccessorRegistry, ThreadLocalAccessor};
use crate::config::PropagationConfig;
use crate::context::Context;
use crate::errors::{AccessorError, PropagationError};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, trace, warn};
use uuid::Uuid;

/// Thread-local writes performed for one callback.
///
/// Dropping the scope restores every touched accessor in reverse order, so
/// restoration also runs when the callback unwinds.
struct RestoreScope {
    touched: Vec<(Arc<dyn ThreadLocalAccessor>, Option<Value>)>,
}

impl RestoreScope {
    /// Writes every named entry the registry recognizes.
    ///
    /// Keeps going after a failed write; failures are returned alongside the
    /// scope so the caller can decide whether the callback may run.
    fn install(context: &Context, registry: &AccessorRegistry) -> (Self, Vec<AccessorError>) {
        let mut scope = Self {
            touched: Vec::with_capacity(context.len()),
        };
        let mut failures = Vec::new();

        for (key, value) in context.named_entries() {
            let Some(accessor) = registry.accessor(key) else {
                trace!(key = %key, "Skipping key unknown to the registry");
                continue;
            };
            let previous = accessor.get_value();
            match accessor.set_value(value.clone()) {
                Ok(()) => scope.touched.push((accessor, previous)),
                Err(e) => failures.push(e),
            }
        }

        (scope, failures)
    }

    fn restore(mut self) -> Vec<AccessorError> {
        self.restore_all()
    }

    fn restore_all(&mut self) -> Vec<AccessorError> {
        let mut failures = Vec::new();
        while let Some((accessor, previous)) = self.touched.pop() {
            if let Err(e) = accessor.restore(previous) {
                failures.push(e);
            }
        }
        failures
    }
}

impl Drop for RestoreScope {
    fn drop(&mut self) {
        for failure in self.restore_all() {
            warn!(error = %failure, "Failed to restore thread-local while unwinding");
        }
    }
}

/// Wraps a listener so every callback observes the captured context in
/// thread-local storage.
///
/// For each callback the captured values are written through the registry's
/// accessors, the wrapped listener is invoked, and each touched accessor is
/// restored to the value it held before, whichever thread runs the callback.
/// Keys unknown to the registry are skipped.
pub struct ContextRestoreListener<T> {
    inner: Arc<dyn SignalListener<T>>,
    context: Context,
    registry: Arc<AccessorRegistry>,
    fail_on_accessor_error: bool,
    id: Uuid,
}

impl<T> ContextRestoreListener<T> {
    /// Creates a decorator installing `context` through `registry`.
    #[must_use]
    pub fn new(
        inner: Arc<dyn SignalListener<T>>,
        context: Context,
        registry: Arc<AccessorRegistry>,
    ) -> Self {
        Self {
            inner,
            context,
            registry,
            fail_on_accessor_error: PropagationConfig::default().fail_on_accessor_error,
            id: Uuid::new_v4(),
        }
    }

    /// Applies the accessor failure policy from `config`.
    #[must_use]
    pub fn with_config(mut self, config: &PropagationConfig) -> Self {
        self.fail_on_accessor_error = config.fail_on_accessor_error;
        self
    }

    /// Returns the wrapped listener.
    #[must_use]
    pub fn inner(&self) -> &Arc<dyn SignalListener<T>> {
        &self.inner
    }

    /// Returns the context installed around each callback.
    #[must_use]
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Returns the registry used for install and restore.
    #[must_use]
    pub fn registry(&self) -> &Arc<AccessorRegistry> {
        &self.registry
    }

    /// Returns the identifier used in log records.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Runs `call` with the captured context installed.
    ///
    /// `Err` means install failed and `call` never ran. Otherwise the
    /// callback's output is returned together with any restore failure.
    fn within<R>(
        &self,
        hook: &'static str,
        call: impl FnOnce(&dyn SignalListener<T>) -> R,
    ) -> Result<(R, Option<PropagationError>), PropagationError> {
        let (scope, install_failures) = RestoreScope::install(&self.context, &self.registry);
        trace!(
            listener_id = %self.id,
            hook,
            installed = scope.touched.len(),
            "Installed captured context"
        );

        if !install_failures.is_empty() {
            if self.fail_on_accessor_error {
                let mut failures = install_failures;
                failures.extend(scope.restore());
                return Err(PropagationError::Install { hook, failures });
            }
            for failure in &install_failures {
                warn!(
                    listener_id = %self.id,
                    hook,
                    error = %failure,
                    "Failed to install thread-local"
                );
            }
        }

        let outcome = call(self.inner.as_ref());

        let restore_failures = scope.restore();
        if restore_failures.is_empty() {
            return Ok((outcome, None));
        }
        if self.fail_on_accessor_error {
            let failed = PropagationError::Restore {
                hook,
                failures: restore_failures,
            };
            return Ok((outcome, Some(failed)));
        }
        for failure in &restore_failures {
            warn!(
                listener_id = %self.id,
                hook,
                error = %failure,
                "Failed to restore thread-local"
            );
        }
        Ok((outcome, None))
    }

    fn run(
        &self,
        hook: &'static str,
        call: impl FnOnce(&dyn SignalListener<T>) -> ListenerResult,
    ) -> ListenerResult {
        match self.within(hook, call)? {
            (outcome, None) => outcome,
            (Ok(()), Some(restore)) => Err(restore.into()),
            (Err(listener), Some(restore)) => Err(listener.context(restore)),
        }
    }
}

impl<T> SignalListener<T> for ContextRestoreListener<T> {
    fn do_first(&self) -> ListenerResult {
        self.run("do_first", |l| l.do_first())
    }

    fn do_on_subscription(&self) -> ListenerResult {
        self.run("do_on_subscription", |l| l.do_on_subscription())
    }

    fn do_on_fusion(&self, mode: FusionMode) -> ListenerResult {
        self.run("do_on_fusion", |l| l.do_on_fusion(mode))
    }

    fn do_on_request(&self, n: u64) -> ListenerResult {
        self.run("do_on_request", |l| l.do_on_request(n))
    }

    fn do_on_cancel(&self) -> ListenerResult {
        self.run("do_on_cancel", |l| l.do_on_cancel())
    }

    fn do_on_next(&self, value: &T) -> ListenerResult {
        self.run("do_on_next", |l| l.do_on_next(value))
    }

    fn do_on_complete(&self) -> ListenerResult {
        self.run("do_on_complete", |l| l.do_on_complete())
    }

    fn do_on_error(&self, error: &anyhow::Error) -> ListenerResult {
        self.run("do_on_error", |l| l.do_on_error(error))
    }

    fn do_after_complete(&self) -> ListenerResult {
        self.run("do_after_complete", |l| l.do_after_complete())
    }

    fn do_after_error(&self, error: &anyhow::Error) -> ListenerResult {
        self.run("do_after_error", |l| l.do_after_error(error))
    }

    fn do_finally(&self, terminal: SignalType) -> ListenerResult {
        self.run("do_finally", |l| l.do_finally(terminal))
    }

    fn do_on_malformed_on_next(&self, value: &T) -> ListenerResult {
        self.run("do_on_malformed_on_next", |l| l.do_on_malformed_on_next(value))
    }

    fn do_on_malformed_on_complete(&self) -> ListenerResult {
        self.run("do_on_malformed_on_complete", |l| {
            l.do_on_malformed_on_complete()
        })
    }

    fn do_on_malformed_on_error(&self, error: &anyhow::Error) -> ListenerResult {
        self.run("do_on_malformed_on_error", |l| {
            l.do_on_malformed_on_error(error)
        })
    }

    fn add_to_context(&self, base: Context) -> Context {
        let fallback = base.clone();
        match self.within("add_to_context", |l| l.add_to_context(base)) {
            Ok((augmented, None)) => augmented,
            Ok((augmented, Some(restore))) => {
                warn!(
                    listener_id = %self.id,
                    error = %restore,
                    "Context augmented but thread-locals not restored"
                );
                augmented
            }
            Err(install) => {
                warn!(
                    listener_id = %self.id,
                    error = %install,
                    "Context augmentation skipped"
                );
                fallback
            }
        }
    }

    fn handle_listener_error(&self, error: &anyhow::Error) {
        let bracketed = self.within("handle_listener_error", |l| {
            l.handle_listener_error(error);
        });
        let failure = match bracketed {
            Ok(((), None)) => return,
            Ok(((), Some(e))) | Err(e) => e,
        };
        error!(
            listener_id = %self.id,
            error = %failure,
            listener_error = %error,
            "Listener error handler not bracketed by captured context"
        );
    }
}

impl<T> fmt::Debug for ContextRestoreListener<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextRestoreListener")
            .field("id", &self.id)
            .field("context", &self.context)
            .field("fail_on_accessor_error", &self.fail_on_accessor_error)
            .finish_non_exhaustive()
    }
}

/// Chooses the listener a tap uses for one subscription.
///
/// Wraps `listener` in a [`ContextRestoreListener`] when `context` carries the
/// capture marker; otherwise returns `listener` itself.
pub fn restore_listener_if_captured<T: 'static>(
    listener: Arc<dyn SignalListener<T>>,
    context: &Context,
    registry: &Arc<AccessorRegistry>,
    config: &PropagationConfig,
) -> Arc<dyn SignalListener<T>> {
    if !config.restore_in_tap || !context.has_capture_marker() {
        return listener;
    }
    let restoring = ContextRestoreListener::new(listener, context.clone(), Arc::clone(registry))
        .with_config(config);
    debug!(
        listener_id = %restoring.id(),
        entries = context.len(),
        "Restoring captured context in tap"
    );
    Arc::new(restoring)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::{FnAccessor, ValueSlot};
    use crate::context::ContextCapture;
    use crate::testing::RecordingListener;
    use anyhow::anyhow;
    use mockall::mock;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::cell::RefCell;

    thread_local! {
        static KEY1: ValueSlot = const { RefCell::new(None) };
        static KEY2: ValueSlot = const { RefCell::new(None) };
    }

    fn key1() -> Option<Value> {
        KEY1.with(|slot| slot.borrow().clone())
    }

    fn registry() -> Arc<AccessorRegistry> {
        let registry = AccessorRegistry::new();
        registry.register_local("key1", &KEY1);
        registry.register_local("key2", &KEY2);
        Arc::new(registry)
    }

    mock! {
        Listener {}
        impl SignalListener<i32> for Listener {
            fn do_on_next(&self, value: &i32) -> ListenerResult;
            fn do_on_cancel(&self) -> ListenerResult;
        }
    }

    #[test]
    fn test_every_hook_sees_context_in_worker_thread() {
        let registry = registry();
        let recording = Arc::new(RecordingListener::new(key1));
        let listener = ContextRestoreListener::new(
            recording.clone() as Arc<dyn SignalListener<i32>>,
            Context::of("key1", "expected"),
            registry,
        );

        let seen_after = std::thread::spawn(move || {
            let boom = anyhow!("boom");
            let mut after = Vec::new();
            listener.do_first().unwrap();
            after.push(key1());
            listener.do_on_subscription().unwrap();
            listener.do_on_fusion(FusionMode::Sync).unwrap();
            listener.do_on_request(1).unwrap();
            listener.do_on_cancel().unwrap();
            listener.do_on_next(&1).unwrap();
            listener.do_on_complete().unwrap();
            listener.do_on_error(&boom).unwrap();
            listener.do_after_complete().unwrap();
            listener.do_after_error(&boom).unwrap();
            listener.do_finally(SignalType::OnComplete).unwrap();
            listener.do_on_malformed_on_next(&1).unwrap();
            listener.do_on_malformed_on_complete().unwrap();
            listener.do_on_malformed_on_error(&boom).unwrap();
            let _ = listener.add_to_context(Context::empty());
            listener.handle_listener_error(&boom);
            after.push(key1());
            after
        })
        .join()
        .unwrap();

        let expected: Vec<String> = [
            "do_first",
            "do_on_subscription",
            "do_on_fusion",
            "do_on_request",
            "do_on_cancel",
            "do_on_next",
            "do_on_complete",
            "do_on_error",
            "do_after_complete",
            "do_after_error",
            "do_finally",
            "do_on_malformed_on_next",
            "do_on_malformed_on_complete",
            "do_on_malformed_on_error",
            "add_to_context",
            "handle_listener_error",
        ]
        .iter()
        .map(|hook| format!("{hook}: \"expected\""))
        .collect();

        assert_eq!(recording.entries(), expected);
        assert_eq!(seen_after, vec![None, None]);
    }

    #[test]
    fn test_previous_value_is_restored() {
        let registry = registry();
        registry.write("key1", json!("outer")).unwrap();
        let recording = Arc::new(RecordingListener::new(key1));
        let listener = ContextRestoreListener::new(
            recording.clone() as Arc<dyn SignalListener<i32>>,
            Context::of("key1", "inner"),
            Arc::clone(&registry),
        );

        listener.do_on_next(&7).unwrap();

        assert_eq!(recording.entries(), vec!["do_on_next: \"inner\"".to_string()]);
        assert_eq!(key1(), Some(json!("outer")));
        registry.reset("key1").unwrap();
    }

    #[test]
    fn test_listener_error_propagates_after_restore() {
        let mut mock = MockListener::new();
        mock.expect_do_on_next().times(1).returning(|_| {
            assert_eq!(key1(), Some(json!("scoped")));
            Err(anyhow!("listener failed"))
        });

        let listener = ContextRestoreListener::new(
            Arc::new(mock) as Arc<dyn SignalListener<i32>>,
            Context::of("key1", "scoped"),
            registry(),
        );

        let err = listener.do_on_next(&1).unwrap_err();
        assert_eq!(err.to_string(), "listener failed");
        assert_eq!(key1(), None);
    }

    #[test]
    fn test_panic_still_restores() {
        struct Panicking;
        impl SignalListener<i32> for Panicking {
            fn do_on_next(&self, _value: &i32) -> ListenerResult {
                panic!("listener bug");
            }
        }

        let listener = ContextRestoreListener::new(
            Arc::new(Panicking) as Arc<dyn SignalListener<i32>>,
            Context::of("key1", "scoped"),
            registry(),
        );

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = listener.do_on_next(&1);
        }));

        assert!(result.is_err());
        assert_eq!(key1(), None);
    }

    #[test]
    fn test_unknown_and_marker_keys_are_skipped() {
        let registry = registry();
        let context = ContextCapture::with_registry(Arc::new(AccessorRegistry::new()))
            .apply(&Context::of("unknown", 1).put("key1", "v"));
        let recording = Arc::new(RecordingListener::new(key1));
        let listener = ContextRestoreListener::new(
            recording.clone() as Arc<dyn SignalListener<i32>>,
            context,
            registry,
        );

        listener.do_on_complete().unwrap();
        assert_eq!(recording.entries(), vec!["do_on_complete: \"v\"".to_string()]);
    }

    #[test]
    fn test_install_failure_skips_callback() {
        let registry = registry();
        registry.register(Arc::new(FailingAccessor));
        let mut mock = MockListener::new();
        mock.expect_do_on_cancel().times(0);

        let listener = ContextRestoreListener::new(
            Arc::new(mock) as Arc<dyn SignalListener<i32>>,
            Context::of("failing", 1).put("key1", "v"),
            registry,
        );

        let err = listener.do_on_cancel().unwrap_err();
        let err = err.downcast::<PropagationError>().unwrap();
        assert!(matches!(err, PropagationError::Install { hook: "do_on_cancel", .. }));
        assert_eq!(key1(), None);
    }

    #[test]
    fn test_install_failure_tolerated_when_configured() {
        let registry = registry();
        registry.register(Arc::new(FailingAccessor));
        let recording = Arc::new(RecordingListener::new(key1));

        let listener = ContextRestoreListener::new(
            recording.clone() as Arc<dyn SignalListener<i32>>,
            Context::of("failing", 1).put("key1", "v"),
            registry,
        )
        .with_config(&PropagationConfig::new().with_fail_on_accessor_error(false));

        listener.do_on_cancel().unwrap();
        assert_eq!(recording.entries(), vec!["do_on_cancel: \"v\"".to_string()]);
        assert_eq!(key1(), None);
    }

    #[test]
    fn test_restore_failure_reported_and_other_keys_restored() {
        let registry = registry();
        let resets = Arc::new(parking_lot::Mutex::new(0));
        let counter = resets.clone();
        registry.register(Arc::new(FnAccessor::new(
            "flaky",
            || None,
            |_| {},
            move || *counter.lock() += 1,
        )));
        registry.register(Arc::new(ResetFailingAccessor));

        let listener = ContextRestoreListener::new(
            Arc::new(RecordingListener::new(key1)) as Arc<dyn SignalListener<i32>>,
            Context::of("a_reset_fails", 1).put("flaky", 2).put("key1", "v"),
            registry,
        );

        let err = listener.do_on_request(4).unwrap_err();
        let err = err.downcast::<PropagationError>().unwrap();
        assert!(matches!(err, PropagationError::Restore { .. }));
        assert_eq!(err.accessor_failures().len(), 1);
        assert_eq!(*resets.lock(), 1);
        assert_eq!(key1(), None);
    }

    #[test]
    fn test_listener_error_kept_when_restore_fails() {
        let registry = registry();
        registry.register(Arc::new(ResetFailingAccessor));
        let mut mock = MockListener::new();
        mock.expect_do_on_next()
            .times(1)
            .returning(|_| Err(anyhow!("listener failed")));

        let listener = ContextRestoreListener::new(
            Arc::new(mock) as Arc<dyn SignalListener<i32>>,
            Context::of("a_reset_fails", 1).put("key1", "v"),
            registry,
        );

        let err = listener.do_on_next(&1).unwrap_err();
        let chain: Vec<String> = err.chain().map(ToString::to_string).collect();
        assert_eq!(chain.len(), 2);
        assert!(chain[0].starts_with("failed to restore context after `do_on_next`"));
        assert_eq!(chain[1], "listener failed");
        assert!(matches!(
            err.downcast_ref::<PropagationError>(),
            Some(PropagationError::Restore { hook: "do_on_next", .. })
        ));
        assert_eq!(key1(), None);
    }

    #[test]
    fn test_augmented_context_kept_when_restore_fails() {
        struct Tagging;
        impl SignalListener<i32> for Tagging {
            fn add_to_context(&self, base: Context) -> Context {
                base.put("tagged", key1().unwrap_or(Value::Null))
            }
        }

        let registry = registry();
        registry.register(Arc::new(ResetFailingAccessor));
        let listener = ContextRestoreListener::new(
            Arc::new(Tagging) as Arc<dyn SignalListener<i32>>,
            Context::of("a_reset_fails", 1).put("key1", "v"),
            registry,
        );

        let augmented = listener.add_to_context(Context::of("base", 0));

        assert_eq!(augmented.get("tagged"), Some(&json!("v")));
        assert_eq!(augmented.get("base"), Some(&json!(0)));
        assert_eq!(key1(), None);
    }

    #[test]
    fn test_install_failure_falls_back_to_base_context() {
        struct Tagging;
        impl SignalListener<i32> for Tagging {
            fn add_to_context(&self, base: Context) -> Context {
                base.put("tagged", true)
            }
        }

        let registry = registry();
        registry.register(Arc::new(FailingAccessor));
        let listener = ContextRestoreListener::new(
            Arc::new(Tagging) as Arc<dyn SignalListener<i32>>,
            Context::of("failing", 1),
            registry,
        );

        let context = listener.add_to_context(Context::of("base", 0));

        assert_eq!(context.get("tagged"), None);
        assert_eq!(context.get("base"), Some(&json!(0)));
    }

    #[test]
    fn test_decision_without_marker_is_identity() {
        let original: Arc<dyn SignalListener<i32>> = Arc::new(RecordingListener::new(key1));
        let effective = restore_listener_if_captured(
            Arc::clone(&original),
            &Context::of("key1", "v"),
            &registry(),
            &PropagationConfig::default(),
        );
        assert!(Arc::ptr_eq(&original, &effective));
    }

    #[test]
    fn test_decision_with_marker_wraps() {
        let original: Arc<dyn SignalListener<i32>> = Arc::new(RecordingListener::new(key1));
        let captured = ContextCapture::with_registry(registry()).apply(&Context::empty());
        let effective = restore_listener_if_captured(
            Arc::clone(&original),
            &captured,
            &registry(),
            &PropagationConfig::default(),
        );
        assert!(!Arc::ptr_eq(&original, &effective));
    }

    #[test]
    fn test_decision_respects_config() {
        let original: Arc<dyn SignalListener<i32>> = Arc::new(RecordingListener::new(key1));
        let captured = ContextCapture::with_registry(registry()).apply(&Context::empty());
        let effective = restore_listener_if_captured(
            Arc::clone(&original),
            &captured,
            &registry(),
            &PropagationConfig::new().with_restore_in_tap(false),
        );
        assert!(Arc::ptr_eq(&original, &effective));
    }

    struct FailingAccessor;

    impl ThreadLocalAccessor for FailingAccessor {
        fn key(&self) -> &str {
            "failing"
        }

        fn get_value(&self) -> Option<Value> {
            None
        }

        fn set_value(&self, _value: Value) -> Result<(), AccessorError> {
            Err(AccessorError::write("failing", "read-only slot"))
        }

        fn reset(&self) -> Result<(), AccessorError> {
            Ok(())
        }
    }

    struct ResetFailingAccessor;

    impl ThreadLocalAccessor for ResetFailingAccessor {
        fn key(&self) -> &str {
            "a_reset_fails"
        }

        fn get_value(&self) -> Option<Value> {
            None
        }

        fn set_value(&self, _value: Value) -> Result<(), AccessorError> {
            Ok(())
        }

        fn reset(&self) -> Result<(), AccessorError> {
            Err(AccessorError::reset("a_reset_fails", "slot poisoned"))
        }
    }
}
