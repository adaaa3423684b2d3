//! Propagation through the process-wide registry and the shared capture.
//!
//! Kept in its own test binary since it replaces the global registry.

use pretty_assertions::assert_eq;
use signal_context::observability::init_test_tracing;
use signal_context::prelude::*;
use signal_context::testing::{
    assert_captured, clear_local, local_value, set_local, RecordingListener, TestPublisher,
    TestSubscriber, TRACE_ID, TRACE_ID_KEY,
};
use std::sync::Arc;

#[test]
fn test_shared_capture_follows_swapped_global_registry() {
    init_test_tracing();
    let registry = Arc::new(AccessorRegistry::new());
    registry.register_local(TRACE_ID_KEY, &TRACE_ID);
    let previous = AccessorRegistry::set_global(Arc::clone(&registry));

    set_local(&TRACE_ID, "global-trace");
    let context = context_capture().apply(&Context::empty());
    assert_captured(&context, TRACE_ID_KEY, &serde_json::json!("global-trace"));

    let publisher = Arc::new(TestPublisher::<i32>::new());
    let recording = Arc::new(RecordingListener::new(|| local_value(&TRACE_ID)));
    let pipeline = Arc::clone(&publisher)
        .tap(shared_listener(
            Arc::clone(&recording) as Arc<dyn SignalListener<i32>>
        ))
        .context_capture();

    let subscriber = TestSubscriber::<i32>::new();
    pipeline.subscribe(Box::new(subscriber.clone()));
    clear_local(&TRACE_ID);
    recording.clear();

    let driver = Arc::clone(&publisher);
    let after = std::thread::spawn(move || {
        driver.next(5);
        driver.complete();
        local_value(&TRACE_ID)
    })
    .join()
    .unwrap();

    assert!(Arc::ptr_eq(
        pipeline.capture_function().unwrap(),
        &context_capture()
    ));
    assert_eq!(
        recording.entries(),
        vec![
            "do_on_next: \"global-trace\"".to_string(),
            "do_on_complete: \"global-trace\"".to_string(),
            "do_after_complete: \"global-trace\"".to_string(),
            "do_finally: \"global-trace\"".to_string(),
        ]
    );
    assert_eq!(after, None);
    assert_eq!(subscriber.values(), vec![5]);

    AccessorRegistry::set_global(previous);
}
