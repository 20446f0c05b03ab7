//! Shared helpers for unit tests

/// Routes `tracing` output through the test harness so it only shows for
/// failing tests. Safe to call from every test.
pub(crate) fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}
