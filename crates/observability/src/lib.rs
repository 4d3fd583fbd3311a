//! Tracing and logging setup shared by warden binaries and tests.

/// Initialize process-wide tracing with JSON output.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Initialize tracing for a test run, writing through the test harness so
/// output is captured per test.
pub fn init_test() {
    tracing::init_test();
}

/// Tracing configuration (filters, layers).
pub mod tracing;
