//! Shared Tokio runtime for work that must finish outside an async context
//!
//! `Drop` implementations cannot await. When a test context is dropped
//! without an explicit teardown, its cleanup future runs here.

use std::sync::OnceLock;
use tokio::runtime::Runtime;

static TOKIO_RUNTIME: OnceLock<Runtime> = OnceLock::new();

/// Get or create the shared Tokio runtime.
///
/// # Panics
///
/// Panics if the runtime cannot be created.
pub fn get_tokio_runtime() -> &'static Runtime {
    TOKIO_RUNTIME.get_or_init(|| {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .thread_name("txfixture-runtime")
            .build()
            .expect("Failed to create Tokio runtime for txfixture")
    })
}

/// Run a future to completion on the shared runtime, blocking the caller.
///
/// The future runs on a separate OS thread, so this is safe to call from
/// inside another runtime (where a plain `block_on` would panic). Returns
/// `None` if the future panicked.
pub fn block_on_detached<F, T>(future: F) -> Option<T>
where
    F: std::future::Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    std::thread::Builder::new()
        .name("txfixture-teardown".into())
        .spawn(move || get_tokio_runtime().block_on(future))
        .ok()?
        .join()
        .ok()
}
