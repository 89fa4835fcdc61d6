//! Shared tokio runtime and the sync → async seam.
//!
//! The transport engine and every blocking bridge call run on one lazily
//! built multi-threaded runtime. Caller threads block on futures through
//! [`block_on`], which picks the right strategy for the thread it runs on.

use std::future::Future;
use std::sync::LazyLock;

use tokio::runtime::{Builder, Handle, Runtime, RuntimeFlavor};
use tokio::task::JoinHandle;

static RUNTIME: LazyLock<Runtime> = LazyLock::new(|| {
    Builder::new_multi_thread()
        .enable_all()
        .thread_name("bodyline-rt")
        .build()
        .expect("failed to build the bodyline runtime")
});

/// The shared runtime, built on first use.
pub fn runtime() -> &'static Runtime {
    &RUNTIME
}

/// Spawn an engine task on the shared runtime.
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    RUNTIME.spawn(future)
}

/// Block the current thread until `future` completes.
///
/// Outside any runtime the shared runtime drives the future. On a worker
/// of a multi-threaded runtime the worker is handed off with
/// `block_in_place` first, so other tasks keep running while the caller
/// waits.
///
/// # Panics
///
/// Panics when called from a current-thread runtime, where blocking would
/// stall the only thread able to make progress. Use the async API there.
pub fn block_on<F: Future>(future: F) -> F::Output {
    match Handle::try_current() {
        Ok(handle) => match handle.runtime_flavor() {
            RuntimeFlavor::CurrentThread => {
                panic!("bodyline blocking calls cannot run inside a current-thread runtime")
            }
            _ => tokio::task::block_in_place(|| handle.block_on(future)),
        },
        Err(_) => RUNTIME.block_on(future),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_on_outside_runtime_uses_shared_runtime() {
        let value = block_on(async {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            7
        });
        assert_eq!(value, 7);
    }

    #[test]
    fn spawn_runs_on_shared_runtime() {
        let handle = spawn(async { "done" });
        assert_eq!(block_on(handle).unwrap(), "done");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn block_on_inside_multi_thread_runtime() {
        let value = block_on(async { 42 });
        assert_eq!(value, 42);
    }

    #[tokio::test]
    #[should_panic(expected = "current-thread runtime")]
    async fn block_on_inside_current_thread_runtime_panics() {
        block_on(async {});
    }
}
