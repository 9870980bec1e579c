//! Worker thread plumbing: naming, optional CPU pinning, join-on-drop.

use core_affinity::CoreId;
use std::thread::{self, JoinHandle};

/// Builder for consumer worker threads.
///
/// Supports a thread name and an optional CPU core to pin the worker to.
/// Pinning is best-effort: an unavailable core logs a warning and the worker
/// runs unpinned.
#[derive(Debug, Default)]
pub struct ThreadBuilder {
    name: Option<String>,
    affinity: Option<CoreId>,
}

impl ThreadBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin the spawned thread to the given CPU core.
    pub fn pin_at_core(mut self, core_id: usize) -> Self {
        self.affinity = Some(CoreId { id: core_id });
        self
    }

    /// Name the spawned thread.
    pub fn thread_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Spawn the worker.
    ///
    /// # Errors
    /// Propagates the OS error if the thread cannot be created.
    pub fn spawn<F>(self, f: F) -> std::io::Result<ManagedThread>
    where
        F: FnOnce() + Send + 'static,
    {
        let name = self.name.unwrap_or_else(|| "worker".to_string());
        let affinity = self.affinity;

        let builder = thread::Builder::new().name(name.clone());
        let pinned_name = name.clone();
        let join_handle = builder.spawn(move || {
            set_affinity_if_defined(affinity, &pinned_name);
            f();
        })?;

        Ok(ManagedThread {
            join_handle: Some(join_handle),
            thread_name: name,
        })
    }
}

/// Owned worker thread that joins on drop.
///
/// Dropping a `ManagedThread` blocks until the worker exits; callers that
/// want the worker gone must signal it first.
pub struct ManagedThread {
    join_handle: Option<JoinHandle<()>>,
    thread_name: String,
}

impl ManagedThread {
    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    /// Wait for the worker to finish. Idempotent.
    pub fn join(&mut self) {
        if let Some(handle) = self.join_handle.take() {
            if handle.join().is_err() {
                tracing::error!(thread = %self.thread_name, "worker thread panicked");
            }
        }
    }

    /// Whether the worker is still running.
    pub fn is_running(&self) -> bool {
        self.join_handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for ManagedThread {
    fn drop(&mut self) {
        self.join();
    }
}

impl std::fmt::Debug for ManagedThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedThread")
            .field("thread_name", &self.thread_name)
            .field("running", &self.is_running())
            .finish()
    }
}

/// CPU core ids available for pinning.
pub fn available_cores() -> Vec<usize> {
    core_affinity::get_core_ids()
        .unwrap_or_default()
        .into_iter()
        .map(|core| core.id)
        .collect()
}

fn set_affinity_if_defined(affinity: Option<CoreId>, thread_name: &str) {
    if let Some(core_id) = affinity {
        if core_affinity::set_for_current(core_id) {
            tracing::debug!(thread = %thread_name, core = core_id.id, "pinned worker to core");
        } else {
            tracing::warn!(thread = %thread_name, core = core_id.id, "could not pin worker to core");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    #[test]
    fn spawns_named_worker() {
        let value = Arc::new(AtomicI32::new(0));
        let seen = Arc::clone(&value);

        let barrier = Arc::new(std::sync::Barrier::new(2));
        let gate = Arc::clone(&barrier);

        let mut worker = ThreadBuilder::new()
            .thread_name("test-worker")
            .spawn(move || {
                gate.wait();
                seen.store(42, Ordering::Release);
            })
            .expect("spawn worker");

        assert_eq!(worker.thread_name(), "test-worker");
        assert!(worker.is_running());

        barrier.wait();
        worker.join();
        assert!(!worker.is_running());
        assert_eq!(value.load(Ordering::Acquire), 42);
    }

    #[test]
    fn join_is_idempotent() {
        let mut worker = ThreadBuilder::new().spawn(|| {}).expect("spawn worker");
        worker.join();
        worker.join();
    }

    #[test]
    #[cfg(not(miri))]
    fn pinning_is_best_effort() {
        let cores = available_cores();
        if let Some(&core) = cores.first() {
            let mut worker = ThreadBuilder::new()
                .pin_at_core(core)
                .thread_name("pinned")
                .spawn(|| {})
                .expect("spawn worker");
            worker.join();
        }
    }
}
