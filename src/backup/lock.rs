//! The one lock every backup runner takes before touching its artifact.
//!
//! At most one runner is inside execute -> transfer -> cleanup at any time,
//! whatever the number of jobs or how their intervals line up. Waiters are
//! not served in any particular order and there is no timeout.

use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

/// Notified around every hold of a [`SerializationLock`].
pub trait LockObserver: Send + Sync {
    fn on_acquired(&self, job_name: &str);
    fn on_released(&self, job_name: &str);
}

#[derive(Clone)]
pub struct SerializationLock {
    mutex: Arc<Mutex<()>>,
    observer: Option<Arc<dyn LockObserver>>,
}

impl SerializationLock {
    pub fn new() -> Self {
        Self {
            mutex: Arc::new(Mutex::new(())),
            observer: None,
        }
    }

    pub fn with_observer(observer: Arc<dyn LockObserver>) -> Self {
        Self {
            mutex: Arc::new(Mutex::new(())),
            observer: Some(observer),
        }
    }

    /// Wait until the lock is free and take it on behalf of `job_name`.
    pub async fn acquire(&self, job_name: &str) -> SerializationGuard<'_> {
        let guard = self.mutex.lock().await;
        if let Some(observer) = &self.observer {
            observer.on_acquired(job_name);
        }
        SerializationGuard {
            _guard: guard,
            job_name: job_name.to_string(),
            observer: self.observer.as_deref(),
        }
    }

    pub fn is_held(&self) -> bool {
        self.mutex.try_lock().is_err()
    }
}

impl Default for SerializationLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Releases the lock when dropped.
pub struct SerializationGuard<'a> {
    observer: Option<&'a dyn LockObserver>,
    job_name: String,
    _guard: MutexGuard<'a, ()>,
}

impl SerializationGuard<'_> {
    pub fn job_name(&self) -> &str {
        &self.job_name
    }
}

impl Drop for SerializationGuard<'_> {
    // Runs before `_guard` is dropped, so the release is reported while the
    // mutex is still held.
    fn drop(&mut self) {
        if let Some(observer) = self.observer {
            observer.on_released(&self.job_name);
        }
    }
}
