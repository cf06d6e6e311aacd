//! Worker identity used to key per-worker sessions
//!
//! Batch workers run inside a task-local scope carrying a unique
//! [`WorkerId::Task`]. Anything outside such a scope is identified by the OS
//! thread polling it, so plain callers on different threads never share a
//! session either.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};

static NEXT_WORKER_ID: AtomicU64 = AtomicU64::new(1);

tokio::task_local! {
    static CURRENT_WORKER: WorkerId;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerId {
    Task(u64),
    Thread(ThreadId),
}

impl WorkerId {
    /// Allocate an identity for a new batch worker.
    pub fn next() -> Self {
        WorkerId::Task(NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Identity of whoever is running right now.
    pub fn current() -> Self {
        CURRENT_WORKER
            .try_with(|id| *id)
            .unwrap_or_else(|_| WorkerId::Thread(thread::current().id()))
    }

    /// Run `future` as this worker.
    pub async fn scope<F: Future>(self, future: F) -> F::Output {
        CURRENT_WORKER.scope(self, future).await
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerId::Task(id) => write!(f, "worker-{}", id),
            WorkerId::Thread(id) => write!(f, "thread-{:?}", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_is_unique() {
        assert_ne!(WorkerId::next(), WorkerId::next());
    }

    #[test]
    fn test_current_outside_scope_is_thread() {
        let here = WorkerId::current();
        assert_eq!(here, WorkerId::Thread(thread::current().id()));

        let other = thread::spawn(WorkerId::current).join().unwrap();
        assert_ne!(here, other);
    }

    #[tokio::test]
    async fn test_scope_sets_identity() {
        let worker = WorkerId::next();
        let seen = worker.scope(async { WorkerId::current() }).await;
        assert_eq!(seen, worker);
        assert!(matches!(WorkerId::current(), WorkerId::Thread(_)));
    }

    #[tokio::test]
    async fn test_scope_survives_await_points() {
        let worker = WorkerId::next();
        let seen = worker
            .scope(async {
                tokio::task::yield_now().await;
                WorkerId::current()
            })
            .await;
        assert_eq!(seen, worker);
    }
}
