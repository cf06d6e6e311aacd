//! Bounded parallel batch execution
//!
//! Items are pulled from a shared queue by at most `threads` workers. Each
//! worker runs under its own [`WorkerId`], so it gets its own session, and
//! that session is discarded when the worker finishes.

use crate::error::{PyxisError, Result};
use crate::registry::client::Client;
use crate::registry::response::handle_json_response;
use crate::registry::session::ApiResponse;
use crate::registry::worker::WorkerId;
use futures::FutureExt;
use futures::future::join_all;
use serde_json::Value;
use std::collections::VecDeque;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Evicts the worker's session however the worker exits.
struct WorkerGuard {
    client: Client,
    worker: WorkerId,
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.client.evict(self.worker);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "request panicked".to_string()
    }
}

impl Client {
    /// Run `make_request` for every item with bounded concurrency and
    /// return each item's outcome in completion order.
    pub async fn do_parallel_requests_settled<T, F, Fut>(
        &self,
        make_request: F,
        items: Vec<T>,
    ) -> Vec<Result<Value>>
    where
        T: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ApiResponse>> + Send + 'static,
    {
        if items.is_empty() {
            return Vec::new();
        }

        let total = items.len();
        let workers = self.config().threads.min(total);
        let queue = Arc::new(Mutex::new(VecDeque::from(items)));
        let make_request = Arc::new(make_request);
        let (tx, mut rx) = mpsc::unbounded_channel();
        debug!(total, workers, "starting parallel requests");

        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let worker = WorkerId::next();
            let guard = WorkerGuard {
                client: self.clone(),
                worker,
            };
            let queue = queue.clone();
            let make_request = make_request.clone();
            let tx = tx.clone();

            handles.push(tokio::spawn(worker.scope(async move {
                let _guard = guard;
                loop {
                    let item = {
                        let mut queue = queue.lock().unwrap_or_else(PoisonError::into_inner);
                        queue.pop_front()
                    };
                    let Some(item) = item else { break };

                    let attempt = AssertUnwindSafe(async {
                        match make_request(item).await {
                            Ok(response) => handle_json_response(response).await,
                            Err(err) => Err(err),
                        }
                    });
                    let result = attempt.catch_unwind().await.unwrap_or_else(|panic| {
                        let message = panic_message(&*panic);
                        warn!(%worker, panic = %message, "request panicked");
                        Err(PyxisError::Worker(message))
                    });
                    if tx.send(result).is_err() {
                        break;
                    }
                }
            })));
        }
        drop(tx);

        let mut results = Vec::with_capacity(total);
        while let Some(result) = rx.recv().await {
            results.push(result);
        }

        for joined in join_all(handles).await {
            if let Err(err) = joined {
                warn!(error = %err, "request worker did not finish");
                results.push(Err(PyxisError::Worker(err.to_string())));
            }
        }
        results
    }

    /// Like [`Client::do_parallel_requests_settled`], but fails with the
    /// first error (in completion order) once every item has run.
    pub async fn do_parallel_requests<T, F, Fut>(
        &self,
        make_request: F,
        items: Vec<T>,
    ) -> Result<Vec<Value>>
    where
        T: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ApiResponse>> + Send + 'static,
    {
        let mut values = Vec::new();
        let mut first_error = None;
        for result in self.do_parallel_requests_settled(make_request, items).await {
            match result {
                Ok(value) => values.push(value),
                Err(err) => {
                    warn!(error = %err, "parallel request failed");
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(values),
        }
    }
}
