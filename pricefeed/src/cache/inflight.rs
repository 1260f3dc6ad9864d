//! Keyed registry of in-flight fetches.
//!
//! The first caller for a key spawns the fetch; later callers for the same
//! key attach to it and receive a clone of the same result. The fetch runs
//! on its own task, so a waiter that is cancelled or times out only stops
//! waiting. When the last waiter leaves before the fetch finishes, the
//! fetch's scope is cancelled and the key is released, so abandoned work
//! stops consuming rate limit budget. The registry entry is also removed
//! when the fetch task finishes, panics included.

use crate::scope::Scope;
use crate::{Error, Result};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

type SharedFetch<T> = Shared<BoxFuture<'static, Result<T>>>;
type Calls<T> = Arc<Mutex<HashMap<String, Entry<T>>>>;

struct Entry<T> {
    id: u64,
    fetch: SharedFetch<T>,
    /// Cancels the fetch once nobody is waiting for it.
    abort: Scope,
    waiters: usize,
}

pub struct InFlight<T> {
    calls: Calls<T>,
    next_id: AtomicU64,
}

/// Removes entry `id` once the owning fetch task ends.
struct Registration<T> {
    calls: Calls<T>,
    key: String,
    id: u64,
}

impl<T> Drop for Registration<T> {
    fn drop(&mut self) {
        let mut calls = lock(&self.calls);
        if calls.get(&self.key).map(|entry| entry.id) == Some(self.id) {
            calls.remove(&self.key);
        }
    }
}

/// One waiter attached to entry `id`; the last one out aborts the fetch.
struct Waiter<T> {
    calls: Calls<T>,
    key: String,
    id: u64,
}

impl<T> Drop for Waiter<T> {
    fn drop(&mut self) {
        let mut calls = lock(&self.calls);
        let abandoned = match calls.get_mut(&self.key) {
            Some(entry) if entry.id == self.id => {
                entry.waiters = entry.waiters.saturating_sub(1);
                entry.waiters == 0
            }
            _ => false,
        };
        if abandoned {
            if let Some(entry) = calls.remove(&self.key) {
                debug!(key = %self.key, "Last waiter left, cancelling fetch");
                entry.abort.cancel();
            }
        }
    }
}

fn lock<T>(calls: &Calls<T>) -> MutexGuard<'_, HashMap<String, Entry<T>>> {
    calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<T> Default for InFlight<T> {
    fn default() -> Self {
        Self {
            calls: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<T> InFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently being fetched
    pub fn len(&self) -> usize {
        lock(&self.calls).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `fetch` under `fetch_scope` for `key` unless a fetch for it is
    /// already running, then wait for the shared outcome within `scope`.
    ///
    /// `fetch_scope` is only used when a new fetch starts. It is cancelled
    /// when every waiter has given up.
    pub async fn run<F>(&self, scope: &Scope, key: &str, fetch_scope: Scope, fetch: F) -> Result<T>
    where
        F: FnOnce(Scope) -> BoxFuture<'static, Result<T>>,
    {
        scope.check()?;

        let (shared, _waiter) = {
            let mut calls = lock(&self.calls);
            let (id, shared) = match calls.get_mut(key) {
                Some(entry) => {
                    debug!(key, "Joining in-flight fetch");
                    entry.waiters += 1;
                    (entry.id, entry.fetch.clone())
                }
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let registration = Registration {
                        calls: self.calls.clone(),
                        key: key.to_string(),
                        id,
                    };
                    let fut = fetch(fetch_scope.clone());
                    let handle = tokio::spawn(async move {
                        let _registration = registration;
                        fut.await
                    });
                    let shared = async move {
                        handle.await.unwrap_or_else(|e| {
                            Err(Error::Internal(format!("in-flight fetch failed: {}", e)))
                        })
                    }
                    .boxed()
                    .shared();
                    calls.insert(
                        key.to_string(),
                        Entry {
                            id,
                            fetch: shared.clone(),
                            abort: fetch_scope,
                            waiters: 1,
                        },
                    );
                    (id, shared)
                }
            };
            let waiter = Waiter {
                calls: self.calls.clone(),
                key: key.to_string(),
                id,
            };
            (shared, waiter)
        };

        scope.run(shared).await
    }
}
