//! Single-flight lazy initialization.
//!
//! The first caller installs a shared future under the slot lock; everyone
//! who arrives while it is pending awaits that same future. A successful
//! result is cached for the lifetime of the cell. A failed one clears the
//! slot so the next caller starts a fresh attempt, while every caller that
//! awaited the failed attempt sees the same error.

use crate::infra::error::{SigningError, SigningResult};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

type SharedFetch<T> = Shared<BoxFuture<'static, SigningResult<T>>>;

enum Slot<T: Clone> {
    Empty,
    Pending(SharedFetch<T>),
    Ready(T),
}

pub struct SingleFlight<T: Clone> {
    slot: Mutex<Slot<T>>,
    started: AtomicUsize,
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Empty),
            started: AtomicUsize::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cached value, if a fetch has already succeeded.
    pub fn get(&self) -> Option<T> {
        match &*self.lock() {
            Slot::Ready(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// Number of fetches started so far.
    pub fn fetches_started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Return the cached value, join the in-flight fetch, or start one.
    ///
    /// `fetch` is only invoked when the slot is empty. Cancelling `cancel`
    /// abandons this caller's wait without affecting other waiters.
    ///
    /// # Errors
    /// The fetch's error, or `Cancelled`.
    pub async fn get_or_fetch<F, Fut>(&self, fetch: F, cancel: &CancellationToken) -> SigningResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SigningResult<T>> + Send + 'static,
    {
        let pending = {
            let mut slot = self.lock();
            match &*slot {
                Slot::Ready(value) => return Ok(value.clone()),
                Slot::Pending(pending) => pending.clone(),
                Slot::Empty => {
                    let pending = fetch().boxed().shared();
                    self.started.fetch_add(1, Ordering::SeqCst);
                    *slot = Slot::Pending(pending.clone());
                    pending
                }
            }
        };

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(SigningError::Cancelled),
            result = pending.clone() => result,
        };

        let mut slot = self.lock();
        if let Slot::Pending(current) = &*slot {
            if Shared::ptr_eq(current, &pending) {
                *slot = match &result {
                    Ok(value) => Slot::Ready(value.clone()),
                    Err(e) => {
                        log::debug!("single-flight fetch failed, slot cleared: {e}");
                        Slot::Empty
                    }
                };
            }
        }
        result
    }

    /// Drop any cached value.
    pub fn reset(&self) {
        *self.lock() = Slot::Empty;
    }
}

impl<T> Default for SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
