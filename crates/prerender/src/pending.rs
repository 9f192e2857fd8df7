// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Outstanding-work tracking for one execution context.
//!
//! Every network call and every promise continuation started inside the
//! sandbox holds a [`Ticket`] for as long as it runs. The snapshot step waits
//! on [`PendingRequests::idle`], which fires once the count has dropped to
//! zero and stayed there for one scheduling tick.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::{AbortHandle, Abortable};
use tokio::sync::oneshot;

type IdleCallback = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct Ledger {
    outstanding: usize,
    idle_callbacks: Vec<IdleCallback>,
    in_flight: HashMap<u64, AbortHandle>,
    next_id: u64,
    aborted: bool,
}

/// Counter of outstanding asynchronous work plus the idle notification queue.
///
/// Cheap to clone; all clones share the same ledger.
#[derive(Clone, Default)]
pub struct PendingRequests {
    ledger: Arc<Mutex<Ledger>>,
}

/// Proof that one unit of work is outstanding. Ends the work when dropped.
#[must_use = "dropping a ticket ends the tracked work immediately"]
pub struct Ticket {
    id: Option<u64>,
    owner: PendingRequests,
}

impl Drop for Ticket {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.owner.finish(id);
        }
    }
}

impl PendingRequests {
    /// An empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks one unit of work as started.
    ///
    /// After [`abort_all`](Self::abort_all) the returned ticket is inert.
    pub fn begin(&self) -> Ticket {
        let id = self.register(None);
        Ticket {
            id,
            owner: self.clone(),
        }
    }

    /// Marks the work represented by `ticket` as finished.
    pub fn end(&self, ticket: Ticket) {
        drop(ticket);
    }

    /// Number of units of work currently outstanding.
    pub fn outstanding(&self) -> usize {
        self.lock().outstanding
    }

    /// True once [`abort_all`](Self::abort_all) has run.
    pub fn is_aborted(&self) -> bool {
        self.lock().aborted
    }

    /// Queues `callback` to run once no work is outstanding.
    ///
    /// The callback never runs synchronously: even when the count is already
    /// zero it is deferred to the next scheduling tick, and the count is
    /// checked again at that point.
    pub fn notify_when_idle(&self, callback: impl FnOnce() + Send + 'static) {
        let mut ledger = self.lock();
        if ledger.aborted {
            return;
        }
        ledger.idle_callbacks.push(Box::new(callback));
        let idle = ledger.outstanding == 0;
        drop(ledger);
        if idle {
            self.schedule_flush();
        }
    }

    /// Resolves once the context is quiescent, or once it has been aborted.
    pub async fn idle(&self) {
        let (tx, rx) = oneshot::channel();
        self.notify_when_idle(move || {
            let _ = tx.send(());
        });
        // A dropped sender means abort_all discarded the queue.
        let _ = rx.await;
    }

    /// Wraps `work` so that it is counted while it runs and cancelled by
    /// [`abort_all`](Self::abort_all). Resolves to `None` when aborted.
    pub fn track<F>(&self, work: F) -> impl Future<Output = Option<F::Output>> + Send + 'static
    where
        F: Future + Send + 'static,
        F::Output: Send,
    {
        let (handle, registration) = AbortHandle::new_pair();
        let ticket = Ticket {
            id: self.register(Some(handle)),
            owner: self.clone(),
        };
        let aborted = ticket.id.is_none();
        async move {
            if aborted {
                return None;
            }
            let outcome = Abortable::new(work, registration).await;
            drop(ticket);
            outcome.ok()
        }
    }

    /// Cancels all in-flight work and drops queued idle callbacks.
    ///
    /// Later completions and later `end` calls leave the ledger untouched.
    pub fn abort_all(&self) {
        let mut ledger = self.lock();
        ledger.aborted = true;
        ledger.outstanding = 0;
        ledger.idle_callbacks.clear();
        let handles: Vec<AbortHandle> = ledger.in_flight.drain().map(|(_, h)| h).collect();
        drop(ledger);
        if !handles.is_empty() {
            tracing::debug!(count = handles.len(), "Aborting in-flight work");
        }
        for handle in handles {
            handle.abort();
        }
    }

    fn register(&self, handle: Option<AbortHandle>) -> Option<u64> {
        let mut ledger = self.lock();
        if ledger.aborted {
            if let Some(handle) = handle {
                handle.abort();
            }
            return None;
        }
        let id = ledger.next_id;
        ledger.next_id += 1;
        ledger.outstanding += 1;
        if let Some(handle) = handle {
            ledger.in_flight.insert(id, handle);
        }
        Some(id)
    }

    fn finish(&self, id: u64) {
        let mut ledger = self.lock();
        if ledger.aborted {
            return;
        }
        ledger.in_flight.remove(&id);
        ledger.outstanding = ledger.outstanding.saturating_sub(1);
        let idle = ledger.outstanding == 0;
        drop(ledger);
        if idle {
            self.schedule_flush();
        }
    }

    fn schedule_flush(&self) {
        let owner = self.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    tokio::task::yield_now().await;
                    owner.flush();
                });
            }
            Err(_) => {
                tracing::warn!("No async runtime available, running idle callbacks inline");
                owner.flush();
            }
        }
    }

    fn flush(&self) {
        let mut ledger = self.lock();
        if ledger.aborted || ledger.outstanding != 0 {
            return;
        }
        let callbacks = std::mem::take(&mut ledger.idle_callbacks);
        drop(ledger);
        for callback in callbacks {
            callback();
        }
    }
}

impl std::fmt::Debug for PendingRequests {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ledger = self.lock();
        f.debug_struct("PendingRequests")
            .field("outstanding", &ledger.outstanding)
            .field("queued_callbacks", &ledger.idle_callbacks.len())
            .field("aborted", &ledger.aborted)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> Box<dyn FnOnce() + Send>) {
        let fired = Arc::new(AtomicUsize::new(0));
        let handle = fired.clone();
        let make = move || {
            let fired = handle.clone();
            Box::new(move || {
                fired.fetch_add(1, Ordering::SeqCst);
            }) as Box<dyn FnOnce() + Send>
        };
        (fired, make)
    }

    #[tokio::test]
    async fn test_callbacks_fire_once_after_last_end() {
        let pending = PendingRequests::new();
        let (fired, make) = counter();

        let tickets: Vec<Ticket> = (0..3).map(|_| pending.begin()).collect();
        pending.notify_when_idle(make());
        pending.notify_when_idle(make());
        assert_eq!(pending.outstanding(), 3);

        for ticket in tickets {
            pending.end(ticket);
        }
        assert_eq!(fired.load(Ordering::SeqCst), 0, "must not fire synchronously");

        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 2);

        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 2, "each callback fires once");
    }

    #[tokio::test]
    async fn test_idle_registration_is_deferred() {
        let pending = PendingRequests::new();
        let (fired, make) = counter();

        pending.notify_when_idle(make());
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_work_started_in_same_tick_delays_idle() {
        let pending = PendingRequests::new();
        let (fired, make) = counter();

        pending.notify_when_idle(make());
        let ticket = pending.begin();

        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        pending.end(ticket);
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_track_counts_while_running() {
        let pending = PendingRequests::new();
        let work = pending.track(async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            7
        });
        assert_eq!(pending.outstanding(), 1);
        assert_eq!(work.await, Some(7));
        assert_eq!(pending.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_abort_all_cancels_and_ignores_late_ends() {
        let pending = PendingRequests::new();
        let (fired, make) = counter();

        let stalled = tokio::spawn(pending.track(std::future::pending::<()>()));
        let ticket = pending.begin();
        pending.notify_when_idle(make());

        pending.abort_all();
        assert_eq!(stalled.await.ok(), Some(None));

        pending.end(ticket);
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(pending.outstanding(), 0);
        assert!(pending.is_aborted());

        // New work after abort is refused immediately.
        assert_eq!(pending.track(async { 1 }).await, None);
    }

    #[tokio::test]
    async fn test_idle_resolves_after_abort() {
        let pending = PendingRequests::new();
        let _ticket = pending.begin();
        let waiter = {
            let pending = pending.clone();
            tokio::spawn(async move { pending.idle().await })
        };
        settle().await;
        pending.abort_all();
        assert!(waiter.await.is_ok());
    }
}
