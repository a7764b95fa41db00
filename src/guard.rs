//! Bounded concurrency guard
//!
//! A [`ConcurrencyGuard`] caps how many invocations of one request class are in
//! flight at a time. Callers beyond the limit wait in a FIFO queue and are
//! admitted in arrival order as slots free up. A slot is an RAII [`Slot`]: it is
//! given back when dropped, whether the guarded operation succeeded, failed or
//! was cancelled.
//!
//! Each request class (articles, images, revisions, ...) owns its own guard, so
//! a saturated image queue never holds up article fetches.
//!
//! ```no_run
//! use wiki_bundler::guard::ConcurrencyGuard;
//!
//! # async fn example() {
//! let guard = ConcurrencyGuard::new("images", 5);
//! let fetch = guard.wrap(|n: u32| async move { n * 2 });
//! assert_eq!(fetch.call(21).await, 42);
//! # }
//! ```

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

struct State {
    in_flight: usize,
    waiters: VecDeque<oneshot::Sender<()>>,
}

struct Inner {
    name: String,
    limit: usize,
    state: Mutex<State>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take a free slot, or join the back of the queue
    fn enter(&self) -> Result<(), oneshot::Receiver<()>> {
        let mut state = self.lock();
        if state.in_flight < self.limit && state.waiters.is_empty() {
            state.in_flight += 1;
            return Ok(());
        }
        let (tx, rx) = oneshot::channel();
        state.waiters.push_back(tx);
        tracing::trace!(
            guard = %self.name,
            queued = state.waiters.len(),
            "Concurrency limit reached, queueing"
        );
        Err(rx)
    }

    /// Hand the slot to the oldest live waiter, or free it
    fn release(&self) {
        let mut state = self.lock();
        while let Some(waiter) = state.waiters.pop_front() {
            if waiter.send(()).is_ok() {
                return;
            }
        }
        state.in_flight = state.in_flight.saturating_sub(1);
    }
}

/// FIFO concurrency limiter for one request class
#[derive(Clone)]
pub struct ConcurrencyGuard {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ConcurrencyGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrencyGuard")
            .field("name", &self.inner.name)
            .field("limit", &self.inner.limit)
            .field("in_flight", &self.in_flight())
            .field("queued", &self.queued())
            .finish()
    }
}

impl ConcurrencyGuard {
    /// Create a guard admitting at most `limit` concurrent holders
    ///
    /// A limit of zero is raised to one so that the guard can never deadlock.
    pub fn new(name: impl Into<String>, limit: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                limit: limit.max(1),
                state: Mutex::new(State {
                    in_flight: 0,
                    waiters: VecDeque::new(),
                }),
            }),
        }
    }

    /// Request class this guard limits
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Maximum number of concurrent holders
    pub fn limit(&self) -> usize {
        self.inner.limit
    }

    /// Slots currently held
    pub fn in_flight(&self) -> usize {
        self.inner.lock().in_flight
    }

    /// Callers waiting for a slot
    pub fn queued(&self) -> usize {
        self.inner.lock().waiters.len()
    }

    /// Wait for a slot
    ///
    /// Cancel-safe: dropping the returned future before it completes gives up
    /// the place in the queue, and a slot that was handed over in the meantime
    /// is passed on to the next waiter.
    pub async fn acquire(&self) -> Slot {
        let mut waiter = Waiter {
            inner: self.inner.clone(),
            rx: None,
        };
        loop {
            match self.inner.enter() {
                Ok(()) => break,
                Err(rx) => {
                    let granted = waiter.rx.insert(rx).await.is_ok();
                    waiter.rx = None;
                    if granted {
                        break;
                    }
                    // Sender vanished without a hand-off; queue up again
                }
            }
        }
        Slot {
            inner: self.inner.clone(),
        }
    }

    /// Run `operation` while holding a slot
    pub async fn run<Fut>(&self, operation: Fut) -> Fut::Output
    where
        Fut: Future,
    {
        let _slot = self.acquire().await;
        operation.await
    }

    /// Wrap an operation so that every call goes through this guard
    pub fn wrap<F>(&self, operation: F) -> Guarded<F> {
        Guarded {
            guard: self.clone(),
            operation,
        }
    }
}

struct Waiter {
    inner: Arc<Inner>,
    rx: Option<oneshot::Receiver<()>>,
}

impl Drop for Waiter {
    fn drop(&mut self) {
        if let Some(mut rx) = self.rx.take() {
            rx.close();
            // Granted after we stopped listening: pass the slot along
            if rx.try_recv().is_ok() {
                self.inner.release();
            }
        }
    }
}

/// A held concurrency slot; released on drop
#[must_use = "the slot is released as soon as it is dropped"]
pub struct Slot {
    inner: Arc<Inner>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.inner.release();
    }
}

/// An operation whose invocations are limited by a [`ConcurrencyGuard`]
#[derive(Clone)]
pub struct Guarded<F> {
    guard: ConcurrencyGuard,
    operation: F,
}

impl<F> Guarded<F> {
    /// Invoke the wrapped operation once a slot is free
    pub async fn call<A, Fut>(&self, arg: A) -> Fut::Output
    where
        F: Fn(A) -> Fut,
        Fut: Future,
    {
        let _slot = self.guard.acquire().await;
        (self.operation)(arg).await
    }

    /// The guard limiting this operation
    pub fn guard(&self) -> &ConcurrencyGuard {
        &self.guard
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    async fn wait_for_queue(guard: &ConcurrencyGuard, len: usize) {
        for _ in 0..1000 {
            if guard.queued() == len {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("queue never reached {len}, is {}", guard.queued());
    }

    #[tokio::test]
    async fn never_exceeds_limit() {
        for limit in [1usize, 2, 5] {
            let guard = ConcurrencyGuard::new("test", limit);
            let current = Arc::new(AtomicUsize::new(0));
            let peak = Arc::new(AtomicUsize::new(0));

            let op = guard.wrap(|delay_ms: u64| {
                let current = current.clone();
                let peak = peak.clone();
                async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                }
            });

            let calls = (0..20).map(|i| op.call(1 + (i % 3)));
            futures::future::join_all(calls).await;

            assert_eq!(peak.load(Ordering::SeqCst), limit, "limit {limit}");
            assert_eq!(guard.in_flight(), 0);
            assert_eq!(guard.queued(), 0);
        }
    }

    #[tokio::test]
    async fn admits_waiters_in_arrival_order() {
        let guard = ConcurrencyGuard::new("fifo", 1);
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = guard.acquire().await;

        let mut handles = Vec::new();
        for id in 0..5 {
            let task_guard = guard.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let _slot = task_guard.acquire().await;
                order.lock().unwrap().push(id);
            }));
            wait_for_queue(&guard, id + 1).await;
        }

        drop(first);
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn failure_releases_slot() {
        let guard = ConcurrencyGuard::new("failing", 1);
        let op = guard.wrap(|fail: bool| async move {
            if fail { Err("boom") } else { Ok(()) }
        });

        assert!(op.call(true).await.is_err());
        assert_eq!(guard.in_flight(), 0);
        assert!(op.call(false).await.is_ok());
    }

    #[tokio::test]
    async fn independent_guards_do_not_block_each_other() {
        let images = ConcurrencyGuard::new("images", 1);
        let articles = ConcurrencyGuard::new("articles", 1);

        let _held = images.acquire().await;
        let got = tokio::time::timeout(Duration::from_millis(100), articles.acquire()).await;
        assert!(got.is_ok(), "article guard should not wait on image guard");
    }

    #[tokio::test]
    async fn cancelled_waiter_gives_up_its_place() {
        let guard = ConcurrencyGuard::new("cancel", 1);
        let held = guard.acquire().await;

        let timed_out = tokio::time::timeout(Duration::from_millis(20), guard.acquire()).await;
        assert!(timed_out.is_err());

        drop(held);
        assert_eq!(guard.in_flight(), 0);
        let _again = guard.acquire().await;
        assert_eq!(guard.in_flight(), 1);
    }

    #[tokio::test]
    async fn slot_granted_to_dropped_waiter_is_passed_on() {
        let guard = ConcurrencyGuard::new("handoff", 1);
        let held = guard.acquire().await;

        let mut pending = Box::pin(guard.acquire());
        assert!(futures::poll!(pending.as_mut()).is_pending());
        assert_eq!(guard.queued(), 1);

        // Hand-off lands in the waiter's channel, then the waiter goes away
        drop(held);
        drop(pending);

        assert_eq!(guard.in_flight(), 0);
        assert_eq!(guard.queued(), 0);
    }

    #[test]
    fn zero_limit_is_raised_to_one() {
        assert_eq!(ConcurrencyGuard::new("zero", 0).limit(), 1);
    }
}
