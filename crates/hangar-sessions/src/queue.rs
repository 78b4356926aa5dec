// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! FIFO admission queue for session creation.
//!
//! When global capacity is exhausted, callers park in [`SessionQueue::enqueue`]
//! instead of failing outright. A background loop ([`SessionQueue::run`])
//! re-evaluates the capacity check every poll interval (or immediately after
//! [`SessionQueue::notify_capacity`]) and releases the head entry only.
//!
//! A released caller is handed a chance, not a reservation: it must
//! re-validate whatever quota it cares about, since other replicas compete
//! for the same slots.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{Notify, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Errors returned to queued callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The queue already holds its maximum number of waiters.
    #[error("queue full ({len}/{max})")]
    Full {
        /// Current queue length.
        len: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Capacity did not free up within the queue timeout.
    #[error("timed out after {0:?} waiting for capacity")]
    Timeout(Duration),

    /// The caller cancelled while waiting.
    #[error("cancelled while waiting for capacity")]
    Cancelled,

    /// The queue is shutting down.
    #[error("queue shutting down")]
    ShuttingDown,
}

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum number of waiting callers.
    pub max_size: usize,
    /// How long a single caller may wait.
    pub timeout: Duration,
    /// How often capacity is re-checked.
    pub poll_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size: 100,
            timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Predicate deciding whether a new session may start now.
#[async_trait]
pub trait CapacityCheck: Send + Sync {
    /// True when a slot is available at the time of the call.
    async fn has_capacity(&self) -> bool;
}

#[async_trait]
impl<F, Fut> CapacityCheck for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = bool> + Send + 'static,
{
    async fn has_capacity(&self) -> bool {
        (self)().await
    }
}

struct Entry {
    id: u64,
    tx: oneshot::Sender<Result<(), QueueError>>,
}

#[derive(Default)]
struct State {
    entries: VecDeque<Entry>,
    next_id: u64,
}

/// FIFO admission-control queue.
pub struct SessionQueue {
    state: Mutex<State>,
    capacity: Arc<dyn CapacityCheck>,
    config: QueueConfig,
    wake: Notify,
    shutdown: CancellationToken,
}

/// Removes an abandoned ticket when the waiting future is dropped.
struct TicketGuard<'a> {
    queue: &'a SessionQueue,
    id: u64,
}

impl Drop for TicketGuard<'_> {
    fn drop(&mut self) {
        self.queue.remove(self.id);
    }
}

impl SessionQueue {
    /// Create a new queue around a capacity check.
    pub fn new(config: QueueConfig, capacity: Arc<dyn CapacityCheck>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            capacity,
            config,
            wake: Notify::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Queue configuration.
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Number of waiting callers.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Whether nobody is waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured maximum number of waiters.
    pub fn max_size(&self) -> usize {
        self.config.max_size
    }

    /// Whether a new caller would be rejected with [`QueueError::Full`].
    pub fn is_full(&self) -> bool {
        self.len() >= self.config.max_size
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Wait for capacity.
    ///
    /// Returns immediately if capacity is available now. Dropping the returned
    /// future removes the caller from the queue.
    pub async fn enqueue(&self) -> Result<(), QueueError> {
        self.wait_for_slot(None).await
    }

    /// Wait for capacity, giving up with [`QueueError::Cancelled`] when
    /// `cancel` fires.
    pub async fn enqueue_with_cancel(&self, cancel: &CancellationToken) -> Result<(), QueueError> {
        self.wait_for_slot(Some(cancel)).await
    }

    /// Park again at the head of the queue, skipping the fast path.
    ///
    /// For a released caller that lost its slot to a competing writer. The
    /// size limit does not apply since the caller already held a place.
    pub async fn requeue(&self) -> Result<(), QueueError> {
        if self.shutdown.is_cancelled() {
            return Err(QueueError::ShuttingDown);
        }
        self.park(None, true).await
    }

    async fn wait_for_slot(&self, cancel: Option<&CancellationToken>) -> Result<(), QueueError> {
        if self.shutdown.is_cancelled() {
            return Err(QueueError::ShuttingDown);
        }

        if self.capacity.has_capacity().await {
            return Ok(());
        }

        self.park(cancel, false).await
    }

    async fn park(
        &self,
        cancel: Option<&CancellationToken>,
        front: bool,
    ) -> Result<(), QueueError> {
        let (id, mut rx) = {
            let mut state = self.state.lock();
            let len = state.entries.len();
            if !front && len >= self.config.max_size {
                return Err(QueueError::Full {
                    len,
                    max: self.config.max_size,
                });
            }
            // Checked under the lock so a concurrent shutdown drain cannot miss us
            if self.shutdown.is_cancelled() {
                return Err(QueueError::ShuttingDown);
            }

            let id = state.next_id;
            state.next_id += 1;
            let (tx, rx) = oneshot::channel();
            if front {
                state.entries.push_front(Entry { id, tx });
            } else {
                state.entries.push_back(Entry { id, tx });
            }
            (id, rx)
        };

        let _guard = TicketGuard { queue: self, id };
        let timeout = self.config.timeout;
        debug!(ticket = id, position = self.len(), "Waiting for session capacity");

        tokio::select! {
            released = &mut rx => released.unwrap_or(Err(QueueError::ShuttingDown)),
            _ = tokio::time::sleep(timeout) => self.abandon(id, &mut rx, QueueError::Timeout(timeout)),
            _ = cancelled(cancel) => self.abandon(id, &mut rx, QueueError::Cancelled),
        }
    }

    /// Give up on a ticket. If it was released concurrently, honour the release.
    fn abandon(
        &self,
        id: u64,
        rx: &mut oneshot::Receiver<Result<(), QueueError>>,
        err: QueueError,
    ) -> Result<(), QueueError> {
        if self.remove(id) {
            debug!(ticket = id, error = %err, "Left session queue");
            return Err(err);
        }
        rx.try_recv().unwrap_or(Err(err))
    }

    /// Remove a specific ticket. Returns false if it was no longer queued.
    fn remove(&self, id: u64) -> bool {
        let mut state = self.state.lock();
        match state.entries.iter().position(|e| e.id == id) {
            Some(pos) => {
                state.entries.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Hint that capacity may have freed up; wakes the processing loop early.
    pub fn notify_capacity(&self) {
        self.wake.notify_one();
    }

    /// Check capacity once and release the head entry if there is room.
    ///
    /// Returns true if a waiter was released.
    pub async fn process_once(&self) -> bool {
        if self.is_empty() {
            return false;
        }
        if !self.capacity.has_capacity().await {
            return false;
        }
        self.release_head()
    }

    fn release_head(&self) -> bool {
        let mut state = self.state.lock();
        while let Some(entry) = state.entries.pop_front() {
            // A closed receiver means the waiter is already gone; try the next one
            if entry.tx.send(Ok(())).is_ok() {
                debug!(
                    ticket = entry.id,
                    remaining = state.entries.len(),
                    "Released queued session request"
                );
                return true;
            }
        }
        false
    }

    /// Run the processing loop until [`shutdown`](Self::shutdown) is called.
    pub async fn run(&self) {
        info!(
            max_size = self.config.max_size,
            timeout_secs = self.config.timeout.as_secs(),
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Session queue started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    break;
                }

                _ = self.wake.notified() => {}

                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }

            self.process_once().await;
        }

        info!("Session queue stopped");
    }

    /// Stop the loop and fail every waiter with [`QueueError::ShuttingDown`].
    pub fn shutdown(&self) {
        let drained: Vec<Entry> = {
            let mut state = self.state.lock();
            self.shutdown.cancel();
            state.entries.drain(..).collect()
        };

        if !drained.is_empty() {
            info!(count = drained.len(), "Releasing queued session requests for shutdown");
        }
        for entry in drained {
            let _ = entry.tx.send(Err(QueueError::ShuttingDown));
        }
    }
}

async fn cancelled(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}
