//! Fan-in plumbing shared by the fetch orchestrator: a closeable queue
//! with high-water-mark backpressure, one-shot latches, and abort
//! signaling.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{watch, Mutex, Notify};

struct ChannelState<T> {
    queue: VecDeque<T>,
    closed: bool,
}

struct ChannelShared<T> {
    state: Mutex<ChannelState<T>>,
    item_ready: Notify,
    drained: Notify,
    high_water: Option<usize>,
}

/// Create a fan-in channel. With a high-water mark, producers calling
/// [`Sender::wait_until_drained`] suspend while the queue is above the
/// mark and resume once the consumer has drained it to half the mark.
pub(crate) fn channel<T>(high_water: Option<usize>) -> (Sender<T>, Receiver<T>) {
    let shared = Arc::new(ChannelShared {
        state: Mutex::new(ChannelState {
            queue: VecDeque::new(),
            closed: false,
        }),
        item_ready: Notify::new(),
        drained: Notify::new(),
        high_water,
    });
    (
        Sender {
            shared: shared.clone(),
        },
        Receiver { shared },
    )
}

pub(crate) struct Sender<T> {
    shared: Arc<ChannelShared<T>>,
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Sender<T> {
    /// Enqueue without blocking. Sends to a closed channel are dropped.
    pub async fn send(&self, item: T) {
        let mut state = self.shared.state.lock().await;
        if state.closed {
            tracing::debug!("send on closed channel dropped");
            return;
        }
        state.queue.push_back(item);
        drop(state);
        self.shared.item_ready.notify_one();
    }

    /// Suspend until the queue has drained to half the high-water mark.
    /// Returns immediately when no mark is configured or the channel is
    /// closed.
    pub async fn wait_until_drained(&self) {
        let Some(high_water) = self.shared.high_water else {
            return;
        };
        loop {
            let notified = self.shared.drained.notified();
            {
                let state = self.shared.state.lock().await;
                if state.closed || state.queue.len() <= high_water / 2 {
                    return;
                }
            }
            notified.await;
        }
    }

    /// Mark end-of-stream. Idempotent; items already queued are still
    /// delivered.
    pub async fn close(&self) {
        let mut state = self.shared.state.lock().await;
        if state.closed {
            return;
        }
        state.closed = true;
        drop(state);
        self.shared.item_ready.notify_waiters();
        self.shared.drained.notify_waiters();
    }
}

pub(crate) struct Receiver<T> {
    shared: Arc<ChannelShared<T>>,
}

impl<T> Receiver<T> {
    /// FIFO pop; `None` once the channel is closed and drained.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            let notified = self.shared.item_ready.notified();
            {
                let mut state = self.shared.state.lock().await;
                if let Some(item) = state.queue.pop_front() {
                    let below = self
                        .shared
                        .high_water
                        .map(|hw| state.queue.len() <= hw / 2)
                        .unwrap_or(false);
                    drop(state);
                    if below {
                        self.shared.drained.notify_waiters();
                    }
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }
}

/// One-shot cell holding a value or a rejection reason. The first
/// `resolve`/`reject` wins; later calls are no-ops. Any number of
/// awaiters observe the same outcome.
pub struct Latch<T: Clone> {
    cell: watch::Sender<Option<Result<T, String>>>,
}

impl<T: Clone> Latch<T> {
    pub fn new() -> Self {
        let (cell, _) = watch::channel(None);
        Self { cell }
    }

    pub fn resolve(&self, value: T) {
        self.settle(Ok(value));
    }

    pub fn reject(&self, reason: impl Into<String>) {
        self.settle(Err(reason.into()));
    }

    fn settle(&self, outcome: Result<T, String>) {
        self.cell.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = Some(outcome);
                true
            } else {
                false
            }
        });
    }

    pub async fn wait(&self) -> Result<T, String> {
        let mut rx = self.cell.subscribe();
        let result = match rx.wait_for(|slot| slot.is_some()).await {
            Ok(guard) => guard.clone().unwrap_or(Err("latch dropped".to_string())),
            Err(_) => Err("latch dropped".to_string()),
        };
        result
    }
}

impl<T: Clone> Default for Latch<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Caller-side cancellation handle; firing it makes every subscribed
/// [`AbortSignal`] observe the abort.
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    pub fn new() -> (AbortHandle, AbortSignal) {
        let (tx, rx) = watch::channel(false);
        (AbortHandle { tx }, AbortSignal { rx })
    }

    pub fn abort(&self) {
        let _ = self.tx.send(true);
    }
}

/// Subscribe-on-abort cancellation signal threaded from the caller into
/// every relay worker and subscription driver.
#[derive(Clone, Debug)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

impl AbortSignal {
    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once aborted; pends forever if the handle is dropped
    /// without firing.
    pub async fn aborted(&mut self) {
        if self.rx.wait_for(|fired| *fired).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
