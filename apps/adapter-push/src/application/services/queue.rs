//! Per-Subscription Delivery Queue
//!
//! Single-consumer FIFO between the publisher fan-out and one subscriber.
//! Producers never await: pushes complete immediately, and a bounded
//! [`QueuePolicy`] decides which item to discard when the queue is full.
//!
//! Once closed, pushes are refused but items already queued stay drainable;
//! the consumer sees them, then an optional fault, then end of stream.
//!
//! A priming queue holds live pushes back until [`SubscriptionQueue::prime`]
//! places the subscription's initial items ahead of them.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::application::error::SubscriptionError;

/// Capacity policy for subscriber queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueuePolicy {
    /// Never drop; memory grows with a slow consumer.
    #[default]
    Unbounded,
    /// Keep at most `n` items, discarding the oldest on overflow.
    DropOldest(usize),
    /// Keep at most `n` items, discarding the incoming item on overflow.
    DropNewest(usize),
}

impl QueuePolicy {
    /// Maximum queued items, if bounded.
    #[must_use]
    pub const fn capacity(self) -> Option<usize> {
        match self {
            Self::Unbounded => None,
            Self::DropOldest(n) | Self::DropNewest(n) => Some(n),
        }
    }
}

/// Result of offering an item to a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PushOutcome {
    /// Item queued.
    Queued,
    /// Item queued after discarding the oldest one.
    Displaced,
    /// Item discarded because the queue was full.
    Rejected,
    /// Queue closed; item discarded.
    Closed,
}

struct QueueState<T> {
    items: VecDeque<T>,
    /// Live items pushed while the queue is priming; hidden from the consumer.
    held: Option<VecDeque<T>>,
    fault: Option<SubscriptionError>,
    closed: bool,
}

impl<T> QueueState<T> {
    /// Move held items behind the visible ones and stop priming.
    fn release_held(&mut self) {
        if let Some(held) = self.held.take() {
            self.items.extend(held);
        }
    }
}

pub(crate) struct SubscriptionQueue<T> {
    state: Mutex<QueueState<T>>,
    notify: Notify,
    policy: QueuePolicy,
}

impl<T> SubscriptionQueue<T> {
    pub(crate) fn new(policy: QueuePolicy) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                held: None,
                fault: None,
                closed: false,
            }),
            notify: Notify::new(),
            policy,
        }
    }

    /// Create a queue that holds pushed items back until [`Self::prime`].
    pub(crate) fn new_priming(policy: QueuePolicy) -> Self {
        let queue = Self::new(policy);
        queue.hold();
        queue
    }

    pub(crate) fn push(&self, item: T) -> PushOutcome {
        let outcome = {
            let mut state = self.state.lock();
            if state.closed {
                return PushOutcome::Closed;
            }
            if let Some(held) = state.held.as_mut() {
                return admit(self.policy, held, item);
            }
            admit(self.policy, &mut state.items, item)
        };

        if outcome != PushOutcome::Rejected {
            self.notify.notify_one();
        }
        outcome
    }

    /// Start holding pushed items back from the consumer.
    ///
    /// Items already visible stay visible. No-op while already priming.
    pub(crate) fn hold(&self) {
        let mut state = self.state.lock();
        if !state.closed && state.held.is_none() {
            state.held = Some(VecDeque::new());
        }
    }

    /// Queue `initial` ahead of every item held since [`Self::hold`], then
    /// release them all to the consumer.
    ///
    /// Returns the number of items the policy discarded to fit, or `None`
    /// if the queue is closed and `initial` was refused.
    pub(crate) fn prime(&self, initial: Vec<T>) -> Option<usize> {
        let dropped = {
            let mut state = self.state.lock();
            if state.closed {
                return None;
            }
            state.items.extend(initial);
            state.release_held();
            trim(self.policy, &mut state.items)
        };
        self.notify.notify_one();
        Some(dropped)
    }

    /// Refuse further pushes. Returns false if already closed.
    ///
    /// Held items become visible so they drain like any other.
    pub(crate) fn close(&self) -> bool {
        let newly_closed = {
            let mut state = self.state.lock();
            state.release_held();
            !std::mem::replace(&mut state.closed, true)
        };
        self.notify.notify_one();
        newly_closed
    }

    /// Close with a fault delivered after the queued items.
    pub(crate) fn fault(&self, error: SubscriptionError) {
        {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.release_held();
            state.closed = true;
            state.fault = Some(error);
        }
        self.notify.notify_one();
    }

    /// Items visible to the consumer.
    pub(crate) fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Next item, suspending while the queue is empty and open.
    ///
    /// Returns `None` once closed and drained.
    pub(crate) async fn pop(&self) -> Option<Result<T, SubscriptionError>> {
        loop {
            {
                let mut state = self.state.lock();
                if let Some(item) = state.items.pop_front() {
                    return Some(Ok(item));
                }
                if let Some(fault) = state.fault.take() {
                    return Some(Err(fault));
                }
                if state.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }
}

/// Append `item` to `items` under `policy`.
fn admit<T>(policy: QueuePolicy, items: &mut VecDeque<T>, item: T) -> PushOutcome {
    let full = policy.capacity().is_some_and(|cap| items.len() >= cap.max(1));
    match policy {
        QueuePolicy::DropNewest(_) if full => PushOutcome::Rejected,
        QueuePolicy::DropOldest(_) if full => {
            items.pop_front();
            items.push_back(item);
            PushOutcome::Displaced
        }
        _ => {
            items.push_back(item);
            PushOutcome::Queued
        }
    }
}

/// Cut `items` down to the policy's capacity; returns how many were discarded.
fn trim<T>(policy: QueuePolicy, items: &mut VecDeque<T>) -> usize {
    let Some(cap) = policy.capacity() else {
        return 0;
    };
    let excess = items.len().saturating_sub(cap.max(1));
    if excess > 0 {
        match policy {
            QueuePolicy::DropNewest(_) => items.truncate(items.len() - excess),
            _ => {
                items.drain(..excess);
            }
        }
    }
    excess
}
