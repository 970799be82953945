// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Document change subscriptions.
//!
//! Every backend hands out the same [`Subscription`] type so that the block
//! listener and the settings cache share one cancellation rule: cancelling a
//! [`SubscriptionHandle`] (or dropping the subscription) stops delivery
//! immediately, before the backend has finished tearing its listener down.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A change to a watched document.
#[derive(Debug, Clone, PartialEq)]
pub enum Change<T> {
    /// Current contents after a write (also sent once on subscribe)
    Updated(T),
    Removed,
    /// The backend could not deliver or decode a change
    Error(String),
}

/// Create a connected sender/subscription pair.
pub fn channel<T>() -> (ChangeSender<T>, Subscription<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    (
        ChangeSender {
            tx,
            cancel: cancel.clone(),
        },
        Subscription { rx, cancel },
    )
}

/// Backend side of a subscription.
#[derive(Debug)]
pub struct ChangeSender<T> {
    tx: mpsc::UnboundedSender<Change<T>>,
    cancel: CancellationToken,
}

impl<T> Clone for ChangeSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl<T> ChangeSender<T> {
    /// Deliver a change. Returns `false` once the subscriber is gone.
    pub fn send(&self, change: Change<T>) -> bool {
        if self.is_closed() {
            return false;
        }
        self.tx.send(change).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }

    /// Token cancelled when the subscriber unsubscribes.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// Subscriber side: a stream of changes.
#[derive(Debug)]
pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<Change<T>>,
    cancel: CancellationToken,
}

impl<T> Subscription<T> {
    /// Next change, or `None` once cancelled or the backend has gone away.
    pub async fn next(&mut self) -> Option<Change<T>> {
        if self.cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            change = self.rx.recv() => change,
        }
    }

    /// A handle that can cancel this subscription from elsewhere.
    pub fn handle(&self) -> SubscriptionHandle {
        SubscriptionHandle {
            cancel: self.cancel.clone(),
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Cancels a subscription synchronously.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    cancel: CancellationToken,
}

impl SubscriptionHandle {
    pub fn unsubscribe(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
