//! # Event Bus
//!
//! Lets a connection session follow one record of the [`StateStore`]: every time the
//! key changes, the callback receives the value that mutation wrote (or `None` when
//! it deleted the key).
//!
//! ## Delivery:
//! - Callbacks for one subscription run sequentially, in the order the store applied
//!   the mutations, each with the record as that mutation left it.
//! - Delivery is at-most-once. A subscriber that falls more than the channel capacity
//!   behind skips the oldest notifications. The newest ones are kept, so the last
//!   callback still reflects the latest state of the key.
//!
//! ## Rust Concepts:
//! - **RAII**: the listening task lives exactly as long as its [`Subscription`] value
//! - **JoinHandle::abort**: cancels the task at its next await point

use crate::store::{KeyEvent, KeyEventKind, StateStore};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Hands out per-key change subscriptions over a shared store.
#[derive(Clone)]
pub struct EventBus {
    store: Arc<StateStore>,
}

impl EventBus {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self { store }
    }

    /// Call `on_change` with the value of `key` after every mutation of it.
    ///
    /// Mutations applied after this function returns are guaranteed to be observed.
    /// Must be called from within a Tokio runtime.
    pub fn subscribe<T, F>(&self, key: impl Into<String>, on_change: F) -> Subscription
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(Option<T>) + Send + 'static,
    {
        let key = key.into();
        // Register before spawning so nothing applied from now on is missed.
        let mut notifications = self.store.watch();
        let watched = key.clone();

        let task = tokio::spawn(async move {
            loop {
                match notifications.recv().await {
                    Ok(KeyEvent { key, kind }) if key == watched => match kind {
                        KeyEventKind::Set(json) => match serde_json::from_str::<T>(&json) {
                            Ok(value) => on_change(Some(value)),
                            Err(e) => error!(key = %watched, "failed to decode changed record: {}", e),
                        },
                        KeyEventKind::Deleted => on_change(None),
                        // Hashes are indexes, not records.
                        KeyEventKind::FieldSet => {}
                    },
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(key = %watched, skipped, "subscriber lagged behind store notifications");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!(key = %watched, "subscription stream closed");
        });

        Subscription { key, task: Some(task) }
    }
}

/// An active subscription. Dropping it stops delivery.
pub struct Subscription {
    key: String,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Stop delivering changes. Calling it again is a no-op.
    pub fn unsubscribe(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!(key = %self.key, "unsubscribed");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
