//! Match timeout scheduler
//!
//! One deadline per waiting user, kept in a `DelayQueue` that the
//! matchmaker polls from its own event loop. Arming, cancelling and
//! firing all happen on the actor task, so a cancelled timer never fires
//! and a fired timer is never cancelled half-way.

use std::collections::HashMap;
use std::future::poll_fn;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::time::delay_queue::{DelayQueue, Key};

use crate::types::UserId;

/// Deadline queue keyed by user
#[derive(Debug)]
pub struct TimeoutScheduler {
    timeout: Duration,
    deadlines: DelayQueue<UserId>,
    keys: HashMap<UserId, Key>,
}

impl TimeoutScheduler {
    /// Create a scheduler whose deadlines are `timeout` after enqueue
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            deadlines: DelayQueue::new(),
            keys: HashMap::new(),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Arm the fallback deadline for `user_id`, replacing any earlier one
    pub fn arm(&mut self, user_id: UserId, enqueued_at: Instant) {
        self.cancel(&user_id);
        let key = self
            .deadlines
            .insert_at(user_id.clone(), enqueued_at + self.timeout);
        self.keys.insert(user_id, key);
    }

    /// Cancel the pending deadline for `user_id`
    ///
    /// Returns false if nothing was armed.
    pub fn cancel(&mut self, user_id: &UserId) -> bool {
        match self.keys.remove(user_id) {
            Some(key) => {
                self.deadlines.remove(&key);
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub(crate) fn is_armed(&self, user_id: &UserId) -> bool {
        self.keys.contains_key(user_id)
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Wait for the next deadline to pass
    ///
    /// Resolves to `None` immediately when nothing is armed.
    pub async fn expired(&mut self) -> Option<UserId> {
        let expired = poll_fn(|cx| self.deadlines.poll_expired(cx)).await?;
        let user_id = expired.into_inner();
        self.keys.remove(&user_id);
        Some(user_id)
    }
}
