//! Waiting queue
//!
//! FIFO of users looking for a partner, at most one entry per user.

use std::collections::VecDeque;

use tokio::time::Instant;

use crate::types::{ConnectionId, DisplayName, UserId};

/// One user's outstanding request to be matched
#[derive(Debug, Clone)]
pub struct WaitingEntry {
    pub user_id: UserId,
    pub display_name: DisplayName,
    /// Where to deliver events for this request
    pub connection: ConnectionId,
    pub enqueued_at: Instant,
}

impl WaitingEntry {
    /// Create an entry stamped with the current time
    pub fn new(user_id: UserId, display_name: DisplayName, connection: ConnectionId) -> Self {
        Self {
            user_id,
            display_name,
            connection,
            enqueued_at: Instant::now(),
        }
    }
}

/// Ordered, deduplicated collection of waiting entries
///
/// Owned by the matchmaker actor, so every operation is atomic with
/// respect to the others.
#[derive(Debug, Default)]
pub struct WaitingQueue {
    entries: VecDeque<WaitingEntry>,
}

impl WaitingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry, replacing any existing entry for the same user
    ///
    /// Returns the 1-based position of the entry.
    pub fn enqueue(&mut self, entry: WaitingEntry) -> usize {
        self.remove_any(&entry.user_id);
        self.entries.push_back(entry);
        self.entries.len()
    }

    /// Remove and return the entry for `user_id`, if waiting
    pub fn dequeue_if_present(&mut self, user_id: &UserId) -> Option<WaitingEntry> {
        let index = self.entries.iter().position(|e| &e.user_id == user_id)?;
        self.entries.remove(index)
    }

    /// Remove and return the oldest entry
    pub fn pop_front(&mut self) -> Option<WaitingEntry> {
        self.entries.pop_front()
    }

    /// Drop the entry for `user_id`, if any
    pub fn remove_any(&mut self, user_id: &UserId) -> bool {
        self.dequeue_if_present(user_id).is_some()
    }

    /// Entry for `user_id`, if waiting
    pub fn get(&self, user_id: &UserId) -> Option<&WaitingEntry> {
        self.entries.iter().find(|e| &e.user_id == user_id)
    }

    /// 1-based queue position of `user_id`
    pub fn position(&self, user_id: &UserId) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| &e.user_id == user_id)
            .map(|i| i + 1)
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, user_id: &UserId) -> bool {
        self.position(user_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
