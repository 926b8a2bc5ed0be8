use std::collections::HashSet;

use crate::ids::{MessageId, SenderId};
use crate::message::{Message, Origin};

/// Why a candidate message was not inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rejection {
    /// An entry with the same id is already present.
    DuplicateId,
    /// Live traffic from the current user; the local echo already stands for it.
    OwnLiveEcho,
}

/// Summary of one merge call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MergeOutcome {
    pub inserted: usize,
    pub duplicates: usize,
    pub suppressed: usize,
}

impl MergeOutcome {
    pub fn changed(&self) -> bool {
        self.inserted > 0
    }

    fn record(&mut self, verdict: Result<(), Rejection>) {
        match verdict {
            Ok(()) => self.inserted += 1,
            Err(Rejection::DuplicateId) => self.duplicates += 1,
            Err(Rejection::OwnLiveEcho) => self.suppressed += 1,
        }
    }
}

/// Owner of the canonical timeline for one room view.
///
/// Invariants held after every mutation: entries are sorted non-decreasing by
/// timestamp with ties kept in insertion order, and no two entries share an id.
///
/// Suppression of the user's own live traffic is by sender id only. Two quick sends,
/// or the same account posting from another device, will have the second live copy
/// dropped as well; this is a known limitation of the heuristic.
#[derive(Debug, Clone)]
pub struct Reconciler {
    current_user: SenderId,
    entries: Vec<Message>,
    ids: HashSet<MessageId>,
}

impl Reconciler {
    pub fn new(current_user: SenderId) -> Self {
        Self {
            current_user,
            entries: Vec::new(),
            ids: HashSet::new(),
        }
    }

    pub fn current_user(&self) -> &SenderId {
        &self.current_user
    }

    /// Timeline in display order.
    pub fn entries(&self) -> &[Message] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Inserts one message at its sorted position.
    pub fn insert(&mut self, message: Message) -> Result<(), Rejection> {
        self.admit(&message)?;

        // Upper bound keeps equal timestamps in arrival order.
        let position = self
            .entries
            .partition_point(|entry| entry.timestamp <= message.timestamp);
        self.ids.insert(message.id.clone());
        self.entries.insert(position, message);
        Ok(())
    }

    /// Merges a batch in one step; the sort invariant is restored once at the end.
    pub fn merge<I>(&mut self, batch: I) -> MergeOutcome
    where
        I: IntoIterator<Item = Message>,
    {
        let mut outcome = MergeOutcome::default();
        for message in batch {
            let verdict = self.admit(&message);
            if verdict.is_ok() {
                self.ids.insert(message.id.clone());
                self.entries.push(message);
            }
            outcome.record(verdict);
        }

        if outcome.changed() {
            // `sort_by` is stable, so ties keep insertion order.
            self.entries
                .sort_by(|left, right| left.timestamp.cmp(&right.timestamp));
        }

        tracing::trace!(
            inserted = outcome.inserted,
            duplicates = outcome.duplicates,
            suppressed = outcome.suppressed,
            total = self.entries.len(),
            "merged message batch"
        );
        outcome
    }

    fn admit(&self, message: &Message) -> Result<(), Rejection> {
        if message.origin == Origin::Live && message.sender_id == self.current_user {
            return Err(Rejection::OwnLiveEcho);
        }
        if self.ids.contains(&message.id) {
            return Err(Rejection::DuplicateId);
        }
        Ok(())
    }
}
