//! Bounded dead-letter store
//!
//! Holds batches that exhausted their delivery retries. The store is owned by the
//! destination task. When full, pushing evicts the oldest entry and hands it back so
//! the caller can emit a drop notification.

use std::collections::VecDeque;

use tokio::time::Instant;

use crate::batch::Batch;

/// One dead-lettered batch
#[derive(Debug, Clone)]
pub struct DeadLetterEntry {
    pub batch: Batch,
    /// Delivery attempts made so far, including regular retries
    pub attempts: u32,
    /// Attempts made from the dead-letter retry loop
    pub dead_letter_attempts: u32,
    pub last_error: String,
    pub dead_lettered_at: Instant,
}

impl DeadLetterEntry {
    pub fn new(batch: Batch, attempts: u32, last_error: impl Into<String>, now: Instant) -> Self {
        Self {
            batch,
            attempts,
            dead_letter_attempts: 0,
            last_error: last_error.into(),
            dead_lettered_at: now,
        }
    }
}

#[derive(Debug)]
pub struct DeadLetterStore {
    entries: VecDeque<DeadLetterEntry>,
    max_entries: usize,
    total_dead_lettered: u64,
    total_evicted: u64,
}

impl DeadLetterStore {
    pub fn new(max_entries: usize) -> Self {
        let max_entries = max_entries.max(1);
        Self {
            entries: VecDeque::with_capacity(max_entries.min(1_024)),
            max_entries,
            total_dead_lettered: 0,
            total_evicted: 0,
        }
    }

    /// Appends an entry; returns the evicted oldest entry when the store was full.
    pub fn push(&mut self, entry: DeadLetterEntry) -> Option<DeadLetterEntry> {
        let evicted = if self.entries.len() >= self.max_entries {
            let removed = self.entries.pop_front();
            if let Some(removed) = &removed {
                self.total_evicted += 1;
                tracing::warn!(
                    destination = %removed.batch.destination_id,
                    sequence = removed.batch.sequence,
                    events = removed.batch.len(),
                    "dead-letter store full, evicting oldest batch"
                );
            }
            removed
        } else {
            None
        };
        self.entries.push_back(entry);
        self.total_dead_lettered += 1;
        evicted
    }

    /// Puts a retried entry back at the front, keeping age order.
    pub fn push_front(&mut self, entry: DeadLetterEntry) {
        self.entries.push_front(entry);
    }

    /// Removes and returns the oldest entry.
    pub fn pop(&mut self) -> Option<DeadLetterEntry> {
        self.entries.pop_front()
    }

    /// Removes every entry, oldest first.
    pub fn drain(&mut self) -> Vec<DeadLetterEntry> {
        self.entries.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Events held across all entries.
    pub fn event_count(&self) -> usize {
        self.entries.iter().map(|e| e.batch.len()).sum()
    }

    pub fn total_dead_lettered(&self) -> u64 {
        self.total_dead_lettered
    }

    pub fn total_evicted(&self) -> u64 {
        self.total_evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn entry(sequence: u64) -> DeadLetterEntry {
        let batch = Batch {
            destination_id: Arc::from("siem"),
            sequence,
            events: Vec::new().into(),
            bytes: 0,
        };
        DeadLetterEntry::new(batch, 4, "connection refused", Instant::now())
    }

    #[test]
    fn never_exceeds_capacity_and_evicts_oldest() {
        let mut store = DeadLetterStore::new(3);
        for seq in 0..3 {
            assert!(store.push(entry(seq)).is_none());
        }
        for seq in 3..10 {
            let evicted = store.push(entry(seq)).unwrap();
            assert_eq!(evicted.batch.sequence, seq - 3);
            assert!(store.len() <= 3);
        }
        assert_eq!(store.len(), 3);
        assert_eq!(store.total_dead_lettered(), 10);
        assert_eq!(store.total_evicted(), 7);
        let remaining: Vec<u64> = store.drain().iter().map(|e| e.batch.sequence).collect();
        assert_eq!(remaining, vec![7, 8, 9]);
        assert!(store.is_empty());
    }

    #[test]
    fn pop_and_push_front_keep_order() {
        let mut store = DeadLetterStore::new(10);
        store.push(entry(1));
        store.push(entry(2));
        let mut head = store.pop().unwrap();
        head.dead_letter_attempts += 1;
        store.push_front(head);
        assert_eq!(store.pop().unwrap().dead_letter_attempts, 1);
        assert_eq!(store.pop().unwrap().batch.sequence, 2);
    }
}
