//! In-memory claim heap with priority ordering and lazy deletion.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Heap entry referencing a job record by id.
///
/// The entry may outlive the state it was pushed for; the owner checks the
/// job record on pop and discards stale entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapEntry {
    /// Job priority at push time (higher first).
    pub priority: i64,
    /// Submission sequence at push time (lower first within a priority).
    pub sequence: u64,
    /// Job the entry points to.
    pub job_id: String,
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first
        match self.priority.cmp(&other.priority) {
            // FIFO within same priority: lower sequence wins (reversed for max-heap)
            Ordering::Equal => other.sequence.cmp(&self.sequence),
            other => other,
        }
    }
}

/// Priority heap ordered by `(-priority, sequence)`.
/// This provides O(log n) push and O(log n) pop operations.
#[derive(Debug, Default)]
pub struct JobHeap {
    entries: BinaryHeap<HeapEntry>,
}

impl JobHeap {
    /// Create an empty heap.
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a reference to a job.
    pub fn push(&mut self, job_id: impl Into<String>, priority: i64, sequence: u64) {
        self.entries.push(HeapEntry {
            priority,
            sequence,
            job_id: job_id.into(),
        });
    }

    /// Pop the best entry, stale or not.
    pub fn pop(&mut self) -> Option<HeapEntry> {
        self.entries.pop()
    }

    /// Pop entries until `is_live` accepts one. Rejected entries are dropped.
    pub fn pop_live(&mut self, mut is_live: impl FnMut(&HeapEntry) -> bool) -> Option<HeapEntry> {
        while let Some(entry) = self.entries.pop() {
            if is_live(&entry) {
                return Some(entry);
            }
            tracing::trace!(job = %entry.job_id, seq = entry.sequence, "discarding stale heap entry");
        }
        None
    }

    /// Number of entries, including stale ones.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the heap holds no entries at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
