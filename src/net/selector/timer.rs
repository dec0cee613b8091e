//! Deadline heap of a selector vat.
//!
//! Entries are ordered earliest first. Cancelling drops the resolver at once;
//! the heap entry is skipped when it surfaces.

use crate::promise::Resolver;
use hashbrown::HashMap;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

/// Handle of a scheduled deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerKey(u64);

#[derive(Debug, Clone, Eq, PartialEq)]
struct DeadlineEntry {
    deadline: Instant,
    generation: u64,
}

impl Ord for DeadlineEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.generation.cmp(&self.generation))
    }
}

impl PartialOrd for DeadlineEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
pub(crate) struct DeadlineHeap {
    heap: BinaryHeap<DeadlineEntry>,
    pending: HashMap<u64, Resolver<()>>,
    next_generation: u64,
}

impl DeadlineHeap {
    pub(crate) fn insert(&mut self, deadline: Instant, resolver: Resolver<()>) -> TimerKey {
        let generation = self.next_generation;
        self.next_generation += 1;
        self.heap.push(DeadlineEntry {
            deadline,
            generation,
        });
        self.pending.insert(generation, resolver);
        TimerKey(generation)
    }

    pub(crate) fn cancel(&mut self, key: TimerKey) -> bool {
        self.pending.remove(&key.0).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    /// Earliest live deadline; cancelled entries on top are discarded.
    pub(crate) fn peek_deadline(&mut self) -> Option<Instant> {
        while let Some(entry) = self.heap.peek() {
            if self.pending.contains_key(&entry.generation) {
                return Some(entry.deadline);
            }
            self.heap.pop();
        }
        None
    }

    /// Removes and returns the resolvers due at `now`.
    pub(crate) fn pop_expired(&mut self, now: Instant) -> Vec<Resolver<()>> {
        let mut expired = Vec::new();
        while let Some(entry) = self.heap.peek() {
            if entry.deadline > now {
                break;
            }
            let generation = entry.generation;
            self.heap.pop();
            expired.extend(self.pending.remove(&generation));
        }
        expired
    }

    pub(crate) fn drain(&mut self) -> Vec<Resolver<()>> {
        self.heap.clear();
        self.pending.drain().map(|(_, resolver)| resolver).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::promise::Promise;
    use std::time::Duration;

    #[test]
    fn expires_in_deadline_order_and_skips_cancelled() {
        crate::test_utils::init_test_logging();
        crate::test_phase!("expires_in_deadline_order_and_skips_cancelled");
        let start = Instant::now();
        let mut heap = DeadlineHeap::default();
        let (late, late_resolver) = Promise::<()>::pending();
        let (early, early_resolver) = Promise::<()>::pending();
        let (gone, gone_resolver) = Promise::<()>::pending();
        heap.insert(start + Duration::from_millis(30), late_resolver);
        heap.insert(start + Duration::from_millis(10), early_resolver);
        let cancelled = heap.insert(start + Duration::from_millis(5), gone_resolver);
        crate::assert_with_log!(heap.cancel(cancelled), "cancel", true, false);
        crate::assert_with_log!(!heap.cancel(cancelled), "cancel twice", false, true);

        let next = heap.peek_deadline();
        let expected = Some(start + Duration::from_millis(10));
        crate::assert_with_log!(next == expected, "next deadline", expected, next);

        for resolver in heap.pop_expired(start + Duration::from_millis(20)) {
            resolver.success(());
        }
        crate::assert_with_log!(early.is_resolved(), "early fired", true, early);
        crate::assert_with_log!(!late.is_resolved(), "late waits", false, late);
        crate::assert_with_log!(!gone.is_resolved(), "cancelled stays", false, gone);
        crate::assert_with_log!(heap.len() == 1, "pending", 1, heap.len());
        crate::test_complete!("expires_in_deadline_order_and_skips_cancelled");
    }
}
