use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

/// Handle returned by [`Scheduler::schedule_at`], used to cancel an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

#[derive(Debug)]
struct Entry<E> {
    due_ms: u64,
    id: TimerId,
    event: E,
}

impl<E> PartialEq for Entry<E> {
    fn eq(&self, other: &Self) -> bool {
        self.due_ms == other.due_ms && self.id == other.id
    }
}

impl<E> Eq for Entry<E> {}

impl<E> PartialOrd for Entry<E> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<E> Ord for Entry<E> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // ids are monotonic, so equal due times fire in scheduling order
        (self.due_ms, self.id).cmp(&(other.due_ms, other.id))
    }
}

/// Time-ordered queue of scheduled events driven by a single logical clock.
///
/// Nothing here reads the wall clock: callers move time forward with
/// [`pop_due`](Scheduler::pop_due) or [`advance_to`](Scheduler::advance_to),
/// which lets tests fast-forward a whole match deterministically.
#[derive(Debug)]
pub struct Scheduler<E> {
    now_ms: u64,
    next_id: u64,
    queue: BinaryHeap<Reverse<Entry<E>>>,
    cancelled: HashSet<TimerId>,
}

impl<E> Default for Scheduler<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Scheduler<E> {
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    pub fn starting_at(now_ms: u64) -> Self {
        Self {
            now_ms,
            next_id: 0,
            queue: BinaryHeap::new(),
            cancelled: HashSet::new(),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    /// Schedule `event` at an absolute time. Times in the past fire on the next pop.
    pub fn schedule_at(&mut self, due_ms: u64, event: E) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.queue.push(Reverse(Entry {
            due_ms: due_ms.max(self.now_ms),
            id,
            event,
        }));
        id
    }

    pub fn schedule_in(&mut self, delay_ms: u64, event: E) -> TimerId {
        self.schedule_at(self.now_ms.saturating_add(delay_ms), event)
    }

    /// Cancel a pending entry. Cancelling an entry that already fired is harmless.
    pub fn cancel(&mut self, id: TimerId) {
        if self.queue.iter().any(|Reverse(e)| e.id == id) {
            self.cancelled.insert(id);
        }
    }

    /// Drop every pending entry.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.cancelled.clear();
    }

    /// Number of live (not cancelled) entries.
    pub fn pending(&self) -> usize {
        self.queue
            .iter()
            .filter(|Reverse(e)| !self.cancelled.contains(&e.id))
            .count()
    }

    pub fn next_due(&mut self) -> Option<u64> {
        self.skip_cancelled();
        self.queue.peek().map(|Reverse(e)| e.due_ms)
    }

    /// Pop the earliest entry due at or before `until_ms`, moving the clock to its due time.
    pub fn pop_due(&mut self, until_ms: u64) -> Option<(u64, E)> {
        self.skip_cancelled();
        match self.queue.peek() {
            Some(Reverse(e)) if e.due_ms <= until_ms => {}
            _ => return None,
        }
        let Reverse(entry) = self.queue.pop()?;
        self.now_ms = self.now_ms.max(entry.due_ms);
        Some((entry.due_ms, entry.event))
    }

    /// Move the clock forward without firing anything. The clock never goes backwards.
    pub fn advance_to(&mut self, now_ms: u64) {
        self.now_ms = self.now_ms.max(now_ms);
    }

    fn skip_cancelled(&mut self) {
        while let Some(Reverse(e)) = self.queue.peek() {
            if !self.cancelled.remove(&e.id) {
                break;
            }
            self.queue.pop();
        }
    }
}
