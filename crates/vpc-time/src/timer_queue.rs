use std::collections::{BTreeMap, HashMap};

/// Handle returned by [`TimerQueue::schedule`], used for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerEvent<T> {
    pub id: TimerId,
    pub deadline_ns: u64,
    pub payload: T,
}

/// One-shot timers ordered by deadline.
///
/// Timers sharing a deadline fire in scheduling order. Popping an event removes it before the
/// caller handles it, so handlers are free to schedule follow-ups on the same queue.
#[derive(Debug)]
pub struct TimerQueue<T> {
    next_id: u64,
    by_deadline: BTreeMap<(u64, TimerId), T>,
    deadlines: HashMap<TimerId, u64>,
}

impl<T> TimerQueue<T> {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            by_deadline: BTreeMap::new(),
            deadlines: HashMap::new(),
        }
    }

    pub fn schedule(&mut self, deadline_ns: u64, payload: T) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.by_deadline.insert((deadline_ns, id), payload);
        self.deadlines.insert(id, deadline_ns);
        id
    }

    /// Returns `false` when the timer already fired or was cancelled.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        match self.deadlines.remove(&id) {
            Some(deadline) => self.by_deadline.remove(&(deadline, id)).is_some(),
            None => false,
        }
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.by_deadline.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Remove and return the earliest timer due at or before `now_ns`.
    pub fn pop_due(&mut self, now_ns: u64) -> Option<TimerEvent<T>> {
        let (&(deadline_ns, id), _) = self.by_deadline.iter().next()?;
        if deadline_ns > now_ns {
            return None;
        }
        let payload = self.by_deadline.remove(&(deadline_ns, id))?;
        self.deadlines.remove(&id);
        Some(TimerEvent {
            id,
            deadline_ns,
            payload,
        })
    }

    pub fn len(&self) -> usize {
        self.by_deadline.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_deadline.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_deadline.clear();
        self.deadlines.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &T)> {
        self.by_deadline
            .iter()
            .map(|((deadline, _), payload)| (*deadline, payload))
    }
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_in_deadline_then_fifo_order() {
        let mut q = TimerQueue::new();
        q.schedule(20, "late");
        q.schedule(10, "first");
        q.schedule(10, "second");

        assert!(q.pop_due(5).is_none());
        assert_eq!(q.pop_due(100).unwrap().payload, "first");
        assert_eq!(q.pop_due(100).unwrap().payload, "second");
        assert_eq!(q.pop_due(100).unwrap().payload, "late");
        assert!(q.is_empty());
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut q = TimerQueue::new();
        let id = q.schedule(10, ());
        assert_eq!(q.len(), 1);
        assert!(q.cancel(id));
        assert!(!q.cancel(id));
        assert!(q.pop_due(100).is_none());
    }
}
