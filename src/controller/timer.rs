//! Deadline-ordered timers for the controller loop

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

use crate::measurement::MeasurementStep;

/// Work the controller schedules for itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timer {
    /// Continuation of a measurement run
    Measurement { generation: u64, step: MeasurementStep },
    /// Recurring-session supervisor
    SessionTick,
    /// Periodic `getDeviceStatus`
    StatusQuery,
}

#[derive(Debug)]
struct Entry {
    deadline: Instant,
    seq: u64,
    timer: Timer,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // Reversed so the heap pops the earliest deadline; ties go to insertion order
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Min-heap of pending timers
#[derive(Debug, Default)]
pub struct TimerQueue {
    heap: BinaryHeap<Entry>,
    seq: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule_at(&mut self, deadline: Instant, timer: Timer) {
        self.seq += 1;
        self.heap.push(Entry {
            deadline,
            seq: self.seq,
            timer,
        });
    }

    pub fn schedule_after(&mut self, delay: Duration, timer: Timer) {
        self.schedule_at(Instant::now() + delay, timer);
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|e| e.deadline)
    }

    /// Pop the earliest timer whose deadline has passed
    pub fn pop_due(&mut self, now: Instant) -> Option<Timer> {
        if self.heap.peek()?.deadline <= now {
            self.heap.pop().map(|e| e.timer)
        } else {
            None
        }
    }

    /// Drop every pending timer of `kind`
    pub fn cancel(&mut self, kind: Timer) {
        self.heap.retain(|e| e.timer != kind);
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pops_in_deadline_order() {
        let t0 = Instant::now();
        let mut timers = TimerQueue::new();
        timers.schedule_at(t0 + Duration::from_millis(30), Timer::StatusQuery);
        timers.schedule_at(t0 + Duration::from_millis(10), Timer::SessionTick);
        timers.schedule_at(
            t0 + Duration::from_millis(10),
            Timer::Measurement {
                generation: 1,
                step: MeasurementStep::Poll,
            },
        );

        assert_eq!(timers.next_deadline(), Some(t0 + Duration::from_millis(10)));
        assert_eq!(timers.pop_due(t0), None);

        let later = t0 + Duration::from_millis(50);
        assert_eq!(timers.pop_due(later), Some(Timer::SessionTick));
        assert!(matches!(
            timers.pop_due(later),
            Some(Timer::Measurement { generation: 1, .. })
        ));
        assert_eq!(timers.pop_due(later), Some(Timer::StatusQuery));
        assert!(timers.is_empty());
    }

    #[test]
    fn test_cancel_by_kind() {
        let mut timers = TimerQueue::new();
        timers.schedule_after(Duration::ZERO, Timer::SessionTick);
        timers.schedule_after(Duration::ZERO, Timer::StatusQuery);
        timers.cancel(Timer::SessionTick);
        assert_eq!(timers.len(), 1);
        assert_eq!(
            timers.pop_due(Instant::now() + Duration::from_millis(1)),
            Some(Timer::StatusQuery)
        );
    }
}
