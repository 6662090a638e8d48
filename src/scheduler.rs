//! Cadence scheduling for collectors.
//!
//! The host drives the monitor with ticks (one per rendered frame). The
//! scheduler decides, for each registered collector, whether it is due on
//! this tick. Event-driven collectors are never polled; they only react to
//! host signals.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// How often a collector wants to be polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// On every tick of the frame loop
    EveryFrame,
    /// At most once per interval
    Interval(Duration),
    /// Never polled; reacts to host signals only
    EventDriven,
}

#[derive(Debug)]
struct Slot {
    cadence: Cadence,
    next_due: Option<DateTime<Utc>>,
}

/// Tracks when each registered collector is next due.
#[derive(Debug, Default)]
pub struct Scheduler {
    slots: Vec<Slot>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a cadence and return its slot index.
    pub fn register(&mut self, cadence: Cadence) -> usize {
        self.slots.push(Slot {
            cadence,
            next_due: None,
        });
        self.slots.len() - 1
    }

    /// Forget all due times, e.g. when a session starts.
    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            slot.next_due = None;
        }
    }

    /// Whether the slot is due at `now`. Marks it as run if so.
    pub fn take_due(&mut self, slot: usize, now: DateTime<Utc>) -> bool {
        let Some(slot) = self.slots.get_mut(slot) else {
            return false;
        };

        match slot.cadence {
            Cadence::EveryFrame => true,
            Cadence::EventDriven => false,
            Cadence::Interval(interval) => {
                let due = slot.next_due.map(|next| now >= next).unwrap_or(true);
                if due {
                    let step = chrono::Duration::from_std(interval)
                        .unwrap_or_else(|_| chrono::Duration::seconds(1));
                    slot.next_due = Some(now + step);
                }
                due
            }
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
