//! Pending note-offs, ordered by due time.
//!
//! Each fired Step queues its note-off here instead of spawning a timer. The
//! tick loop pops whatever is due; stopping drains the rest at once.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::dsl::ast::Step;
use crate::output::Output;

/// A note-off waiting for its time.
#[derive(Debug, Clone)]
pub struct NoteOff {
    /// Elapsed playback time the note-off is due at.
    pub due: u64,
    /// Insertion order, to keep equal due times first-in first-out.
    seq: u64,
    pub step: Step,
    /// The outputs that played the note-on.
    pub outputs: Vec<Output>,
}

impl PartialEq for NoteOff {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for NoteOff {}

impl PartialOrd for NoteOff {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NoteOff {
    // reversed: BinaryHeap is a max-heap and the earliest must come out first
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Min-heap of note-offs.
#[derive(Debug, Default)]
pub struct PendingOffs {
    heap: BinaryHeap<NoteOff>,
    next_seq: u64,
}

impl PendingOffs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a note-off at `due`.
    pub fn push(&mut self, due: u64, step: Step, outputs: Vec<Output>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(NoteOff {
            due,
            seq,
            step,
            outputs,
        });
    }

    /// Remove and return every note-off due at or before `now`, earliest first.
    pub fn pop_due(&mut self, now: u64) -> Vec<NoteOff> {
        let mut due = Vec::new();
        while self.heap.peek().is_some_and(|off| off.due <= now) {
            if let Some(off) = self.heap.pop() {
                due.push(off);
            }
        }
        due
    }

    /// Remove everything, earliest first.
    pub fn drain_all(&mut self) -> Vec<NoteOff> {
        let mut all = Vec::with_capacity(self.heap.len());
        while let Some(off) = self.heap.pop() {
            all.push(off);
        }
        all
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Due time of the earliest note-off.
    pub fn next_due(&self) -> Option<u64> {
        self.heap.peek().map(|off| off.due)
    }
}

/// How long a Step's note is held: `duration × gate`, rounded.
pub fn hold_micros(step: &Step) -> u64 {
    (step.time_duration_micros as f64 * step.params.gate).round() as u64
}
