//! Per-Chain playback cursors and the fire-window rule.
//!
//! Each Chain keeps the wrapped position seen on the previous tick. A Step
//! fires when its start lies in the window crossed since then: `[cursor,
//! position)`, or `[cursor, total) ∪ [0, position)` once the Chain wraps.
//! A cursor of [`BEFORE_START`] makes the first window begin at zero.

use crate::dsl::ast::Chain;

use super::transport::wrap_position;

/// Cursor value before the first tick, earlier than any real position.
pub const BEFORE_START: i64 = -1;

/// One wrapping microsecond cursor per Chain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Timeline {
    cursors: Vec<i64>,
}

impl Timeline {
    /// `chains` cursors, all before the start.
    pub fn new(chains: usize) -> Self {
        Self {
            cursors: vec![BEFORE_START; chains],
        }
    }

    /// Rewind every cursor.
    pub fn reset(&mut self) {
        self.cursors.fill(BEFORE_START);
    }

    /// Cursors for a program with `chains` Chains, keeping positions by index.
    pub fn carried_over(&self, chains: usize) -> Self {
        let mut cursors = vec![BEFORE_START; chains];
        let shared = chains.min(self.cursors.len());
        cursors[..shared].copy_from_slice(&self.cursors[..shared]);
        Self { cursors }
    }

    /// Fold cursors that lie past their Chain's end back into it.
    ///
    /// `elapsed` is the transport time of the last tick; with none the cursor
    /// rewinds to the start.
    pub fn refit(&mut self, chains: &[Chain], elapsed: Option<u64>) {
        for (cursor, chain) in self.cursors.iter_mut().zip(chains) {
            if chain.micros_total == 0 || *cursor < chain.micros_total as i64 {
                continue;
            }
            *cursor = match elapsed {
                Some(elapsed) => wrap_position(elapsed, chain.micros_total) as i64,
                None => BEFORE_START,
            };
        }
    }

    pub fn cursors(&self) -> &[i64] {
        &self.cursors
    }

    pub fn len(&self) -> usize {
        self.cursors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty()
    }

    /// Move Chain `index` to `elapsed` and return the Steps to fire, in order.
    pub fn advance(&mut self, index: usize, chain: &Chain, elapsed: u64) -> Vec<usize> {
        let Some(cursor) = self.cursors.get_mut(index) else {
            return Vec::new();
        };
        if chain.steps.is_empty() || chain.micros_total == 0 {
            return Vec::new();
        }
        if *cursor >= chain.micros_total as i64 {
            *cursor = wrap_position(*cursor as u64, chain.micros_total) as i64;
        }
        let position = wrap_position(elapsed, chain.micros_total);
        let fired = steps_in_window(chain, *cursor, position);
        *cursor = position as i64;
        fired
    }
}

/// Indexes of Steps starting in the window from `cursor` up to `position`.
pub fn steps_in_window(chain: &Chain, cursor: i64, position: u64) -> Vec<usize> {
    let starts = chain.steps.iter().map(|s| s.time_start_micros);
    if cursor < 0 || position >= cursor as u64 {
        let from = cursor.max(0) as u64;
        return starts
            .enumerate()
            .filter(|(_, start)| (from..position).contains(start))
            .map(|(i, _)| i)
            .collect();
    }

    let cursor = cursor as u64;
    let (tail, head): (Vec<_>, Vec<_>) = starts
        .enumerate()
        .filter(|(_, start)| *start >= cursor || *start < position)
        .partition(|(_, start)| *start >= cursor);
    tail.into_iter().chain(head).map(|(i, _)| i).collect()
}
