//! Transport state: play/stop control and elapsed playback time.
//!
//! Time comes from a [`Clock`] so the scheduler can run against wall time in
//! the binary and against a hand-driven clock in tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Playback state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayState {
    Stopped,
    Playing,
}

/// A monotonic microsecond time source.
pub trait Clock: Send + Sync {
    fn now_micros(&self) -> u64;
}

/// Wall-clock time since the clock was created.
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_micros(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, micros: u64) {
        self.now.store(micros, Ordering::SeqCst);
    }

    pub fn advance(&self, micros: u64) {
        self.now.fetch_add(micros, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_micros(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Play state plus the clock reading playback started at.
#[derive(Debug)]
pub struct Transport {
    state: PlayState,
    started_at: u64,
}

impl Transport {
    /// Create a new transport in the stopped state.
    pub fn new() -> Self {
        Self {
            state: PlayState::Stopped,
            started_at: 0,
        }
    }

    /// Start playback at clock time `now`.
    pub fn play(&mut self, now: u64) {
        self.state = PlayState::Playing;
        self.started_at = now;
    }

    /// Stop playback.
    pub fn stop(&mut self) {
        self.state = PlayState::Stopped;
    }

    /// Current play state.
    pub fn state(&self) -> PlayState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlayState::Playing
    }

    /// Microseconds since playback started.
    pub fn elapsed(&self, now: u64) -> u64 {
        now.saturating_sub(self.started_at)
    }
}

impl Default for Transport {
    fn default() -> Self {
        Self::new()
    }
}

/// Position inside a loop of `total` microseconds.
pub fn wrap_position(elapsed: u64, total: u64) -> u64 {
    if total == 0 {
        0
    } else {
        elapsed % total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_transport_is_stopped() {
        let t = Transport::new();
        assert_eq!(t.state(), PlayState::Stopped);
        assert!(!t.is_playing());
    }

    #[test]
    fn play_stop_cycle() {
        let mut t = Transport::new();
        t.play(100);
        assert_eq!(t.state(), PlayState::Playing);
        assert_eq!(t.elapsed(350), 250);
        t.stop();
        assert_eq!(t.state(), PlayState::Stopped);
    }

    #[test]
    fn elapsed_never_goes_negative() {
        let mut t = Transport::new();
        t.play(500);
        assert_eq!(t.elapsed(10), 0);
    }

    #[test]
    fn wraparound() {
        let total = 2_000_000;
        for k in [0, 1, 999_999, 1_999_999] {
            assert_eq!(wrap_position(total + k, total), k);
            assert_eq!(wrap_position(3 * total + k, total), k);
        }
        assert_eq!(wrap_position(123, 0), 0);
    }

    #[test]
    fn manual_clock_moves_on_request() {
        let clock = ManualClock::new();
        assert_eq!(clock.now_micros(), 0);
        clock.advance(40);
        clock.advance(2);
        assert_eq!(clock.now_micros(), 42);
        clock.set(7);
        assert_eq!(clock.now_micros(), 7);
    }

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now_micros();
        let b = clock.now_micros();
        assert!(b >= a);
    }
}
