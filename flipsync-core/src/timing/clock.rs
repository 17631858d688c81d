//! Time sources for the frame scheduler.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Monotonic clock plus the two ways of waiting the scheduler uses.
pub trait FrameClock: Send {
    fn now(&self) -> Instant;

    /// Coarse OS sleep. May overshoot.
    fn sleep(&self, duration: Duration);

    /// Busy-wait until `deadline`.
    fn spin_until(&self, deadline: Instant) {
        while self.now() < deadline {
            std::hint::spin_loop();
        }
    }
}

/// Wall clock backed by [`Instant`] and [`thread::sleep`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl FrameClock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

#[derive(Debug, Default)]
struct ManualState {
    elapsed: Duration,
    oversleep: Duration,
    slept: Duration,
    spun: Duration,
}

/// Virtual clock for deterministic tests and offline simulation.
///
/// Time only moves through [`advance`](Self::advance), `sleep`, and
/// `spin_until`. Clones share the same timeline.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    state: Arc<Mutex<ManualState>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            state: Arc::new(Mutex::new(ManualState::default())),
        }
    }

    /// Move virtual time forward, e.g. to model work done inside a frame.
    pub fn advance(&self, duration: Duration) {
        self.state.lock().elapsed += duration;
    }

    /// Virtual time since the clock was created.
    pub fn elapsed(&self) -> Duration {
        self.state.lock().elapsed
    }

    /// Every subsequent `sleep` lasts this much longer than asked.
    pub fn set_oversleep(&self, extra: Duration) {
        self.state.lock().oversleep = extra;
    }

    /// Total virtual time spent in `sleep`.
    pub fn total_slept(&self) -> Duration {
        self.state.lock().slept
    }

    /// Total virtual time spent in `spin_until`.
    pub fn total_spun(&self) -> Duration {
        self.state.lock().spun
    }
}

impl FrameClock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.state.lock().elapsed
    }

    fn sleep(&self, duration: Duration) {
        let mut state = self.state.lock();
        let actual = duration + state.oversleep;
        state.elapsed += actual;
        state.slept += actual;
    }

    fn spin_until(&self, deadline: Instant) {
        let mut state = self.state.lock();
        let target = deadline.saturating_duration_since(self.origin);
        let elapsed = state.elapsed;
        if target > elapsed {
            state.spun += target - elapsed;
            state.elapsed = target;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_moves_only_when_told() {
        let clock = ManualClock::new();
        let start = clock.now();
        assert_eq!(clock.now(), start);

        clock.advance(Duration::from_millis(5));
        assert_eq!(clock.now() - start, Duration::from_millis(5));

        clock.sleep(Duration::from_millis(10));
        assert_eq!(clock.elapsed(), Duration::from_millis(15));
        assert_eq!(clock.total_slept(), Duration::from_millis(10));
    }

    #[test]
    fn spin_never_moves_time_backwards() {
        let clock = ManualClock::new();
        let start = clock.now();
        clock.advance(Duration::from_millis(20));
        clock.spin_until(start + Duration::from_millis(10));
        assert_eq!(clock.elapsed(), Duration::from_millis(20));
        assert_eq!(clock.total_spun(), Duration::ZERO);

        clock.spin_until(start + Duration::from_millis(25));
        assert_eq!(clock.elapsed(), Duration::from_millis(25));
        assert_eq!(clock.total_spun(), Duration::from_millis(5));
    }

    #[test]
    fn clones_share_a_timeline() {
        let clock = ManualClock::new();
        let other = clock.clone();
        other.advance(Duration::from_millis(3));
        assert_eq!(clock.elapsed(), Duration::from_millis(3));
    }

    #[test]
    fn oversleep_is_applied_to_every_sleep() {
        let clock = ManualClock::new();
        clock.set_oversleep(Duration::from_millis(2));
        clock.sleep(Duration::from_millis(1));
        clock.sleep(Duration::from_millis(1));
        assert_eq!(clock.elapsed(), Duration::from_millis(6));
    }

    #[test]
    fn system_clock_spin_reaches_deadline() {
        let clock = SystemClock;
        let deadline = clock.now() + Duration::from_micros(200);
        clock.spin_until(deadline);
        assert!(clock.now() >= deadline);
    }
}
