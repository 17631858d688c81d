//! Fixed-rate frame pacing.
//!
//! ## Phases
//!
//! ```text
//! FrameStart ─► Work ─► SleepCoarse ─► SpinFine ─► Flip ─► FrameStart
//!                  │                                  ▲
//!                  └──── work overran the target ─────┘
//! ```
//!
//! A frame is measured flip to flip. The coarse sleep stops `sleep_margin`
//! short of the deadline and the spin covers the rest, so an OS sleep that
//! overshoots by a little does not push the flip late.

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, warn};

use super::clock::FrameClock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FramePhase {
    FrameStart,
    Work,
    SleepCoarse,
    SpinFine,
    Flip,
}

/// Timing summary of one finished frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameReport {
    pub frame_index: u64,
    /// Time from the previous flip to the end of the work phase.
    pub work: Duration,
    pub slept: Duration,
    pub spun: Duration,
    /// Time from the previous flip to the moment the flip may happen.
    pub frame_time: Duration,
    pub missed_deadline: bool,
}

pub struct FrameScheduler<C: FrameClock> {
    clock: C,
    target_frame: Duration,
    sleep_margin: Duration,
    phase: FramePhase,
    last_flip: Instant,
    frame_index: u64,
    missed_deadlines: u64,
}

impl<C: FrameClock> FrameScheduler<C> {
    /// The first frame starts now.
    pub fn new(clock: C, target_frame: Duration, sleep_margin: Duration) -> Self {
        let last_flip = clock.now();
        Self {
            clock,
            target_frame,
            sleep_margin,
            phase: FramePhase::FrameStart,
            last_flip,
            frame_index: 0,
            missed_deadlines: 0,
        }
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn target_frame_duration(&self) -> Duration {
        self.target_frame
    }

    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn missed_deadlines(&self) -> u64 {
        self.missed_deadlines
    }

    pub fn last_flip(&self) -> Instant {
        self.last_flip
    }

    /// Wall-clock time elapsed since the last recorded flip.
    pub fn since_flip(&self) -> Duration {
        self.clock.now().saturating_duration_since(self.last_flip)
    }

    /// Enter the work phase. Returns the time already elapsed since the
    /// last flip, which feeds the bytes-until-flip projection.
    pub fn begin_frame(&mut self) -> Duration {
        debug_assert_eq!(self.phase, FramePhase::FrameStart);
        self.phase = FramePhase::Work;
        self.since_flip()
    }

    /// Consume whatever is left of the frame: coarse sleep, then spin.
    ///
    /// When the work alone used up the frame, both waits are skipped and the
    /// report carries `missed_deadline`.
    pub fn finish_frame(&mut self) -> FrameReport {
        let deadline = self.last_flip + self.target_frame;
        let work = self.since_flip();

        let mut report = FrameReport {
            frame_index: self.frame_index,
            work,
            slept: Duration::ZERO,
            spun: Duration::ZERO,
            frame_time: work,
            missed_deadline: false,
        };

        if work > self.target_frame {
            self.missed_deadlines += 1;
            report.missed_deadline = true;
            warn!(
                frame = self.frame_index,
                work_ms = work.as_secs_f64() * 1000.0,
                target_ms = self.target_frame.as_secs_f64() * 1000.0,
                "missed frame deadline"
            );
            self.phase = FramePhase::Flip;
            return report;
        }

        self.phase = FramePhase::SleepCoarse;
        let remaining = self.target_frame - work;
        if remaining > self.sleep_margin {
            let before = self.clock.now();
            self.clock.sleep(remaining - self.sleep_margin);
            report.slept = self.clock.now().saturating_duration_since(before);
        }

        self.phase = FramePhase::SpinFine;
        let before = self.clock.now();
        if before > deadline {
            debug!(
                frame = self.frame_index,
                late_us = (before - deadline).as_micros() as u64,
                "coarse sleep overshot the frame"
            );
        } else {
            self.clock.spin_until(deadline);
            report.spun = self.clock.now().saturating_duration_since(before);
        }

        report.frame_time = self.since_flip();
        self.phase = FramePhase::Flip;
        report
    }

    /// Mark the flip that ends the current frame and start the next one.
    pub fn record_flip(&mut self) -> Instant {
        self.last_flip = self.clock.now();
        self.frame_index += 1;
        self.phase = FramePhase::FrameStart;
        self.last_flip
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::ManualClock;

    const FRAME: Duration = Duration::from_millis(33);
    const MARGIN: Duration = Duration::from_millis(1);

    fn scheduler() -> (FrameScheduler<ManualClock>, ManualClock) {
        let clock = ManualClock::new();
        (FrameScheduler::new(clock.clone(), FRAME, MARGIN), clock)
    }

    #[test]
    fn short_work_sleeps_then_spins_to_the_deadline() {
        let (mut sched, clock) = scheduler();
        assert_eq!(sched.begin_frame(), Duration::ZERO);
        assert_eq!(sched.phase(), FramePhase::Work);

        clock.advance(Duration::from_millis(10));
        let report = sched.finish_frame();

        assert!(!report.missed_deadline);
        assert_eq!(report.work, Duration::from_millis(10));
        assert_eq!(report.slept, Duration::from_millis(22));
        assert_eq!(report.spun, Duration::from_millis(1));
        assert_eq!(report.frame_time, FRAME);
        assert_eq!(sched.phase(), FramePhase::Flip);
    }

    #[test]
    fn overrun_skips_sleep_and_spin() {
        let (mut sched, clock) = scheduler();
        sched.begin_frame();
        clock.advance(Duration::from_millis(40));
        let report = sched.finish_frame();

        assert!(report.missed_deadline);
        assert_eq!(report.slept, Duration::ZERO);
        assert_eq!(report.spun, Duration::ZERO);
        assert_eq!(clock.total_slept(), Duration::ZERO);
        assert_eq!(sched.missed_deadlines(), 1);
    }

    #[test]
    fn remaining_time_inside_margin_is_only_spun() {
        let (mut sched, clock) = scheduler();
        sched.begin_frame();
        clock.advance(Duration::from_micros(32_500));
        let report = sched.finish_frame();

        assert_eq!(report.slept, Duration::ZERO);
        assert_eq!(report.spun, Duration::from_micros(500));
        assert_eq!(report.frame_time, FRAME);
    }

    #[test]
    fn oversleep_past_the_deadline_skips_the_spin() {
        let (mut sched, clock) = scheduler();
        clock.set_oversleep(Duration::from_millis(3));
        sched.begin_frame();
        clock.advance(Duration::from_millis(5));
        let report = sched.finish_frame();

        assert!(!report.missed_deadline);
        assert_eq!(report.spun, Duration::ZERO);
        assert_eq!(report.frame_time, Duration::from_millis(35));
    }

    #[test]
    fn flips_advance_the_frame_reference() {
        let (mut sched, clock) = scheduler();
        for expected in 0..3u64 {
            assert_eq!(sched.frame_index(), expected);
            sched.begin_frame();
            clock.advance(Duration::from_millis(4));
            sched.finish_frame();
            let flip = sched.record_flip();
            assert_eq!(flip, sched.last_flip());
            assert_eq!(sched.phase(), FramePhase::FrameStart);
        }
        assert_eq!(clock.elapsed(), FRAME * 3);
    }

    #[test]
    fn since_flip_is_measured_from_the_latest_flip() {
        let (mut sched, clock) = scheduler();
        sched.begin_frame();
        sched.finish_frame();
        sched.record_flip();

        clock.advance(Duration::from_millis(7));
        assert_eq!(sched.begin_frame(), Duration::from_millis(7));
    }
}
