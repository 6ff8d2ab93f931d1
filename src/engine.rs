//! Step cadence and dispatch-health bookkeeping.
//!
//! The display runs at the host's refresh rate; the simulation advances
//! on its own slower cadence. [`StepClock`] decides, per display tick,
//! whether a step is due and exposes the interpolation fraction the
//! compositor uses to blend between generations in the frames between
//! steps.

/// Consecutive dispatch failures before the pipeline reports itself
/// degraded (visibly frozen but still retrying).
pub const DEGRADED_AFTER: u32 = 30;

/// Inverse-speed step scheduler. `wait_frames` is the number of display
/// ticks between simulation steps, read directly from the stored
/// configuration value.
#[derive(Debug)]
pub struct StepClock {
    wait_frames: i32,
    frames_left: i32,
    update_counter: u32,
    session_seed: u32,
}

impl StepClock {
    /// `session_seed` offsets the counter handed to the kernels so
    /// repeated runs diverge visually; derive it from process start time.
    pub fn new(session_seed: u32) -> Self {
        Self {
            wait_frames: 1,
            frames_left: 0,
            update_counter: 0,
            session_seed,
        }
    }

    /// Adopt a new wait count. Any partial progress toward the next step
    /// is discarded so the new cadence takes effect immediately.
    pub fn retune(&mut self, wait_frames: i32) {
        if wait_frames != self.wait_frames {
            self.wait_frames = wait_frames;
            self.frames_left = 0;
        }
    }

    /// Clear in-flight interpolation state, e.g. after a grid resize.
    pub fn reset_phase(&mut self) {
        self.frames_left = 0;
    }

    /// Advance one display tick. Returns true when a simulation step is
    /// due this tick; the update counter has then already advanced.
    pub fn tick(&mut self) -> bool {
        if self.frames_left > 1 {
            self.frames_left -= 1;
            return false;
        }
        self.frames_left = self.wait_frames;
        self.update_counter = self.update_counter.wrapping_add(1);
        true
    }

    /// How far between the last committed step and the next one this
    /// display tick falls, in [0, 1]. Exactly 0 right after a step.
    pub fn interpolation(&self) -> f32 {
        if self.wait_frames <= 0 {
            return 1.0;
        }
        1.0 - (self.frames_left as f32 / self.wait_frames as f32).clamp(0.0, 1.0)
    }

    pub fn update_counter(&self) -> u32 {
        self.update_counter
    }

    /// Counter offset by the per-session seed, as passed to the kernels.
    pub fn seeded_counter(&self) -> u32 {
        self.update_counter.wrapping_add(self.session_seed)
    }
}

/// Tracks runs of kernel-dispatch failures. A single failed tick is
/// skipped silently; a long run flips the pipeline into a degraded state
/// that recovers on the next success.
#[derive(Debug, Default)]
pub struct DispatchHealth {
    consecutive_failures: u32,
    degraded: bool,
}

impl DispatchHealth {
    /// Record a failed dispatch. Returns true when this failure is the
    /// one that enters the degraded state.
    pub fn failure(&mut self) -> bool {
        self.consecutive_failures += 1;
        if !self.degraded && self.consecutive_failures >= DEGRADED_AFTER {
            self.degraded = true;
            return true;
        }
        false
    }

    /// Record a successful dispatch. Returns true when it recovers a
    /// previously degraded pipeline.
    pub fn success(&mut self) -> bool {
        self.consecutive_failures = 0;
        std::mem::take(&mut self.degraded)
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_exactly_once_per_wait_period() {
        for wait in [1, 2, 3, 7, 25] {
            let mut clock = StepClock::new(0);
            clock.retune(wait);
            // Settle past the initial immediate step.
            clock.tick();
            let before = clock.update_counter();
            let mut steps = 0;
            let ticks = wait * 10;
            for _ in 0..ticks {
                if clock.tick() {
                    steps += 1;
                }
            }
            assert_eq!(steps, 10, "wait={wait}");
            assert_eq!(clock.update_counter() - before, 10, "wait={wait}");
        }
    }

    #[test]
    fn interpolation_stays_in_unit_range() {
        let mut clock = StepClock::new(0);
        clock.retune(5);
        for _ in 0..40 {
            clock.tick();
            let frac = clock.interpolation();
            assert!((0.0..=1.0).contains(&frac), "frac={frac}");
        }
    }

    #[test]
    fn interpolation_is_zero_right_after_a_step_and_rises() {
        let mut clock = StepClock::new(0);
        clock.retune(4);
        assert!(clock.tick());
        assert_eq!(clock.interpolation(), 0.0);

        let mut last = 0.0;
        while !clock.tick() {
            let frac = clock.interpolation();
            assert!(frac >= last);
            last = frac;
        }
        // The tick just before the step saw the largest fraction.
        assert!(last > 0.5);
        assert_eq!(clock.interpolation(), 0.0);
    }

    #[test]
    fn retune_resets_partial_progress() {
        let mut clock = StepClock::new(0);
        clock.retune(10);
        clock.tick();
        clock.tick();
        clock.retune(3);
        // No partial-step carry-over: the next tick steps immediately.
        assert!(clock.tick());
    }

    #[test]
    fn retune_to_same_wait_keeps_phase() {
        let mut clock = StepClock::new(0);
        clock.retune(5);
        clock.tick();
        clock.tick();
        clock.retune(5);
        assert!(!clock.tick());
    }

    #[test]
    fn reset_phase_forces_an_immediate_step() {
        let mut clock = StepClock::new(0);
        clock.retune(30);
        clock.tick();
        clock.reset_phase();
        assert!(clock.tick());
    }

    #[test]
    fn counter_wraps_and_carries_the_session_seed() {
        let mut clock = StepClock::new(9999);
        clock.retune(0);
        assert!(clock.tick());
        assert_eq!(clock.update_counter(), 1);
        assert_eq!(clock.seeded_counter(), 10000);

        let mut near_wrap = StepClock::new(u32::MAX);
        near_wrap.retune(0);
        near_wrap.tick();
        assert_eq!(near_wrap.seeded_counter(), 0);
    }

    #[test]
    fn zero_wait_steps_every_tick() {
        let mut clock = StepClock::new(0);
        clock.retune(0);
        for _ in 0..5 {
            assert!(clock.tick());
        }
        assert_eq!(clock.interpolation(), 1.0);
    }

    #[test]
    fn health_degrades_after_a_run_and_recovers_once() {
        let mut health = DispatchHealth::default();
        for _ in 0..DEGRADED_AFTER - 1 {
            assert!(!health.failure());
        }
        assert!(health.failure());
        assert!(health.is_degraded());
        // Further failures do not re-announce.
        assert!(!health.failure());
        assert!(health.success());
        assert!(!health.is_degraded());
        assert!(!health.success());
    }

    #[test]
    fn isolated_failures_do_not_degrade() {
        let mut health = DispatchHealth::default();
        for _ in 0..100 {
            assert!(!health.failure());
            health.success();
        }
        assert!(!health.is_degraded());
    }
}
