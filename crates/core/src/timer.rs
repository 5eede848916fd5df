//! Frame timer.

use std::time::{Duration, Instant};

/// Measures total run time and per-frame deltas.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    last_tick: Instant,
    frames: u64,
}

impl Timer {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_tick: now,
            frames: 0,
        }
    }

    /// Time since creation or the last [`Timer::reset`].
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn elapsed_secs(&self) -> f32 {
        self.elapsed().as_secs_f32()
    }

    /// Time since the previous tick. Counts one frame.
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let delta = now - self.last_tick;
        self.last_tick = now;
        self.frames += 1;
        delta
    }

    /// Seconds since the previous call, counting a frame.
    pub fn delta_secs(&mut self) -> f32 {
        self.tick().as_secs_f32()
    }

    /// Number of ticks since creation or reset.
    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    /// Average frames per second over the timer's lifetime.
    pub fn average_fps(&self) -> f32 {
        let secs = self.elapsed_secs();
        if secs <= f32::EPSILON {
            0.0
        } else {
            self.frames as f32 / secs
        }
    }

    pub fn reset(&mut self) {
        let now = Instant::now();
        self.start = now;
        self.last_tick = now;
        self.frames = 0;
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_counts_frames() {
        let mut timer = Timer::new();
        timer.tick();
        timer.tick();
        assert_eq!(timer.frame_count(), 2);
    }

    #[test]
    fn test_reset_clears_frames() {
        let mut timer = Timer::new();
        timer.tick();
        timer.reset();
        assert_eq!(timer.frame_count(), 0);
    }

    #[test]
    fn test_delta_is_non_negative() {
        let mut timer = Timer::new();
        std::thread::sleep(Duration::from_millis(1));
        assert!(timer.delta_secs() > 0.0);
    }
}
