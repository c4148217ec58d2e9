//! Frame pacing for host loops.

use std::time::{Duration, Instant};

/// Tracks frame times and sleeps out the rest of a fixed frame budget.
#[derive(Debug)]
pub struct FrameClock {
    budget: Duration,
    start: Instant,
    frame_start: Instant,
    frames: u64,
}

impl FrameClock {
    /// Creates a clock targeting `fps` frames per second. Zero disables pacing.
    pub fn new(fps: u32) -> Self {
        let budget = if fps == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs(1) / fps
        };
        let now = Instant::now();
        Self {
            budget,
            start: now,
            frame_start: now,
            frames: 0,
        }
    }

    /// Time allotted to one frame.
    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Ends the current frame: sleeps until the budget is used up and
    /// returns how long the frame took, sleep included.
    pub fn end_frame(&mut self) -> Duration {
        let busy = self.frame_start.elapsed();
        if let Some(rest) = self.budget.checked_sub(busy) {
            std::thread::sleep(rest);
        }
        let now = Instant::now();
        let frame = now - self.frame_start;
        self.frame_start = now;
        self.frames += 1;
        frame
    }

    /// Frames completed so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Average rate since creation; 0.0 before the first frame.
    pub fn average_fps(&self) -> f64 {
        let secs = self.start.elapsed().as_secs_f64();
        if self.frames == 0 || secs == 0.0 {
            return 0.0;
        }
        self.frames as f64 / secs
    }
}
