//! # Frame Time
//!
//! Scene time advances only through [`Context::tick`](crate::Context::tick),
//! so a context driven with fixed deltas is fully deterministic.

/// Clock of one context.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Time {
    time: f64,
    delta_time: f32,
    frame: u64,
}

impl Time {
    /// Seconds of scene time since the context was created.
    #[inline]
    #[must_use]
    pub const fn time(&self) -> f64 {
        self.time
    }

    /// Clamped delta of the current frame, in seconds.
    #[inline]
    #[must_use]
    pub const fn delta_time(&self) -> f32 {
        self.delta_time
    }

    /// Current frame number. The first tick is frame 1.
    #[inline]
    #[must_use]
    pub const fn frame(&self) -> u64 {
        self.frame
    }

    /// Scene time in milliseconds.
    #[must_use]
    pub fn time_ms(&self) -> f64 {
        self.time * 1000.0
    }

    pub(crate) fn advance(&mut self, delta: f32) {
        self.delta_time = delta;
        self.time += f64::from(delta);
        self.frame += 1;
    }
}

/// Timing and load figures of a single tick.
#[derive(Clone, Copy, Debug, Default)]
pub struct FrameStats {
    /// Frame number.
    pub frame: u64,
    /// Wall-clock duration of the tick in microseconds.
    pub total_us: u64,
    /// Behaviours receiving frame hooks at the end of the tick.
    pub behaviours: usize,
    /// Live coroutines at the end of the tick.
    pub coroutines: usize,
}
