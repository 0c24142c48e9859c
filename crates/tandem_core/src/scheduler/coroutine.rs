//! # Coroutines
//!
//! A coroutine is a task object polled once per matching frame event. Each
//! call to [`Coroutine::resume`] runs one step and reports what to do next:
//!
//! - [`CoroutineStep::Yield`]: resume on the next matching event
//! - [`CoroutineStep::Wait`]: resume once the [`WaitCondition`] holds
//! - [`CoroutineStep::Done`]: the task is finished
//!
//! Waiting on a nested coroutine runs it to completion before the parent is
//! resumed again.

use super::FrameEvent;
use crate::context::Context;
use crate::error::BehaviourError;
use std::fmt;

/// Outcome of one coroutine step.
pub enum CoroutineStep {
    /// Suspend until the next matching frame event.
    Yield,
    /// Suspend until the condition holds. Checked on each matching event.
    Wait(WaitCondition),
    /// The coroutine is finished.
    Done,
}

impl fmt::Debug for CoroutineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Yield => f.write_str("Yield"),
            Self::Wait(condition) => f.debug_tuple("Wait").field(condition).finish(),
            Self::Done => f.write_str("Done"),
        }
    }
}

/// Suspension condition.
pub enum WaitCondition {
    /// Elapsed scene time, in seconds.
    Seconds(f32),
    /// Number of frames.
    Frames(u32),
    /// Custom predicate over the context.
    Until(Box<dyn FnMut(&Context) -> bool>),
    /// A nested coroutine, run until it completes.
    Routine(Box<dyn Coroutine>),
}

impl fmt::Debug for WaitCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Seconds(s) => write!(f, "Seconds({s})"),
            Self::Frames(n) => write!(f, "Frames({n})"),
            Self::Until(_) => f.write_str("Until(..)"),
            Self::Routine(_) => f.write_str("Routine(..)"),
        }
    }
}

/// Resumable cooperative task.
pub trait Coroutine {
    /// Runs one step of the task.
    fn resume(&mut self, cx: &mut Context, event: FrameEvent) -> Result<CoroutineStep, BehaviourError>;
}

/// Coroutine backed by a closure called once per step.
pub struct FnCoroutine<F>(F);

impl<F> Coroutine for FnCoroutine<F>
where
    F: FnMut(&mut Context, FrameEvent) -> Result<CoroutineStep, BehaviourError>,
{
    fn resume(&mut self, cx: &mut Context, event: FrameEvent) -> Result<CoroutineStep, BehaviourError> {
        (self.0)(cx, event)
    }
}

/// Wraps a step closure as a coroutine.
pub fn from_fn<F>(step: F) -> FnCoroutine<F>
where
    F: FnMut(&mut Context, FrameEvent) -> Result<CoroutineStep, BehaviourError>,
{
    FnCoroutine(step)
}

/// Coroutine that finishes after a delay.
#[derive(Clone, Copy, Debug)]
pub struct WaitForSeconds {
    seconds: f32,
    waited: bool,
}

impl WaitForSeconds {
    /// Waits `seconds` of scene time.
    #[must_use]
    pub const fn new(seconds: f32) -> Self {
        Self { seconds, waited: false }
    }
}

impl Coroutine for WaitForSeconds {
    fn resume(&mut self, _cx: &mut Context, _event: FrameEvent) -> Result<CoroutineStep, BehaviourError> {
        if std::mem::replace(&mut self.waited, true) {
            Ok(CoroutineStep::Done)
        } else {
            Ok(CoroutineStep::Wait(WaitCondition::Seconds(self.seconds)))
        }
    }
}

/// Coroutine that finishes after a number of frames.
#[derive(Clone, Copy, Debug)]
pub struct WaitForFrames {
    frames: u32,
    waited: bool,
}

impl WaitForFrames {
    /// Waits `frames` frames.
    #[must_use]
    pub const fn new(frames: u32) -> Self {
        Self { frames, waited: false }
    }
}

impl Coroutine for WaitForFrames {
    fn resume(&mut self, _cx: &mut Context, _event: FrameEvent) -> Result<CoroutineStep, BehaviourError> {
        if std::mem::replace(&mut self.waited, true) {
            Ok(CoroutineStep::Done)
        } else {
            Ok(CoroutineStep::Wait(WaitCondition::Frames(self.frames)))
        }
    }
}

/// Runs coroutines one after another.
pub struct Sequence {
    steps: std::collections::VecDeque<Box<dyn Coroutine>>,
}

impl Sequence {
    /// Creates an empty sequence.
    #[must_use]
    pub fn new() -> Self {
        Self { steps: std::collections::VecDeque::new() }
    }

    /// Appends a coroutine.
    #[must_use]
    pub fn then(mut self, routine: impl Coroutine + 'static) -> Self {
        self.steps.push_back(Box::new(routine));
        self
    }
}

impl Default for Sequence {
    fn default() -> Self {
        Self::new()
    }
}

impl Coroutine for Sequence {
    fn resume(&mut self, _cx: &mut Context, _event: FrameEvent) -> Result<CoroutineStep, BehaviourError> {
        match self.steps.pop_front() {
            Some(next) => Ok(CoroutineStep::Wait(WaitCondition::Routine(next))),
            None => Ok(CoroutineStep::Done),
        }
    }
}
