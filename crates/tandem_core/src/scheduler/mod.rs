//! # Frame Scheduler
//!
//! Single-threaded cooperative tick driver. Each tick runs the frame events
//! in a fixed order:
//!
//! ```text
//! PreUpdate -> Update -> LateUpdate -> PreRender -> PostRender
//! ```
//!
//! Within one event, work runs in three phases:
//!
//! 1. Frame callbacks, in registration order
//! 2. The matching hook of every enabled behaviour, in enable order
//! 3. Coroutines waiting on this event, in start order
//!
//! Nothing is preempted. Callbacks, hooks and coroutines registered while an
//! event is running first execute on the next occurrence of their event.

mod coroutine;

pub use coroutine::{
    from_fn, Coroutine, CoroutineStep, FnCoroutine, Sequence, WaitCondition, WaitForFrames,
    WaitForSeconds,
};

use crate::component::LifecycleState;
use crate::context::Context;
use crate::error::HookResult;
use crate::lifecycle::Hook;
use crate::scene::ComponentId;
use std::collections::HashSet;
use tracing::{debug, trace};

/// Named phase of a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FrameEvent {
    /// Before update. Network input is dispatched here.
    PreUpdate,
    /// Main update.
    Update,
    /// After every update has run.
    LateUpdate,
    /// Before the frame is rendered.
    PreRender,
    /// After the frame is rendered. Batched network output is flushed here.
    PostRender,
}

impl FrameEvent {
    /// Events in execution order.
    pub const ORDER: [Self; 5] = [
        Self::PreUpdate,
        Self::Update,
        Self::LateUpdate,
        Self::PreRender,
        Self::PostRender,
    ];

    const fn index(self) -> usize {
        self as usize
    }
}

/// Handle to a registered frame callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

/// Handle to a running coroutine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CoroutineId(u64);

/// Callback invoked once per occurrence of its frame event.
pub type FrameCallback = Box<dyn FnMut(&mut Context) -> HookResult>;

struct CallbackEntry {
    id: CallbackId,
    callback: FrameCallback,
}

enum PendingWait {
    Until(f64),
    Frame(u64),
    Predicate(Box<dyn FnMut(&Context) -> bool>),
}

impl PendingWait {
    fn is_ready(&mut self, cx: &Context) -> bool {
        match self {
            Self::Until(time) => cx.time().time() >= *time,
            Self::Frame(frame) => cx.time().frame() >= *frame,
            Self::Predicate(predicate) => predicate(cx),
        }
    }
}

struct Task {
    id: CoroutineId,
    owner: Option<ComponentId>,
    event: FrameEvent,
    /// Innermost running coroutine last.
    stack: Vec<Box<dyn Coroutine>>,
    wait: Option<PendingWait>,
}

enum TaskState {
    Suspended,
    Finished,
}

/// Per-context scheduling state.
#[derive(Default)]
pub struct Scheduler {
    /// Enabled behaviours in the order they were enabled.
    pub(crate) behaviours: Vec<ComponentId>,
    callbacks: [Vec<CallbackEntry>; 5],
    removed_callbacks: HashSet<CallbackId>,
    next_callback: u64,
    tasks: Vec<Task>,
    cancelled_tasks: HashSet<CoroutineId>,
    next_task: u64,
}

impl Scheduler {
    /// Number of enabled behaviours receiving frame hooks
    #[must_use]
    pub fn behaviour_count(&self) -> usize {
        self.behaviours.len()
    }

    /// Number of live coroutines, excluding any currently being resumed
    #[must_use]
    pub fn coroutine_count(&self) -> usize {
        self.tasks.len()
    }

    /// Number of registered frame callbacks, excluding the running event
    #[must_use]
    pub fn callback_count(&self) -> usize {
        self.callbacks.iter().map(Vec::len).sum()
    }

    pub(crate) fn enable(&mut self, id: ComponentId) {
        if !self.behaviours.contains(&id) {
            self.behaviours.push(id);
        }
    }

    pub(crate) fn disable(&mut self, id: ComponentId) {
        self.behaviours.retain(|&b| b != id);
    }
}

impl Context {
    /// Registers a callback for every occurrence of `event`.
    pub fn add_frame_callback<F>(&mut self, event: FrameEvent, callback: F) -> CallbackId
    where
        F: FnMut(&mut Context) -> HookResult + 'static,
    {
        let id = CallbackId(self.scheduler.next_callback);
        self.scheduler.next_callback += 1;
        self.scheduler.callbacks[event.index()].push(CallbackEntry {
            id,
            callback: Box::new(callback),
        });
        id
    }

    /// Unregisters a frame callback. Safe to call from inside a callback.
    pub fn remove_frame_callback(&mut self, id: CallbackId) {
        self.scheduler.removed_callbacks.insert(id);
        for list in &mut self.scheduler.callbacks {
            list.retain(|entry| entry.id != id);
        }
    }

    /// Starts a coroutine resumed on `event`.
    ///
    /// An owned coroutine pauses while its owner is disabled and is cancelled
    /// when its owner is destroyed.
    pub fn start_coroutine(
        &mut self,
        owner: Option<ComponentId>,
        event: FrameEvent,
        routine: impl Coroutine + 'static,
    ) -> CoroutineId {
        let id = CoroutineId(self.scheduler.next_task);
        self.scheduler.next_task += 1;
        self.scheduler.tasks.push(Task {
            id,
            owner,
            event,
            stack: vec![Box::new(routine)],
            wait: None,
        });
        trace!(?id, ?owner, ?event, "coroutine started");
        id
    }

    /// Cancels a coroutine. Safe to call from inside a coroutine.
    pub fn stop_coroutine(&mut self, id: CoroutineId) {
        let before = self.scheduler.tasks.len();
        self.scheduler.tasks.retain(|t| t.id != id);
        if self.scheduler.tasks.len() == before {
            // Possibly mid-resume: drop it when the current pass ends
            self.scheduler.cancelled_tasks.insert(id);
        }
    }

    /// Cancels every coroutine started by `owner`.
    pub(crate) fn cancel_coroutines_of(&mut self, owner: ComponentId) {
        self.scheduler.tasks.retain(|t| t.owner != Some(owner));
    }

    /// Runs all three phases of one frame event.
    pub(crate) fn run_event(&mut self, event: FrameEvent) {
        self.run_callbacks(event);
        if event == FrameEvent::Update {
            self.run_start_hooks();
        }
        self.run_behaviours(event);
        self.run_tasks(event);
    }

    fn run_callbacks(&mut self, event: FrameEvent) {
        let index = event.index();
        let mut running = std::mem::take(&mut self.scheduler.callbacks[index]);
        for entry in &mut running {
            if self.scheduler.removed_callbacks.contains(&entry.id) {
                continue;
            }
            if let Err(error) = (entry.callback)(self) {
                self.report_error("frame callback", &format!("{event:?}"), &error);
            }
        }

        // Callbacks registered during the pass were pushed onto the fresh list
        let added = std::mem::replace(&mut self.scheduler.callbacks[index], running);
        self.scheduler.callbacks[index].extend(added);

        if !self.scheduler.removed_callbacks.is_empty() {
            let removed = std::mem::take(&mut self.scheduler.removed_callbacks);
            for list in &mut self.scheduler.callbacks {
                list.retain(|entry| !removed.contains(&entry.id));
            }
        }
    }

    fn run_start_hooks(&mut self) {
        let pending: Vec<ComponentId> = self
            .scheduler
            .behaviours
            .iter()
            .copied()
            .filter(|&id| self.scene.entry(id).is_some_and(|e| !e.started))
            .collect();
        for id in pending {
            // Disabled or destroyed by an earlier start hook this frame
            let Some(entry) = self.scene.entry_mut(id) else {
                continue;
            };
            if entry.started || entry.state != LifecycleState::Enabled {
                continue;
            }
            entry.started = true;
            self.invoke(id, Hook::Start);
        }
    }

    fn run_behaviours(&mut self, event: FrameEvent) {
        let snapshot = self.scheduler.behaviours.clone();
        for id in snapshot {
            if self.scene.is_active_and_enabled(id) {
                self.invoke(id, Hook::Frame(event));
            }
        }
    }

    fn run_tasks(&mut self, event: FrameEvent) {
        let pending = std::mem::take(&mut self.scheduler.tasks);
        let mut kept = Vec::with_capacity(pending.len());

        for mut task in pending {
            if task.event != event {
                kept.push(task);
                continue;
            }
            if self.scheduler.cancelled_tasks.remove(&task.id) {
                continue;
            }
            if let Some(owner) = task.owner {
                if !self.scene.contains_component(owner) {
                    debug!(id = ?task.id, "coroutine dropped with its owner");
                    continue;
                }
                if !self.scene.is_active_and_enabled(owner) {
                    kept.push(task);
                    continue;
                }
            }
            if let Some(wait) = task.wait.as_mut() {
                if !wait.is_ready(self) {
                    kept.push(task);
                    continue;
                }
                task.wait = None;
            }
            match self.step_task(&mut task, event) {
                TaskState::Suspended => kept.push(task),
                TaskState::Finished => trace!(id = ?task.id, "coroutine finished"),
            }
        }

        // Coroutines started during the pass were pushed onto the fresh list
        let started = std::mem::replace(&mut self.scheduler.tasks, kept);
        self.scheduler.tasks.extend(started);

        let cancelled = std::mem::take(&mut self.scheduler.cancelled_tasks);
        let scene = &self.scene;
        self.scheduler.tasks.retain(|t| {
            !cancelled.contains(&t.id) && t.owner.map_or(true, |o| scene.contains_component(o))
        });
    }

    fn step_task(&mut self, task: &mut Task, event: FrameEvent) -> TaskState {
        loop {
            let Some(top) = task.stack.last_mut() else {
                return TaskState::Finished;
            };
            match top.resume(self, event) {
                Ok(CoroutineStep::Yield) => return TaskState::Suspended,
                Ok(CoroutineStep::Wait(WaitCondition::Routine(nested))) => {
                    // Nested routines start right away, like a sub-call
                    task.stack.push(nested);
                }
                Ok(CoroutineStep::Wait(condition)) => {
                    task.wait = Some(self.pending_wait(condition));
                    return TaskState::Suspended;
                }
                Ok(CoroutineStep::Done) => {
                    task.stack.pop();
                    if task.stack.is_empty() {
                        return TaskState::Finished;
                    }
                }
                Err(error) => {
                    self.report_error("coroutine", &format!("{:?}", task.id), &error);
                    return TaskState::Finished;
                }
            }
        }
    }

    fn pending_wait(&self, condition: WaitCondition) -> PendingWait {
        match condition {
            WaitCondition::Seconds(seconds) => PendingWait::Until(self.time().time() + f64::from(seconds)),
            WaitCondition::Frames(frames) => PendingWait::Frame(self.time().frame() + u64::from(frames)),
            WaitCondition::Until(predicate) => PendingWait::Predicate(predicate),
            // Handled by the caller
            WaitCondition::Routine(_) => PendingWait::Frame(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BehaviourError;
    use std::cell::RefCell;
    use std::rc::Rc;

    const DT: f32 = 1.0 / 60.0;

    #[test]
    fn test_callbacks_run_in_event_order() {
        let mut cx = Context::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        for event in [FrameEvent::PostRender, FrameEvent::Update, FrameEvent::PreUpdate] {
            let log = Rc::clone(&log);
            cx.add_frame_callback(event, move |_| {
                log.borrow_mut().push(event);
                Ok(())
            });
        }
        cx.tick(DT);
        assert_eq!(
            *log.borrow(),
            vec![FrameEvent::PreUpdate, FrameEvent::Update, FrameEvent::PostRender]
        );
    }

    #[test]
    fn test_callback_removal_inside_pass() {
        let mut cx = Context::new();
        let count = Rc::new(RefCell::new(0));
        let second = Rc::new(RefCell::new(None::<CallbackId>));

        let second_ref = Rc::clone(&second);
        cx.add_frame_callback(FrameEvent::Update, move |cx| {
            if let Some(id) = second_ref.borrow_mut().take() {
                cx.remove_frame_callback(id);
            }
            Ok(())
        });
        let counter = Rc::clone(&count);
        let id = cx.add_frame_callback(FrameEvent::Update, move |_| {
            *counter.borrow_mut() += 1;
            Ok(())
        });
        *second.borrow_mut() = Some(id);

        cx.tick(DT);
        cx.tick(DT);
        assert_eq!(*count.borrow(), 0);
        assert_eq!(cx.scheduler().callback_count(), 1);
    }

    #[test]
    fn test_failing_callback_does_not_block_others() {
        let mut cx = Context::new();
        let ran = Rc::new(RefCell::new(false));
        cx.add_frame_callback(FrameEvent::Update, |_| Err(BehaviourError::msg("boom")));
        let flag = Rc::clone(&ran);
        cx.add_frame_callback(FrameEvent::Update, move |_| {
            *flag.borrow_mut() = true;
            Ok(())
        });
        cx.tick(DT);
        assert!(*ran.borrow());
    }

    #[test]
    fn test_wait_for_frames() {
        let mut cx = Context::new();
        let frames = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&frames);
        let mut step = 0;
        cx.start_coroutine(
            None,
            FrameEvent::Update,
            from_fn(move |cx, _| {
                log.borrow_mut().push(cx.time().frame());
                step += 1;
                Ok(match step {
                    1 => CoroutineStep::Wait(WaitCondition::Frames(3)),
                    _ => CoroutineStep::Done,
                })
            }),
        );
        for _ in 0..6 {
            cx.tick(DT);
        }
        assert_eq!(*frames.borrow(), vec![1, 4]);
        assert_eq!(cx.scheduler().coroutine_count(), 0);
    }

    #[test]
    fn test_wait_for_seconds_sequence() {
        let mut cx = Context::new();
        let done_at = Rc::new(RefCell::new(None));
        let record = Rc::clone(&done_at);
        let routine = Sequence::new().then(WaitForSeconds::new(0.5)).then(from_fn(move |cx, _| {
            *record.borrow_mut() = Some(cx.time().time());
            Ok(CoroutineStep::Done)
        }));
        cx.start_coroutine(None, FrameEvent::Update, routine);

        for _ in 0..20 {
            cx.tick(0.05);
        }
        let done = done_at.borrow().expect("sequence finished");
        assert!(done >= 0.5 && done < 0.6, "finished at {done}");
    }

    #[test]
    fn test_stop_coroutine() {
        let mut cx = Context::new();
        let count = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&count);
        let id = cx.start_coroutine(
            None,
            FrameEvent::PreRender,
            from_fn(move |_, _| {
                *counter.borrow_mut() += 1;
                Ok(CoroutineStep::Yield)
            }),
        );
        cx.tick(DT);
        cx.tick(DT);
        cx.stop_coroutine(id);
        cx.tick(DT);
        assert_eq!(*count.borrow(), 2);
    }

    #[test]
    fn test_coroutine_resumes_only_on_its_event() {
        let mut cx = Context::new();
        let events = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&events);
        cx.start_coroutine(
            None,
            FrameEvent::LateUpdate,
            from_fn(move |_, event| {
                log.borrow_mut().push(event);
                Ok(CoroutineStep::Yield)
            }),
        );
        cx.tick(DT);
        cx.tick(DT);
        assert_eq!(*events.borrow(), vec![FrameEvent::LateUpdate; 2]);
    }
}
