//! The host event loop seam.
//!
//! Everything the engine waits on (timers, animation frames, microtasks) is
//! requested through a [`Scheduler`]. Two hosts ship with the crate:
//!
//! - [`VirtualScheduler`]: a deterministic virtual clock. Time only moves
//!   when [`VirtualScheduler::advance`] is called, which makes it the host of
//!   choice for headless rendering and tests.
//! - [`TokioScheduler`]: real timers on a tokio [`LocalSet`](tokio::task::LocalSet),
//!   with animation frames emulated on a fixed frame interval.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce() + 'static>;

/// Identifies a scheduled timer or animation frame for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

/// Scheduler configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Time between two animation frames.
    pub frame_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_micros(16_667),
        }
    }
}

/// A single-threaded, callback driven event loop.
///
/// Implementations never run a task re-entrantly from inside the call that
/// scheduled it.
pub trait Scheduler {
    /// Time elapsed since the scheduler was created.
    fn now(&self) -> Duration;

    /// Runs `task` once `delay` has elapsed.
    fn set_timeout(&self, delay: Duration, task: Task) -> TaskId;

    /// Cancels a timer. Unknown or already fired ids are ignored.
    fn clear_timeout(&self, id: TaskId);

    /// Runs `task` at the start of the next animation frame.
    fn request_animation_frame(&self, task: Task) -> TaskId;

    /// Cancels a frame callback. Unknown or already fired ids are ignored.
    fn cancel_animation_frame(&self, id: TaskId);

    /// Runs `task` as soon as the currently executing task returns.
    fn queue_microtask(&self, task: Task);
}

#[derive(Default)]
struct VirtualState {
    now: Duration,
    next_id: u64,
    next_frame_at: Duration,
    timers: BTreeMap<(Duration, u64), Task>,
    timer_due: HashMap<u64, Duration>,
    frames: Vec<(u64, Task)>,
    cancelled_frames: HashSet<u64>,
    microtasks: VecDeque<Task>,
}

impl VirtualState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

enum Step {
    Timer(Task),
    Frame(Vec<(u64, Task)>),
}

/// Deterministic scheduler driven by an explicit virtual clock.
///
/// Frames tick on multiples of the configured frame interval. When a timer
/// and a frame fall on the same instant the timer runs first. Microtasks are
/// drained after every task.
pub struct VirtualScheduler {
    config: SchedulerConfig,
    state: RefCell<VirtualState>,
}

impl VirtualScheduler {
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    pub fn with_config(config: SchedulerConfig) -> Self {
        let state = VirtualState {
            next_frame_at: config.frame_interval,
            ..VirtualState::default()
        };
        Self {
            config,
            state: RefCell::new(state),
        }
    }

    pub fn config(&self) -> SchedulerConfig {
        self.config
    }

    /// Moves the clock forward by `by`, running every timer and frame that
    /// falls due on the way.
    pub fn advance(&self, by: Duration) {
        let target = self.state.borrow().now + by;
        self.run_microtasks();

        loop {
            let step = {
                let mut state = self.state.borrow_mut();
                let next_timer = state.timers.keys().next().map(|(due, _)| *due);
                let next_frame = state.next_frame_at;

                match next_timer {
                    Some(due) if due <= target && due <= next_frame => {
                        state.now = state.now.max(due);
                        let (key, task) = match state.timers.pop_first() {
                            Some(entry) => entry,
                            None => break,
                        };
                        state.timer_due.remove(&key.1);
                        Step::Timer(task)
                    }
                    _ if next_frame <= target => {
                        state.now = next_frame;
                        state.next_frame_at = next_frame + self.config.frame_interval;
                        state.cancelled_frames.clear();
                        Step::Frame(std::mem::take(&mut state.frames))
                    }
                    _ => break,
                }
            };

            match step {
                Step::Timer(task) => {
                    task();
                    self.run_microtasks();
                }
                Step::Frame(batch) => {
                    tracing::trace!(now = ?self.now(), callbacks = batch.len(), "animation frame");
                    for (id, task) in batch {
                        if self.state.borrow_mut().cancelled_frames.remove(&id) {
                            continue;
                        }
                        task();
                        self.run_microtasks();
                    }
                }
            }
        }

        self.state.borrow_mut().now = target;
    }

    /// Advances to the `count`-th upcoming frame boundary, running that
    /// frame's callbacks.
    pub fn advance_frames(&self, count: u32) {
        if count == 0 {
            self.run_microtasks();
            return;
        }
        let (now, next) = {
            let state = self.state.borrow();
            (state.now, state.next_frame_at)
        };
        let target = next + self.config.frame_interval * (count - 1);
        self.advance(target - now);
    }

    /// Drains the microtask queue, including microtasks queued while
    /// draining.
    pub fn run_microtasks(&self) {
        loop {
            let task = self.state.borrow_mut().microtasks.pop_front();
            match task {
                Some(task) => task(),
                None => break,
            }
        }
    }

    /// Number of timers that have not fired or been cleared.
    pub fn pending_timers(&self) -> usize {
        self.state.borrow().timers.len()
    }

    /// Number of callbacks waiting for the next frame.
    pub fn pending_frames(&self) -> usize {
        self.state.borrow().frames.len()
    }
}

impl Default for VirtualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for VirtualScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("VirtualScheduler")
            .field("now", &state.now)
            .field("timers", &state.timers.len())
            .field("frames", &state.frames.len())
            .field("microtasks", &state.microtasks.len())
            .finish()
    }
}

impl Scheduler for VirtualScheduler {
    fn now(&self) -> Duration {
        self.state.borrow().now
    }

    fn set_timeout(&self, delay: Duration, task: Task) -> TaskId {
        let mut state = self.state.borrow_mut();
        let id = state.next_id();
        let due = state.now + delay;
        state.timers.insert((due, id), task);
        state.timer_due.insert(id, due);
        TaskId(id)
    }

    fn clear_timeout(&self, id: TaskId) {
        let mut state = self.state.borrow_mut();
        if let Some(due) = state.timer_due.remove(&id.0) {
            state.timers.remove(&(due, id.0));
        }
    }

    fn request_animation_frame(&self, task: Task) -> TaskId {
        let mut state = self.state.borrow_mut();
        let id = state.next_id();
        state.frames.push((id, task));
        TaskId(id)
    }

    fn cancel_animation_frame(&self, id: TaskId) {
        let mut state = self.state.borrow_mut();
        let before = state.frames.len();
        state.frames.retain(|(queued, _)| *queued != id.0);
        if state.frames.len() == before {
            // May belong to the batch currently running.
            state.cancelled_frames.insert(id.0);
        }
    }

    fn queue_microtask(&self, task: Task) {
        self.state.borrow_mut().microtasks.push_back(task);
    }
}

/// Scheduler backed by tokio timers.
///
/// Every task is spawned with [`tokio::task::spawn_local`], so the scheduler
/// must be used from inside a [`LocalSet`](tokio::task::LocalSet). Animation
/// frames fire on multiples of the frame interval measured from creation.
/// Microtasks become local tasks that run at the next yield point.
pub struct TokioScheduler {
    config: SchedulerConfig,
    origin: Instant,
    next_id: Cell<u64>,
    tasks: Rc<RefCell<HashMap<u64, JoinHandle<()>>>>,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    pub fn with_config(config: SchedulerConfig) -> Self {
        Self {
            config,
            origin: Instant::now(),
            next_id: Cell::new(0),
            tasks: Rc::new(RefCell::new(HashMap::new())),
        }
    }

    fn next_id(&self) -> u64 {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        id
    }

    fn spawn_at(&self, deadline: Instant, task: Task) -> TaskId {
        let id = self.next_id();
        let tasks = Rc::downgrade(&self.tasks);
        let handle = tokio::task::spawn_local(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(tasks) = tasks.upgrade() {
                tasks.borrow_mut().remove(&id);
            }
            task();
        });
        self.tasks.borrow_mut().insert(id, handle);
        TaskId(id)
    }

    fn abort(&self, id: TaskId) {
        if let Some(handle) = self.tasks.borrow_mut().remove(&id.0) {
            handle.abort();
        }
    }

    fn next_frame_deadline(&self) -> Instant {
        let interval = self.config.frame_interval.as_nanos().max(1);
        let elapsed = self.origin.elapsed().as_nanos();
        let frames = elapsed / interval + 1;
        let offset = u64::try_from(frames * interval).unwrap_or(u64::MAX);
        self.origin + Duration::from_nanos(offset)
    }
}

impl Default for TokioScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TokioScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioScheduler")
            .field("config", &self.config)
            .field("pending", &self.tasks.borrow().len())
            .finish()
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        for (_, handle) in self.tasks.borrow_mut().drain() {
            handle.abort();
        }
    }
}

impl Scheduler for TokioScheduler {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn set_timeout(&self, delay: Duration, task: Task) -> TaskId {
        self.spawn_at(Instant::now() + delay, task)
    }

    fn clear_timeout(&self, id: TaskId) {
        self.abort(id);
    }

    fn request_animation_frame(&self, task: Task) -> TaskId {
        self.spawn_at(self.next_frame_deadline(), task)
    }

    fn cancel_animation_frame(&self, id: TaskId) {
        self.abort(id);
    }

    fn queue_microtask(&self, task: Task) {
        tokio::task::spawn_local(async move { task() });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Rc<RefCell<Vec<&'static str>>>, impl Fn(&'static str) -> Task) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        let make = move |label: &'static str| -> Task {
            let sink = sink.clone();
            Box::new(move || sink.borrow_mut().push(label))
        };
        (log, make)
    }

    #[test]
    fn timers_fire_in_due_order() {
        let scheduler = VirtualScheduler::new();
        let (log, task) = recorder();

        scheduler.set_timeout(Duration::from_millis(30), task("late"));
        scheduler.set_timeout(Duration::from_millis(10), task("early"));
        let cleared = scheduler.set_timeout(Duration::from_millis(20), task("cleared"));
        scheduler.clear_timeout(cleared);

        scheduler.advance(Duration::from_millis(25));
        assert_eq!(*log.borrow(), ["early"]);
        scheduler.advance(Duration::from_millis(10));
        assert_eq!(*log.borrow(), ["early", "late"]);
        assert_eq!(scheduler.pending_timers(), 0);
    }

    #[test]
    fn frames_requested_during_a_frame_wait_for_the_next_one() {
        let scheduler = Rc::new(VirtualScheduler::new());
        let log = Rc::new(RefCell::new(Vec::new()));

        let inner_scheduler = scheduler.clone();
        let inner_log = log.clone();
        scheduler.request_animation_frame(Box::new(move || {
            inner_log.borrow_mut().push(inner_scheduler.now());
            let log = inner_log.clone();
            let clock = inner_scheduler.clone();
            inner_scheduler.request_animation_frame(Box::new(move || {
                log.borrow_mut().push(clock.now());
            }));
        }));

        scheduler.advance_frames(1);
        assert_eq!(log.borrow().len(), 1);
        scheduler.advance_frames(1);
        let log = log.borrow();
        assert_eq!(log.len(), 2);
        assert_eq!(log[1] - log[0], scheduler.config().frame_interval);
    }

    #[test]
    fn cancelled_frames_never_run() {
        let scheduler = VirtualScheduler::new();
        let (log, task) = recorder();
        let id = scheduler.request_animation_frame(task("frame"));
        scheduler.cancel_animation_frame(id);
        scheduler.advance_frames(2);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn microtasks_drain_after_each_task() {
        let scheduler = Rc::new(VirtualScheduler::new());
        let (log, task) = recorder();

        let chained = scheduler.clone();
        let micro = task("micro");
        scheduler.set_timeout(
            Duration::from_millis(1),
            Box::new(move || chained.queue_microtask(micro)),
        );
        scheduler.set_timeout(Duration::from_millis(2), task("timer"));

        scheduler.advance(Duration::from_millis(5));
        assert_eq!(*log.borrow(), ["micro", "timer"]);
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_timers_respect_delay() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let scheduler = TokioScheduler::new();
                let fired = Rc::new(Cell::new(None));
                let sink = fired.clone();
                let start = Instant::now();
                scheduler.set_timeout(
                    Duration::from_millis(40),
                    Box::new(move || sink.set(Some(start.elapsed()))),
                );
                tokio::time::sleep(Duration::from_millis(100)).await;
                let elapsed = fired.get().expect("timer fired");
                assert!(elapsed >= Duration::from_millis(40));
            })
            .await;
    }
}
