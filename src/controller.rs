//! Show/hide orchestration for a single element.
//!
//! A [`TransitionController`] turns a boolean `show` intent into driver runs
//! against whatever element is currently attached. It keeps the element
//! rendered (`visible`) until a leave has settled, exposes
//! [`TransitionFlags`] for render-time attributes, and handles reversals
//! mid-flight.
//!
//! Reversing a run that is already in flight is a *cancellation*: the flags
//! flip straight back to the state the interrupted run started from, and no
//! reflow is forced so the browser animates back from where it is. Reversing
//! again before that settles cancels the cancellation and the original run's
//! flags are restored.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use bitflags::bitflags;
use tokio::sync::watch;
use transition_fsm_core::{ClassSet, Direction, Disposables, Element, Reason, Scheduler};

use crate::driver::{DriverOptions, TransitionHandle, transition_with};

bitflags! {
    /// Render-time state of a controlled element.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TransitionFlags: u8 {
        /// Render the closed (hidden) styling.
        const CLOSED = 0b0000_0001;
        /// An enter is in progress.
        const ENTER  = 0b0000_0010;
        /// A leave is in progress.
        const LEAVE  = 0b0000_0100;
    }
}

/// Published controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionSnapshot {
    /// Latest intent.
    pub show: bool,
    /// Whether the element must stay rendered. Lags `show` on the leave path.
    pub visible: bool,
    /// A driver run has started and not settled.
    pub in_flight: bool,
    /// A toggle is waiting for an element to be attached.
    pub pending: bool,
    pub flags: TransitionFlags,
}

impl TransitionSnapshot {
    pub fn is_settled(&self) -> bool {
        !self.in_flight && !self.pending
    }
}

type Hook = Box<dyn Fn() + 'static>;

/// User callbacks around each cycle.
#[derive(Default)]
pub struct LifecycleCallbacks {
    before_enter: Option<Hook>,
    after_enter: Option<Hook>,
    before_leave: Option<Hook>,
    after_leave: Option<Hook>,
    on_cancel: Option<Box<dyn Fn(Direction) + 'static>>,
}

impl LifecycleCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn before_enter(mut self, hook: impl Fn() + 'static) -> Self {
        self.before_enter = Some(Box::new(hook));
        self
    }

    #[must_use]
    pub fn after_enter(mut self, hook: impl Fn() + 'static) -> Self {
        self.after_enter = Some(Box::new(hook));
        self
    }

    #[must_use]
    pub fn before_leave(mut self, hook: impl Fn() + 'static) -> Self {
        self.before_leave = Some(Box::new(hook));
        self
    }

    #[must_use]
    pub fn after_leave(mut self, hook: impl Fn() + 'static) -> Self {
        self.after_leave = Some(Box::new(hook));
        self
    }

    /// Called with the direction of a cycle that was interrupted.
    #[must_use]
    pub fn on_cancel(mut self, hook: impl Fn(Direction) + 'static) -> Self {
        self.on_cancel = Some(Box::new(hook));
        self
    }

    pub(crate) fn before(&self, direction: Direction) {
        let hook = match direction {
            Direction::Enter => &self.before_enter,
            Direction::Leave => &self.before_leave,
        };
        if let Some(hook) = hook {
            hook();
        }
    }

    pub(crate) fn after(&self, direction: Direction) {
        let hook = match direction {
            Direction::Enter => &self.after_enter,
            Direction::Leave => &self.after_leave,
        };
        if let Some(hook) = hook {
            hook();
        }
    }

    pub(crate) fn cancelled(&self, direction: Direction) {
        if let Some(hook) = &self.on_cancel {
            hook(direction);
        }
    }
}

impl fmt::Debug for LifecycleCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleCallbacks")
            .field("before_enter", &self.before_enter.is_some())
            .field("after_enter", &self.after_enter.is_some())
            .field("before_leave", &self.before_leave.is_some())
            .field("after_leave", &self.after_leave.is_some())
            .field("on_cancel", &self.on_cancel.is_some())
            .finish()
    }
}

/// Controller configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerOptions {
    /// Frames to wait for an element before settling a toggle without
    /// animating it.
    pub max_attach_retries: u32,
    /// Run the enter transition when the controller starts out shown,
    /// instead of appearing without animation.
    pub immediate: bool,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            max_attach_retries: 60,
            immediate: false,
        }
    }
}

#[derive(Debug, Default)]
struct ControllerState {
    show: bool,
    visible: bool,
    flags: TransitionFlags,
    in_flight: bool,
    cancelled: bool,
    pending: bool,
    retries: u32,
    epoch: u64,
    run: Option<TransitionHandle>,
}

impl ControllerState {
    fn snapshot(&self) -> TransitionSnapshot {
        TransitionSnapshot {
            show: self.show,
            visible: self.visible,
            in_flight: self.in_flight,
            pending: self.pending,
            flags: self.flags,
        }
    }
}

struct ControllerInner {
    scheduler: Rc<dyn Scheduler>,
    classes: ClassSet,
    options: ControllerOptions,
    callbacks: LifecycleCallbacks,
    element: RefCell<Option<Rc<dyn Element>>>,
    state: RefCell<ControllerState>,
    snapshot: watch::Sender<TransitionSnapshot>,
    /// Attach retries.
    attach: Disposables,
    /// Flag updates of the current run.
    frames: Disposables,
}

/// Drives one element from a boolean `show` intent.
///
/// ```rust
/// use std::rc::Rc;
/// use transition_fsm::{ClassSet, TransitionController, VirtualElement, VirtualScheduler};
///
/// let scheduler = Rc::new(VirtualScheduler::new());
/// let controller = TransitionController::new(scheduler.clone(), ClassSet::default(), false);
/// controller.set_element(Some(Rc::new(VirtualElement::new())));
///
/// controller.set_show(true);
/// assert!(controller.visible());
///
/// controller.set_show(false);
/// assert!(controller.visible());
/// scheduler.advance_frames(2);
/// assert!(!controller.visible());
/// ```
pub struct TransitionController {
    inner: Rc<ControllerInner>,
}

impl TransitionController {
    pub fn new(scheduler: Rc<dyn Scheduler>, classes: ClassSet, show: bool) -> Self {
        Self::with_options(
            scheduler,
            classes,
            show,
            ControllerOptions::default(),
            LifecycleCallbacks::default(),
        )
    }

    pub fn with_options(
        scheduler: Rc<dyn Scheduler>,
        classes: ClassSet,
        show: bool,
        options: ControllerOptions,
        callbacks: LifecycleCallbacks,
    ) -> Self {
        let state = ControllerState {
            show,
            visible: show,
            pending: show && options.immediate,
            ..ControllerState::default()
        };
        let (snapshot, _) = watch::channel(state.snapshot());
        Self {
            inner: Rc::new(ControllerInner {
                attach: Disposables::new(scheduler.clone()),
                frames: Disposables::new(scheduler.clone()),
                scheduler,
                classes,
                options,
                callbacks,
                element: RefCell::new(None),
                state: RefCell::new(state),
                snapshot,
            }),
        }
    }

    /// Attaches or detaches the element. Detaching cancels a run in flight.
    pub fn set_element(&self, element: Option<Rc<dyn Element>>) {
        let attached = element.is_some();
        *self.inner.element.borrow_mut() = element;
        if attached {
            if self.inner.state.borrow().pending {
                apply(&self.inner);
            }
        } else {
            interrupt(&self.inner);
        }
    }

    /// Updates the intent. A change starts a run, or queues one until an
    /// element is attached.
    pub fn set_show(&self, show: bool) {
        {
            let mut state = self.inner.state.borrow_mut();
            if state.show == show && !state.pending {
                return;
            }
            state.show = show;
            state.pending = true;
        }
        tracing::debug!(show, "transition intent changed");
        apply(&self.inner);
    }

    /// Cancels any run in flight and stops retrying. The intent is kept.
    pub fn unmount(&self) {
        self.inner.state.borrow_mut().pending = false;
        self.inner.attach.dispose();
        *self.inner.element.borrow_mut() = None;
        interrupt(&self.inner);
    }

    pub fn show(&self) -> bool {
        self.inner.state.borrow().show
    }

    pub fn visible(&self) -> bool {
        self.inner.state.borrow().visible
    }

    pub fn flags(&self) -> TransitionFlags {
        self.inner.state.borrow().flags
    }

    pub fn in_flight(&self) -> bool {
        self.inner.state.borrow().in_flight
    }

    pub fn snapshot(&self) -> TransitionSnapshot {
        self.inner.state.borrow().snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<TransitionSnapshot> {
        self.inner.snapshot.subscribe()
    }

    /// Resolves with the first snapshot that has no run in flight and no
    /// toggle waiting for an element.
    pub async fn wait_until_settled(&self) -> TransitionSnapshot {
        let mut rx = self.subscribe();
        let settled = match rx.wait_for(TransitionSnapshot::is_settled).await {
            Ok(snapshot) => Some(*snapshot),
            Err(_) => None,
        };
        settled.unwrap_or_else(|| self.snapshot())
    }
}

impl fmt::Debug for TransitionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitionController")
            .field("state", &self.snapshot())
            .field("options", &self.inner.options)
            .finish()
    }
}

impl Drop for TransitionController {
    fn drop(&mut self) {
        self.inner.attach.dispose();
        self.inner.frames.dispose();
    }
}

fn publish(inner: &ControllerInner) {
    let snapshot = inner.state.borrow().snapshot();
    inner.snapshot.send_replace(snapshot);
}

/// Starts a run for the current intent, superseding any run in flight.
fn apply(inner: &Rc<ControllerInner>) {
    let show = {
        let mut state = inner.state.borrow_mut();
        if state.show {
            state.visible = true;
        }
        state.show
    };
    let direction = Direction::from_show(show);

    let element = inner.element.borrow().clone();
    let Some(element) = element else {
        if show {
            inner.state.borrow_mut().flags |= TransitionFlags::ENTER | TransitionFlags::CLOSED;
        }
        publish(inner);
        retry(inner);
        return;
    };
    inner.attach.dispose();

    let previous = {
        let mut state = inner.state.borrow_mut();
        state.epoch += 1;
        state.run.take()
    };
    inner.frames.dispose();
    if let Some(previous) = previous {
        if !previous.is_settled() {
            inner.callbacks.cancelled(previous.direction());
            previous.cancel();
            inner.callbacks.after(previous.direction());
        }
    }

    inner.callbacks.before(direction);

    let (epoch, was_in_flight, cancelled) = {
        let mut state = inner.state.borrow_mut();
        state.pending = false;
        state.retries = 0;
        let was_in_flight = state.in_flight;
        state.cancelled = if state.cancelled {
            false
        } else {
            state.in_flight
        };
        state.in_flight = true;
        if !state.cancelled {
            if show {
                state.flags.insert(TransitionFlags::ENTER | TransitionFlags::CLOSED);
                state.flags.remove(TransitionFlags::LEAVE);
            } else {
                state.flags.insert(TransitionFlags::LEAVE);
                state.flags.remove(TransitionFlags::ENTER);
            }
        }
        (state.epoch, was_in_flight, state.cancelled)
    };
    publish(inner);
    tracing::debug!(?direction, epoch, cancelled, "starting controlled transition");

    let weak = Rc::downgrade(inner);
    let handle = transition_with(
        &element,
        &inner.classes,
        direction,
        &inner.scheduler,
        DriverOptions {
            in_flight: was_in_flight,
        },
        move |reason| {
            if let Some(inner) = weak.upgrade() {
                settle(&inner, epoch, direction, reason);
            }
        },
    );

    let weak = Rc::downgrade(inner);
    inner.frames.next_frame(move || {
        if let Some(inner) = weak.upgrade() {
            swap_flags(&inner, epoch, show, cancelled);
        }
    });

    inner.state.borrow_mut().run = Some(handle);
}

/// Flag changes that go with the `from` → `to` class swap.
fn swap_flags(inner: &ControllerInner, epoch: u64, show: bool, cancelled: bool) {
    {
        let mut state = inner.state.borrow_mut();
        if state.epoch != epoch || !state.in_flight {
            return;
        }
        let flags = &mut state.flags;
        match (cancelled, show) {
            (true, true) => {
                flags.remove(TransitionFlags::ENTER | TransitionFlags::CLOSED);
                flags.insert(TransitionFlags::LEAVE);
            }
            (true, false) => {
                flags.remove(TransitionFlags::LEAVE);
                flags.insert(TransitionFlags::ENTER | TransitionFlags::CLOSED);
            }
            (false, true) => flags.remove(TransitionFlags::CLOSED),
            (false, false) => flags.insert(TransitionFlags::CLOSED),
        }
    }
    publish(inner);
}

fn settle(inner: &ControllerInner, epoch: u64, direction: Direction, reason: Reason) {
    {
        let mut state = inner.state.borrow_mut();
        if state.epoch != epoch {
            return;
        }
        state.in_flight = false;
        state.cancelled = false;
        state.flags = TransitionFlags::empty();
        if !state.show {
            state.visible = false;
        }
        state.run = None;
    }
    publish(inner);
    tracing::debug!(?direction, ?reason, "controlled transition settled");

    if reason == Reason::Cancelled {
        inner.callbacks.cancelled(direction);
    }
    inner.callbacks.after(direction);
}

fn retry(inner: &Rc<ControllerInner>) {
    let retries = {
        let mut state = inner.state.borrow_mut();
        state.retries += 1;
        state.retries
    };
    inner.attach.dispose();

    if retries > inner.options.max_attach_retries {
        tracing::warn!(
            retries = inner.options.max_attach_retries,
            "transition target never attached; settling without animation"
        );
        let direction = {
            let mut state = inner.state.borrow_mut();
            state.pending = false;
            state.retries = 0;
            state.flags = TransitionFlags::empty();
            state.visible = state.show;
            Direction::from_show(state.show)
        };
        publish(inner);
        inner.callbacks.before(direction);
        inner.callbacks.after(direction);
        return;
    }

    let weak: Weak<ControllerInner> = Rc::downgrade(inner);
    inner.attach.request_animation_frame(move || {
        if let Some(inner) = weak.upgrade() {
            if inner.state.borrow().pending {
                apply(&inner);
            }
        }
    });
}

/// Cancels the current run without starting another.
fn interrupt(inner: &ControllerInner) {
    let previous = {
        let mut state = inner.state.borrow_mut();
        state.epoch += 1;
        state.run.take()
    };
    inner.frames.dispose();
    let Some(previous) = previous else { return };
    if previous.is_settled() {
        return;
    }
    previous.cancel();
    {
        let mut state = inner.state.borrow_mut();
        state.in_flight = false;
        state.cancelled = false;
        state.flags = TransitionFlags::empty();
        if !state.show {
            state.visible = false;
        }
    }
    publish(inner);
    inner.callbacks.cancelled(previous.direction());
    inner.callbacks.after(previous.direction());
}
