//! Class-list transition driver.
//!
//! [`transition`] takes one element through a single enter or leave:
//!
//! 1. Strip every class the [`ClassSet`] knows about.
//! 2. When entering, unhide the element.
//! 3. Apply `base`, `enter`/`leave` and the `from` classes.
//! 4. Two frames later swap `from` for `to`.
//! 5. Wait for the computed duration plus delay, or for the native
//!    `transitionend`/`transitioncancel` events.
//! 6. Drop `base` and `enter`/`leave`, then apply `entered` after an enter.
//!
//! Steps 1 to 3 run with transitions disabled and a forced reflow, unless the
//! element is already mid-transition: then the browser is left to animate
//! from whatever it is currently showing.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use tokio::sync::watch;
use transition_fsm_core::element::{add_classes, remove_classes};
use transition_fsm_core::{
    ClassPhase, ClassSet, Direction, Disposables, Disposer, Element, Reason, Scheduler,
    TransitionEventKind, css,
};

type DoneCallback = Box<dyn FnOnce(Reason) + 'static>;

/// Per-run switches for [`transition_with`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverOptions {
    /// The element is still animating from a previous run. Skips the forced
    /// reflow so the new run continues from the current computed style.
    pub in_flight: bool,
}

struct Completion {
    callback: RefCell<Option<DoneCallback>>,
    outcome: watch::Sender<Option<Reason>>,
}

impl Completion {
    fn new(callback: DoneCallback) -> Self {
        Self {
            callback: RefCell::new(Some(callback)),
            outcome: watch::channel(None).0,
        }
    }

    fn outcome(&self) -> Option<Reason> {
        *self.outcome.borrow()
    }

    fn finish(&self, reason: Reason) {
        if self.outcome().is_some() {
            return;
        }
        self.outcome.send_replace(Some(reason));
        let callback = self.callback.borrow_mut().take();
        if let Some(callback) = callback {
            callback(reason);
        }
    }
}

/// An in-flight or settled driver run.
///
/// Dropping the handle lets the run continue; call [`cancel`](Self::cancel)
/// to stop it.
pub struct TransitionHandle {
    direction: Direction,
    disposables: Disposables,
    completion: Rc<Completion>,
}

impl TransitionHandle {
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// How the run ended, once it has.
    pub fn outcome(&self) -> Option<Reason> {
        self.completion.outcome()
    }

    pub fn is_settled(&self) -> bool {
        self.outcome().is_some()
    }

    /// Stops the run: pending frames, timers and listeners are dropped and
    /// the completion callback receives [`Reason::Cancelled`]. Does nothing
    /// once settled.
    pub fn cancel(&self) {
        if self.is_settled() {
            return;
        }
        tracing::debug!(direction = ?self.direction, "transition cancelled");
        self.disposables.dispose();
        self.completion.finish(Reason::Cancelled);
    }

    /// Resolves once the run settles, with the same reason the completion
    /// callback received.
    pub async fn finished(&self) -> Reason {
        let mut outcome = self.completion.outcome.subscribe();
        let settled = match outcome.wait_for(Option::is_some).await {
            Ok(reason) => *reason,
            Err(_) => None,
        };
        settled.unwrap_or(Reason::Cancelled)
    }
}

impl fmt::Debug for TransitionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitionHandle")
            .field("direction", &self.direction)
            .field("outcome", &self.outcome())
            .finish()
    }
}

/// Runs one transition with default [`DriverOptions`].
pub fn transition(
    element: &Rc<dyn Element>,
    classes: &ClassSet,
    direction: Direction,
    scheduler: &Rc<dyn Scheduler>,
    on_done: impl FnOnce(Reason) + 'static,
) -> TransitionHandle {
    transition_with(
        element,
        classes,
        direction,
        scheduler,
        DriverOptions::default(),
        on_done,
    )
}

/// Runs one transition of `element` in `direction`.
///
/// `on_done` is called exactly once: with [`Reason::Finished`] when the
/// element settles, or with [`Reason::Cancelled`] when the run is cancelled
/// through the handle or by a native `transitioncancel`.
pub fn transition_with(
    element: &Rc<dyn Element>,
    classes: &ClassSet,
    direction: Direction,
    scheduler: &Rc<dyn Scheduler>,
    options: DriverOptions,
    on_done: impl FnOnce(Reason) + 'static,
) -> TransitionHandle {
    let disposables = Disposables::new(scheduler.clone());
    let completion = Rc::new(Completion::new(Box::new(on_done)));
    let classes = Rc::new(classes.clone());

    prepare(element, options.in_flight, || {
        remove_classes(&**element, classes.all());
        if direction.is_enter() {
            element.remove_attribute("hidden");
            if element.style_property("display") == "none" {
                element.set_style_property("display", "");
            }
        }
        add_classes(
            &**element,
            classes
                .get(ClassPhase::Base)
                .iter()
                .chain(classes.active(direction))
                .chain(classes.starting(direction))
                .map(String::as_str),
        );
    });
    tracing::trace!(?direction, in_flight = options.in_flight, "applied from classes");

    let registry = disposables.clone();
    let target = element.clone();
    let settle = completion.clone();
    disposables.next_frame(move || {
        remove_classes(&*target, classes.starting(direction).iter().map(String::as_str));
        add_classes(&*target, classes.ending(direction).iter().map(String::as_str));
        tracing::trace!(?direction, "applied to classes");

        let finished_target = target.clone();
        let cleanup = registry.clone();
        wait_for_transition(&registry, &target, move |reason| {
            if reason == Reason::Finished {
                remove_classes(
                    &*finished_target,
                    classes
                        .get(ClassPhase::Base)
                        .iter()
                        .chain(classes.active(direction))
                        .map(String::as_str),
                );
                if direction.is_enter() {
                    add_classes(
                        &*finished_target,
                        classes.get(ClassPhase::Entered).iter().map(String::as_str),
                    );
                }
            }
            tracing::debug!(?direction, ?reason, "transition settled");
            cleanup.dispose();
            settle.finish(reason);
        });
    });

    TransitionHandle {
        direction,
        disposables,
        completion,
    }
}

/// Runs `apply` with transitions disabled and flushes the result, so the
/// element jumps to the new starting state instead of animating towards it.
fn prepare(element: &Rc<dyn Element>, in_flight: bool, apply: impl FnOnce()) {
    if in_flight {
        apply();
        return;
    }
    let previous = element.style_property("transition");
    element.set_style_property("transition", "none");
    apply();
    element.force_reflow();
    element.set_style_property("transition", &previous);
}

/// Calls `done` once the element's current transition is over.
///
/// Zero total time completes synchronously. Otherwise a timer armed at the
/// computed duration plus delay stands in for hosts that never report
/// transition events; the first `transitionrun` disarms it and the native
/// end/cancel events take over.
fn wait_for_transition(
    disposables: &Disposables,
    element: &Rc<dyn Element>,
    done: impl FnOnce(Reason) + 'static,
) {
    let total = css::total_transition_time(
        &element.computed_style_property("transition-duration"),
        &element.computed_style_property("transition-delay"),
    );
    if total.is_zero() {
        done(Reason::Finished);
        return;
    }
    tracing::trace!(?total, "waiting for transition");

    let slot: RefCell<Option<DoneCallback>> = RefCell::new(Some(Box::new(done)));
    let settle: Rc<dyn Fn(Reason)> = Rc::new(move |reason| {
        let done = slot.borrow_mut().take();
        if let Some(done) = done {
            done(reason);
        }
    });

    let on_timeout = settle.clone();
    let fallback: Rc<RefCell<Option<Disposer>>> = Rc::new(RefCell::new(Some(disposables.group(
        move |group| {
            group.set_timeout(total, move || on_timeout(Reason::Finished));
        },
    ))));

    disposables.add_event_listener(element, TransitionEventKind::Run, move |_| {
        let armed = fallback.borrow_mut().take();
        if let Some(armed) = armed {
            armed.dispose();
        }
    });
    let on_end = settle.clone();
    disposables.add_event_listener(element, TransitionEventKind::End, move |_| {
        on_end(Reason::Finished)
    });
    disposables.add_event_listener(element, TransitionEventKind::Cancel, move |_| {
        settle(Reason::Cancelled)
    });
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::time::Duration;

    use transition_fsm_core::{VirtualElement, VirtualScheduler};

    use super::*;

    struct Setup {
        scheduler: Rc<VirtualScheduler>,
        node: Rc<VirtualElement>,
        done: Rc<Cell<Option<Reason>>>,
    }

    impl Setup {
        fn new(node: VirtualElement) -> Self {
            Self {
                scheduler: Rc::new(VirtualScheduler::new()),
                node: Rc::new(node),
                done: Rc::new(Cell::new(None)),
            }
        }

        fn run(&self, classes: &ClassSet, direction: Direction) -> TransitionHandle {
            let element: Rc<dyn Element> = self.node.clone();
            let scheduler: Rc<dyn Scheduler> = self.scheduler.clone();
            let done = self.done.clone();
            transition(&element, classes, direction, &scheduler, move |reason| {
                done.set(Some(reason))
            })
        }
    }

    fn fade() -> ClassSet {
        ClassSet::builder()
            .base("base")
            .enter("enter")
            .enter_from("enter-from")
            .enter_to("enter-to")
            .leave("leave")
            .leave_from("leave-from")
            .leave_to("leave-to")
            .entered("entered")
            .build()
    }

    #[test]
    fn applies_from_classes_immediately_and_to_classes_two_frames_later() {
        let setup = Setup::new(VirtualElement::with_duration("100ms"));
        setup.run(&fade(), Direction::Enter);

        assert_eq!(setup.node.classes(), ["base", "enter", "enter-from"]);
        setup.scheduler.advance_frames(1);
        assert_eq!(setup.node.classes(), ["base", "enter", "enter-from"]);
        setup.scheduler.advance_frames(1);
        assert_eq!(setup.node.classes(), ["base", "enter", "enter-to"]);
        assert_eq!(setup.done.get(), None);
    }

    #[test]
    fn zero_duration_completes_in_the_swap_frame() {
        let setup = Setup::new(VirtualElement::new());
        let handle = setup.run(&fade(), Direction::Enter);

        setup.scheduler.advance_frames(2);
        assert_eq!(setup.done.get(), Some(Reason::Finished));
        assert_eq!(setup.node.classes(), ["enter-to", "entered"]);
        assert!(handle.is_settled());
        assert_eq!(setup.scheduler.pending_timers(), 0);
        assert_eq!(setup.node.listener_count(), 0);
    }

    #[test]
    fn leave_does_not_apply_entered() {
        let setup = Setup::new(VirtualElement::new());
        setup.run(&fade(), Direction::Leave);
        setup.scheduler.advance_frames(2);
        assert_eq!(setup.node.classes(), ["leave-to"]);
    }

    #[test]
    fn enter_unhides_the_element() {
        let node = VirtualElement::new();
        node.set_attribute("hidden", "");
        node.set_style_property("display", "none");
        let setup = Setup::new(node);
        setup.run(&fade(), Direction::Enter);

        assert!(!setup.node.has_attribute("hidden"));
        assert_eq!(setup.node.style_property("display"), "");
    }

    #[test]
    fn starts_from_a_clean_class_list() {
        let node = VirtualElement::new();
        add_classes(&node, ["leave", "leave-to", "entered", "unrelated"]);
        let setup = Setup::new(node);
        setup.run(&fade(), Direction::Enter);

        assert_eq!(
            setup.node.classes(),
            ["unrelated", "base", "enter", "enter-from"]
        );
    }

    #[test]
    fn fresh_runs_force_a_reflow_with_transitions_disabled() {
        let node = VirtualElement::with_duration("10ms");
        node.set_style_property("transition", "opacity 10ms");
        let setup = Setup::new(node);
        setup.run(&fade(), Direction::Enter);

        assert_eq!(setup.node.reflow_count(), 1);
        assert_eq!(setup.node.style_property("transition"), "opacity 10ms");

        let element: Rc<dyn Element> = setup.node.clone();
        let scheduler: Rc<dyn Scheduler> = setup.scheduler.clone();
        transition_with(
            &element,
            &fade(),
            Direction::Leave,
            &scheduler,
            DriverOptions { in_flight: true },
            |_| {},
        );
        assert_eq!(setup.node.reflow_count(), 1);
    }

    #[test]
    fn waits_for_duration_plus_delay() {
        let node = VirtualElement::with_duration("20ms");
        node.set_style_property("transition-delay", "100ms");
        let setup = Setup::new(node);
        setup.run(&fade(), Direction::Enter);

        setup.scheduler.advance_frames(2);
        setup.scheduler.advance(Duration::from_millis(119));
        assert_eq!(setup.done.get(), None);
        setup.scheduler.advance(Duration::from_millis(1));
        assert_eq!(setup.done.get(), Some(Reason::Finished));
    }

    #[test]
    fn negative_delay_shortens_the_wait() {
        let node = VirtualElement::with_duration("150ms");
        node.set_style_property("transition-delay", "-100ms");
        let setup = Setup::new(node);
        setup.run(&fade(), Direction::Enter);

        setup.scheduler.advance_frames(2);
        setup.scheduler.advance(Duration::from_millis(49));
        assert_eq!(setup.done.get(), None);
        setup.scheduler.advance(Duration::from_millis(1));
        assert_eq!(setup.done.get(), Some(Reason::Finished));
    }

    #[test]
    fn native_run_event_disarms_the_fallback_timer() {
        let setup = Setup::new(VirtualElement::with_duration("20ms"));
        setup.run(&fade(), Direction::Leave);
        setup.scheduler.advance_frames(2);

        setup.node.dispatch(TransitionEventKind::Run);
        setup.scheduler.advance(Duration::from_millis(100));
        assert_eq!(setup.done.get(), None);

        setup.node.dispatch(TransitionEventKind::End);
        assert_eq!(setup.done.get(), Some(Reason::Finished));
        assert_eq!(setup.node.listener_count(), 0);
    }

    #[test]
    fn native_cancel_event_reports_cancelled() {
        let setup = Setup::new(VirtualElement::with_duration("20ms"));
        setup.run(&fade(), Direction::Enter);
        setup.scheduler.advance_frames(2);

        setup.node.dispatch(TransitionEventKind::Cancel);
        assert_eq!(setup.done.get(), Some(Reason::Cancelled));
        assert!(!setup.node.has_class("entered"));
    }

    #[test]
    fn cancel_before_the_swap_never_applies_to_classes() {
        let setup = Setup::new(VirtualElement::with_duration("5000ms"));
        let handle = setup.run(&fade(), Direction::Enter);

        setup.scheduler.advance(Duration::from_millis(20));
        handle.cancel();
        assert_eq!(setup.done.get(), Some(Reason::Cancelled));

        setup.scheduler.advance(Duration::from_millis(6000));
        assert!(!setup.node.was_added("enter-to"));
        assert_eq!(setup.scheduler.pending_frames(), 0);
        assert_eq!(setup.scheduler.pending_timers(), 0);

        handle.cancel();
        assert_eq!(handle.outcome(), Some(Reason::Cancelled));
    }

    #[test]
    fn cancel_after_settling_is_a_no_op() {
        let setup = Setup::new(VirtualElement::new());
        let handle = setup.run(&fade(), Direction::Enter);
        setup.scheduler.advance_frames(2);
        handle.cancel();
        assert_eq!(handle.outcome(), Some(Reason::Finished));
    }
}
