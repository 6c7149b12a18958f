//! Scoped cleanup registry.
//!
//! Every timer, frame, listener and style mutation the engine creates goes
//! through a [`Disposables`] registry so that one `dispose()` call undoes all
//! of it.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

use crate::element::{Element, TransitionEventKind};
use crate::scheduler::Scheduler;

type Cleanup = Box<dyn FnOnce() + 'static>;

struct Registry {
    scheduler: Rc<dyn Scheduler>,
    next_id: Cell<u64>,
    cleanups: RefCell<Vec<(u64, Cleanup)>>,
}

/// A registry of cleanup callbacks.
///
/// Cloning yields another handle to the same registry. Each cleanup runs at
/// most once: either through its [`Disposer`] or through
/// [`Disposables::dispose`], whichever comes first.
#[derive(Clone)]
pub struct Disposables {
    inner: Rc<Registry>,
}

/// Handle to one registered cleanup.
///
/// Disposing removes the cleanup from its registry and runs it immediately.
/// Once the cleanup has run, by either path, disposing again is a no-op.
pub struct Disposer {
    id: u64,
    registry: Weak<Registry>,
}

impl Disposer {
    pub fn dispose(self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let cleanup = {
            let mut cleanups = registry.cleanups.borrow_mut();
            cleanups
                .iter()
                .position(|(id, _)| *id == self.id)
                .map(|index| cleanups.remove(index).1)
        };
        if let Some(cleanup) = cleanup {
            cleanup();
        }
    }
}

impl fmt::Debug for Disposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposer").field("id", &self.id).finish()
    }
}

impl Disposables {
    pub fn new(scheduler: Rc<dyn Scheduler>) -> Self {
        Self {
            inner: Rc::new(Registry {
                scheduler,
                next_id: Cell::new(0),
                cleanups: RefCell::new(Vec::new()),
            }),
        }
    }

    pub fn scheduler(&self) -> &Rc<dyn Scheduler> {
        &self.inner.scheduler
    }

    /// Registers a cleanup.
    pub fn add(&self, cleanup: impl FnOnce() + 'static) -> Disposer {
        let id = self.inner.next_id.get() + 1;
        self.inner.next_id.set(id);
        self.inner
            .cleanups
            .borrow_mut()
            .push((id, Box::new(cleanup)));
        Disposer {
            id,
            registry: Rc::downgrade(&self.inner),
        }
    }

    /// Runs and clears every registered cleanup, in registration order.
    ///
    /// Cleanups registered while disposing run too. The registry stays usable
    /// afterwards.
    pub fn dispose(&self) {
        loop {
            let drained = std::mem::take(&mut *self.inner.cleanups.borrow_mut());
            if drained.is_empty() {
                break;
            }
            for (_, cleanup) in drained {
                cleanup();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.cleanups.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn set_timeout(&self, delay: Duration, callback: impl FnOnce() + 'static) -> Disposer {
        let scheduler = self.inner.scheduler.clone();
        let id = scheduler.set_timeout(delay, Box::new(callback));
        self.add(move || scheduler.clear_timeout(id))
    }

    pub fn request_animation_frame(&self, callback: impl FnOnce() + 'static) -> Disposer {
        let scheduler = self.inner.scheduler.clone();
        let id = scheduler.request_animation_frame(Box::new(callback));
        self.add(move || scheduler.cancel_animation_frame(id))
    }

    /// Runs `callback` two animation frames from now, after the browser has
    /// committed at least one frame of the current style.
    pub fn next_frame(&self, callback: impl FnOnce() + 'static) -> Disposer {
        self.group(|group| {
            let inner = group.clone();
            group.request_animation_frame(move || {
                inner.request_animation_frame(callback);
            });
        })
    }

    /// Queues `callback` as a microtask that is skipped if disposed first.
    pub fn micro_task(&self, callback: impl FnOnce() + 'static) -> Disposer {
        let alive = Rc::new(Cell::new(true));
        let guard = alive.clone();
        self.inner.scheduler.queue_microtask(Box::new(move || {
            if guard.get() {
                callback();
            }
        }));
        self.add(move || alive.set(false))
    }

    pub fn add_event_listener(
        &self,
        element: &Rc<dyn Element>,
        kind: TransitionEventKind,
        listener: impl Fn(TransitionEventKind) + 'static,
    ) -> Disposer {
        let id = element.add_transition_listener(kind, Rc::new(listener));
        let element = element.clone();
        self.add(move || element.remove_transition_listener(id))
    }

    /// Sets an inline style property and restores the previous value on
    /// cleanup.
    pub fn style(&self, element: &Rc<dyn Element>, property: &str, value: &str) -> Disposer {
        let previous = element.style_property(property);
        element.set_style_property(property, value);
        let element = element.clone();
        let property = property.to_owned();
        self.add(move || element.set_style_property(&property, &previous))
    }

    /// Builds a nested registry whose disposal is registered here.
    pub fn group(&self, build: impl FnOnce(&Disposables)) -> Disposer {
        let group = Disposables::new(self.inner.scheduler.clone());
        build(&group);
        self.add(move || group.dispose())
    }
}

impl fmt::Debug for Disposables {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposables")
            .field("pending", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::VirtualElement;
    use crate::scheduler::VirtualScheduler;

    fn setup() -> (Rc<VirtualScheduler>, Disposables) {
        let scheduler = Rc::new(VirtualScheduler::new());
        let d = Disposables::new(scheduler.clone());
        (scheduler, d)
    }

    #[test]
    fn disposer_runs_cleanup_once() {
        let (_, d) = setup();
        let count = Rc::new(Cell::new(0));
        let sink = count.clone();
        let disposer = d.add(move || sink.set(sink.get() + 1));

        disposer.dispose();
        d.dispose();
        d.dispose();
        assert_eq!(count.get(), 1);
        assert!(d.is_empty());
    }

    #[test]
    fn dispose_runs_cleanups_added_while_disposing() {
        let (_, d) = setup();
        let log = Rc::new(RefCell::new(Vec::new()));

        let registry = d.clone();
        let sink = log.clone();
        d.add(move || {
            sink.borrow_mut().push("first");
            let sink = sink.clone();
            registry.add(move || sink.borrow_mut().push("late"));
        });
        let sink = log.clone();
        d.add(move || sink.borrow_mut().push("second"));

        d.dispose();
        assert_eq!(*log.borrow(), ["first", "second", "late"]);
    }

    #[test]
    fn disposing_cancels_timers_and_frames() {
        let (scheduler, d) = setup();
        let fired = Rc::new(Cell::new(false));

        let sink = fired.clone();
        d.set_timeout(Duration::from_millis(5), move || sink.set(true));
        let sink = fired.clone();
        d.next_frame(move || sink.set(true));
        let sink = fired.clone();
        d.micro_task(move || sink.set(true));

        d.dispose();
        scheduler.advance(Duration::from_millis(100));
        assert!(!fired.get());
        assert_eq!(scheduler.pending_timers(), 0);
    }

    #[test]
    fn next_frame_waits_two_frames() {
        let (scheduler, d) = setup();
        let fired = Rc::new(Cell::new(false));
        let sink = fired.clone();
        d.next_frame(move || sink.set(true));

        scheduler.advance_frames(1);
        assert!(!fired.get());
        scheduler.advance_frames(1);
        assert!(fired.get());
    }

    #[test]
    fn style_is_restored() {
        let (_, d) = setup();
        let element: Rc<dyn Element> = Rc::new(VirtualElement::new());
        element.set_style_property("transition", "opacity 1s");

        d.style(&element, "transition", "none");
        assert_eq!(element.style_property("transition"), "none");
        d.dispose();
        assert_eq!(element.style_property("transition"), "opacity 1s");
    }

    #[test]
    fn listeners_are_removed() {
        let (_, d) = setup();
        let node = Rc::new(VirtualElement::new());
        let element: Rc<dyn Element> = node.clone();
        d.add_event_listener(&element, TransitionEventKind::End, |_| {});
        assert_eq!(node.listener_count(), 1);
        d.dispose();
        assert_eq!(node.listener_count(), 0);
    }
}
