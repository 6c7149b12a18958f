//! A [`TransitionMachine`] wired to elements, drivers and callbacks.
//!
//! [`TransitionTree`] owns the machine and, per node, the element being
//! animated, its [`ClassSet`], its [`LifecycleCallbacks`] and the driver run
//! in flight. Effects coming out of the machine are acted on in order:
//!
//! * `Start` fires the before-callback. Once the transition root is ready it
//!   is sent `Start`, so every before-callback of a cycle runs before any
//!   class is touched.
//! * `Run` starts a driver. A node without an element settles at once.
//! * `Stop` fires the after-callback and, after a leave, hides the node.
//! * `Cancel` stops the driver and fires `on_cancel`.
//!
//! A node stays [`visible`](TransitionTree::is_visible) until its leave has
//! completed, which only happens after every descendant in the same cycle
//! has completed.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::Rc;

use transition_fsm_core::{ClassSet, Direction, Element, Reason, Scheduler};

use crate::controller::LifecycleCallbacks;
use crate::driver::{DriverOptions, TransitionHandle, transition_with};
use crate::error::TreeError;
use crate::machine::{ContainerPhase, Effect, Event, NodeId, SelfPhase, TransitionMachine};

struct Binding {
    classes: ClassSet,
    callbacks: Rc<LifecycleCallbacks>,
    element: Option<Rc<dyn Element>>,
    run: Option<TransitionHandle>,
    /// Bumped whenever `run` is replaced or abandoned; stale completions
    /// carry an older value.
    token: u64,
    /// The last run was cut short while animating.
    interrupted: bool,
    show: bool,
    visible: bool,
}

impl Binding {
    fn new(classes: ClassSet, callbacks: LifecycleCallbacks) -> Self {
        Self {
            classes,
            callbacks: Rc::new(callbacks),
            element: None,
            run: None,
            token: 0,
            interrupted: false,
            show: false,
            visible: false,
        }
    }

    /// Abandons the current run without reporting its completion.
    fn abandon(&mut self) -> Option<TransitionHandle> {
        self.token += 1;
        let run = self.run.take();
        if run.as_ref().is_some_and(|run| !run.is_settled()) {
            self.interrupted = true;
        }
        run
    }
}

struct TreeInner {
    scheduler: Rc<dyn Scheduler>,
    machine: RefCell<TransitionMachine>,
    bindings: RefCell<HashMap<NodeId, Binding>>,
}

impl TreeInner {
    fn callbacks(&self, node: NodeId) -> Option<Rc<LifecycleCallbacks>> {
        self.bindings
            .borrow()
            .get(&node)
            .map(|binding| binding.callbacks.clone())
    }

    fn send(&self, node: NodeId, event: Event) -> Vec<Effect> {
        self.machine.borrow_mut().send(node, event)
    }
}

/// Nested transitions driven from `show` toggles.
///
/// ```rust
/// use std::rc::Rc;
/// use transition_fsm::{
///     ClassSet, LifecycleCallbacks, TransitionTree, VirtualElement, VirtualScheduler,
/// };
///
/// let scheduler = Rc::new(VirtualScheduler::new());
/// let tree = TransitionTree::new(scheduler.clone());
/// let panel = tree
///     .insert(
///         None,
///         Some(Rc::new(VirtualElement::new())),
///         ClassSet::default(),
///         LifecycleCallbacks::new(),
///     )
///     .unwrap();
/// let item = tree
///     .insert(
///         Some(panel),
///         Some(Rc::new(VirtualElement::with_duration("100ms"))),
///         ClassSet::default(),
///         LifecycleCallbacks::new(),
///     )
///     .unwrap();
///
/// tree.set_show(panel, true).unwrap();
/// tree.set_show(panel, false).unwrap();
/// scheduler.advance_frames(2);
/// // The panel's own leave is over, but the item is still animating.
/// assert!(tree.is_visible(panel));
///
/// scheduler.advance(std::time::Duration::from_millis(100));
/// assert!(!tree.is_visible(panel));
/// ```
pub struct TransitionTree {
    inner: Rc<TreeInner>,
}

impl TransitionTree {
    pub fn new(scheduler: Rc<dyn Scheduler>) -> Self {
        Self {
            inner: Rc::new(TreeInner {
                scheduler,
                machine: RefCell::new(TransitionMachine::new()),
                bindings: RefCell::new(HashMap::new()),
            }),
        }
    }

    /// Creates a node, optionally under `parent`, animating `element`.
    ///
    /// A node inserted under a parent that is mid-cycle joins the cycle in
    /// the parent's direction. Otherwise it adopts the parent's current
    /// intent without animating. Root nodes start hidden.
    pub fn insert(
        &self,
        parent: Option<NodeId>,
        element: Option<Rc<dyn Element>>,
        classes: ClassSet,
        callbacks: LifecycleCallbacks,
    ) -> Result<NodeId, TreeError> {
        if let Some(parent) = parent {
            if !self.contains(parent) {
                return Err(TreeError::UnknownNode(parent));
            }
        }

        let id = self.inner.machine.borrow_mut().insert();
        let mut binding = Binding::new(classes, callbacks);
        binding.element = element;
        let Some(parent) = parent else {
            self.inner.bindings.borrow_mut().insert(id, binding);
            return Ok(id);
        };

        let (show, visible) = self
            .inner
            .bindings
            .borrow()
            .get(&parent)
            .map_or((false, false), |binding| (binding.show, binding.visible));
        let joining = {
            let machine = self.inner.machine.borrow();
            machine
                .container_phase(parent)
                .filter(|phase| phase.is_in_flight())
                .and(machine.direction(parent))
        };
        binding.show = show;
        binding.visible = if joining.is_some() { visible } else { show };
        self.inner.bindings.borrow_mut().insert(id, binding);

        let effects = self.inner.machine.borrow_mut().add(parent, id)?;
        dispatch(&self.inner, effects);

        if let Some(direction) = joining {
            tracing::debug!(node = %id, %parent, ?direction, "late child joins cycle");
            let effects = self.inner.send(id, event_for(direction));
            dispatch(&self.inner, effects);
        }
        Ok(id)
    }

    /// Attaches or detaches the element animated for `node`.
    ///
    /// Detaching mid-run stops the driver and lets the node settle so the
    /// rest of the tree is not held back.
    pub fn set_element(
        &self,
        node: NodeId,
        element: Option<Rc<dyn Element>>,
    ) -> Result<(), TreeError> {
        let abandoned = {
            let mut bindings = self.inner.bindings.borrow_mut();
            let binding = bindings
                .get_mut(&node)
                .ok_or(TreeError::UnknownNode(node))?;
            let detaching = element.is_none();
            binding.element = element;
            if detaching { binding.abandon() } else { None }
        };
        if let Some(run) = abandoned {
            run.cancel();
            let effects = self.inner.send(node, Event::Stop);
            dispatch(&self.inner, effects);
        }
        Ok(())
    }

    /// Replaces the callbacks of `node`. Takes effect from the next effect
    /// dispatched for it.
    pub fn set_callbacks(
        &self,
        node: NodeId,
        callbacks: LifecycleCallbacks,
    ) -> Result<(), TreeError> {
        let mut bindings = self.inner.bindings.borrow_mut();
        let binding = bindings
            .get_mut(&node)
            .ok_or(TreeError::UnknownNode(node))?;
        binding.callbacks = Rc::new(callbacks);
        Ok(())
    }

    /// Shows or hides `node` together with its whole subtree.
    ///
    /// Showing makes every node visible at once. Every node is sent the
    /// matching event, parent first. Toggling the other way mid-cycle cancels
    /// the running cycle before starting the new one.
    pub fn set_show(&self, node: NodeId, show: bool) -> Result<(), TreeError> {
        let current = self
            .inner
            .bindings
            .borrow()
            .get(&node)
            .map(|binding| binding.show)
            .ok_or(TreeError::UnknownNode(node))?;
        if current == show {
            return Ok(());
        }

        let nodes = self.inner.machine.borrow().subtree(node);
        {
            let mut bindings = self.inner.bindings.borrow_mut();
            for id in &nodes {
                if let Some(binding) = bindings.get_mut(id) {
                    binding.show = show;
                    if show {
                        binding.visible = true;
                    }
                }
            }
        }

        let direction = Direction::from_show(show);
        tracing::debug!(%node, ?direction, nodes = nodes.len(), "toggling subtree");
        for id in nodes {
            let effects = self.inner.send(id, event_for(direction));
            dispatch(&self.inner, effects);
        }
        Ok(())
    }

    /// Detaches `node` from its parent. A parent waiting on it is released.
    pub fn remove(&self, node: NodeId) -> Result<(), TreeError> {
        let effects = self.inner.machine.borrow_mut().remove(node)?;
        dispatch(&self.inner, effects);
        Ok(())
    }

    /// Cancels whatever `node` and its subtree are doing, then frees them.
    pub fn destroy(&self, node: NodeId) -> Result<(), TreeError> {
        if !self.contains(node) {
            return Err(TreeError::UnknownNode(node));
        }
        let effects = self.inner.send(node, Event::Cancel);
        dispatch(&self.inner, effects);

        let nodes = self.inner.machine.borrow().subtree(node);
        let effects = self.inner.machine.borrow_mut().destroy(node)?;
        let runs: Vec<_> = {
            let mut bindings = self.inner.bindings.borrow_mut();
            nodes
                .iter()
                .filter_map(|id| bindings.remove(id))
                .filter_map(|mut binding| binding.abandon())
                .collect()
        };
        for run in runs {
            run.cancel();
        }
        dispatch(&self.inner, effects);
        Ok(())
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.inner.machine.borrow().contains(node)
    }

    pub fn len(&self) -> usize {
        self.inner.machine.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.inner.machine.borrow().parent(node)
    }

    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.inner.machine.borrow().children(node).to_vec()
    }

    /// Latest intent for `node`.
    pub fn show(&self, node: NodeId) -> bool {
        self.inner
            .bindings
            .borrow()
            .get(&node)
            .is_some_and(|binding| binding.show)
    }

    /// Whether `node` must stay rendered.
    pub fn is_visible(&self, node: NodeId) -> bool {
        self.inner
            .bindings
            .borrow()
            .get(&node)
            .is_some_and(|binding| binding.visible)
    }

    pub fn container_phase(&self, node: NodeId) -> Option<ContainerPhase> {
        self.inner.machine.borrow().container_phase(node)
    }

    pub fn self_phase(&self, node: NodeId) -> Option<SelfPhase> {
        self.inner.machine.borrow().self_phase(node)
    }

    /// No node in the subtree of `node` is mid-cycle.
    pub fn is_settled(&self, node: NodeId) -> bool {
        let machine = self.inner.machine.borrow();
        machine.subtree(node).into_iter().all(|id| {
            !machine
                .container_phase(id)
                .is_some_and(ContainerPhase::is_in_flight)
        })
    }
}

impl fmt::Debug for TransitionTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitionTree")
            .field("machine", &*self.inner.machine.borrow())
            .finish_non_exhaustive()
    }
}

impl Drop for TransitionTree {
    fn drop(&mut self) {
        let runs: Vec<_> = self
            .inner
            .bindings
            .borrow_mut()
            .values_mut()
            .filter_map(Binding::abandon)
            .collect();
        for run in runs {
            run.cancel();
        }
    }
}

fn event_for(direction: Direction) -> Event {
    match direction {
        Direction::Enter => Event::Enter,
        Direction::Leave => Event::Leave,
    }
}

fn dispatch(inner: &Rc<TreeInner>, effects: Vec<Effect>) {
    let mut queue = VecDeque::from(effects);
    while let Some(effect) = queue.pop_front() {
        tracing::trace!(?effect, "dispatching");
        match effect {
            Effect::Start { node, direction } => {
                if let Some(callbacks) = inner.callbacks(node) {
                    callbacks.before(direction);
                }
                let root_ready = {
                    let machine = inner.machine.borrow();
                    machine.is_transition_root(node)
                        && machine.self_phase(node) == Some(SelfPhase::Ready)
                };
                if root_ready {
                    queue.extend(inner.send(node, Event::Start));
                }
            }
            Effect::Run { node, direction } => run(inner, node, direction, &mut queue),
            Effect::Stop {
                node,
                direction,
                reason,
            } => {
                let callbacks = {
                    let mut bindings = inner.bindings.borrow_mut();
                    let Some(binding) = bindings.get_mut(&node) else {
                        continue;
                    };
                    binding.run = None;
                    if direction == Direction::Leave && reason == Reason::Finished {
                        binding.visible = false;
                    }
                    binding.callbacks.clone()
                };
                callbacks.after(direction);
            }
            Effect::Cancel { node, direction } => {
                let cancelled = {
                    let mut bindings = inner.bindings.borrow_mut();
                    let Some(binding) = bindings.get_mut(&node) else {
                        continue;
                    };
                    (binding.callbacks.clone(), binding.abandon())
                };
                let (callbacks, run) = cancelled;
                callbacks.cancelled(direction);
                if let Some(run) = run {
                    run.cancel();
                }
            }
        }
    }
}

fn run(inner: &Rc<TreeInner>, node: NodeId, direction: Direction, queue: &mut VecDeque<Effect>) {
    let prepared = {
        let mut bindings = inner.bindings.borrow_mut();
        let Some(binding) = bindings.get_mut(&node) else {
            return;
        };
        binding.token += 1;
        let in_flight = std::mem::take(&mut binding.interrupted);
        binding
            .element
            .clone()
            .map(|element| (element, binding.classes.clone(), binding.token, in_flight))
    };
    let Some((element, classes, token, in_flight)) = prepared else {
        tracing::trace!(%node, "no element attached, settling at once");
        queue.extend(inner.send(node, Event::Stop));
        return;
    };

    let weak = Rc::downgrade(inner);
    let handle = transition_with(
        &element,
        &classes,
        direction,
        &inner.scheduler,
        DriverOptions { in_flight },
        move |_| {
            if let Some(inner) = weak.upgrade() {
                settle(&inner, node, token);
            }
        },
    );
    if let Some(binding) = inner.bindings.borrow_mut().get_mut(&node) {
        binding.run = Some(handle);
    }
}

fn settle(inner: &Rc<TreeInner>, node: NodeId, token: u64) {
    let current = inner
        .bindings
        .borrow()
        .get(&node)
        .is_some_and(|binding| binding.token == token);
    if !current {
        return;
    }
    let effects = inner.send(node, Event::Stop);
    dispatch(inner, effects);
}
