//! Hierarchical enter/leave state machine.
//!
//! Nodes live in an arena and reference each other by [`NodeId`]. Each node
//! tracks a [`ContainerPhase`] (which way the current cycle goes) and a
//! [`SelfPhase`] (how far its own animation got). A cycle runs like this:
//!
//! 1. `Enter`/`Leave` moves a node to `Pending`: it wants to animate.
//! 2. Once the transition root and every descendant are pending, the whole
//!    subtree becomes `Ready`, parent first. Each node emits
//!    [`Effect::Start`].
//! 3. `Start` on the root moves the subtree to `Running`, parent first,
//!    emitting [`Effect::Run`] for each node.
//! 4. `Stop` moves a node to `Finished`. A finished node completes once none
//!    of its children is still in the cycle, so [`Effect::Stop`] is emitted
//!    innermost first.
//!
//! Events that do not apply to the current phase are ignored.
//!
//! ```rust
//! use transition_fsm::machine::{Effect, Event, TransitionMachine};
//! use transition_fsm::Direction;
//!
//! let mut machine = TransitionMachine::new();
//! let root = machine.insert();
//! let child = machine.insert();
//! machine.add(root, child).unwrap();
//!
//! machine.send(root, Event::Enter);
//! let effects = machine.send(child, Event::Enter);
//! assert_eq!(
//!     effects,
//!     vec![
//!         Effect::Start { node: root, direction: Direction::Enter },
//!         Effect::Start { node: child, direction: Direction::Enter },
//!     ]
//! );
//! ```

use std::fmt;

use transition_fsm_core::{Direction, Reason};

use crate::error::TreeError;

/// Identity of a node in a [`TransitionMachine`].
///
/// Ids are generational: an id whose node was destroyed never aliases a
/// node created later in the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

/// Direction and lifecycle of a node's current cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ContainerPhase {
    #[default]
    Idle,
    Entering,
    Leaving,
    /// The cycle was interrupted and is unwinding.
    Cancelled,
    Done,
}

impl ContainerPhase {
    fn of(direction: Direction) -> Self {
        match direction {
            Direction::Enter => Self::Entering,
            Direction::Leave => Self::Leaving,
        }
    }

    /// Entering or leaving.
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Entering | Self::Leaving)
    }
}

/// Progress of a node's own animation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SelfPhase {
    #[default]
    Idle,
    /// Wants to animate, waiting for the rest of the tree to declare.
    Pending,
    /// The tree has declared; before-callbacks have fired.
    Ready,
    Running,
    /// Own animation settled, waiting for children.
    Finished,
}

/// Input to [`TransitionMachine::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    /// Back to idle, keeping parent and children. Emits nothing for the
    /// node itself, but a finished parent waiting on it may complete.
    Reset,
    Enter,
    Leave,
    /// The root's animation began. Ignored on non-root nodes.
    Start,
    /// The node's own animation settled.
    Stop,
    /// Interrupts the node's cycle and every descendant in it.
    Cancel,
}

/// Output of the machine, in the order callers should act on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Effect {
    /// Fire `beforeEnter`/`beforeLeave`.
    Start { node: NodeId, direction: Direction },
    /// Begin driving the node's classes.
    Run { node: NodeId, direction: Direction },
    /// Fire `afterEnter`/`afterLeave`. Only emitted for nodes that started.
    Stop {
        node: NodeId,
        direction: Direction,
        reason: Reason,
    },
    /// The node's cycle was interrupted.
    Cancel { node: NodeId, direction: Direction },
}

#[derive(Debug, Default)]
struct Node {
    container: ContainerPhase,
    own: SelfPhase,
    direction: Option<Direction>,
    started: bool,
    /// Attached under an in-flight parent and has not declared yet. Holds
    /// the parent's completion back until it does.
    joining: bool,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Arena of transition nodes.
#[derive(Debug, Default)]
pub struct TransitionMachine {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl TransitionMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a detached, idle node.
    pub fn insert(&mut self) -> NodeId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.generation += 1;
            slot.node = Some(Node::default());
            NodeId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
            self.slots.push(Slot {
                generation: 0,
                node: Some(Node::default()),
            });
            NodeId {
                index,
                generation: 0,
            }
        }
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.node.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn container_phase(&self, id: NodeId) -> Option<ContainerPhase> {
        self.node(id).map(|node| node.container)
    }

    pub fn self_phase(&self, id: NodeId) -> Option<SelfPhase> {
        self.node(id).map(|node| node.own)
    }

    /// Direction of the current or most recent cycle.
    pub fn direction(&self, id: NodeId) -> Option<Direction> {
        self.node(id).and_then(|node| node.direction)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|node| node.parent)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id).map_or(&[], |node| node.children.as_slice())
    }

    /// `id` followed by all of its descendants, parent before child.
    pub fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        if self.contains(id) {
            self.collect_preorder(id, &mut out);
        }
        out
    }

    /// Highest ancestor taking part in the same cycle as `id`.
    ///
    /// A node that is not in flight is its own root.
    pub fn transition_root(&self, id: NodeId) -> NodeId {
        let mut current = id;
        while let Some(parent) = self.parent(current) {
            if !self.linked(parent, current) {
                break;
            }
            current = parent;
        }
        current
    }

    pub fn is_transition_root(&self, id: NodeId) -> bool {
        self.transition_root(id) == id
    }

    /// Attaches `child` under `parent`.
    ///
    /// Safe mid-transition: a child that already declared the parent's
    /// direction catches up with it. An idle child holds the parent back,
    /// pending or running, until it declares, is reset or is detached.
    pub fn add(&mut self, parent: NodeId, child: NodeId) -> Result<Vec<Effect>, TreeError> {
        self.check(parent)?;
        self.check(child)?;
        if let Some(current) = self.parent(child) {
            return Err(TreeError::AlreadyAttached {
                child,
                parent: current,
            });
        }
        if self.is_ancestor_or_self(child, parent) {
            return Err(TreeError::Cycle { parent, child });
        }

        if let Some(node) = self.node_mut(parent) {
            node.children.push(child);
        }
        let parent_in_flight = self
            .container_phase(parent)
            .is_some_and(ContainerPhase::is_in_flight);
        if let Some(node) = self.node_mut(child) {
            node.parent = Some(parent);
            node.joining = parent_in_flight && !node.container.is_in_flight();
        }
        tracing::debug!(%parent, %child, "attached transition node");

        let mut effects = Vec::new();
        if self.linked(parent, child) {
            self.catch_up(child, &mut effects);
        }
        let root = self.transition_root(parent);
        self.try_ready(root, &mut effects);
        Ok(effects)
    }

    /// Detaches `child` from its parent. The child keeps its own state.
    pub fn remove(&mut self, child: NodeId) -> Result<Vec<Effect>, TreeError> {
        self.check(child)?;
        let mut effects = Vec::new();
        if let Some(parent) = self.detach(child) {
            self.reevaluate(parent, &mut effects);
        }
        Ok(effects)
    }

    /// Detaches `id` and frees it together with its whole subtree.
    pub fn destroy(&mut self, id: NodeId) -> Result<Vec<Effect>, TreeError> {
        self.check(id)?;
        let mut effects = Vec::new();
        let parent = self.detach(id);
        for node in self.subtree(id) {
            let slot = &mut self.slots[node.index as usize];
            slot.node = None;
            self.free.push(node.index);
        }
        tracing::debug!(node = %id, "destroyed transition subtree");
        if let Some(parent) = parent {
            self.reevaluate(parent, &mut effects);
        }
        Ok(effects)
    }

    /// Feeds an event to `id`. Unknown ids and events that do not apply to
    /// the current phase produce no effects.
    pub fn send(&mut self, id: NodeId, event: Event) -> Vec<Effect> {
        let mut effects = Vec::new();
        if !self.contains(id) {
            return effects;
        }

        match event {
            Event::Reset => self.reset(id, &mut effects),
            Event::Enter => self.begin(id, Direction::Enter, &mut effects),
            Event::Leave => self.begin(id, Direction::Leave, &mut effects),
            Event::Start => self.start(id, &mut effects),
            Event::Stop => self.stop(id, &mut effects),
            Event::Cancel => self.cancel(id, &mut effects),
        }
        effects
    }

    fn node(&self, id: NodeId) -> Option<&Node> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
    }

    fn check(&self, id: NodeId) -> Result<(), TreeError> {
        if self.contains(id) {
            Ok(())
        } else {
            Err(TreeError::UnknownNode(id))
        }
    }

    fn is_ancestor_or_self(&self, ancestor: NodeId, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(node) = current {
            if node == ancestor {
                return true;
            }
            current = self.parent(node);
        }
        false
    }

    fn detach(&mut self, child: NodeId) -> Option<NodeId> {
        let node = self.node_mut(child)?;
        node.joining = false;
        let parent = node.parent.take()?;
        if let Some(node) = self.node_mut(parent) {
            node.children.retain(|id| *id != child);
        }
        tracing::debug!(%parent, %child, "detached transition node");
        Some(parent)
    }

    fn collect_preorder(&self, id: NodeId, out: &mut Vec<NodeId>) {
        out.push(id);
        for child in self.children(id) {
            self.collect_preorder(*child, out);
        }
    }

    /// Both nodes are in flight in the same direction.
    fn linked(&self, parent: NodeId, child: NodeId) -> bool {
        match (self.node(parent), self.node(child)) {
            (Some(p), Some(c)) => {
                p.container.is_in_flight()
                    && c.container.is_in_flight()
                    && p.direction == c.direction
            }
            _ => false,
        }
    }

    /// `id` and the descendants reachable through linked edges, parent first.
    fn linked_preorder(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect_linked(id, &mut out);
        out
    }

    fn collect_linked(&self, id: NodeId, out: &mut Vec<NodeId>) {
        out.push(id);
        for child in self.children(id) {
            if self.linked(id, *child) {
                self.collect_linked(*child, out);
            }
        }
    }

    fn reevaluate(&mut self, parent: NodeId, effects: &mut Vec<Effect>) {
        let in_flight = self
            .container_phase(parent)
            .is_some_and(ContainerPhase::is_in_flight);
        if in_flight {
            self.try_done(parent, effects);
            let root = self.transition_root(parent);
            self.try_ready(root, effects);
        }
    }

    fn reset(&mut self, id: NodeId, effects: &mut Vec<Effect>) {
        let parent = self.parent(id);
        if let Some(node) = self.node_mut(id) {
            *node = Node {
                parent: node.parent,
                children: std::mem::take(&mut node.children),
                ..Node::default()
            };
        }
        tracing::debug!(node = %id, "reset");
        if let Some(parent) = parent {
            self.reevaluate(parent, effects);
        }
    }

    fn begin(&mut self, id: NodeId, direction: Direction, effects: &mut Vec<Effect>) {
        let Some(node) = self.node(id) else { return };
        let was_joining = node.joining;
        if node.container.is_in_flight() {
            if node.direction == Some(direction) {
                return;
            }
            // Reversal: unwind the running cycle before starting the next.
            self.cancel(id, effects);
        }

        if let Some(node) = self.node_mut(id) {
            node.container = ContainerPhase::of(direction);
            node.own = SelfPhase::Pending;
            node.direction = Some(direction);
            node.started = false;
            node.joining = false;
        }
        tracing::debug!(node = %id, ?direction, "pending");

        if let Some(parent) = self.parent(id) {
            if self.linked(parent, id) {
                self.catch_up(id, effects);
            } else if was_joining {
                self.try_done(parent, effects);
            }
        }
        let root = self.transition_root(id);
        self.try_ready(root, effects);
    }

    /// Brings a node that joined a cycle up to its parent's progress.
    fn catch_up(&mut self, id: NodeId, effects: &mut Vec<Effect>) {
        let Some(parent) = self.parent(id) else { return };
        let parent_phase = self.self_phase(parent).unwrap_or_default();
        match parent_phase {
            SelfPhase::Ready => self.make_ready(id, effects),
            SelfPhase::Running | SelfPhase::Finished => {
                self.make_ready(id, effects);
                self.make_running(id, effects);
            }
            SelfPhase::Idle | SelfPhase::Pending => {}
        }
    }

    fn try_ready(&mut self, root: NodeId, effects: &mut Vec<Effect>) {
        if self.self_phase(root) != Some(SelfPhase::Pending) || !self.is_transition_root(root) {
            return;
        }
        let direction = self.direction(root);
        let declared = self.subtree(root).into_iter().skip(1).all(|id| {
            self.node(id).is_some_and(|node| {
                node.container.is_in_flight()
                    && node.direction == direction
                    && node.own != SelfPhase::Idle
            })
        });
        if declared {
            self.make_ready(root, effects);
        }
    }

    fn make_ready(&mut self, id: NodeId, effects: &mut Vec<Effect>) {
        for node in self.linked_preorder(id) {
            let Some(state) = self.node_mut(node) else { continue };
            if state.own != SelfPhase::Pending {
                continue;
            }
            let Some(direction) = state.direction else { continue };
            state.own = SelfPhase::Ready;
            state.started = true;
            tracing::debug!(%node, ?direction, "ready");
            effects.push(Effect::Start { node, direction });
        }
    }

    fn make_running(&mut self, id: NodeId, effects: &mut Vec<Effect>) {
        for node in self.linked_preorder(id) {
            let Some(state) = self.node_mut(node) else { continue };
            if state.own != SelfPhase::Ready {
                continue;
            }
            let Some(direction) = state.direction else { continue };
            state.own = SelfPhase::Running;
            tracing::debug!(%node, ?direction, "running");
            effects.push(Effect::Run { node, direction });
        }
    }

    fn start(&mut self, id: NodeId, effects: &mut Vec<Effect>) {
        if self.self_phase(id) == Some(SelfPhase::Ready) && self.is_transition_root(id) {
            self.make_running(id, effects);
        }
    }

    fn stop(&mut self, id: NodeId, effects: &mut Vec<Effect>) {
        let Some(node) = self.node_mut(id) else { return };
        if node.own != SelfPhase::Running {
            return;
        }
        node.own = SelfPhase::Finished;
        tracing::debug!(node = %id, "finished");
        self.try_done(id, effects);
    }

    fn try_done(&mut self, id: NodeId, effects: &mut Vec<Effect>) {
        if self.self_phase(id) != Some(SelfPhase::Finished) {
            return;
        }
        let waiting = self.children(id).iter().any(|child| {
            self.linked(id, *child) || self.node(*child).is_some_and(|node| node.joining)
        });
        if !waiting {
            self.complete(id, effects);
        }
    }

    fn complete(&mut self, id: NodeId, effects: &mut Vec<Effect>) {
        let Some(node) = self.node_mut(id) else { return };
        let reason = if node.container == ContainerPhase::Cancelled {
            Reason::Cancelled
        } else {
            Reason::Finished
        };
        let direction = node.direction;
        let started = std::mem::take(&mut node.started);
        let parent = node.parent;
        node.container = ContainerPhase::Done;
        node.own = SelfPhase::Idle;
        let children = node.children.clone();
        tracing::debug!(node = %id, ?reason, "done");

        for child in children {
            if let Some(child) = self.node_mut(child) {
                child.joining = false;
            }
        }

        if let (true, Some(direction)) = (started, direction) {
            effects.push(Effect::Stop {
                node: id,
                direction,
                reason,
            });
        }

        if let Some(parent) = parent {
            let waiting = self.node(parent).is_some_and(|p| {
                p.container.is_in_flight() && p.direction == direction
            });
            if waiting {
                self.try_done(parent, effects);
            }
        }
    }

    fn cancel(&mut self, id: NodeId, effects: &mut Vec<Effect>) {
        let in_flight = self
            .container_phase(id)
            .is_some_and(ContainerPhase::is_in_flight);
        if !in_flight {
            return;
        }

        let affected = self.linked_preorder(id);
        for node in &affected {
            if let Some(state) = self.node_mut(*node) {
                state.container = ContainerPhase::Cancelled;
            }
        }
        for node in affected.into_iter().rev() {
            if let Some(direction) = self.direction(node) {
                tracing::debug!(%node, ?direction, "cancelled");
                effects.push(Effect::Cancel { node, direction });
            }
            self.complete(node, effects);
        }
    }
}
