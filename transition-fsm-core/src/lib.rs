//! Runtime primitives for transition-fsm.
//!
//! Nothing here knows about the transition state machine. This crate holds
//! the pieces it runs on: the cleanup registry, the event loop seam, the
//! element seam and class configuration.

pub mod classes;
pub mod css;
pub mod disposables;
pub mod element;
pub mod error;
pub mod scheduler;

pub use classes::{ClassPhase, ClassSet, ClassSetBuilder};
pub use disposables::{Disposables, Disposer};
pub use element::{
    ClassMutation, Element, Listener, ListenerId, TransitionEventKind, VirtualElement,
};
pub use error::CssTimeError;
pub use scheduler::{Scheduler, SchedulerConfig, Task, TaskId, TokioScheduler, VirtualScheduler};

/// Direction of a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// The node is becoming visible.
    Enter,
    /// The node is becoming hidden.
    Leave,
}

impl Direction {
    /// `Enter` for `true`, `Leave` for `false`.
    pub fn from_show(show: bool) -> Self {
        if show { Self::Enter } else { Self::Leave }
    }

    pub fn is_enter(self) -> bool {
        matches!(self, Self::Enter)
    }
}

/// Why a transition stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reason {
    /// The animation ran to completion, or there was nothing to animate.
    Finished,
    /// The transition was interrupted before it settled.
    Cancelled,
}
