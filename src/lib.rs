//! # transition-fsm
//!
//! Hierarchical enter/leave transitions for class-list driven animations.
//!
//! A tree of nodes toggles between shown and hidden. Every node animates by
//! swapping CSS classes on an [`Element`], and a parent waits for all of its
//! children before its own transition counts as done. Before-callbacks of a
//! whole tree fire before any class is touched, after-callbacks fire
//! innermost first, and reversing a toggle mid-flight cancels cleanly.
//!
//! Timing goes through a [`Scheduler`]: [`VirtualScheduler`] for
//! deterministic tests and headless use, [`TokioScheduler`] on a Tokio
//! `LocalSet`.
//!
//! ## Example
//!
//! ```rust
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use transition_fsm::{
//!     ClassSet, Element, LifecycleCallbacks, TransitionTree, VirtualElement,
//!     VirtualScheduler,
//! };
//!
//! let scheduler = Rc::new(VirtualScheduler::new());
//! let tree = TransitionTree::new(scheduler.clone());
//! let log = Rc::new(RefCell::new(Vec::new()));
//! let element = Rc::new(VirtualElement::with_duration("150ms"));
//!
//! let sink = log.clone();
//! let dialog = tree
//!     .insert(
//!         None,
//!         Some(element.clone()),
//!         ClassSet::builder().enter("fade").enter_from("opacity-0").build(),
//!         LifecycleCallbacks::new().after_enter(move || sink.borrow_mut().push("dialog")),
//!     )
//!     .unwrap();
//! let sink = log.clone();
//! let backdrop = tree
//!     .insert(
//!         Some(dialog),
//!         Some(Rc::new(VirtualElement::new())),
//!         ClassSet::default(),
//!         LifecycleCallbacks::new().after_enter(move || sink.borrow_mut().push("backdrop")),
//!     )
//!     .unwrap();
//!
//! tree.set_show(dialog, true).unwrap();
//! assert!(element.has_class("opacity-0"));
//!
//! scheduler.advance(std::time::Duration::from_millis(500));
//! assert_eq!(*log.borrow(), ["backdrop", "dialog"]);
//! assert!(!element.has_class("fade"));
//! ```

pub mod controller;
pub mod driver;
pub mod error;
pub mod machine;
pub mod tree;

#[doc(inline)]
pub use crate::controller::{
    ControllerOptions, LifecycleCallbacks, TransitionController, TransitionFlags,
    TransitionSnapshot,
};
#[doc(inline)]
pub use crate::driver::{DriverOptions, TransitionHandle, transition, transition_with};
#[doc(inline)]
pub use crate::error::TreeError;
#[doc(inline)]
pub use crate::machine::{ContainerPhase, Effect, Event, NodeId, SelfPhase, TransitionMachine};
#[doc(inline)]
pub use crate::tree::TransitionTree;
#[doc(inline)]
pub use transition_fsm_core::{
    ClassPhase, ClassSet, ClassSetBuilder, CssTimeError, Direction, Disposables, Disposer,
    Element, Reason, Scheduler, SchedulerConfig, TokioScheduler, TransitionEventKind,
    VirtualElement, VirtualScheduler, css,
};
