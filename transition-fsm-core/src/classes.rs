//! Named class-token sets for each transition phase.

use crate::Direction;

/// A phase of a transition that carries its own class tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClassPhase {
    /// Applied for the whole duration of either direction.
    Base,
    /// Applied while entering.
    Enter,
    /// Starting state of an enter.
    EnterFrom,
    /// Ending state of an enter.
    EnterTo,
    /// Applied while leaving.
    Leave,
    /// Starting state of a leave.
    LeaveFrom,
    /// Ending state of a leave.
    LeaveTo,
    /// Steady state once an enter has settled.
    Entered,
}

impl ClassPhase {
    /// Every phase, in application order.
    pub const ALL: [ClassPhase; 8] = [
        ClassPhase::Base,
        ClassPhase::Enter,
        ClassPhase::EnterFrom,
        ClassPhase::EnterTo,
        ClassPhase::Leave,
        ClassPhase::LeaveFrom,
        ClassPhase::LeaveTo,
        ClassPhase::Entered,
    ];
}

/// Immutable class configuration for one transition.
///
/// Each phase holds an ordered, de-duplicated list of class tokens. Build one
/// with [`ClassSet::builder`]; the engine only ever reads it.
///
/// ```rust
/// use transition_fsm_core::{ClassPhase, ClassSet};
///
/// let classes = ClassSet::builder()
///     .enter("transition ease-out duration-100")
///     .enter_from("opacity-0 scale-95")
///     .enter_to("opacity-100 scale-100")
///     .build();
///
/// assert_eq!(classes.get(ClassPhase::EnterFrom), ["opacity-0", "scale-95"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassSet {
    base: Vec<String>,
    enter: Vec<String>,
    enter_from: Vec<String>,
    enter_to: Vec<String>,
    leave: Vec<String>,
    leave_from: Vec<String>,
    leave_to: Vec<String>,
    entered: Vec<String>,
}

impl ClassSet {
    /// Starts an empty builder.
    pub fn builder() -> ClassSetBuilder {
        ClassSetBuilder::default()
    }

    /// Tokens for a single phase.
    pub fn get(&self, phase: ClassPhase) -> &[String] {
        match phase {
            ClassPhase::Base => &self.base,
            ClassPhase::Enter => &self.enter,
            ClassPhase::EnterFrom => &self.enter_from,
            ClassPhase::EnterTo => &self.enter_to,
            ClassPhase::Leave => &self.leave,
            ClassPhase::LeaveFrom => &self.leave_from,
            ClassPhase::LeaveTo => &self.leave_to,
            ClassPhase::Entered => &self.entered,
        }
    }

    /// `enter` or `leave` tokens.
    pub fn active(&self, direction: Direction) -> &[String] {
        match direction {
            Direction::Enter => &self.enter,
            Direction::Leave => &self.leave,
        }
    }

    /// `enterFrom` or `leaveFrom` tokens.
    pub fn starting(&self, direction: Direction) -> &[String] {
        match direction {
            Direction::Enter => &self.enter_from,
            Direction::Leave => &self.leave_from,
        }
    }

    /// `enterTo` or `leaveTo` tokens.
    pub fn ending(&self, direction: Direction) -> &[String] {
        match direction {
            Direction::Enter => &self.enter_to,
            Direction::Leave => &self.leave_to,
        }
    }

    /// Every token known to any phase. A token listed under two phases is
    /// yielded twice.
    pub fn all(&self) -> impl Iterator<Item = &str> + '_ {
        ClassPhase::ALL
            .into_iter()
            .flat_map(move |phase| self.get(phase).iter().map(String::as_str))
    }

    /// Whether no phase carries any token.
    pub fn is_empty(&self) -> bool {
        self.all().next().is_none()
    }
}

/// Builder for [`ClassSet`]. Every setter takes a whitespace separated list.
#[derive(Debug, Clone, Default)]
pub struct ClassSetBuilder {
    set: ClassSet,
}

impl ClassSetBuilder {
    /// Sets tokens for an arbitrary phase.
    pub fn phase(mut self, phase: ClassPhase, tokens: &str) -> Self {
        let slot = match phase {
            ClassPhase::Base => &mut self.set.base,
            ClassPhase::Enter => &mut self.set.enter,
            ClassPhase::EnterFrom => &mut self.set.enter_from,
            ClassPhase::EnterTo => &mut self.set.enter_to,
            ClassPhase::Leave => &mut self.set.leave,
            ClassPhase::LeaveFrom => &mut self.set.leave_from,
            ClassPhase::LeaveTo => &mut self.set.leave_to,
            ClassPhase::Entered => &mut self.set.entered,
        };
        *slot = tokenize(tokens);
        self
    }

    pub fn base(self, tokens: &str) -> Self {
        self.phase(ClassPhase::Base, tokens)
    }

    pub fn enter(self, tokens: &str) -> Self {
        self.phase(ClassPhase::Enter, tokens)
    }

    pub fn enter_from(self, tokens: &str) -> Self {
        self.phase(ClassPhase::EnterFrom, tokens)
    }

    pub fn enter_to(self, tokens: &str) -> Self {
        self.phase(ClassPhase::EnterTo, tokens)
    }

    pub fn leave(self, tokens: &str) -> Self {
        self.phase(ClassPhase::Leave, tokens)
    }

    pub fn leave_from(self, tokens: &str) -> Self {
        self.phase(ClassPhase::LeaveFrom, tokens)
    }

    pub fn leave_to(self, tokens: &str) -> Self {
        self.phase(ClassPhase::LeaveTo, tokens)
    }

    pub fn entered(self, tokens: &str) -> Self {
        self.phase(ClassPhase::Entered, tokens)
    }

    /// Finishes the set.
    #[must_use]
    pub fn build(self) -> ClassSet {
        self.set
    }
}

fn tokenize(tokens: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for token in tokens.split_whitespace() {
        if !out.iter().any(|existing| existing == token) {
            out.push(token.to_owned());
        }
    }
    out
}
