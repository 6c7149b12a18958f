//! The DOM seam.
//!
//! The engine never talks to a browser directly. It drives anything that
//! implements [`Element`]: a `web_sys` wrapper in the browser, or the
//! headless [`VirtualElement`] shipped here.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// Native transition events a target can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransitionEventKind {
    /// `transitionrun`: a transition was created, possibly still in its delay.
    Run,
    /// `transitionstart`: the delay elapsed and the transition is animating.
    Start,
    /// `transitionend`: the transition completed.
    End,
    /// `transitioncancel`: the transition was aborted.
    Cancel,
}

/// Callback for a native transition event.
pub type Listener = Rc<dyn Fn(TransitionEventKind)>;

/// Identifies a registered listener.
///
/// Hosts mint ids with [`ListenerId::new`] from whatever handle their event
/// system returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

/// A node whose class list and inline style can be animated.
///
/// Implementations must only report events whose target is the node itself,
/// not events bubbling up from descendants.
pub trait Element {
    fn add_class(&self, token: &str);

    fn remove_class(&self, token: &str);

    fn has_class(&self, token: &str) -> bool;

    fn has_attribute(&self, name: &str) -> bool;

    fn remove_attribute(&self, name: &str);

    /// Inline style value, empty when unset.
    fn style_property(&self, name: &str) -> String;

    /// Sets an inline style value. An empty value removes the property.
    fn set_style_property(&self, name: &str, value: &str);

    /// Computed style value, as `getComputedStyle` reports it.
    fn computed_style_property(&self, name: &str) -> String;

    fn add_transition_listener(&self, kind: TransitionEventKind, listener: Listener) -> ListenerId;

    fn remove_transition_listener(&self, id: ListenerId);

    /// Flushes pending style changes (reading `offsetHeight` in a browser).
    fn force_reflow(&self);
}

/// Adds every token, in order.
pub fn add_classes<'a>(element: &dyn Element, tokens: impl IntoIterator<Item = &'a str>) {
    for token in tokens {
        element.add_class(token);
    }
}

/// Removes every token.
pub fn remove_classes<'a>(element: &dyn Element, tokens: impl IntoIterator<Item = &'a str>) {
    for token in tokens {
        element.remove_class(token);
    }
}

/// One change to a [`VirtualElement`]'s class list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassMutation {
    Added(String),
    Removed(String),
}

#[derive(Default)]
struct VirtualState {
    classes: Vec<String>,
    attributes: BTreeMap<String, String>,
    inline: BTreeMap<String, String>,
    stylesheet: BTreeMap<String, String>,
    listeners: Vec<(ListenerId, TransitionEventKind, Listener)>,
    next_listener: u64,
    history: Vec<ClassMutation>,
    reflows: usize,
}

/// Headless element.
///
/// Never fires transition events on its own: callers dispatch them with
/// [`VirtualElement::dispatch`], or rely on the driver's timeout fallback.
/// Every class mutation is recorded so tests can assert a class was never
/// applied.
#[derive(Default)]
pub struct VirtualElement {
    state: RefCell<VirtualState>,
}

impl VirtualElement {
    pub fn new() -> Self {
        Self::default()
    }

    /// A node carrying `transition-duration` in its inline style.
    pub fn with_duration(duration: &str) -> Self {
        let element = Self::new();
        element.set_style_property("transition-duration", duration);
        element
    }

    pub fn set_attribute(&self, name: &str, value: &str) {
        self.state
            .borrow_mut()
            .attributes
            .insert(name.to_owned(), value.to_owned());
    }

    pub fn attribute(&self, name: &str) -> Option<String> {
        self.state.borrow().attributes.get(name).cloned()
    }

    /// Sets a value as if it came from a stylesheet. Inline style wins.
    pub fn set_stylesheet_property(&self, name: &str, value: &str) {
        self.state
            .borrow_mut()
            .stylesheet
            .insert(name.to_owned(), value.to_owned());
    }

    /// Current class list, in insertion order.
    pub fn classes(&self) -> Vec<String> {
        self.state.borrow().classes.clone()
    }

    pub fn history(&self) -> Vec<ClassMutation> {
        self.state.borrow().history.clone()
    }

    /// Whether `token` was ever added.
    pub fn was_added(&self, token: &str) -> bool {
        self.state
            .borrow()
            .history
            .iter()
            .any(|mutation| matches!(mutation, ClassMutation::Added(added) if added == token))
    }

    pub fn clear_history(&self) {
        self.state.borrow_mut().history.clear();
    }

    pub fn listener_count(&self) -> usize {
        self.state.borrow().listeners.len()
    }

    pub fn reflow_count(&self) -> usize {
        self.state.borrow().reflows
    }

    /// Fires a native transition event at every matching listener.
    pub fn dispatch(&self, kind: TransitionEventKind) {
        let listeners: Vec<Listener> = self
            .state
            .borrow()
            .listeners
            .iter()
            .filter(|(_, registered, _)| *registered == kind)
            .map(|(_, _, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(kind);
        }
    }
}

impl fmt::Debug for VirtualElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("VirtualElement")
            .field("classes", &state.classes)
            .field("attributes", &state.attributes)
            .field("style", &state.inline)
            .field("listeners", &state.listeners.len())
            .finish()
    }
}

impl Element for VirtualElement {
    fn add_class(&self, token: &str) {
        let mut state = self.state.borrow_mut();
        if !state.classes.iter().any(|class| class == token) {
            state.classes.push(token.to_owned());
            state.history.push(ClassMutation::Added(token.to_owned()));
        }
    }

    fn remove_class(&self, token: &str) {
        let mut state = self.state.borrow_mut();
        if let Some(index) = state.classes.iter().position(|class| class == token) {
            state.classes.remove(index);
            state.history.push(ClassMutation::Removed(token.to_owned()));
        }
    }

    fn has_class(&self, token: &str) -> bool {
        self.state.borrow().classes.iter().any(|class| class == token)
    }

    fn has_attribute(&self, name: &str) -> bool {
        self.state.borrow().attributes.contains_key(name)
    }

    fn remove_attribute(&self, name: &str) {
        self.state.borrow_mut().attributes.remove(name);
    }

    fn style_property(&self, name: &str) -> String {
        self.state
            .borrow()
            .inline
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    fn set_style_property(&self, name: &str, value: &str) {
        let mut state = self.state.borrow_mut();
        if value.is_empty() {
            state.inline.remove(name);
        } else {
            state.inline.insert(name.to_owned(), value.to_owned());
        }
    }

    fn computed_style_property(&self, name: &str) -> String {
        let state = self.state.borrow();
        if let Some(value) = state.inline.get(name).or_else(|| state.stylesheet.get(name)) {
            return value.clone();
        }
        match name {
            "transition-duration" | "transition-delay" => "0s".to_owned(),
            _ => String::new(),
        }
    }

    fn add_transition_listener(&self, kind: TransitionEventKind, listener: Listener) -> ListenerId {
        let mut state = self.state.borrow_mut();
        state.next_listener += 1;
        let id = ListenerId::new(state.next_listener);
        state.listeners.push((id, kind, listener));
        id
    }

    fn remove_transition_listener(&self, id: ListenerId) {
        self.state
            .borrow_mut()
            .listeners
            .retain(|(registered, _, _)| *registered != id);
    }

    fn force_reflow(&self) {
        self.state.borrow_mut().reflows += 1;
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[test]
    fn class_history_tracks_effective_changes() {
        let element = VirtualElement::new();
        add_classes(&element, ["a", "b", "a"]);
        remove_classes(&element, ["a", "missing"]);

        assert_eq!(element.classes(), ["b"]);
        assert_eq!(
            element.history(),
            [
                ClassMutation::Added("a".into()),
                ClassMutation::Added("b".into()),
                ClassMutation::Removed("a".into()),
            ]
        );
        assert!(element.was_added("a"));
        assert!(!element.was_added("missing"));
    }

    #[test]
    fn inline_style_wins_over_stylesheet() {
        let element = VirtualElement::new();
        assert_eq!(element.computed_style_property("transition-duration"), "0s");
        element.set_stylesheet_property("transition-duration", "1s");
        assert_eq!(element.computed_style_property("transition-duration"), "1s");
        element.set_style_property("transition-duration", "20ms");
        assert_eq!(element.computed_style_property("transition-duration"), "20ms");
        element.set_style_property("transition-duration", "");
        assert_eq!(element.computed_style_property("transition-duration"), "1s");
    }

    #[test]
    fn dispatch_reaches_matching_listeners_only() {
        let element = VirtualElement::new();
        let hits = Rc::new(Cell::new(0));
        let sink = hits.clone();
        let id = element.add_transition_listener(
            TransitionEventKind::End,
            Rc::new(move |_| sink.set(sink.get() + 1)),
        );

        element.dispatch(TransitionEventKind::Run);
        element.dispatch(TransitionEventKind::End);
        assert_eq!(hits.get(), 1);

        element.remove_transition_listener(id);
        element.dispatch(TransitionEventKind::End);
        assert_eq!(hits.get(), 1);
        assert_eq!(element.listener_count(), 0);
    }

    #[test]
    fn listener_ids_are_distinct_and_round_trip_through_raw() {
        let element = VirtualElement::new();
        let first = element.add_transition_listener(TransitionEventKind::Run, Rc::new(|_| {}));
        let second = element.add_transition_listener(TransitionEventKind::Run, Rc::new(|_| {}));
        assert_ne!(first, second);
        assert_eq!(second.get(), first.get() + 1);

        element.remove_transition_listener(ListenerId::new(first.get()));
        assert_eq!(element.listener_count(), 1);
    }
}
