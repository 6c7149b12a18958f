//! Example: a disclosure panel with a staggered list, on tokio timers.
//!
//! The panel fades while its items slide. Items have different durations, so
//! the panel stays mounted until the slowest one has left. Class changes are
//! printed as they happen.

use std::rc::Rc;
use std::time::Duration;

use tokio::task::LocalSet;
use tokio::time::Instant;
use transition_fsm::{
    ClassSet, Element, LifecycleCallbacks, Scheduler, TokioScheduler, TransitionTree,
    VirtualElement,
};

fn logged(start: Instant, name: &'static str) -> LifecycleCallbacks {
    let at = move |event: &'static str| move || println!("{:>6?}  {name}: {event}", start.elapsed());
    LifecycleCallbacks::new()
        .before_enter(at("before enter"))
        .after_enter(at("after enter"))
        .before_leave(at("before leave"))
        .after_leave(at("after leave"))
        .on_cancel(move |direction| println!("{:>6?}  {name}: cancelled {direction:?}", start.elapsed()))
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    LocalSet::new().run_until(run()).await;
}

async fn run() {
    let scheduler: Rc<dyn Scheduler> = Rc::new(TokioScheduler::new());
    let tree = TransitionTree::new(scheduler);
    let start = Instant::now();

    let panel_element = Rc::new(VirtualElement::with_duration("150ms"));
    let panel = tree
        .insert(
            None,
            Some(panel_element.clone()),
            ClassSet::builder()
                .enter("transition-opacity")
                .enter_from("opacity-0")
                .enter_to("opacity-100")
                .leave("transition-opacity")
                .leave_from("opacity-100")
                .leave_to("opacity-0")
                .entered("open")
                .build(),
            logged(start, "panel"),
        )
        .expect("panel");

    let slide = ClassSet::builder()
        .base("item")
        .enter("transition-transform")
        .enter_from("-translate-y-2")
        .leave("transition-transform")
        .leave_to("-translate-y-2")
        .build();
    for (name, duration) in [("item 1", "100ms"), ("item 2", "200ms"), ("item 3", "300ms")] {
        tree.insert(
            Some(panel),
            Some(Rc::new(VirtualElement::with_duration(duration))),
            slide.clone(),
            logged(start, name),
        )
        .expect("item");
    }

    println!("-- open");
    tree.set_show(panel, true).expect("show");
    tokio::time::sleep(Duration::from_millis(400)).await;
    println!("panel classes: {:?}", panel_element.classes());

    println!("-- close, then change our mind halfway");
    tree.set_show(panel, false).expect("hide");
    tokio::time::sleep(Duration::from_millis(80)).await;
    tree.set_show(panel, true).expect("show");
    tokio::time::sleep(Duration::from_millis(400)).await;

    println!("-- close for good");
    tree.set_show(panel, false).expect("hide");
    while tree.is_visible(panel) {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    println!(
        "{:>6?}  panel unmounted, has open class: {}",
        start.elapsed(),
        panel_element.has_class("open")
    );
}
