use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use tokio::task::LocalSet;
use tokio::time::Instant;
use transition_fsm::{
    ClassSet, Direction, Element, Reason, Scheduler, SchedulerConfig, TokioScheduler,
    TransitionEventKind, VirtualElement, VirtualScheduler, transition,
};

fn classes() -> ClassSet {
    ClassSet::builder()
        .enter("enter")
        .enter_from("from")
        .enter_to("to")
        .build()
}

fn frame() -> Duration {
    SchedulerConfig::default().frame_interval
}

#[test]
fn zero_duration_settles_in_the_same_turn_as_the_swap() {
    let scheduler = Rc::new(VirtualScheduler::new());
    let node = Rc::new(VirtualElement::new());
    let element: Rc<dyn Element> = node.clone();
    let dyn_scheduler: Rc<dyn Scheduler> = scheduler.clone();

    let done = Rc::new(Cell::new(None));
    let sink = done.clone();
    let settled_with_to = Rc::new(Cell::new(false));
    let probe = node.clone();
    let seen = settled_with_to.clone();
    transition(&element, &classes(), Direction::Enter, &dyn_scheduler, move |reason| {
        seen.set(probe.was_added("to"));
        sink.set(Some(reason));
    });

    scheduler.advance_frames(1);
    assert_eq!(done.get(), None);
    scheduler.advance_frames(1);
    assert_eq!(done.get(), Some(Reason::Finished));
    assert!(settled_with_to.get());
}

#[tokio::test(start_paused = true)]
async fn completion_waits_for_the_duration_after_the_swap() {
    LocalSet::new()
        .run_until(async {
            let scheduler: Rc<dyn Scheduler> = Rc::new(TokioScheduler::new());
            let element: Rc<dyn Element> = Rc::new(VirtualElement::with_duration("20ms"));
            let start = Instant::now();

            let handle = transition(&element, &classes(), Direction::Enter, &scheduler, |_| {});
            assert_eq!(handle.finished().await, Reason::Finished);

            let elapsed = start.elapsed();
            let swap = frame() * 2;
            assert!(elapsed >= swap + Duration::from_millis(20), "{elapsed:?}");
            assert!(elapsed < swap + Duration::from_millis(20) + frame(), "{elapsed:?}");
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn completion_includes_the_delay() {
    LocalSet::new()
        .run_until(async {
            let scheduler: Rc<dyn Scheduler> = Rc::new(TokioScheduler::new());
            let node = Rc::new(VirtualElement::with_duration("20ms"));
            node.set_stylesheet_property("transition-delay", "100ms");
            let element: Rc<dyn Element> = node.clone();
            let start = Instant::now();

            let handle = transition(&element, &classes(), Direction::Enter, &scheduler, |_| {});
            assert_eq!(handle.finished().await, Reason::Finished);

            let elapsed = start.elapsed();
            let swap = frame() * 2;
            assert!(elapsed >= swap + Duration::from_millis(120), "{elapsed:?}");
            assert!(elapsed < swap + Duration::from_millis(120) + frame(), "{elapsed:?}");
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn cancelling_early_never_applies_the_to_classes() {
    LocalSet::new()
        .run_until(async {
            let scheduler: Rc<dyn Scheduler> = Rc::new(TokioScheduler::new());
            let node = Rc::new(VirtualElement::with_duration("5000ms"));
            let element: Rc<dyn Element> = node.clone();
            let reason = Rc::new(Cell::new(None));
            let sink = reason.clone();

            let handle = transition(&element, &classes(), Direction::Enter, &scheduler, move |r| {
                sink.set(Some(r));
            });
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.cancel();

            assert_eq!(reason.get(), Some(Reason::Cancelled));
            assert_eq!(handle.finished().await, Reason::Cancelled);

            tokio::time::sleep(Duration::from_millis(200)).await;
            assert!(!node.was_added("to"));
            assert!(node.has_class("from"));
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn native_end_event_finishes_early() {
    LocalSet::new()
        .run_until(async {
            let scheduler: Rc<dyn Scheduler> = Rc::new(TokioScheduler::new());
            let node = Rc::new(VirtualElement::with_duration("1s"));
            let element: Rc<dyn Element> = node.clone();
            let start = Instant::now();

            let handle = transition(&element, &classes(), Direction::Enter, &scheduler, |_| {});
            tokio::time::sleep(frame() * 3).await;
            node.dispatch(TransitionEventKind::Run);
            node.dispatch(TransitionEventKind::End);

            assert_eq!(handle.finished().await, Reason::Finished);
            assert!(start.elapsed() < Duration::from_millis(100));
            assert!(!node.has_class("enter"));
            assert_eq!(node.listener_count(), 0);
        })
        .await;
}
