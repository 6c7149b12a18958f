use std::hint::black_box;
use std::rc::Rc;

use criterion::{Criterion, criterion_group, criterion_main};
use transition_fsm::{
    ClassSet, Event, LifecycleCallbacks, NodeId, TransitionMachine, TransitionTree,
    VirtualElement, VirtualScheduler,
};

/// A root with `width` children, each with `width` children of their own.
fn machine_tree(width: usize) -> (TransitionMachine, Vec<NodeId>) {
    let mut machine = TransitionMachine::new();
    let root = machine.insert();
    let mut nodes = vec![root];
    for _ in 0..width {
        let child = machine.insert();
        machine.add(root, child).unwrap();
        nodes.push(child);
        for _ in 0..width {
            let leaf = machine.insert();
            machine.add(child, leaf).unwrap();
            nodes.push(leaf);
        }
    }
    (machine, nodes)
}

/// Sends `event` to every node, starts the root and stops every node
/// innermost first. Returns the number of effects produced.
fn cycle(machine: &mut TransitionMachine, nodes: &[NodeId], event: Event) -> usize {
    let mut effects = 0;
    for node in nodes {
        effects += machine.send(*node, event).len();
    }
    effects += machine.send(nodes[0], Event::Start).len();
    for node in nodes.iter().rev() {
        effects += machine.send(*node, Event::Stop).len();
    }
    effects
}

fn benchmark_machine_cycles(c: &mut Criterion) {
    let (mut machine, nodes) = machine_tree(10);

    c.bench_function("machine_enter_leave_111_nodes", |b| {
        b.iter(|| {
            let entered = cycle(&mut machine, &nodes, Event::Enter);
            let left = cycle(&mut machine, &nodes, Event::Leave);
            black_box(entered + left)
        })
    });

    c.bench_function("machine_reversal_111_nodes", |b| {
        b.iter(|| {
            for node in &nodes {
                machine.send(*node, Event::Enter);
            }
            machine.send(nodes[0], Event::Start);
            let reversed = cycle(&mut machine, &nodes, Event::Leave);
            black_box(reversed)
        })
    });
}

fn benchmark_tree_toggles(c: &mut Criterion) {
    let scheduler = Rc::new(VirtualScheduler::new());
    let tree = TransitionTree::new(scheduler.clone());
    let classes = ClassSet::builder()
        .enter("transition")
        .enter_from("opacity-0")
        .enter_to("opacity-100")
        .leave("transition")
        .leave_from("opacity-100")
        .leave_to("opacity-0")
        .build();
    let root = tree
        .insert(
            None,
            Some(Rc::new(VirtualElement::new())),
            classes.clone(),
            LifecycleCallbacks::new(),
        )
        .unwrap();
    for _ in 0..20 {
        tree.insert(
            Some(root),
            Some(Rc::new(VirtualElement::new())),
            classes.clone(),
            LifecycleCallbacks::new(),
        )
        .unwrap();
    }

    c.bench_function("tree_toggle_21_elements", |b| {
        b.iter(|| {
            tree.set_show(root, true).unwrap();
            scheduler.advance_frames(2);
            tree.set_show(root, false).unwrap();
            scheduler.advance_frames(2);
            black_box(tree.is_visible(root))
        })
    });
}

criterion_group!(benches, benchmark_machine_cycles, benchmark_tree_toggles);
criterion_main!(benches);
