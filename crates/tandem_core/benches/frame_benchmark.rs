//! # Frame Loop Benchmark
//!
//! Measures one full tick over a populated scene:
//! 1. Frame hooks of many enabled behaviours
//! 2. Toggling a subtree root (enable/disable propagation)
//! 3. Registry queries down a deep hierarchy

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tandem_core::{Behaviour, ComponentKind, ComponentType, Context, HookContext, HookResult, Parent};

const NODE_COUNT: usize = 10_000;

#[derive(Default)]
struct Counter {
    ticks: u64,
}

impl ComponentKind for Counter {
    const TYPE: &'static ComponentType = &ComponentType::new("Counter");
}

impl Behaviour for Counter {
    fn component_type(&self) -> &'static ComponentType {
        Self::TYPE
    }

    fn update(&mut self, _cx: &mut HookContext<'_>) -> HookResult {
        self.ticks += 1;
        Ok(())
    }
}

fn populated_context() -> (Context, tandem_core::NodeId) {
    let mut cx = Context::new();
    let root = cx.create_node("root", Parent::Root).expect("root");
    for i in 0..NODE_COUNT {
        let node = cx.create_node(format!("n{i}"), Parent::Node(root)).expect("node");
        cx.attach(node, Counter::default());
    }
    (cx, root)
}

fn bench_tick(c: &mut Criterion) {
    let (mut cx, _) = populated_context();
    c.bench_function("tick_10k_behaviours", |b| {
        b.iter(|| black_box(cx.tick(1.0 / 60.0)));
    });
}

fn bench_toggle_subtree(c: &mut Criterion) {
    let (mut cx, root) = populated_context();
    c.bench_function("toggle_subtree_10k", |b| {
        b.iter(|| {
            cx.set_active(root, false);
            cx.set_active(root, true);
        });
    });
}

fn bench_deep_query(c: &mut Criterion) {
    let mut cx = Context::new();
    let mut parent = cx.create_node("root", Parent::Root).expect("root");
    let top = parent;
    for i in 0..256 {
        parent = cx.create_node(format!("d{i}"), Parent::Node(parent)).expect("node");
    }
    cx.attach(parent, Counter::default());
    c.bench_function("get_in_children_depth_256", |b| {
        b.iter(|| black_box(cx.scene().get_in_children::<Counter>(top, false)));
    });
}

criterion_group!(benches, bench_tick, bench_toggle_subtree, bench_deep_query);
criterion_main!(benches);
