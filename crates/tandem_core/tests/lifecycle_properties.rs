//! Integration tests for registry queries, lifecycle ordering and
//! owner-bound coroutines.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use tandem_core::scheduler::from_fn;
use tandem_core::{
    AttachOptions, Behaviour, ComponentKind, ComponentType, Context, CoroutineStep, FrameEvent,
    HookContext, HookResult, LifecycleState, Parent,
};

type Counts = Rc<RefCell<HashMap<(&'static str, &'static str), u32>>>;

enum Renderer {}
impl ComponentKind for Renderer {
    const TYPE: &'static ComponentType = &ComponentType::new("Renderer");
}

struct MeshRenderer {
    name: &'static str,
    counts: Counts,
}

impl ComponentKind for MeshRenderer {
    const TYPE: &'static ComponentType = &ComponentType::with_base("MeshRenderer", Renderer::TYPE);
}

impl MeshRenderer {
    fn new(name: &'static str, counts: &Counts) -> Self {
        Self { name, counts: Rc::clone(counts) }
    }

    fn bump(&self, hook: &'static str) {
        *self.counts.borrow_mut().entry((self.name, hook)).or_default() += 1;
    }
}

impl Behaviour for MeshRenderer {
    fn component_type(&self) -> &'static ComponentType {
        Self::TYPE
    }
    fn awake(&mut self, _cx: &mut HookContext<'_>) -> HookResult {
        assert_eq!(self.count("enable"), 0, "awake after enable");
        self.bump("awake");
        Ok(())
    }
    fn on_enable(&mut self, _cx: &mut HookContext<'_>) -> HookResult {
        self.bump("enable");
        Ok(())
    }
    fn on_disable(&mut self, _cx: &mut HookContext<'_>) -> HookResult {
        self.bump("disable");
        assert_eq!(self.count("enable"), self.count("disable"), "disable without enable");
        Ok(())
    }
    fn update(&mut self, _cx: &mut HookContext<'_>) -> HookResult {
        self.bump("update");
        Ok(())
    }
}

impl MeshRenderer {
    fn count(&self, hook: &'static str) -> u32 {
        self.counts.borrow().get(&(self.name, hook)).copied().unwrap_or(0)
    }
}

struct Collider;
impl ComponentKind for Collider {
    const TYPE: &'static ComponentType = &ComponentType::new("Collider");
}
impl Behaviour for Collider {
    fn component_type(&self) -> &'static ComponentType {
        Self::TYPE
    }
}

fn counts() -> Counts {
    Rc::new(RefCell::new(HashMap::new()))
}

fn count(counts: &Counts, name: &'static str, hook: &'static str) -> u32 {
    counts.borrow().get(&(name, hook)).copied().unwrap_or(0)
}

#[test]
fn test_queries_match_supertypes() {
    let mut cx = Context::new();
    let c = counts();
    let node = cx.create_node("n", Parent::Root).unwrap();
    cx.attach(node, Collider);
    let mesh = cx.attach(node, MeshRenderer::new("mesh", &c)).unwrap();

    assert_eq!(cx.scene().get::<Renderer>(node), Some(mesh));
    assert_eq!(cx.scene().get::<MeshRenderer>(node), Some(mesh));
    assert_eq!(cx.scene().get_all::<Renderer>(node), vec![mesh]);
    assert!(cx.scene().component::<MeshRenderer>(mesh).is_some());
}

#[test]
fn test_nearest_match_wins() {
    let mut cx = Context::new();
    let c = counts();
    let root = cx.create_node("root", Parent::Root).unwrap();
    let mid = cx.create_node("mid", Parent::Node(root)).unwrap();
    let leaf = cx.create_node("leaf", Parent::Node(mid)).unwrap();
    let on_root = cx.attach(root, MeshRenderer::new("root", &c)).unwrap();
    let on_leaf = cx.attach(leaf, MeshRenderer::new("leaf", &c)).unwrap();

    assert_eq!(cx.scene().get_in_parent::<Renderer>(leaf), Some(on_leaf));
    assert_eq!(cx.scene().get_in_parent::<Renderer>(mid), Some(on_root));
    assert_eq!(cx.scene().get_in_children::<Renderer>(root, false), Some(on_root));
    assert_eq!(cx.scene().get_in_children::<Renderer>(mid, false), Some(on_leaf));
    assert_eq!(cx.scene().get_all_in_parent::<Renderer>(leaf), vec![on_leaf, on_root]);

    cx.set_active(leaf, false);
    assert_eq!(cx.scene().get_in_children::<Renderer>(mid, false), None);
    assert_eq!(cx.scene().get_in_children::<Renderer>(mid, true), Some(on_leaf));
    assert_eq!(cx.scene().find_objects_of_type::<Renderer>(false), vec![on_root]);
}

#[test]
fn test_repeated_ancestor_toggles_pair_hooks() {
    let mut cx = Context::new();
    let c = counts();
    let root = cx.create_node("root", Parent::Root).unwrap();
    let a = cx.create_node("a", Parent::Node(root)).unwrap();
    let b = cx.create_node("b", Parent::Node(a)).unwrap();
    cx.attach(a, MeshRenderer::new("a", &c));
    cx.attach(b, MeshRenderer::new("b", &c));

    let toggles = [(root, false), (a, false), (root, true), (a, true), (b, false), (b, true), (root, false)];
    for (node, active) in toggles {
        cx.set_active(node, active);
    }

    assert_eq!(count(&c, "a", "awake"), 1);
    assert_eq!(count(&c, "b", "awake"), 1);
    // a: on, off(root), on(a), off(root)
    assert_eq!(count(&c, "a", "enable"), 2);
    assert_eq!(count(&c, "a", "disable"), 2);
    // b: on, off(root), on(a), off(b), on(b), off(root)
    assert_eq!(count(&c, "b", "enable"), 3);
    assert_eq!(count(&c, "b", "disable"), 3);
}

#[test]
fn test_disabled_component_gets_awake_but_no_update() {
    let mut cx = Context::new();
    let c = counts();
    let node = cx.create_node("n", Parent::Root).unwrap();
    let id = cx
        .attach_with(node, MeshRenderer::new("off", &c), AttachOptions::new().enabled(false))
        .unwrap();
    for _ in 0..5 {
        cx.tick(0.016);
    }
    assert_eq!(count(&c, "off", "awake"), 1);
    assert_eq!(count(&c, "off", "update"), 0);
    assert_eq!(cx.scene().lifecycle_state(id), Some(LifecycleState::Awake));
}

#[test]
fn test_owned_coroutine_pauses_and_dies_with_owner() {
    let mut cx = Context::new();
    let c = counts();
    let node = cx.create_node("n", Parent::Root).unwrap();
    let owner = cx.attach(node, MeshRenderer::new("owner", &c)).unwrap();
    let steps = Rc::new(RefCell::new(0));
    let counter = Rc::clone(&steps);
    cx.start_coroutine(
        Some(owner),
        FrameEvent::Update,
        from_fn(move |_, _| {
            *counter.borrow_mut() += 1;
            Ok(CoroutineStep::Yield)
        }),
    );

    cx.tick(0.016);
    cx.set_enabled(owner, false);
    cx.tick(0.016);
    cx.tick(0.016);
    assert_eq!(*steps.borrow(), 1);

    cx.set_enabled(owner, true);
    cx.tick(0.016);
    assert_eq!(*steps.borrow(), 2);

    cx.destroy_component(owner);
    cx.tick(0.016);
    assert_eq!(*steps.borrow(), 2);
    assert_eq!(cx.scheduler().coroutine_count(), 0);
}

#[test]
fn test_stale_handles_are_safe() {
    let mut cx = Context::new();
    let c = counts();
    let node = cx.create_node("n", Parent::Root).unwrap();
    let id = cx.attach(node, MeshRenderer::new("gone", &c)).unwrap();
    cx.destroy_node(node);

    assert!(cx.scene().get::<Renderer>(node).is_none());
    assert!(!cx.set_enabled(id, true));
    assert!(!cx.destroy_component(id));
    assert!(!cx.set_active(node, true));
    assert!(cx.create_node("child", Parent::Node(node)).is_err());
}
