//! # TANDEM Core
//!
//! Scene-graph runtime with an attached component model.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────── Context ────────────────────────────┐
//! │                                                                  │
//! │  Scene (arena)            Scheduler               Resources      │
//! │  ├── nodes                ├── frame callbacks     ├── connection │
//! │  └── components ────────► ├── enabled behaviours  └── type store │
//! │        ▲                  └── coroutines                         │
//! │        │                                                         │
//! │  Lifecycle manager: Awake → Enable ⇄ Disable → Destroy           │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Rules
//!
//! 1. **One logical thread**: hooks, callbacks and coroutines never overlap
//! 2. **Explicit context**: no process-wide "current scene"
//! 3. **Usage errors are logged**: stale handles never panic
//! 4. **Hook failures are contained**: one component cannot stop another

#![deny(missing_docs)]
#![deny(unsafe_code)]

mod arena;
pub mod component;
pub mod config;
pub mod context;
pub mod error;
pub mod lifecycle;
pub mod persistence;
pub mod resources;
pub mod scene;
pub mod scheduler;
pub mod time;

pub use component::{Behaviour, ComponentKind, ComponentType, LifecycleState};
pub use config::RuntimeConfig;
pub use context::{Context, HookContext};
pub use error::{
    BehaviourError, ConfigError, HookResult, PersistenceError, PersistenceResult, SceneError,
    SceneResult,
};
pub use lifecycle::AttachOptions;
pub use persistence::{
    export_nodes, import_document, instantiate, ComponentSchema, FieldDescriptor, FieldKind,
    FieldValue, Persistent, SceneDocument, TypeStore,
};
pub use resources::Resources;
pub use scene::{ComponentId, Guid, Node, NodeId, Parent, Scene};
pub use scheduler::{
    CallbackId, Coroutine, CoroutineId, CoroutineStep, FrameEvent, WaitCondition, WaitForFrames,
    WaitForSeconds,
};
pub use time::{FrameStats, Time};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
