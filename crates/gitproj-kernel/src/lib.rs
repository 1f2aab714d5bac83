//! gitproj-kernel: the core of gitproj.
//!
//! Projects a Git index as a virtual working directory:
//!
//! - **index**: Git index decoding (v2-v4) and the pooled trie builder
//! - **projection**: the lazily expanded trie, sparse inheritance, and the
//!   [`Projection`](projection::Projection) capability
//! - **dispatch**: OS virtualization callbacks and the protected-path policy
//! - **queue**: the durable background task queue and its applier
//! - **state**: SQLite-backed placeholder, sparse, modified-path and queue
//!   stores
//! - **git**: the Git object provider boundary
//! - **engine**: one mounted enlistment, tying the rest together

pub mod config;
pub mod dispatch;
pub mod engine;
pub mod git;
pub mod index;
pub mod pool;
pub mod projection;
pub mod queue;
pub mod state;

pub use config::{EngineConfig, ProjectionMode, QueueConfig};
pub use dispatch::{Dispatcher, VirtualizationCallbacks, VirtualizationInstance};
pub use engine::{Engine, EngineError, EngineHealth};
pub use git::GitObjectProvider;
pub use projection::{GitIndexProjection, Projection};
pub use queue::{TaskQueue, TaskSink};
pub use state::SqliteState;

#[cfg(feature = "native")]
pub use git::Git2ObjectStore;
