//! Cairn Core
//!
//! Domain types and capability traits shared by every Cairn backend: stack
//! references, snapshots, plans, the engine and crypter capabilities, and the
//! per-operation bundle that carries diagnostics and cancellation.

pub mod config;
pub mod crypter;
pub mod deployment;
pub mod diag;
pub mod differ;
pub mod engine;
pub mod logs;
pub mod manifest;
pub mod operation;
pub mod plan;
pub mod reference;
pub mod resource;
pub mod snapshot;

pub use deployment::{DEPLOYMENT_SCHEMA_VERSION, UntypedDeployment};
pub use engine::{Engine, EngineError, EngineResult, StepOutcome};
pub use operation::{UpdateKind, UpdateOperation, UpdateOptions};
pub use plan::{Plan, ResourceChanges, Step, StepOp};
pub use reference::{ParseError, StackName, StackReference};
pub use snapshot::Snapshot;
pub use tokio_util::sync::CancellationToken;
