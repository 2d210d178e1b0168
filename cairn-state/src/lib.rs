//! Cairn State Management
//!
//! This crate implements the stack management protocol for the Cairn stack
//! orchestrator. Stacks live in a backend; every update-style operation runs
//! through a single state machine that serializes mutation with a per-stack
//! lock and persists the snapshot after each applied step.
//!
//! # Overview
//!
//! - **Backend**: the protocol every backend implements (stacks, updates,
//!   history, export/import)
//! - **Stack**: a handle on one stack, bound weakly to its backend
//! - **StateStore**: durable storage for stacks, snapshots, history and locks
//! - **ManagedBackend**: the protocol over any StateStore
//! - **UpdateResult**: tri-state result of an update-style operation
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use cairn_core::manifest::ManifestEngine;
//! use cairn_core::UpdateOperation;
//! use cairn_state::{create_backend, Backend, BackendConfig, CreateStackOptions};
//!
//! let config = BackendConfig::new("local")
//!     .with_attribute("path", serde_json::json!(".cairn"))
//!     .with_attribute("project", serde_json::json!("web"));
//! let engine = Arc::new(ManifestEngine::from_json(&manifest)?);
//! let backend = create_backend(&config, engine)?;
//!
//! let reference = backend.parse_stack_reference("dev")?;
//! let stack = backend.create_stack(&reference, CreateStackOptions::default()).await?;
//!
//! let outcome = stack.update(UpdateOperation::new()).await;
//! println!("{}", outcome.changes);
//! ```

pub mod backend;
pub mod backends;
pub mod history;
pub mod lock;
pub mod managed;
pub mod result;
pub mod stack;
pub mod store;
pub mod update;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types for convenience
pub use backend::{
    Backend, BackendConfig, BackendError, BackendResult, CreateStackOptions, ListStacksFilter,
    StackSummary, StackTags,
};
pub use backends::create_backend;
pub use history::{UpdateInfo, UpdateStatus};
pub use lock::LockInfo;
pub use managed::ManagedBackend;
pub use result::{UpdateOutcome, UpdateResult};
pub use stack::Stack;
pub use store::{StackRecord, StateStore};
