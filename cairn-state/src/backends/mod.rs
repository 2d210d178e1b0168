//! Backend implementations

pub mod local;
pub mod memory;

use std::sync::Arc;

pub use local::LocalStore;
pub use memory::MemoryStore;

use cairn_core::Engine;
use cairn_core::reference::ReferenceDefaults;

use crate::backend::{Backend, BackendConfig, BackendError, BackendResult};
use crate::managed::ManagedBackend;
use crate::store::StateStore;

/// Create a backend from configuration
///
/// This function dispatches to the appropriate store implementation
/// based on the backend_type in the configuration.
pub fn create_backend(
    config: &BackendConfig,
    engine: Arc<dyn Engine>,
) -> BackendResult<Arc<dyn Backend>> {
    let store: Arc<dyn StateStore> = match config.backend_type.as_str() {
        "local" => Arc::new(LocalStore::from_config(config)?),
        "memory" => Arc::new(MemoryStore::from_config(config)?),
        other => return Err(BackendError::unsupported_backend(other)),
    };

    let backend = ManagedBackend::builder(store, engine)
        .defaults(reference_defaults(config))
        .build();
    log::debug!("using {} backend at {}", backend.name(), backend.url());
    Ok(backend)
}

fn reference_defaults(config: &BackendConfig) -> ReferenceDefaults {
    let organization = config
        .get_string("organization")
        .unwrap_or(ReferenceDefaults::DEFAULT_ORGANIZATION);
    let defaults = ReferenceDefaults::new(organization);
    match config.get_string("project") {
        Some(project) => defaults.with_project(project),
        None => defaults,
    }
}
