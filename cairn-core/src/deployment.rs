//! Untyped deployments - the portable export/import form of a snapshot

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::snapshot::Snapshot;

/// Schema version written by `export` and required by `import`
pub const DEPLOYMENT_SCHEMA_VERSION: u32 = 3;

/// Reasons an untyped deployment cannot be imported
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeploymentError {
    #[error("deployment has no version tag")]
    MissingVersion,

    #[error("deployment version {0} is newer than this version of cairn supports")]
    TooNew(u32),

    #[error("deployment version {0} is no longer supported")]
    TooOld(u32),

    #[error("malformed deployment payload: {0}")]
    Malformed(String),

    #[error("deployment checksum does not match its resources")]
    ChecksumMismatch,
}

/// A snapshot in a backend-agnostic, versioned envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UntypedDeployment {
    pub version: u32,
    pub deployment: serde_json::Value,
}

impl UntypedDeployment {
    /// Wrap a snapshot at the current schema version
    pub fn from_snapshot(snapshot: &Snapshot) -> Result<Self, DeploymentError> {
        let deployment = serde_json::to_value(snapshot)
            .map_err(|e| DeploymentError::Malformed(e.to_string()))?;
        Ok(Self {
            version: DEPLOYMENT_SCHEMA_VERSION,
            deployment,
        })
    }

    /// Validate the envelope and decode the snapshot it carries
    ///
    /// Nothing is written anywhere; callers apply the result only when this
    /// succeeds.
    pub fn to_snapshot(&self) -> Result<Snapshot, DeploymentError> {
        match self.version {
            0 => return Err(DeploymentError::MissingVersion),
            v if v > DEPLOYMENT_SCHEMA_VERSION => return Err(DeploymentError::TooNew(v)),
            v if v < DEPLOYMENT_SCHEMA_VERSION => return Err(DeploymentError::TooOld(v)),
            _ => {}
        }

        let snapshot: Snapshot = serde_json::from_value(self.deployment.clone())
            .map_err(|e| DeploymentError::Malformed(e.to_string()))?;

        if snapshot.version != Snapshot::CURRENT_VERSION {
            return Err(DeploymentError::Malformed(format!(
                "snapshot version {} is not {}",
                snapshot.version,
                Snapshot::CURRENT_VERSION
            )));
        }
        if !snapshot.verify_checksum() {
            return Err(DeploymentError::ChecksumMismatch);
        }
        Ok(snapshot)
    }
}
