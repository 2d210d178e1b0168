//! Snapshot - the durable record of a stack's last-known resource state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::resource::{ResourceId, ResourceState};

/// Write metadata for a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// When the snapshot was last written
    pub time: DateTime<Utc>,
    /// blake3 digest of the resource list
    pub checksum: String,
}

impl Manifest {
    fn for_resources(resources: &[ResourceState]) -> Self {
        Self {
            time: Utc::now(),
            checksum: compute_checksum(resources),
        }
    }
}

/// The snapshot structure persisted by every store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Snapshot format version
    pub version: u32,
    /// Monotonically increasing number for each snapshot write
    pub serial: u64,
    /// Unique identifier for this state lineage (prevents accidental overwrites)
    pub lineage: String,
    /// Version of Cairn that last wrote this snapshot
    pub tool_version: String,
    pub manifest: Manifest,
    /// All managed resources and their current state
    pub resources: Vec<ResourceState>,
}

impl Snapshot {
    /// Current snapshot format version
    pub const CURRENT_VERSION: u32 = 1;

    /// Create a new empty snapshot
    pub fn new() -> Self {
        Self::with_lineage(uuid::Uuid::new_v4().to_string())
    }

    /// Create a new snapshot with a specific lineage
    pub fn with_lineage(lineage: String) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            serial: 0,
            lineage,
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            manifest: Manifest::for_resources(&[]),
            resources: Vec::new(),
        }
    }

    /// Prepare the snapshot for a new write
    ///
    /// Bumps the serial and recomputes the manifest over the current resources.
    pub fn advance(&mut self) {
        self.serial += 1;
        self.tool_version = env!("CARGO_PKG_VERSION").to_string();
        self.manifest = Manifest::for_resources(&self.resources);
    }

    /// Whether the manifest checksum matches the resource list
    pub fn verify_checksum(&self) -> bool {
        self.manifest.checksum == compute_checksum(&self.resources)
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn find_resource(&self, id: &ResourceId) -> Option<&ResourceState> {
        self.resources.iter().find(|r| r.is(id))
    }

    /// Add or update a resource in the snapshot
    pub fn upsert_resource(&mut self, resource: ResourceState) {
        let id = resource.id();
        if let Some(existing) = self.resources.iter_mut().find(|r| r.is(&id)) {
            *existing = resource;
        } else {
            self.resources.push(resource);
        }
    }

    /// Remove a resource from the snapshot
    pub fn remove_resource(&mut self, id: &ResourceId) -> Option<ResourceState> {
        let pos = self.resources.iter().position(|r| r.is(id))?;
        Some(self.resources.remove(pos))
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::new()
    }
}

/// Digest of a resource list, independent of write time and serial
pub fn compute_checksum(resources: &[ResourceState]) -> String {
    let mut hasher = blake3::Hasher::new();
    for resource in resources {
        hasher.update(resource.resource_type.as_bytes());
        hasher.update(&[0]);
        hasher.update(resource.name.as_bytes());
        hasher.update(&[0]);
        hasher.update(resource.provider.as_bytes());
        hasher.update(&[0]);
        for (key, value) in &resource.attributes {
            hasher.update(key.as_bytes());
            hasher.update(&[1]);
            hasher.update(value.to_string().as_bytes());
            hasher.update(&[1]);
        }
        hasher.update(&[2]);
    }
    hasher.finalize().to_hex().to_string()
}
