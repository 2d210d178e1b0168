//! Update operations - how to run one lifecycle operation against a stack

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::StackConfiguration;
use crate::diag::{DiagnosticSink, LogSink};
use crate::resource::ResourceId;

/// The six update-style operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateKind {
    Preview,
    Update,
    Refresh,
    Destroy,
    Watch,
    Query,
}

impl UpdateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateKind::Preview => "preview",
            UpdateKind::Update => "update",
            UpdateKind::Refresh => "refresh",
            UpdateKind::Destroy => "destroy",
            UpdateKind::Watch => "watch",
            UpdateKind::Query => "query",
        }
    }

    /// Whether the operation writes snapshots and history
    pub fn mutates_state(&self) -> bool {
        matches!(
            self,
            UpdateKind::Update | UpdateKind::Refresh | UpdateKind::Destroy
        )
    }

    /// Whether the operation holds the stack's exclusive lock
    pub fn requires_lock(&self) -> bool {
        !matches!(self, UpdateKind::Query)
    }
}

impl fmt::Display for UpdateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engine and protocol options for one operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Restrict the operation to these resources (empty means all)
    pub targets: Vec<ResourceId>,
    /// Fail before applying anything if the plan has changes
    pub expect_no_changes: bool,
    /// Delay between watch rounds
    pub watch_interval: Duration,
    /// Stop watching after this many rounds (None watches until cancelled)
    pub watch_rounds: Option<u32>,
}

impl UpdateOptions {
    pub const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_secs(2);

    pub fn targets(&self, id: &ResourceId) -> bool {
        self.targets.is_empty() || self.targets.contains(id)
    }
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            expect_no_changes: false,
            watch_interval: Self::DEFAULT_WATCH_INTERVAL,
            watch_rounds: None,
        }
    }
}

/// Descriptive metadata recorded in history
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateMetadata {
    pub message: Option<String>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

/// Everything needed to run a single update-style operation
///
/// Operations take it by value, so one bundle serves exactly one call.
pub struct UpdateOperation {
    pub options: UpdateOptions,
    pub metadata: UpdateMetadata,
    pub config: StackConfiguration,
    diagnostics: Arc<dyn DiagnosticSink>,
    cancellation: CancellationToken,
}

impl UpdateOperation {
    /// Default options, diagnostics sent to the log, never cancelled
    pub fn new() -> Self {
        Self {
            options: UpdateOptions::default(),
            metadata: UpdateMetadata::default(),
            config: StackConfiguration::default(),
            diagnostics: Arc::new(LogSink),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_options(mut self, options: UpdateOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_metadata(mut self, metadata: UpdateMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_config(mut self, config: StackConfiguration) -> Self {
        self.config = config;
        self
    }

    pub fn with_diagnostics(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.diagnostics = sink;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn diagnostics(&self) -> &dyn DiagnosticSink {
        self.diagnostics.as_ref()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

impl Default for UpdateOperation {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for UpdateOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateOperation")
            .field("options", &self.options)
            .field("metadata", &self.metadata)
            .field("config", &self.config)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}
