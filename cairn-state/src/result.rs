//! Outcomes of update-style operations

use cairn_core::ResourceChanges;

use crate::backend::BackendError;
use crate::history::UpdateStatus;

/// Tri-state result of an update-style operation
///
/// `Bailed` means cancellation was observed and the operation stopped after
/// the last durably committed step. It is not a failure.
#[derive(Debug)]
pub enum UpdateResult {
    Succeeded,
    Failed(BackendError),
    Bailed,
}

impl UpdateResult {
    pub fn is_succeeded(&self) -> bool {
        matches!(self, UpdateResult::Succeeded)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, UpdateResult::Failed(_))
    }

    pub fn is_bailed(&self) -> bool {
        matches!(self, UpdateResult::Bailed)
    }

    pub fn error(&self) -> Option<&BackendError> {
        match self {
            UpdateResult::Failed(e) => Some(e),
            _ => None,
        }
    }

    /// How the result is recorded in history
    pub fn status(&self) -> UpdateStatus {
        match self {
            UpdateResult::Succeeded => UpdateStatus::Succeeded,
            UpdateResult::Failed(_) => UpdateStatus::Failed,
            UpdateResult::Bailed => UpdateStatus::Cancelled,
        }
    }
}

/// Changes made by an operation together with how it ended
#[derive(Debug)]
pub struct UpdateOutcome {
    /// Durably applied changes, or planned changes for a preview
    pub changes: ResourceChanges,
    pub result: UpdateResult,
}

impl UpdateOutcome {
    pub fn new(changes: ResourceChanges, result: UpdateResult) -> Self {
        Self { changes, result }
    }

    /// An operation that failed before changing anything
    pub fn failed(error: BackendError) -> Self {
        Self::new(ResourceChanges::default(), UpdateResult::Failed(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_status() {
        assert_eq!(UpdateResult::Succeeded.status(), UpdateStatus::Succeeded);
        assert_eq!(UpdateResult::Bailed.status(), UpdateStatus::Cancelled);

        let failed = UpdateResult::Failed(BackendError::validation("nope"));
        assert_eq!(failed.status(), UpdateStatus::Failed);
        assert!(failed.is_failed());
        assert!(failed.error().unwrap().is_validation());
        assert!(UpdateResult::Bailed.error().is_none());
    }

    #[test]
    fn failed_outcome_has_no_changes() {
        let outcome = UpdateOutcome::failed(BackendError::persistence("disk full"));
        assert_eq!(outcome.changes.total(), 0);
        assert!(outcome.result.is_failed());
    }
}
