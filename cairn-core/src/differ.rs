//! Differ - Compare desired resources with a snapshot to generate a Plan
//!
//! Compares the desired resources declared by a program with the resources
//! recorded in the current snapshot, and generates the steps (Plan) needed to
//! reconcile them.

use std::collections::{BTreeMap, HashSet};

use crate::plan::{Plan, Step};
use crate::resource::{ResourceId, ResourceState};
use crate::snapshot::Snapshot;

/// Result of a diff operation
#[derive(Debug, Clone, PartialEq)]
pub enum Diff {
    /// Resource is not recorded -> needs creation
    Create(ResourceState),
    /// Resource is recorded with differences -> needs update
    Update {
        to: ResourceState,
        changed_attributes: Vec<String>,
    },
    /// A change can only be made by recreating the resource
    Replace {
        to: ResourceState,
        changed_attributes: Vec<String>,
    },
    /// Resource is recorded with no differences -> no action needed
    NoChange(ResourceState),
}

impl Diff {
    /// Returns whether this Diff involves a change
    pub fn is_change(&self) -> bool {
        !matches!(self, Diff::NoChange(_))
    }
}

/// Compare a desired resource with its recorded state
///
/// Changing the provider, or any attribute named in `replace_on`, forces a
/// replacement.
pub fn diff(
    desired: &ResourceState,
    current: Option<&ResourceState>,
    replace_on: &[String],
) -> Diff {
    let Some(current) = current else {
        return Diff::Create(desired.clone());
    };

    let changed = find_changed_attributes(&desired.attributes, &current.attributes);

    if desired.provider != current.provider || changed.iter().any(|k| replace_on.contains(k)) {
        Diff::Replace {
            to: desired.clone(),
            changed_attributes: changed,
        }
    } else if changed.is_empty() {
        Diff::NoChange(desired.clone())
    } else {
        Diff::Update {
            to: desired.clone(),
            changed_attributes: changed,
        }
    }
}

/// Find changed attributes between desired and recorded state
fn find_changed_attributes(
    desired: &BTreeMap<String, serde_json::Value>,
    current: &BTreeMap<String, serde_json::Value>,
) -> Vec<String> {
    let mut changed = Vec::new();

    for (key, desired_value) in desired {
        // Skip internal attributes (starting with _)
        if key.starts_with('_') {
            continue;
        }

        match current.get(key) {
            Some(current_value) if current_value == desired_value => {}
            _ => changed.push(key.clone()),
        }
    }

    changed
}

/// Compute the Plan that reconciles a snapshot with the desired resources
///
/// Recorded resources missing from `desired` are deleted, last-created first.
pub fn create_plan(
    desired: &[ResourceState],
    snapshot: Option<&Snapshot>,
    replace_on: &[String],
) -> Plan {
    let mut plan = Plan::new();

    for resource in desired {
        let current = snapshot.and_then(|s| s.find_resource(&resource.id()));
        match diff(resource, current, replace_on) {
            Diff::Create(r) => plan.add(Step::create(r)),
            Diff::Update { to, .. } => plan.add(Step::update(to)),
            Diff::Replace { to, .. } => plan.add(Step::replace(to)),
            Diff::NoChange(r) => plan.add(Step::same(r)),
        }
    }

    if let Some(snapshot) = snapshot {
        let wanted: HashSet<ResourceId> = desired.iter().map(|r| r.id()).collect();
        for recorded in snapshot.resources.iter().rev() {
            let id = recorded.id();
            if !wanted.contains(&id) {
                plan.add(Step::delete(id));
            }
        }
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::StepOp;

    fn bucket(name: &str) -> ResourceState {
        ResourceState::new("s3.bucket", name, "aws")
    }

    #[test]
    fn diff_create_when_not_recorded() {
        let result = diff(&bucket("test"), None, &[]);
        assert!(matches!(result, Diff::Create(_)));
    }

    #[test]
    fn diff_no_change_when_same() {
        let desired =
            bucket("test").with_attribute("region", serde_json::json!("ap-northeast-1"));
        let current = desired.clone();

        let result = diff(&desired, Some(&current), &[]);
        assert!(matches!(result, Diff::NoChange(_)));
        assert!(!result.is_change());
    }

    #[test]
    fn diff_update_when_different() {
        let desired = bucket("test").with_attribute("region", serde_json::json!("us-east-1"));
        let current = bucket("test").with_attribute("region", serde_json::json!("ap-northeast-1"));

        match diff(&desired, Some(&current), &[]) {
            Diff::Update {
                changed_attributes, ..
            } => {
                assert_eq!(changed_attributes, vec!["region".to_string()]);
            }
            other => panic!("Expected Update, got {:?}", other),
        }
    }

    #[test]
    fn diff_replace_on_listed_attribute() {
        let desired = bucket("test").with_attribute("region", serde_json::json!("us-east-1"));
        let current = bucket("test").with_attribute("region", serde_json::json!("ap-northeast-1"));

        let result = diff(&desired, Some(&current), &["region".to_string()]);
        assert!(matches!(result, Diff::Replace { .. }));
    }

    #[test]
    fn diff_replace_on_provider_change() {
        let desired = ResourceState::new("s3.bucket", "test", "awscc");
        let result = diff(&desired, Some(&bucket("test")), &[]);
        assert!(matches!(result, Diff::Replace { .. }));
    }

    #[test]
    fn diff_ignores_internal_attributes() {
        let desired = bucket("test").with_attribute("_module", serde_json::json!("web"));
        let result = diff(&desired, Some(&bucket("test")), &[]);
        assert!(matches!(result, Diff::NoChange(_)));
    }

    #[test]
    fn create_plan_from_resources() {
        let mut snapshot = Snapshot::new();
        snapshot.upsert_resource(
            bucket("existing").with_attribute("versioning", serde_json::json!(false)),
        );
        snapshot.upsert_resource(bucket("kept"));
        snapshot.upsert_resource(bucket("old-1"));
        snapshot.upsert_resource(bucket("old-2"));

        let desired = vec![
            bucket("new-bucket"),
            bucket("existing").with_attribute("versioning", serde_json::json!(true)),
            bucket("kept"),
        ];

        let plan = create_plan(&desired, Some(&snapshot), &[]);
        let ops: Vec<(StepOp, &str)> = plan
            .steps()
            .iter()
            .map(|s| (s.op, s.id.name.as_str()))
            .collect();

        assert_eq!(
            ops,
            vec![
                (StepOp::Create, "new-bucket"),
                (StepOp::Update, "existing"),
                (StepOp::Same, "kept"),
                (StepOp::Delete, "old-2"),
                (StepOp::Delete, "old-1"),
            ]
        );
    }

    #[test]
    fn create_plan_without_snapshot_creates_everything() {
        let plan = create_plan(&[bucket("a"), bucket("b")], None, &[]);
        assert_eq!(plan.summary().create, 2);
    }
}
