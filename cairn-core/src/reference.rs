//! Stack references - the backend-qualified identity of a stack
//!
//! The canonical form is always `organization/project/stack`. Backends accept
//! the shorter `project/stack` and `stack` forms and fill the missing segments
//! from their [`ReferenceDefaults`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum length of a single name segment
pub const MAX_NAME_LENGTH: usize = 100;

/// Errors produced while parsing a stack reference or name
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("stack reference is empty")]
    Empty,

    #[error("stack reference '{0}' has too many segments (expected organization/project/stack)")]
    TooManySegments(String),

    #[error("stack reference '{0}' does not name a project and no default project is set")]
    MissingProject(String),

    #[error("invalid {kind} name '{segment}': {reason}")]
    InvalidName {
        kind: &'static str,
        segment: String,
        reason: &'static str,
    },
}

/// Check a single name segment
///
/// Names are 1 to 100 characters of ASCII alphanumerics, `-`, `_` and `.`.
fn validate_name(kind: &'static str, segment: &str) -> Result<(), ParseError> {
    let invalid = |reason| ParseError::InvalidName {
        kind,
        segment: segment.to_string(),
        reason,
    };

    if segment.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if segment.len() > MAX_NAME_LENGTH {
        return Err(invalid("must be at most 100 characters"));
    }
    if !segment
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(invalid(
            "may only contain alphanumerics, hyphens, underscores and periods",
        ));
    }
    // Segments become path components in file-based stores.
    if segment == "." || segment == ".." {
        return Err(invalid("must not be '.' or '..'"));
    }
    Ok(())
}

/// A validated stack name segment (the last part of a reference)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StackName(String);

impl StackName {
    pub fn new(name: impl Into<String>) -> Result<Self, ParseError> {
        let name = name.into();
        validate_name("stack", &name)?;
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for StackName {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<StackName> for String {
    fn from(name: StackName) -> Self {
        name.0
    }
}

impl FromStr for StackName {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for StackName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Segments a backend fills in when a reference omits them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceDefaults {
    pub organization: String,
    pub project: Option<String>,
}

impl ReferenceDefaults {
    /// Organization used by backends that have no notion of organizations
    pub const DEFAULT_ORGANIZATION: &'static str = "organization";

    pub fn new(organization: impl Into<String>) -> Self {
        Self {
            organization: organization.into(),
            project: None,
        }
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }
}

impl Default for ReferenceDefaults {
    fn default() -> Self {
        Self::new(Self::DEFAULT_ORGANIZATION)
    }
}

/// Fully qualified identity of a stack
///
/// Two references are equal exactly when their canonical strings are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StackReference {
    organization: String,
    project: String,
    name: StackName,
}

impl StackReference {
    pub fn new(
        organization: impl Into<String>,
        project: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<Self, ParseError> {
        let organization = organization.into();
        let project = project.into();
        validate_name("organization", &organization)?;
        validate_name("project", &project)?;
        Ok(Self {
            organization,
            project,
            name: StackName::new(name)?,
        })
    }

    /// Parse a reference, filling omitted segments from `defaults`
    ///
    /// Parsing never touches the network or disk.
    pub fn parse_with_defaults(s: &str, defaults: &ReferenceDefaults) -> Result<Self, ParseError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParseError::Empty);
        }

        let parts: Vec<&str> = s.split('/').collect();
        match parts.as_slice() {
            [name] => {
                let project = defaults
                    .project
                    .as_deref()
                    .ok_or_else(|| ParseError::MissingProject(s.to_string()))?;
                Self::new(defaults.organization.as_str(), project, *name)
            }
            [project, name] => Self::new(defaults.organization.as_str(), *project, *name),
            [organization, project, name] => Self::new(*organization, *project, *name),
            _ => Err(ParseError::TooManySegments(s.to_string())),
        }
    }

    pub fn organization(&self) -> &str {
        &self.organization
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn name(&self) -> &StackName {
        &self.name
    }

    /// The same organization and project with a different stack name
    pub fn renamed(&self, name: StackName) -> Self {
        Self {
            organization: self.organization.clone(),
            project: self.project.clone(),
            name,
        }
    }
}

impl fmt::Display for StackReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.organization, self.project, self.name)
    }
}

/// Parses only the fully qualified form
impl FromStr for StackReference {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        match parts.as_slice() {
            [organization, project, name] => Self::new(*organization, *project, *name),
            [""] => Err(ParseError::Empty),
            [_] | [_, _] => Err(ParseError::MissingProject(s.to_string())),
            _ => Err(ParseError::TooManySegments(s.to_string())),
        }
    }
}

impl TryFrom<String> for StackReference {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StackReference> for String {
    fn from(reference: StackReference) -> Self {
        reference.to_string()
    }
}
