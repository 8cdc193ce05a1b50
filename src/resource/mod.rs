//! The declared issue record: desired issue state plus observed status.
//!
//! Serialised as YAML with the field names of the persisted schema:
//!
//! ```yaml
//! metadata:
//!   name: readme-typo
//!   resourceVersion: "3"
//!   finalizers: [issues.reconciler.dev/finalizer]
//! spec:
//!   repo: octo/widgets
//!   title: Fix README typo
//!   description: The install section says "isntall".
//! status:
//!   state: open
//!   lastUpdateTimestamp: "2024-05-01T10:00:00Z"
//! ```

pub mod repo;

use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub use repo::RepoRef;

static NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$").expect("record name pattern is a valid regex")
});

/// Finalizer token that blocks removal of a record until its issue is closed.
pub const FINALIZER: &str = "issues.reconciler.dev/finalizer";

/// Identity of a declared record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceKey(String);

impl ResourceKey {
    /// Creates a key from a record name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the record name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceKey {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Store-owned metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Record name, unique within the store.
    pub name: String,
    /// Opaque revision assigned by the store on every write.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_version: String,
    /// Tokens that must all be removed before the store may erase the record.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
    /// Set once by the store when deletion is requested; never cleared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

/// Desired issue state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueSpec {
    /// Target repository, `owner/name`.
    pub repo: String,
    /// Issue title; the only key used to match an existing issue.
    pub title: String,
    /// Desired issue body.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// Observed issue state, copied from the tracker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueStatus {
    /// `open`, `closed`, or empty if no issue has been observed yet.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub state: String,
    /// Tracker-side last-modified time, verbatim.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_update_timestamp: String,
}

/// A declared issue record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueResource {
    /// Store-owned metadata.
    pub metadata: ObjectMeta,
    /// Desired state.
    pub spec: IssueSpec,
    /// Observed state.
    #[serde(default)]
    pub status: IssueStatus,
}

impl IssueResource {
    /// Creates a fresh record with no revision, finalizers, or status.
    #[must_use]
    pub fn new(name: impl Into<String>, spec: IssueSpec) -> Self {
        Self {
            metadata: ObjectMeta { name: name.into(), ..ObjectMeta::default() },
            spec,
            status: IssueStatus::default(),
        }
    }

    /// Returns the record identity.
    #[must_use]
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(self.metadata.name.clone())
    }

    /// Returns `true` once deletion has been requested.
    #[must_use]
    pub const fn deletion_requested(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Returns `true` if `token` is in the finalizer list.
    #[must_use]
    pub fn has_finalizer(&self, token: &str) -> bool {
        self.metadata.finalizers.iter().any(|f| f == token)
    }

    /// Adds `token` unless already present. Returns whether the list changed.
    pub fn add_finalizer(&mut self, token: &str) -> bool {
        if self.has_finalizer(token) {
            return false;
        }
        self.metadata.finalizers.push(token.to_string());
        true
    }

    /// Removes every occurrence of `token`. Returns whether the list changed.
    pub fn remove_finalizer(&mut self, token: &str) -> bool {
        let before = self.metadata.finalizers.len();
        self.metadata.finalizers.retain(|f| f != token);
        self.metadata.finalizers.len() != before
    }

    /// Parses the target repository.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if `spec.repo` is not `owner/name`.
    pub fn repo_ref(&self) -> Result<RepoRef> {
        RepoRef::parse(&self.spec.repo)
    }
}

/// Checks the schema constraints a record must satisfy before it is stored.
///
/// # Errors
///
/// Returns [`Error::Validation`] naming the first offending field.
pub fn validate(resource: &IssueResource) -> Result<()> {
    if !NAME_PATTERN.is_match(&resource.metadata.name) {
        return Err(Error::validation(
            "metadata.name",
            format!("'{}' must be alphanumeric, '_', '.' or '-'", resource.metadata.name),
        ));
    }
    resource.repo_ref()?;
    if resource.spec.title.trim().is_empty() {
        return Err(Error::validation("spec.title", "must not be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> IssueResource {
        IssueResource::new(
            "readme-typo",
            IssueSpec {
                repo: "octo/widgets".into(),
                title: "Fix README typo".into(),
                description: "install is misspelled".into(),
            },
        )
    }

    #[test]
    fn finalizer_list_behaves_as_a_set() {
        let mut res = sample();
        assert!(res.add_finalizer(FINALIZER));
        assert!(!res.add_finalizer(FINALIZER));
        assert_eq!(res.metadata.finalizers.len(), 1);
        assert!(res.remove_finalizer(FINALIZER));
        assert!(!res.remove_finalizer(FINALIZER));
        assert!(!res.has_finalizer(FINALIZER));
    }

    #[test]
    fn deletion_requested_follows_timestamp() {
        let mut res = sample();
        assert!(!res.deletion_requested());
        res.metadata.deletion_timestamp = Some(Utc::now());
        assert!(res.deletion_requested());
    }

    #[test]
    fn yaml_uses_schema_field_names() {
        let mut res = sample();
        res.status.last_update_timestamp = "2024-05-01T10:00:00Z".into();
        res.metadata.resource_version = "4".into();
        let yaml = serde_yaml::to_string(&res).unwrap();
        assert!(yaml.contains("lastUpdateTimestamp"));
        assert!(yaml.contains("resourceVersion"));
        assert!(!yaml.contains("deletionTimestamp"));
    }

    #[test]
    fn description_and_status_are_optional() {
        let yaml = "metadata:\n  name: a\nspec:\n  repo: o/r\n  title: t\n";
        let res: IssueResource = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(res.spec.description, "");
        assert_eq!(res.status, IssueStatus::default());
    }

    #[test]
    fn validate_rejects_unsafe_names() {
        for name in ["", "../escape", ".hidden", "a/b"] {
            let mut res = sample();
            res.metadata.name = name.into();
            assert!(
                matches!(validate(&res), Err(Error::Validation { field, .. }) if field == "metadata.name"),
                "{name:?} should be rejected"
            );
        }
    }

    #[test]
    fn validate_rejects_bad_repo_and_empty_title() {
        assert!(validate(&sample()).is_ok());

        let mut bad_repo = sample();
        bad_repo.spec.repo = "widgets".into();
        assert!(matches!(
            validate(&bad_repo),
            Err(Error::Validation { field, .. }) if field == "spec.repo"
        ));

        let mut no_title = sample();
        no_title.spec.title = "  ".into();
        assert!(matches!(
            validate(&no_title),
            Err(Error::Validation { field, .. }) if field == "spec.title"
        ));
    }
}
