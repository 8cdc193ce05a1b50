//! Repository references parsed from `spec.repo`.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};

static REPO_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_.-]+/[A-Za-z0-9_.-]+$").expect("repository pattern is a valid regex")
});

/// A tracker repository, `owner/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoRef {
    /// Account or organisation owning the repository.
    pub owner: String,
    /// Repository name.
    pub name: String,
}

impl RepoRef {
    /// Parses `owner/name`, requiring exactly two non-empty segments of
    /// `[A-Za-z0-9_.-]`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for anything else.
    pub fn parse(raw: &str) -> Result<Self> {
        if !REPO_PATTERN.is_match(raw) {
            return Err(Error::validation(
                "spec.repo",
                format!("'{raw}' does not match owner/name"),
            ));
        }
        let (owner, name) = raw
            .split_once('/')
            .ok_or_else(|| Error::validation("spec.repo", format!("'{raw}' has no '/'")))?;
        Ok(Self { owner: owner.to_string(), name: name.to_string() })
    }

    /// Renders the reference back to `owner/name`.
    #[must_use]
    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}
