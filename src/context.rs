//! Service context bundling the port implementations a command needs.

use std::sync::Arc;

use crate::adapters::live::clock::LiveClock;
use crate::adapters::live::filesystem::LiveFileSystem;
use crate::adapters::live::issues::GithubClientFactory;
use crate::config::Config;
use crate::error::Result;
use crate::ports::clock::Clock;
use crate::ports::filesystem::FileSystem;
use crate::ports::issues::IssueClientFactory;
use crate::store::FileStore;

/// Bundles configuration and port trait objects.
///
/// The issue tracker is built lazily: only `run` talks to it, so the other
/// commands work without a credential.
pub struct ServiceContext {
    /// Process configuration.
    pub config: Config,
    /// Clock for store-side timestamps.
    pub clock: Arc<dyn Clock>,
    /// Filesystem backing the record store.
    pub fs: Arc<dyn FileSystem>,
    issues: Option<Arc<dyn IssueClientFactory>>,
}

impl ServiceContext {
    /// Creates a context with the real clock, disk, and GitHub.
    #[must_use]
    pub fn live(config: Config) -> Self {
        Self { config, clock: Arc::new(LiveClock), fs: Arc::new(LiveFileSystem), issues: None }
    }

    /// Replaces the tracker, e.g. with a fake.
    #[must_use]
    pub fn with_issues(mut self, issues: Arc<dyn IssueClientFactory>) -> Self {
        self.issues = Some(issues);
        self
    }

    /// Opens the record store at the configured root.
    #[must_use]
    pub fn store(&self) -> FileStore {
        FileStore::new(Arc::clone(&self.fs), &self.config.store_root, Arc::clone(&self.clock))
    }

    /// Returns the tracker, building the GitHub client on first use.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no credential is configured or the
    /// HTTP client cannot be built.
    pub fn issues(&self) -> Result<Arc<dyn IssueClientFactory>> {
        if let Some(issues) = &self.issues {
            return Ok(Arc::clone(issues));
        }
        let credential = self.config.require_credential()?;
        let factory = GithubClientFactory::new(
            &self.config.api_url,
            credential,
            self.config.request_timeout,
        )?;
        Ok(Arc::new(factory))
    }
}
