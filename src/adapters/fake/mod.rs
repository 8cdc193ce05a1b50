//! Test doubles for the ports.

pub mod issues;

pub use issues::{FakeClientFactory, FakeIssueClient, FakeTracker, Operation, TrackerCall};
