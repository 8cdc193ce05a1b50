//! Port traits defining external boundaries.
//!
//! Each trait represents a boundary between the reconciliation core and an
//! external system (issue tracker, record store, time, filesystem).
//! Implementations live in `src/adapters/` and `src/store/`.

pub mod clock;
pub mod filesystem;
pub mod issues;
pub mod store;

pub use clock::Clock;
pub use filesystem::{ChangeHandler, FileSystem, Held};
pub use issues::{Issue, IssueClient, IssueClientFactory, IssueFuture, IssueState, NewIssue};
pub use store::{ResourceStore, StoreEvent, StoreEventKind};
