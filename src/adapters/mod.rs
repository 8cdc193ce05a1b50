//! Adapter implementations of the ports.
//!
//! - [`live`]: real clock, disk, and the GitHub REST API.
//! - [`fake`]: an in-memory issue tracker used as a test double.

pub mod fake;
pub mod live;
