//! Clock port for stamping store-side timestamps.

use chrono::{DateTime, Utc};

/// Provides the current time.
///
/// Stores read it when a deletion is requested, so tests can pin the
/// deletion timestamp.
pub trait Clock: Send + Sync {
    /// Returns the current UTC time.
    fn now(&self) -> DateTime<Utc>;
}
