//! Location Store Port
//!
//! Defines the interface for resolving address strings against a
//! backing lookup store.

use crate::domain::entities::Resolved;

/// Backing store for IP address to geographic location.
///
/// This is an outbound port that abstracts the lookup database.
/// Implementations may use relational network-block tables or a
/// MaxMind database file.
///
/// Implementations fail open: unparseable input and read failures are
/// logged and reported as `None`. A failed write-back still returns the
/// location, with the failure carried in [`Resolved::write_back`].
pub trait LocationStore: Send + Sync {
    /// Resolve an IP address or CIDR block to a location.
    ///
    /// The call may block on I/O.
    fn resolve(&self, ip: &str) -> Option<Resolved>;
}
