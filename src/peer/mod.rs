//! Peer coordination layer
//!
//! Tracks the statically configured sibling nodes, keeps their
//! reachability and load snapshots current through periodic discovery
//! ticks, and picks the least-loaded sibling for overflow work.
//!
//! Each sibling is a [`PeerLink`] with its own lock; the
//! [`PeerRegistry`] itself is a fixed arena built once at startup, so
//! readers never contend with in-flight dials.

pub mod link;
pub mod registry;
pub mod transport;

pub use link::*;
pub use registry::*;
pub use transport::*;
