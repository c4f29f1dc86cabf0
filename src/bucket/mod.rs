//! Local task buckets
//!
//! A bucket is a named bounded queue for one task type. The set of
//! buckets is provisioned from configuration and never changes while
//! the node runs.

pub mod queue;
pub mod registry;

pub use queue::*;
pub use registry::*;
