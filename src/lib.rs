//! bucketmesh - peer-to-peer task bucket node
//!
//! A node owns a fixed set of named, bounded task buckets. When a
//! producer fills a bucket that is already full, the work is forwarded
//! to the least-loaded reachable sibling node. Siblings are discovered
//! from a static address list and kept fresh by periodic probing.

pub mod bucket;
pub mod config;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod peer;
pub mod protocol;
pub mod server;
pub mod version;

pub use error::{Error, ErrorCode, Result};
pub use orchestrator::{Orchestrator, OrchestratorOptions};
