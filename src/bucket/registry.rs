//! Bucket registry — maps task names to local queues
//!
//! The set of task names is fixed at construction. Queues themselves
//! are mutated concurrently by producers and consumers, so a load
//! snapshot reads each depth independently.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::BucketSettings;
use crate::error::Result;
use crate::protocol::{LoadReport, TaskLoadInfo};

use super::{BoundedQueue, TaskQueue};

/// Owner of the task name → queue mapping
pub struct BucketRegistry {
    buckets: BTreeMap<String, Arc<dyn TaskQueue>>,
}

impl BucketRegistry {
    /// Build from pre-constructed queues
    pub fn new<I>(buckets: I) -> Self
    where
        I: IntoIterator<Item = (String, Arc<dyn TaskQueue>)>,
    {
        Self {
            buckets: buckets.into_iter().collect(),
        }
    }

    /// Provision one [`BoundedQueue`] per configured bucket
    pub fn from_settings(settings: &[BucketSettings]) -> Self {
        Self::new(settings.iter().map(|b| {
            let queue: Arc<dyn TaskQueue> = Arc::new(BoundedQueue::new(&b.name, b.capacity));
            (b.name.clone(), queue)
        }))
    }

    /// Queue for a task name; absence is a normal outcome
    pub fn get(&self, name: &str) -> Option<Arc<dyn TaskQueue>> {
        self.buckets.get(name).cloned()
    }

    /// Configured task names, sorted
    pub fn names(&self) -> Vec<String> {
        self.buckets.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Point-in-time depth of every bucket, ordered by task name
    pub fn load_snapshot(&self) -> Vec<TaskLoadInfo> {
        self.buckets
            .iter()
            .map(|(key, queue)| TaskLoadInfo {
                key: key.clone(),
                length: queue.depth(),
            })
            .collect()
    }

    /// Snapshot wrapped for the wire
    pub fn load_report(&self) -> LoadReport {
        LoadReport {
            tasks: self.load_snapshot(),
        }
    }

    /// Serialized snapshot as exported to peers
    pub fn load_snapshot_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.load_snapshot())?)
    }
}
