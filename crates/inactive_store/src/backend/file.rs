//! Flat-file backend over a [`BucketStore`].

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use super::InactiveBackend;
use crate::bucket::BucketStore;
use crate::error::Result;
use crate::schedule::{Clock, RetestSchedule};

/// Flat JSON backend. Every mutation is followed by a full save.
#[derive(Debug)]
pub struct FileBucketBackend {
    namespace: String,
    store: BucketStore,
    schedule: RetestSchedule,
    clock: Arc<dyn Clock>,
}

impl FileBucketBackend {
    pub fn new(
        path: impl Into<PathBuf>,
        namespace: impl Into<String>,
        schedule: RetestSchedule,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            store: BucketStore::new(path),
            schedule,
            clock,
        }
    }

    /// Read-only view of the bucket store.
    pub fn store(&self) -> &BucketStore {
        &self.store
    }

    /// Bucket key a subject added now would be filed under.
    pub fn timestamp_for_new_entry(&self) -> i64 {
        self.schedule.bucket_for_new_entry(
            self.store.timestamp_keys(&self.namespace),
            self.clock.now(),
        )
    }
}

impl InactiveBackend for FileBucketBackend {
    fn name(&self) -> &'static str {
        "json"
    }

    fn initiate(&mut self) -> Result<()> {
        self.load()?;
        self.store.ensure_namespace(&self.namespace);
        self.store.save()
    }

    fn load(&mut self) -> Result<()> {
        self.store.load(&self.namespace, self.clock.now())
    }

    fn save(&mut self) -> Result<()> {
        self.store.save()
    }

    fn contains(&mut self, subject: &str) -> Result<bool> {
        Ok(self.store.contains(&self.namespace, subject))
    }

    fn add(&mut self, subject: &str, status: &str) -> Result<()> {
        let bucket = self.timestamp_for_new_entry();
        self.store.insert(&self.namespace, bucket, subject, status);
        debug!(namespace = %self.namespace, subject, status, bucket, "Added subject");
        self.store.save()
    }

    fn remove(&mut self, subject: &str) -> Result<()> {
        let removed = self.store.remove(&self.namespace, subject);
        debug!(namespace = %self.namespace, subject, removed, "Removed subject");
        self.store.save()
    }

    fn due_for_retest(&mut self) -> Result<BTreeSet<String>> {
        let now = self.clock.now();
        let schedule = self.schedule;
        Ok(self
            .store
            .subjects_where(&self.namespace, |bucket| schedule.is_due(bucket, now)))
    }

    fn already_tested(&mut self) -> Result<BTreeSet<String>> {
        let now = self.clock.now();
        let schedule = self.schedule;
        Ok(self
            .store
            .subjects_where(&self.namespace, |bucket| schedule.is_recent(bucket, now)))
    }
}
