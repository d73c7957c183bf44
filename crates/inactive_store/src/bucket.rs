//! Timestamp bucket store: the flat-file backend's in-memory state.
//!
//! ```text
//! {
//!   "<namespace>": {
//!     "<unix timestamp>": { "<subject>": "<status>", ... },
//!     "to_test":          { "<subject>": "<status>", ... }
//!   }
//! }
//! ```
//!
//! Older files stored a bucket as a bare list of subjects. Those are accepted
//! on load, normalized to map form with an empty status, and never written
//! back as lists.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{Result, StoreError};
use crate::schedule::pending_bucket;

/// Key of the bucket holding subjects not yet filed under a timestamp.
pub const PENDING_BUCKET: &str = "to_test";

/// subject -> status
pub type Bucket = BTreeMap<String, String>;

/// bucket key -> bucket
pub type Namespace = BTreeMap<String, Bucket>;

/// On-disk bucket shapes.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawBucket {
    Map(Bucket),
    Legacy(Vec<String>),
}

impl RawBucket {
    fn normalize(self) -> Bucket {
        match self {
            RawBucket::Map(bucket) => bucket,
            RawBucket::Legacy(subjects) => subjects
                .into_iter()
                .map(|subject| (subject, String::new()))
                .collect(),
        }
    }
}

type RawStore = BTreeMap<String, Option<BTreeMap<String, RawBucket>>>;

/// Timestamp of a bucket key made only of ASCII digits that fits an `i64`.
pub fn bucket_timestamp(key: &str) -> Option<i64> {
    if key.is_empty() || !key.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    key.parse().ok()
}

/// `true` for real timestamp buckets, as opposed to `to_test` or junk keys.
pub fn is_timestamp_key(key: &str) -> bool {
    bucket_timestamp(key).is_some()
}

/// All namespaces of one flat file plus a membership memo.
#[derive(Debug)]
pub struct BucketStore {
    path: PathBuf,
    namespaces: BTreeMap<String, Namespace>,
    membership: HashMap<(String, String), bool>,
}

impl BucketStore {
    /// Empty store bound to `path`. Nothing is read until [`BucketStore::load`].
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            namespaces: BTreeMap::new(),
            membership: HashMap::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Merge the file into memory and settle `namespace`'s pending bucket.
    ///
    /// After this call `namespace` always exists, possibly empty.
    pub fn load(&mut self, namespace: &str, now: i64) -> Result<()> {
        if self.path.is_file() {
            let on_disk = read_store(&self.path)?;
            self.merge(on_disk);
            debug!(path = %self.path.display(), "Merged store file");
        }

        let buckets = self.namespaces.entry(namespace.to_string()).or_default();
        if let Some(pending) = buckets.remove(PENDING_BUCKET) {
            let key = pending_bucket(now).to_string();
            info!(
                namespace,
                bucket = %key,
                subjects = pending.len(),
                "Filed pending subjects"
            );
            // A queued subject leaves every other timestamp bucket; its
            // pending status wins.
            for (existing, bucket) in buckets.iter_mut() {
                if *existing != key && is_timestamp_key(existing) {
                    bucket.retain(|subject, _| !pending.contains_key(subject));
                }
            }
            buckets.entry(key).or_default().extend(pending);
        }

        self.membership.clear();
        Ok(())
    }

    /// Non-destructive merge: in-memory entries win, on-disk entries fill gaps.
    pub fn merge(&mut self, on_disk: BTreeMap<String, Namespace>) {
        for (name, buckets) in on_disk {
            let Some(existing) = self.namespaces.get_mut(&name) else {
                self.namespaces.insert(name, buckets);
                continue;
            };

            for (key, bucket) in buckets {
                match existing.get_mut(&key) {
                    None => {
                        existing.insert(key, bucket);
                    }
                    Some(current) => {
                        for (subject, status) in bucket {
                            current.entry(subject).or_insert(status);
                        }
                    }
                }
            }
        }
    }

    /// Write every namespace to the file, replacing it.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let content = serde_json::to_string_pretty(&self.namespaces)?;

        // Write-then-rename so readers never see a truncated file.
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "inactive_db.json".to_string());
        let tmp = self
            .path
            .with_file_name(format!(".{}.{}.tmp", file_name, std::process::id()));
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn ensure_namespace(&mut self, namespace: &str) {
        self.namespaces.entry(namespace.to_string()).or_default();
    }

    pub fn namespace(&self, namespace: &str) -> Option<&Namespace> {
        self.namespaces.get(namespace)
    }

    pub fn bucket(&self, namespace: &str, key: &str) -> Option<&Bucket> {
        self.namespaces.get(namespace).and_then(|ns| ns.get(key))
    }

    pub fn namespace_names(&self) -> impl Iterator<Item = &str> {
        self.namespaces.keys().map(String::as_str)
    }

    /// Whether `subject` sits in any timestamp bucket of `namespace`.
    ///
    /// Answers are memoized per `(namespace, subject)` until that subject is
    /// inserted, removed, or the file is reloaded.
    pub fn contains(&mut self, namespace: &str, subject: &str) -> bool {
        let key = (namespace.to_string(), subject.to_string());
        if let Some(hit) = self.membership.get(&key) {
            return *hit;
        }

        let found = self
            .namespaces
            .get(namespace)
            .map(|buckets| {
                buckets
                    .iter()
                    .filter(|(k, _)| is_timestamp_key(k))
                    .any(|(_, bucket)| bucket.contains_key(subject))
            })
            .unwrap_or(false);

        self.membership.insert(key, found);
        found
    }

    /// Numeric bucket keys of `namespace`.
    pub fn timestamp_keys(&self, namespace: &str) -> Vec<i64> {
        self.namespaces
            .get(namespace)
            .map(|buckets| {
                buckets
                    .keys()
                    .filter_map(|k| bucket_timestamp(k))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// File `subject` under bucket `key`, dropping any earlier occurrence.
    pub fn insert(&mut self, namespace: &str, key: i64, subject: &str, status: &str) {
        self.remove(namespace, subject);

        self.namespaces
            .entry(namespace.to_string())
            .or_default()
            .entry(key.to_string())
            .or_default()
            .insert(subject.to_string(), status.to_string());

        self.membership
            .insert((namespace.to_string(), subject.to_string()), true);
    }

    /// Drop `subject` from every bucket of `namespace`. Returns how many
    /// buckets held it. Emptied buckets are kept.
    pub fn remove(&mut self, namespace: &str, subject: &str) -> usize {
        self.membership
            .remove(&(namespace.to_string(), subject.to_string()));

        let Some(buckets) = self.namespaces.get_mut(namespace) else {
            return 0;
        };
        buckets
            .values_mut()
            .filter_map(|bucket| bucket.remove(subject))
            .count()
    }

    /// Subjects of every timestamp bucket whose key satisfies `keep`.
    pub fn subjects_where<F>(&self, namespace: &str, keep: F) -> BTreeSet<String>
    where
        F: Fn(i64) -> bool,
    {
        let Some(buckets) = self.namespaces.get(namespace) else {
            return BTreeSet::new();
        };
        buckets
            .iter()
            .filter_map(|(key, bucket)| bucket_timestamp(key).map(|ts| (ts, bucket)))
            .filter(|(ts, _)| keep(*ts))
            .flat_map(|(_, bucket)| bucket.keys().cloned())
            .collect()
    }
}

/// Read and normalize a store file.
fn read_store(path: &Path) -> Result<BTreeMap<String, Namespace>> {
    let content = fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(BTreeMap::new());
    }

    let raw: RawStore = serde_json::from_str(&content)
        .map_err(|e| StoreError::malformed(path, e.to_string()))?;

    Ok(raw
        .into_iter()
        .filter_map(|(name, buckets)| buckets.map(|b| (name, b)))
        .filter(|(_, buckets)| !buckets.is_empty())
        .map(|(name, buckets)| {
            let normalized = buckets
                .into_iter()
                .map(|(key, bucket)| (key, bucket.normalize()))
                .collect();
            (name, normalized)
        })
        .collect())
}
