//! Inactive-subject tracking store.
//!
//! Remembers which subjects (domains, IPs, URLs) of a subject file were found
//! inactive and when, so a later run can skip the ones tested recently and
//! retest the ones whose interval has elapsed.
//!
//! Three persistence backends sit behind [`InactiveStore`]:
//!
//! - a flat JSON file of timestamp buckets ([`FileBucketBackend`])
//! - an embedded SQLite database ([`SqliteBackend`])
//! - a remote MySQL or MariaDB server ([`MySqlBackend`])
//!
//! # Usage
//!
//! ```rust,ignore
//! use inactive_store::{InactiveStore, StoreConfig};
//!
//! let config = StoreConfig::default();
//! let mut store = InactiveStore::open("hosts.txt", &config)?;
//! store.add("example.org", "INACTIVE")?;
//! for subject in store.list_due_for_retest()? {
//!     println!("{subject}");
//! }
//! ```

pub mod backend;
pub mod bucket;
pub mod config;
pub mod error;
pub mod schedule;
mod store;

pub use backend::{
    subject_digest, FileBucketBackend, InactiveBackend, MySqlBackend, RemoteFlavor, SqliteBackend,
};
pub use bucket::{BucketStore, PENDING_BUCKET};
pub use config::{BackendConfig, RemoteConfig, StoreConfig};
pub use error::{Result, StoreError};
pub use schedule::{Clock, ManualClock, RetestSchedule, SystemClock, ONE_DAY_SECS};
pub use store::InactiveStore;
