//! The store facade: one namespace, one backend chosen from configuration.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use inactive_db::SqliteConnection;
use tracing::{debug, info};

use crate::backend::{FileBucketBackend, InactiveBackend, MySqlBackend, RemoteFlavor, SqliteBackend};
use crate::config::{BackendConfig, StoreConfig};
use crate::error::Result;
use crate::schedule::{Clock, SystemClock};

/// Inactive-subject store for one namespace.
///
/// When the store is disabled no backend is built; every query answers
/// "absent" or "empty" and every mutation succeeds without touching disk.
pub struct InactiveStore {
    namespace: String,
    backend: Option<Box<dyn InactiveBackend>>,
}

impl std::fmt::Debug for InactiveStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InactiveStore")
            .field("namespace", &self.namespace)
            .field("backend", &self.backend_name())
            .finish()
    }
}

impl InactiveStore {
    /// Build the configured backend for `namespace` and initiate it.
    pub fn open(namespace: impl Into<String>, config: &StoreConfig) -> Result<Self> {
        Self::open_with_clock(namespace, config, Arc::new(SystemClock))
    }

    /// Like [`InactiveStore::open`] with an explicit time source for the
    /// flat-file backend.
    pub fn open_with_clock(
        namespace: impl Into<String>,
        config: &StoreConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let namespace = namespace.into();
        if !config.enabled {
            debug!(namespace = %namespace, "Inactive store disabled");
            return Ok(Self::disabled(namespace));
        }

        config.validate()?;
        let backend = build_backend(&namespace, config, clock)?;
        Self::with_backend(namespace, backend)
    }

    /// Wrap an already-built backend and initiate it.
    pub fn with_backend(
        namespace: impl Into<String>,
        backend: Box<dyn InactiveBackend>,
    ) -> Result<Self> {
        let mut store = Self {
            namespace: namespace.into(),
            backend: Some(backend),
        };
        store.initiate()?;
        info!(
            namespace = %store.namespace,
            backend = store.backend_name().unwrap_or("none"),
            "Opened inactive store"
        );
        Ok(store)
    }

    /// A store that records nothing.
    pub fn disabled(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            backend: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn backend_name(&self) -> Option<&'static str> {
        self.backend.as_ref().map(|backend| backend.name())
    }

    /// Load persisted state and make sure the namespace (or schema) exists.
    pub fn initiate(&mut self) -> Result<()> {
        match self.backend.as_mut() {
            Some(backend) => backend.initiate(),
            None => Ok(()),
        }
    }

    /// Re-read persisted state, merging it into memory.
    pub fn load(&mut self) -> Result<()> {
        match self.backend.as_mut() {
            Some(backend) => backend.load(),
            None => Ok(()),
        }
    }

    pub fn save(&mut self) -> Result<()> {
        match self.backend.as_mut() {
            Some(backend) => backend.save(),
            None => Ok(()),
        }
    }

    pub fn contains(&mut self, subject: &str) -> Result<bool> {
        match self.backend.as_mut() {
            Some(backend) => backend.contains(subject),
            None => Ok(false),
        }
    }

    /// Record that `subject` was just tested with `status`.
    pub fn add(&mut self, subject: &str, status: &str) -> Result<()> {
        match self.backend.as_mut() {
            Some(backend) => backend.add(subject, status),
            None => Ok(()),
        }
    }

    pub fn remove(&mut self, subject: &str) -> Result<()> {
        match self.backend.as_mut() {
            Some(backend) => backend.remove(subject),
            None => Ok(()),
        }
    }

    /// Subjects whose last test is older than the retest interval.
    pub fn list_due_for_retest(&mut self) -> Result<BTreeSet<String>> {
        match self.backend.as_mut() {
            Some(backend) => backend.due_for_retest(),
            None => Ok(BTreeSet::new()),
        }
    }

    /// Subjects tested within the retest interval.
    pub fn list_already_tested(&mut self) -> Result<BTreeSet<String>> {
        match self.backend.as_mut() {
            Some(backend) => backend.already_tested(),
            None => Ok(BTreeSet::new()),
        }
    }
}

fn build_backend(
    namespace: &str,
    config: &StoreConfig,
    clock: Arc<dyn Clock>,
) -> Result<Box<dyn InactiveBackend>> {
    let schedule = config.retest_schedule();
    let backend: Box<dyn InactiveBackend> = match &config.backend {
        BackendConfig::Json { path } => Box::new(FileBucketBackend::new(
            path.clone(),
            namespace,
            schedule,
            clock,
        )),
        BackendConfig::Sqlite { path, table } => {
            let conn = SqliteConnection::open(path)?;
            // Lock waits are handled by the single retry, not inside SQLite.
            conn.set_busy_timeout(Duration::ZERO)?;
            Box::new(SqliteBackend::new(
                conn,
                namespace,
                table,
                schedule,
                config.lock_retry_delay(),
            )?)
        }
        BackendConfig::Mysql(remote) => Box::new(MySqlBackend::connect(
            &remote.url,
            remote.max_connections,
            namespace,
            &remote.table,
            schedule,
            RemoteFlavor::MySql,
        )?),
        BackendConfig::Mariadb(remote) => Box::new(MySqlBackend::connect(
            &remote.url,
            remote.max_connections,
            namespace,
            &remote.table,
            schedule,
            RemoteFlavor::MariaDb,
        )?),
    };
    Ok(backend)
}
