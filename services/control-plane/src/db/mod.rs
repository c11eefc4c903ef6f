//! Durable key-value store.
//!
//! All namespaces live in memory. Every `save` and `remove` flushes a full
//! snapshot to disk: first to `<path>.back`, then to the primary file, each
//! followed by an fsync. The file is a single JSON document holding one array
//! of `[key, value]` pairs per namespace.
//!
//! On startup a primary file that fails to parse is copied to `<path>.bad` and
//! the store starts empty.

mod error;

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

pub use error::StoreError;

/// Namespace names.
pub mod namespaces {
    pub const RESOURCES: &str = "resources";
    pub const USERS: &str = "users";
    pub const JOBS: &str = "jobs";

    pub const ALL: [&str; 3] = [RESOURCES, USERS, JOBS];
}

/// Attempts per file write before giving up.
pub const WRITE_ATTEMPTS: u32 = 3;

type Entries = BTreeMap<String, String>;

#[derive(Debug, Default)]
struct Namespaces {
    resources: Entries,
    users: Entries,
    jobs: Entries,
}

impl Namespaces {
    fn get(&self, namespace: &str) -> Result<&Entries, StoreError> {
        match namespace {
            namespaces::RESOURCES => Ok(&self.resources),
            namespaces::USERS => Ok(&self.users),
            namespaces::JOBS => Ok(&self.jobs),
            other => Err(StoreError::NamespaceNotFound(other.to_string())),
        }
    }

    fn get_mut(&mut self, namespace: &str) -> Result<&mut Entries, StoreError> {
        match namespace {
            namespaces::RESOURCES => Ok(&mut self.resources),
            namespaces::USERS => Ok(&mut self.users),
            namespaces::JOBS => Ok(&mut self.jobs),
            other => Err(StoreError::NamespaceNotFound(other.to_string())),
        }
    }
}

/// On-disk document.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    resources: Vec<(String, String)>,
    #[serde(default)]
    users: Vec<(String, String)>,
    #[serde(default)]
    jobs: Vec<(String, String)>,
}

impl From<&Namespaces> for Snapshot {
    fn from(ns: &Namespaces) -> Self {
        let pairs = |entries: &Entries| {
            entries
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        };
        Self {
            resources: pairs(&ns.resources),
            users: pairs(&ns.users),
            jobs: pairs(&ns.jobs),
        }
    }
}

impl From<Snapshot> for Namespaces {
    fn from(snapshot: Snapshot) -> Self {
        Self {
            resources: snapshot.resources.into_iter().collect(),
            users: snapshot.users.into_iter().collect(),
            jobs: snapshot.jobs.into_iter().collect(),
        }
    }
}

/// Durable store shared by the repositories.
#[derive(Debug)]
pub struct Store {
    path: Option<PathBuf>,
    data: Mutex<Namespaces>,
}

impl Store {
    /// Opens the store at `path`, loading whatever it holds.
    ///
    /// A missing file yields an empty store. A corrupt file is quarantined and
    /// also yields an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| StoreError::Prepare {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let data = match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<Snapshot>(&bytes) {
                Ok(snapshot) => {
                    let data = Namespaces::from(snapshot);
                    info!(
                        path = %path.display(),
                        resources = data.resources.len(),
                        users = data.users.len(),
                        jobs = data.jobs.len(),
                        "Loaded store"
                    );
                    data
                }
                Err(e) => {
                    let bad = sibling(&path, ".bad");
                    match fs::copy(&path, &bad) {
                        Ok(_) => error!(
                            path = %path.display(),
                            quarantined = %bad.display(),
                            error = %e,
                            "Store file is corrupt; starting with an empty store"
                        ),
                        Err(copy_err) => error!(
                            path = %path.display(),
                            error = %e,
                            copy_error = %copy_err,
                            "Store file is corrupt and could not be quarantined; starting with an empty store"
                        ),
                    }
                    Namespaces::default()
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "Store file does not exist; starting with an empty store");
                Namespaces::default()
            }
            Err(source) => return Err(StoreError::Read { path, source }),
        };

        Ok(Self {
            path: Some(path),
            data: Mutex::new(data),
        })
    }

    /// Creates a store that never touches disk (for testing).
    pub fn in_memory() -> Self {
        Self {
            path: None,
            data: Mutex::new(Namespaces::default()),
        }
    }

    /// Returns the primary file path, if the store is backed by one.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Inserts or overwrites `key` and flushes.
    pub fn save(
        &self,
        namespace: &str,
        key: &str,
        value: impl Into<String>,
    ) -> Result<(), StoreError> {
        let mut data = self.lock();
        data.get_mut(namespace)?
            .insert(key.to_string(), value.into());
        self.flush(&data)
    }

    /// Returns the value stored under `key`.
    pub fn fetch(&self, namespace: &str, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock().get(namespace)?.get(key).cloned())
    }

    /// Returns every entry of a namespace, ordered by key.
    pub fn fetch_all(&self, namespace: &str) -> Result<Vec<(String, String)>, StoreError> {
        Ok(self
            .lock()
            .get(namespace)?
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    /// Removes `key` and flushes. Returns whether the key existed.
    pub fn remove(&self, namespace: &str, key: &str) -> Result<bool, StoreError> {
        let mut data = self.lock();
        let existed = data.get_mut(namespace)?.remove(key).is_some();
        self.flush(&data)?;
        Ok(existed)
    }

    fn lock(&self) -> MutexGuard<'_, Namespaces> {
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn flush(&self, data: &Namespaces) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let bytes = serde_json::to_vec(&Snapshot::from(data))?;

        let backup = sibling(path, ".back");
        if let Err(e) = write_with_retries(&backup, &bytes) {
            error!(path = %backup.display(), error = %e, "Failed to write store backup");
        }

        write_with_retries(path, &bytes).map_err(|source| {
            error!(path = %path.display(), error = %source, "Failed to write store; durability lost");
            StoreError::WriteExhausted {
                path: path.clone(),
                attempts: WRITE_ATTEMPTS,
                source,
            }
        })?;

        debug!(path = %path.display(), bytes = bytes.len(), "Flushed store");
        Ok(())
    }
}

/// Returns `<path><suffix>`.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

fn write_with_retries(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut attempt = 1;
    loop {
        match write_synced(path, bytes) {
            Ok(()) => return Ok(()),
            Err(e) if attempt < WRITE_ATTEMPTS => {
                warn!(path = %path.display(), attempt, error = %e, "Store write failed; retrying");
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
