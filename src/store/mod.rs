//! Persistence backends for the view counter table.
//!
//! Every backend applies increments atomically per key; they differ in how far
//! that guarantee reaches. [`MemoryStore`] covers one process, [`JsonFileStore`]
//! serializes processes through an advisory lock on a sidecar file, and
//! [`SqliteStore`] relies on a single UPSERT statement.

mod json_file;
mod memory;
mod sqlite;

pub use json_file::{parse_table, JsonFileStore};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::content::{rank, ContentKey, ContentType};
use crate::error::StoreError;

/// Storage seam behind the view counter
pub trait CounterStore: Send + Sync {
    /// Current count for `key`, 0 when absent
    fn get(&self, key: &ContentKey) -> Result<u64, StoreError>;

    /// Add `amount` to the count for `key` and return the new count
    fn add(&self, key: &ContentKey, amount: u64) -> Result<u64, StoreError>;

    /// Snapshot of every stored entry
    fn all(&self) -> Result<Vec<(ContentKey, u64)>, StoreError>;

    /// Short backend name for logs and the health endpoint
    fn backend(&self) -> &'static str;

    fn increment(&self, key: &ContentKey) -> Result<u64, StoreError> {
        self.add(key, 1)
    }

    /// Add every amount as one unit, so a failure leaves all counts unchanged.
    /// The default applies entries one by one; the bundled backends override it.
    fn add_all(&self, entries: &[(ContentKey, u64)]) -> Result<(), StoreError> {
        for (key, amount) in entries {
            self.add(key, *amount)?;
        }
        Ok(())
    }

    /// Highest counts for one content type, ordered by views then id
    fn top(
        &self,
        content_type: ContentType,
        limit: usize,
    ) -> Result<Vec<(ContentKey, u64)>, StoreError> {
        let mut entries: Vec<_> = self
            .all()?
            .into_iter()
            .filter(|(key, _)| key.content_type == content_type)
            .collect();
        entries.sort_by(rank);
        entries.truncate(limit);
        Ok(entries)
    }
}

/// Which [`CounterStore`] implementation to open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Sqlite,
    Json,
    Memory,
}

impl Backend {
    /// File name used when no explicit data path is configured
    pub fn default_file_name(&self) -> &'static str {
        match self {
            Backend::Sqlite => "views.db",
            Backend::Json => "views.txt",
            Backend::Memory => "",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Backend::Sqlite => "sqlite",
            Backend::Json => "json",
            Backend::Memory => "memory",
        })
    }
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqlite" => Ok(Backend::Sqlite),
            "json" => Ok(Backend::Json),
            "memory" => Ok(Backend::Memory),
            other => Err(format!("unknown storage backend: {}", other)),
        }
    }
}

/// Open the configured backend. `path` is ignored for the memory store.
pub fn open(backend: Backend, path: &Path) -> Result<Box<dyn CounterStore>, StoreError> {
    let store: Box<dyn CounterStore> = match backend {
        Backend::Sqlite => Box::new(SqliteStore::open(path)?),
        Backend::Json => Box::new(JsonFileStore::open(path)?),
        Backend::Memory => Box::new(MemoryStore::new()),
    };
    Ok(store)
}
