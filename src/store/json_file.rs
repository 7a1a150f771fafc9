use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use super::CounterStore;
use crate::content::ContentKey;
use crate::error::StoreError;

/// View table kept as one JSON object on disk, e.g. `{"movie_550": 12, "tv_1399": 3}`.
///
/// Writers hold an in-process mutex and an exclusive advisory lock on
/// `<file>.lock` for the whole read-modify-write. The table itself is replaced
/// by renaming a fully written temp file, so readers never see a partial table.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    lock_path: PathBuf,
    writer: Mutex<()>,
}

enum Snapshot {
    Missing,
    Corrupt,
    Table(BTreeMap<String, u64>),
}

impl JsonFileStore {
    /// Open the table at `path`, creating an empty one if none exists
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }

        let mut lock_path = path.as_os_str().to_owned();
        lock_path.push(".lock");

        let store = JsonFileStore {
            path: path.to_path_buf(),
            lock_path: PathBuf::from(lock_path),
            writer: Mutex::new(()),
        };

        store.with_exclusive_lock(|| {
            if let Snapshot::Missing = load(&store.path)? {
                write_table(&store.path, &BTreeMap::new())?;
                info!("Created empty view table at {}", store.path.display());
            }
            Ok(())
        })?;

        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_exclusive_lock<T>(
        &self,
        f: impl FnOnce() -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(|e| StoreError::io(&self.lock_path, e))?;
        lock_file
            .lock()
            .map_err(|e| StoreError::io(&self.lock_path, e))?;

        let result = f();

        if let Err(e) = lock_file.unlock() {
            warn!("Failed to release {}: {}", self.lock_path.display(), e);
        }
        result
    }

    fn back_up_corrupt(&self) -> Result<(), StoreError> {
        let mut backup = self.path.as_os_str().to_owned();
        backup.push(".corrupt");
        let backup = PathBuf::from(backup);

        fs::copy(&self.path, &backup).map_err(|e| StoreError::io(&backup, e))?;
        warn!(
            "View table {} was unreadable; saved a copy to {} and starting from an empty table",
            self.path.display(),
            backup.display()
        );
        Ok(())
    }

    /// Current table for a read-modify-write; call with the lock held
    fn read_for_update(&self) -> Result<BTreeMap<String, u64>, StoreError> {
        match load(&self.path)? {
            Snapshot::Table(table) => Ok(table),
            Snapshot::Missing => Ok(BTreeMap::new()),
            Snapshot::Corrupt => {
                self.back_up_corrupt()?;
                Ok(BTreeMap::new())
            }
        }
    }

    fn read_for_query(&self) -> Result<BTreeMap<String, u64>, StoreError> {
        match load(&self.path)? {
            Snapshot::Table(table) => Ok(table),
            Snapshot::Missing => Ok(BTreeMap::new()),
            Snapshot::Corrupt => {
                warn!("View table {} is not a JSON object, reading as empty", self.path.display());
                Ok(BTreeMap::new())
            }
        }
    }
}

impl CounterStore for JsonFileStore {
    fn get(&self, key: &ContentKey) -> Result<u64, StoreError> {
        let table = self.read_for_query()?;
        Ok(table.get(&key.storage_key()).copied().unwrap_or(0))
    }

    fn add(&self, key: &ContentKey, amount: u64) -> Result<u64, StoreError> {
        let storage_key = key.storage_key();

        self.with_exclusive_lock(|| {
            let mut table = self.read_for_update()?;

            let count = table.entry(storage_key.clone()).or_insert(0);
            *count = count
                .checked_add(amount)
                .ok_or_else(|| StoreError::Overflow(storage_key.clone()))?;
            let count = *count;

            write_table(&self.path, &table)?;
            Ok(count)
        })
    }

    fn add_all(&self, entries: &[(ContentKey, u64)]) -> Result<(), StoreError> {
        self.with_exclusive_lock(|| {
            let mut table = self.read_for_update()?;

            for (key, amount) in entries {
                let storage_key = key.storage_key();
                let count = table.entry(storage_key.clone()).or_insert(0);
                *count = count
                    .checked_add(*amount)
                    .ok_or(StoreError::Overflow(storage_key))?;
            }

            write_table(&self.path, &table)
        })
    }

    fn all(&self) -> Result<Vec<(ContentKey, u64)>, StoreError> {
        let table = self.read_for_query()?;
        Ok(table
            .into_iter()
            .filter_map(|(key, count)| ContentKey::from_storage_key(&key).map(|k| (k, count)))
            .collect())
    }

    fn backend(&self) -> &'static str {
        "json"
    }
}

/// Decode the legacy view table.
///
/// An object yields its non-negative integer entries. An array (the legacy
/// initial content is `[]`) or blank content is an empty table. Anything else
/// is `None`.
pub fn parse_table(contents: &str) -> Option<BTreeMap<String, u64>> {
    if contents.trim().is_empty() {
        return Some(BTreeMap::new());
    }

    match serde_json::from_str::<Value>(contents).ok()? {
        Value::Object(entries) => Some(
            entries
                .into_iter()
                .filter_map(|(key, value)| match value.as_u64() {
                    Some(count) => Some((key, count)),
                    None => {
                        debug!("Skipping view entry {} with non-integer value {}", key, value);
                        None
                    }
                })
                .collect(),
        ),
        Value::Array(_) => Some(BTreeMap::new()),
        _ => None,
    }
}

fn load(path: &Path) -> Result<Snapshot, StoreError> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(parse_table(&contents).map_or(Snapshot::Corrupt, Snapshot::Table)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Snapshot::Missing),
        Err(e) if e.kind() == ErrorKind::InvalidData => Ok(Snapshot::Corrupt),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

fn write_table(path: &Path, table: &BTreeMap<String, u64>) -> Result<(), StoreError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut temp = NamedTempFile::new_in(dir).map_err(|e| StoreError::io(dir, e))?;
    serde_json::to_writer_pretty(&mut temp, table)?;
    temp.write_all(b"\n").map_err(|e| StoreError::io(temp.path(), e))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| StoreError::io(temp.path(), e))?;
    temp.persist(path)
        .map_err(|e| StoreError::io(path, e.error))?;

    debug!("Wrote {} view entries to {}", table.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::ContentType;
    use std::sync::Arc;
    use std::thread;
    use tempfile::TempDir;

    fn key(content_type: ContentType, id: &str) -> ContentKey {
        ContentKey {
            content_type,
            content_id: id.to_string(),
        }
    }

    #[test]
    fn test_open_creates_empty_table() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("data").join("views.txt");

        let store = JsonFileStore::open(&path).unwrap();
        assert!(path.exists());
        assert!(store.all().unwrap().is_empty());
        assert_eq!(parse_table(&fs::read_to_string(&path).unwrap()), Some(BTreeMap::new()));
    }

    #[test]
    fn test_increment_persists_legacy_layout() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("views.txt");
        let store = JsonFileStore::open(&path).unwrap();

        assert_eq!(store.increment(&key(ContentType::Movie, "550")).unwrap(), 1);
        assert_eq!(store.increment(&key(ContentType::Movie, "550")).unwrap(), 2);
        assert_eq!(store.increment(&key(ContentType::Tv, "1399")).unwrap(), 1);

        let raw: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["movie_550"], 2);
        assert_eq!(raw["tv_1399"], 1);
    }

    #[test]
    fn test_add_all_writes_once_or_not_at_all() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("views.txt");
        let store = JsonFileStore::open(&path).unwrap();
        store.add(&key(ContentType::Movie, "2"), u64::MAX).unwrap();
        let before = fs::read_to_string(&path).unwrap();

        let batch = [(key(ContentType::Movie, "1"), 5), (key(ContentType::Movie, "2"), 1)];
        assert!(matches!(store.add_all(&batch), Err(StoreError::Overflow(_))));
        assert_eq!(fs::read_to_string(&path).unwrap(), before);

        store
            .add_all(&[(key(ContentType::Movie, "1"), 5), (key(ContentType::Tv, "9"), 3)])
            .unwrap();
        assert_eq!(store.get(&key(ContentType::Movie, "1")).unwrap(), 5);
        assert_eq!(store.get(&key(ContentType::Tv, "9")).unwrap(), 3);
    }

    #[test]
    fn test_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("views.txt");
        {
            let store = JsonFileStore::open(&path).unwrap();
            store.add(&key(ContentType::Tv, "7"), 3).unwrap();
        }

        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(reopened.get(&key(ContentType::Tv, "7")).unwrap(), 3);
    }

    #[test]
    fn test_legacy_empty_array_is_empty_table() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("views.txt");
        fs::write(&path, "[]").unwrap();

        let store = JsonFileStore::open(&path).unwrap();
        assert_eq!(store.get(&key(ContentType::Movie, "1")).unwrap(), 0);
        assert_eq!(store.increment(&key(ContentType::Movie, "1")).unwrap(), 1);
        assert!(!temp_dir.path().join("views.txt.corrupt").exists());
    }

    #[test]
    fn test_corrupt_table_reads_empty_and_is_backed_up() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("views.txt");
        fs::write(&path, "{not json").unwrap();

        let store = JsonFileStore::open(&path).unwrap();
        assert_eq!(store.get(&key(ContentType::Movie, "1")).unwrap(), 0);
        assert!(store.all().unwrap().is_empty());

        assert_eq!(store.increment(&key(ContentType::Movie, "1")).unwrap(), 1);
        let backup = temp_dir.path().join("views.txt.corrupt");
        assert_eq!(fs::read_to_string(backup).unwrap(), "{not json");
        assert_eq!(store.get(&key(ContentType::Movie, "1")).unwrap(), 1);
    }

    #[test]
    fn test_parse_table_edge_cases() {
        let table = parse_table(r#"{"movie_1": 4, "tv_2": "x", "movie_3": -1, "note": 9}"#).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table["movie_1"], 4);
        assert_eq!(table["note"], 9);

        assert_eq!(parse_table("   "), Some(BTreeMap::new()));
        assert_eq!(parse_table("[1, 2]"), Some(BTreeMap::new()));
        assert_eq!(parse_table("42"), None);
        assert_eq!(parse_table("null"), None);
    }

    #[test]
    fn test_unknown_keys_are_kept_but_not_listed() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("views.txt");
        fs::write(&path, r#"{"person_9": 4, "movie_1": 2}"#).unwrap();

        let store = JsonFileStore::open(&path).unwrap();
        store.increment(&key(ContentType::Movie, "1")).unwrap();

        let listed = store.all().unwrap();
        assert_eq!(listed, vec![(key(ContentType::Movie, "1"), 3)]);

        let raw = parse_table(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["person_9"], 4);
    }

    #[test]
    fn test_concurrent_writers_on_shared_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("views.txt");

        // Separate instances only share the advisory file lock.
        let stores: Vec<_> = (0..4)
            .map(|_| Arc::new(JsonFileStore::open(&path).unwrap()))
            .collect();

        let handles: Vec<_> = stores
            .iter()
            .flat_map(|store| {
                (0..2).map(move |_| {
                    let store = Arc::clone(store);
                    thread::spawn(move || {
                        for _ in 0..25 {
                            store.increment(&key(ContentType::Tv, "1")).unwrap();
                        }
                    })
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(stores[0].get(&key(ContentType::Tv, "1")).unwrap(), 200);
    }
}
