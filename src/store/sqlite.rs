use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info};

use super::CounterStore;
use crate::content::{ContentKey, ContentType};
use crate::error::StoreError;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// View counts in a SQLite table with one row per item.
///
/// Increments are a single UPSERT, so concurrent writers (threads or
/// processes sharing the file) never lose updates.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Create or open the database at `path`
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let journal_mode: String =
            conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        info!("Opened view database at {:?} (journal: {})", path, journal_mode);

        let store = SqliteStore {
            conn: Mutex::new(conn),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Private in-memory database, mostly useful in tests
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let store = SqliteStore {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn initialize_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS view_counts (
                content_type TEXT NOT NULL,
                content_id TEXT NOT NULL,
                views INTEGER NOT NULL DEFAULT 0 CHECK (views >= 0),
                last_viewed_at TEXT NOT NULL,
                PRIMARY KEY (content_type, content_id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_view_counts_type_views
             ON view_counts(content_type, views DESC)",
            [],
        )?;

        debug!("View database schema initialized");
        Ok(())
    }
}

fn row_to_entry(content_type: ContentType, id: String, views: i64) -> (ContentKey, u64) {
    (
        ContentKey {
            content_type,
            content_id: id,
        },
        u64::try_from(views).unwrap_or(0),
    )
}

/// Add `amount` to one row and return the new count. SQLite turns an integer
/// overflow into a REAL, which is reported as [`StoreError::Overflow`].
fn upsert(conn: &Connection, key: &ContentKey, amount: u64) -> Result<u64, StoreError> {
    let amount = i64::try_from(amount).map_err(|_| StoreError::Overflow(key.to_string()))?;

    let views: Value = conn.query_row(
        "INSERT INTO view_counts (content_type, content_id, views, last_viewed_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(content_type, content_id)
         DO UPDATE SET views = views + excluded.views,
                       last_viewed_at = excluded.last_viewed_at
         RETURNING views",
        params![
            key.content_type.as_str(),
            key.content_id,
            amount,
            Utc::now().to_rfc3339(),
        ],
        |row| row.get(0),
    )?;

    match views {
        Value::Integer(views) => Ok(u64::try_from(views).unwrap_or(0)),
        _ => Err(StoreError::Overflow(key.to_string())),
    }
}

fn parse_type(raw: &str) -> Option<ContentType> {
    match raw {
        "movie" => Some(ContentType::Movie),
        "tv" => Some(ContentType::Tv),
        _ => None,
    }
}

impl CounterStore for SqliteStore {
    fn get(&self, key: &ContentKey) -> Result<u64, StoreError> {
        let conn = self.conn();
        let views: Option<i64> = conn
            .query_row(
                "SELECT views FROM view_counts WHERE content_type = ?1 AND content_id = ?2",
                params![key.content_type.as_str(), key.content_id],
                |row| row.get(0),
            )
            .optional()?;

        Ok(views.and_then(|v| u64::try_from(v).ok()).unwrap_or(0))
    }

    fn add(&self, key: &ContentKey, amount: u64) -> Result<u64, StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let views = upsert(&tx, key, amount)?;
        tx.commit()?;
        Ok(views)
    }

    fn add_all(&self, entries: &[(ContentKey, u64)]) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        for (key, amount) in entries {
            upsert(&tx, key, *amount)?;
        }
        tx.commit()?;
        debug!("Applied {} view updates in one transaction", entries.len());
        Ok(())
    }

    fn all(&self) -> Result<Vec<(ContentKey, u64)>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT content_type, content_id, views FROM view_counts")?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .filter_map(|(content_type, id, views)| {
                parse_type(&content_type).map(|t| row_to_entry(t, id, views))
            })
            .collect())
    }

    fn top(
        &self,
        content_type: ContentType,
        limit: usize,
    ) -> Result<Vec<(ContentKey, u64)>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT content_id, views FROM view_counts
             WHERE content_type = ?1
             ORDER BY views DESC,
                      length(ltrim(content_id, '0')),
                      ltrim(content_id, '0'),
                      content_id
             LIMIT ?2",
        )?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(params![content_type.as_str(), limit], |row| {
                Ok(row_to_entry(content_type, row.get(0)?, row.get(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    fn backend(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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
    fn test_increment_and_get() {
        let store = SqliteStore::open_in_memory().unwrap();
        let movie = key(ContentType::Movie, "550");

        assert_eq!(store.get(&movie).unwrap(), 0);
        assert_eq!(store.increment(&movie).unwrap(), 1);
        assert_eq!(store.increment(&movie).unwrap(), 2);
        assert_eq!(store.add(&movie, 10).unwrap(), 12);
        assert_eq!(store.get(&movie).unwrap(), 12);
        assert_eq!(store.get(&key(ContentType::Tv, "550")).unwrap(), 0);
    }

    #[test]
    fn test_top_matches_default_ordering() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.add(&key(ContentType::Movie, "10"), 5).unwrap();
        store.add(&key(ContentType::Movie, "9"), 5).unwrap();
        store.add(&key(ContentType::Movie, "1"), 50).unwrap();
        store.add(&key(ContentType::Tv, "3"), 100).unwrap();

        let top = store.top(ContentType::Movie, 10).unwrap();
        let ids: Vec<_> = top.iter().map(|(k, _)| k.content_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "9", "10"]);

        let limited = store.top(ContentType::Movie, 1).unwrap();
        assert_eq!(limited, vec![(key(ContentType::Movie, "1"), 50)]);
    }

    #[test]
    fn test_overflow_rolls_back() {
        let store = SqliteStore::open_in_memory().unwrap();
        let big = key(ContentType::Movie, "2");
        store.add(&big, i64::MAX as u64).unwrap();

        assert!(matches!(store.increment(&big), Err(StoreError::Overflow(_))));
        assert_eq!(store.get(&big).unwrap(), i64::MAX as u64);
        assert!(matches!(store.add(&big, u64::MAX), Err(StoreError::Overflow(_))));
    }

    #[test]
    fn test_add_all_rolls_back_on_failure() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.add(&key(ContentType::Movie, "2"), i64::MAX as u64).unwrap();

        let batch = [(key(ContentType::Movie, "1"), 5), (key(ContentType::Movie, "2"), 1)];
        assert!(store.add_all(&batch).is_err());
        assert_eq!(store.get(&key(ContentType::Movie, "1")).unwrap(), 0);
        assert_eq!(store.all().unwrap().len(), 1);

        store
            .add_all(&[(key(ContentType::Movie, "1"), 5), (key(ContentType::Movie, "1"), 2)])
            .unwrap();
        assert_eq!(store.get(&key(ContentType::Movie, "1")).unwrap(), 7);
    }

    #[test]
    fn test_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("views.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.add(&key(ContentType::Tv, "1399"), 4).unwrap();
        }

        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(reopened.get(&key(ContentType::Tv, "1399")).unwrap(), 4);
        assert_eq!(reopened.all().unwrap().len(), 1);
    }

    #[test]
    fn test_concurrent_connections_do_not_lose_updates() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("views.db");

        let stores: Vec<_> = (0..4)
            .map(|_| Arc::new(SqliteStore::open(&path).unwrap()))
            .collect();

        let handles: Vec<_> = stores
            .iter()
            .map(|store| {
                let store = Arc::clone(store);
                thread::spawn(move || {
                    for _ in 0..50 {
                        store.increment(&key(ContentType::Movie, "1")).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(stores[0].get(&key(ContentType::Movie, "1")).unwrap(), 200);
    }
}
