use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::content::{ContentKey, ContentType};
use crate::error::ViewError;
use crate::store::CounterStore;

/// Number of ids returned per content type by the leaderboard
pub const DEFAULT_LEADERBOARD_LIMIT: usize = 10;

/// Most viewed ids per content type, highest count first
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopViewed {
    pub movies: Vec<String>,
    pub tv: Vec<String>,
}

/// Outcome of merging a legacy view table into the store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub imported: usize,
    pub total_views: u64,
    pub skipped: Vec<String>,
}

/// Records and reports per-item view counts
#[derive(Clone)]
pub struct ViewCounter {
    store: Arc<dyn CounterStore>,
    leaderboard_limit: usize,
}

impl ViewCounter {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self {
            store,
            leaderboard_limit: DEFAULT_LEADERBOARD_LIMIT,
        }
    }

    pub fn with_leaderboard_limit(mut self, limit: usize) -> Self {
        self.leaderboard_limit = limit;
        self
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    /// Count one view and return the new total. Every call increments.
    pub fn record_view(&self, content_type: &str, content_id: &str) -> Result<u64, ViewError> {
        let key = ContentKey::sanitize(content_type, content_id).inspect_err(|_| {
            debug!("Rejected view for type={:?} id={:?}", content_type, content_id);
        })?;

        let views = self.store.increment(&key)?;
        debug!("Recorded view for {} (total {})", key, views);
        Ok(views)
    }

    /// Current count for one item, 0 if never viewed or the store cannot be read
    pub fn get_views(&self, content_type: &str, content_id: &str) -> Result<u64, ViewError> {
        let key = ContentKey::sanitize(content_type, content_id)?;

        match self.store.get(&key) {
            Ok(views) => Ok(views),
            Err(e) => {
                warn!("Failed to read views for {}, reporting 0: {}", key, e);
                Ok(0)
            }
        }
    }

    /// Leaderboard of the most viewed movies and shows
    pub fn top_viewed(&self) -> TopViewed {
        TopViewed {
            movies: self.top_ids(ContentType::Movie),
            tv: self.top_ids(ContentType::Tv),
        }
    }

    fn top_ids(&self, content_type: ContentType) -> Vec<String> {
        match self.store.top(content_type, self.leaderboard_limit) {
            Ok(entries) => entries.into_iter().map(|(key, _)| key.content_id).collect(),
            Err(e) => {
                warn!("Failed to read {} leaderboard, returning none: {}", content_type, e);
                Vec::new()
            }
        }
    }

    /// Merge a legacy `"<type>_<id>" -> count` table by adding each count to the stored one.
    /// The merge is applied as one unit: on error no count has changed.
    pub fn import(&self, table: &BTreeMap<String, u64>) -> Result<ImportReport, ViewError> {
        let mut report = ImportReport::default();
        let mut entries = Vec::new();

        for (raw_key, &count) in table {
            let Some(key) = ContentKey::from_storage_key(raw_key) else {
                warn!("Skipping unrecognised key {:?}", raw_key);
                report.skipped.push(raw_key.clone());
                continue;
            };
            if count == 0 {
                continue;
            }

            entries.push((key, count));
            report.imported += 1;
            report.total_views = report.total_views.saturating_add(count);
        }

        self.store.add_all(&entries)?;

        info!(
            "Imported {} entries ({} views), skipped {}",
            report.imported,
            report.total_views,
            report.skipped.len()
        );
        Ok(report)
    }
}
