//! Daily analysis snapshot file.
//!
//! JSON object keyed by symbol. Each entry carries the analysis summary and the
//! `cacheTime` it was produced at; entries from an earlier local day are dropped
//! on load.

use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::AdvisoryResult;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedAnalysis {
    pub summary: Value,
    pub cache_time: DateTime<Local>,
}

impl CachedAnalysis {
    pub fn new(summary: Value) -> Self {
        Self {
            summary,
            cache_time: Local::now(),
        }
    }

    pub fn is_from(&self, day: NaiveDate) -> bool {
        self.cache_time.date_naive() == day
    }
}

pub type AnalysisSnapshot = BTreeMap<String, CachedAnalysis>;

pub struct AnalysisSnapshotStore {
    path: PathBuf,
}

impl AnalysisSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entries produced today (local date). A missing file is an empty snapshot.
    pub async fn load(&self) -> AdvisoryResult<AnalysisSnapshot> {
        self.load_for(Local::now().date_naive()).await
    }

    pub async fn load_for(&self, day: NaiveDate) -> AdvisoryResult<AnalysisSnapshot> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(AnalysisSnapshot::new());
            }
            Err(e) => return Err(e.into()),
        };

        let entries: BTreeMap<String, Value> = serde_json::from_str(&raw)?;
        let total = entries.len();

        let snapshot: AnalysisSnapshot = entries
            .into_iter()
            .filter_map(|(symbol, value)| match serde_json::from_value::<CachedAnalysis>(value) {
                Ok(entry) if entry.is_from(day) => Some((symbol, entry)),
                Ok(_) => None,
                Err(e) => {
                    tracing::debug!("Dropping unreadable snapshot entry {}: {}", symbol, e);
                    None
                }
            })
            .collect();

        if snapshot.len() < total {
            tracing::info!(
                "Loaded {} of {} snapshot entries from {} (rest expired)",
                snapshot.len(),
                total,
                self.path.display()
            );
        }

        Ok(snapshot)
    }

    /// Write the snapshot via a temp file and rename.
    pub async fn save(&self, snapshot: &AnalysisSnapshot) -> AdvisoryResult<()> {
        let json = serde_json::to_string_pretty(snapshot)?;
        let tmp = self.path.with_extension("json.tmp");

        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
