use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::formats::SummaryResult;

const RECENCY_RETENTION_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryStats {
    pub summary_count: usize,
    /// Sum of candidate counts over every stored summary.
    pub content_instance_count: usize,
}

impl HistoryStats {
    fn from_summaries<'a>(summaries: impl IntoIterator<Item = &'a SummaryResult>) -> Self {
        summaries
            .into_iter()
            .fold(Self::default(), |mut stats, summary| {
                stats.summary_count += 1;
                stats.content_instance_count += summary.candidate_count;
                stats
            })
    }
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Most recent first.
    async fn recent_summaries(
        &self,
        user_id: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<SummaryResult>>;
    async fn summarized_unit_ids(&self, user_id: &str) -> anyhow::Result<HashSet<String>>;
    async fn history_stats(&self, user_id: &str) -> anyhow::Result<HistoryStats>;
}

#[async_trait]
pub trait SummaryStore: Send + Sync {
    async fn save_summary(&self, summary: &SummaryResult) -> anyhow::Result<()>;
}

/// Short-term "already handled" markers keyed by unit id.
#[async_trait]
pub trait RecencyStore: Send + Sync {
    async fn recently_processed(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> anyhow::Result<HashSet<String>>;
    async fn mark_processed(
        &self,
        user_id: &str,
        unit_id: &str,
        at: DateTime<Utc>,
    ) -> anyhow::Result<()>;
}

/// JSON files under `<base>/users/<user>/`.
#[derive(Debug)]
pub struct LocalFsStore {
    base_dir: PathBuf,
    recency_lock: tokio::sync::Mutex<()>,
}

impl LocalFsStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            recency_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn user_dir(&self, user_id: &str) -> anyhow::Result<PathBuf> {
        Ok(self.base_dir.join("users").join(safe_segment(user_id)?))
    }

    fn summaries_dir(&self, user_id: &str) -> anyhow::Result<PathBuf> {
        Ok(self.user_dir(user_id)?.join("summaries"))
    }

    fn recent_json_path(&self, user_id: &str) -> anyhow::Result<PathBuf> {
        Ok(self.user_dir(user_id)?.join("recent.json"))
    }

    async fn load_summaries(&self, user_id: &str) -> anyhow::Result<Vec<SummaryResult>> {
        let dir = self.summaries_dir(user_id)?;
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("read dir: {}", dir.display()));
            }
        };

        let mut summaries = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|| format!("list: {}", dir.display()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let summary: Option<SummaryResult> = read_json(&path)
                .await
                .with_context(|| format!("read: {}", path.display()))?;
            summaries.extend(summary);
        }

        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(summaries)
    }
}

#[async_trait]
impl HistoryStore for LocalFsStore {
    async fn recent_summaries(
        &self,
        user_id: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<SummaryResult>> {
        let mut summaries = self.load_summaries(user_id).await?;
        summaries.truncate(limit);
        Ok(summaries)
    }

    async fn summarized_unit_ids(&self, user_id: &str) -> anyhow::Result<HashSet<String>> {
        Ok(self
            .load_summaries(user_id)
            .await?
            .iter()
            .flat_map(|s| s.source_content.iter().map(|src| src.unit_id.clone()))
            .collect())
    }

    async fn history_stats(&self, user_id: &str) -> anyhow::Result<HistoryStats> {
        let summaries = self.load_summaries(user_id).await?;
        Ok(HistoryStats::from_summaries(&summaries))
    }
}

#[async_trait]
impl SummaryStore for LocalFsStore {
    async fn save_summary(&self, summary: &SummaryResult) -> anyhow::Result<()> {
        let path = self
            .summaries_dir(&summary.user_id)?
            .join(format!("{}.json", safe_segment(&summary.id)?));
        write_json_atomic(&path, summary)
            .await
            .with_context(|| format!("write summary: {}", path.display()))
    }
}

#[async_trait]
impl RecencyStore for LocalFsStore {
    async fn recently_processed(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> anyhow::Result<HashSet<String>> {
        let path = self.recent_json_path(user_id)?;
        let recent: BTreeMap<String, DateTime<Utc>> = read_json(&path)
            .await
            .with_context(|| format!("read: {}", path.display()))?
            .unwrap_or_default();
        Ok(recent
            .into_iter()
            .filter(|(_, at)| *at >= since)
            .map(|(id, _)| id)
            .collect())
    }

    async fn mark_processed(
        &self,
        user_id: &str,
        unit_id: &str,
        at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let _guard = self.recency_lock.lock().await;
        let path = self.recent_json_path(user_id)?;
        let mut recent: BTreeMap<String, DateTime<Utc>> = read_json(&path)
            .await
            .with_context(|| format!("read: {}", path.display()))?
            .unwrap_or_default();

        let cutoff = at - Duration::days(RECENCY_RETENTION_DAYS);
        recent.retain(|_, processed_at| *processed_at >= cutoff);
        recent.insert(unit_id.to_owned(), at);

        write_json_atomic(&path, &recent)
            .await
            .context("write recent.json")
    }
}

#[derive(Debug, Default)]
struct UserState {
    summaries: Vec<SummaryResult>,
    recent: HashMap<String, DateTime<Utc>>,
}

/// In-process store; `failing_saves` makes every save return an error.
#[derive(Debug, Default)]
pub struct MemoryStore {
    users: Mutex<HashMap<String, UserState>>,
    fail_saves: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_saves() -> Self {
        Self {
            fail_saves: true,
            ..Self::default()
        }
    }

    pub fn with_summary(self, summary: SummaryResult) -> Self {
        if let Ok(mut users) = self.users.lock() {
            users
                .entry(summary.user_id.clone())
                .or_default()
                .summaries
                .push(summary);
        }
        self
    }

    pub fn summaries(&self, user_id: &str) -> Vec<SummaryResult> {
        self.users
            .lock()
            .ok()
            .and_then(|users| users.get(user_id).map(|u| sorted_recent_first(&u.summaries)))
            .unwrap_or_default()
    }

    fn with_user<T>(&self, user_id: &str, f: impl FnOnce(&mut UserState) -> T) -> anyhow::Result<T> {
        let mut users = self
            .users
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        Ok(f(users.entry(user_id.to_owned()).or_default()))
    }
}

fn sorted_recent_first(summaries: &[SummaryResult]) -> Vec<SummaryResult> {
    let mut summaries = summaries.to_vec();
    summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
    summaries
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn recent_summaries(
        &self,
        user_id: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<SummaryResult>> {
        self.with_user(user_id, |user| {
            let mut summaries = sorted_recent_first(&user.summaries);
            summaries.truncate(limit);
            summaries
        })
    }

    async fn summarized_unit_ids(&self, user_id: &str) -> anyhow::Result<HashSet<String>> {
        self.with_user(user_id, |user| {
            user.summaries
                .iter()
                .flat_map(|s| s.source_content.iter().map(|src| src.unit_id.clone()))
                .collect()
        })
    }

    async fn history_stats(&self, user_id: &str) -> anyhow::Result<HistoryStats> {
        self.with_user(user_id, |user| HistoryStats::from_summaries(&user.summaries))
    }
}

#[async_trait]
impl SummaryStore for MemoryStore {
    async fn save_summary(&self, summary: &SummaryResult) -> anyhow::Result<()> {
        if self.fail_saves {
            anyhow::bail!("memory store rejects writes");
        }
        self.with_user(&summary.user_id, |user| user.summaries.push(summary.clone()))
    }
}

#[async_trait]
impl RecencyStore for MemoryStore {
    async fn recently_processed(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> anyhow::Result<HashSet<String>> {
        self.with_user(user_id, |user| {
            user.recent
                .iter()
                .filter(|(_, at)| **at >= since)
                .map(|(id, _)| id.clone())
                .collect()
        })
    }

    async fn mark_processed(
        &self,
        user_id: &str,
        unit_id: &str,
        at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        self.with_user(user_id, |user| {
            user.recent.insert(unit_id.to_owned(), at);
        })
    }
}

/// Rejects ids that would escape the store directory.
fn safe_segment(id: &str) -> anyhow::Result<String> {
    let trimmed = id.trim();
    if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
        anyhow::bail!("invalid id: {id:?}");
    }
    Ok(trimmed
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@') {
                c
            } else {
                '_'
            }
        })
        .collect())
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let value = serde_json::from_slice(&bytes).context("parse json")?;
    Ok(Some(value))
}

async fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("create parent dir: {}", parent.display()))?;

    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    let data = serde_json::to_vec_pretty(value).context("serialize json")?;
    fs::write(&tmp_path, &data)
        .await
        .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("rename tmp to final: {}", path.display()))?;
    Ok(())
}
