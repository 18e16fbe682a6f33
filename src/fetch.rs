use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::block::{BlockKind, PageTree, RawBlock};
use crate::retry::{RetryPolicy, Retryable, retry};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    #[error("document API rate limited the request")]
    RateLimited,
    #[error("document API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("document node not found: {0}")]
    NotFound(String),
    #[error("document API transport error: {0}")]
    Transport(String),
    #[error("decode document API response: {0}")]
    Decode(String),
    #[error("document API call timed out after {0:?}")]
    Timeout(Duration),
    #[error("document fetch cancelled")]
    Cancelled,
}

impl Retryable for FetchError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited | Self::Transport(_) | Self::Timeout(_) => true,
            Self::Api { status, .. } => *status >= 500,
            Self::NotFound(_) | Self::Decode(_) | Self::Cancelled => false,
        }
    }

    fn timed_out(after: Duration) -> Self {
        Self::Timeout(after)
    }

    fn cancelled() -> Self {
        Self::Cancelled
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageMetadata {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub properties: serde_json::Value,
    pub last_edited_at: Option<DateTime<Utc>>,
}

/// Remote, rate-limited source of document nodes.
///
/// `children` may legitimately return an empty list for a node that is only
/// collapsed; callers must not read that as "no content".
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn children(&self, node_id: &str) -> Result<Vec<RawBlock>, FetchError>;
    async fn page_metadata(&self, page_id: &str) -> Result<PageMetadata, FetchError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchOptions {
    pub max_depth: usize,
    pub concurrency: usize,
    pub page_size: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            max_depth: 4,
            concurrency: 3,
            page_size: 100,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NotionConfig {
    pub base_url: Url,
    pub token: String,
    pub notion_version: String,
    pub page_size: usize,
}

impl NotionConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let token =
            std::env::var("NOTION_TOKEN").map_err(|_| anyhow::anyhow!("NOTION_TOKEN is not set"))?;
        let base_url = std::env::var("PAGEDIGEST_NOTION_BASE_URL")
            .unwrap_or_else(|_| "https://api.notion.com/v1".to_owned());
        let notion_version = std::env::var("PAGEDIGEST_NOTION_VERSION")
            .unwrap_or_else(|_| "2022-06-28".to_owned());
        Self::new(&base_url, token, notion_version)
    }

    pub fn new(base_url: &str, token: String, notion_version: String) -> anyhow::Result<Self> {
        let mut normalized = base_url.trim_end_matches('/').to_owned();
        normalized.push('/');
        let base_url = Url::parse(&normalized)
            .with_context(|| format!("parse notion base url: {base_url}"))?;
        if base_url.scheme() != "http" && base_url.scheme() != "https" {
            anyhow::bail!("notion base url must be http/https: {base_url}");
        }
        Ok(Self {
            base_url,
            token,
            notion_version,
            page_size: 100,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NotionFetcher {
    client: reqwest::Client,
    config: NotionConfig,
}

impl NotionFetcher {
    pub fn new(config: NotionConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("pagedigest/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build http client")?;
        Ok(Self { client, config })
    }

    fn endpoint(&self, path: &str) -> Result<Url, FetchError> {
        self.config
            .base_url
            .join(path)
            .map_err(|err| FetchError::Decode(format!("build url for {path}: {err}")))
    }

    async fn get_json(&self, url: Url) -> Result<serde_json::Value, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .bearer_auth(&self.config.token)
            .header("Notion-Version", &self.config.notion_version)
            .send()
            .await
            .map_err(|err| FetchError::Transport(format!("GET {url}: {err}")))?;

        let status = response.status();
        let raw = response
            .text()
            .await
            .map_err(|err| FetchError::Transport(format!("read body of {url}: {err}")))?;

        if status.as_u16() == 429 {
            return Err(FetchError::RateLimited);
        }
        if status.as_u16() == 404 {
            return Err(FetchError::NotFound(url.path().to_owned()));
        }
        if !status.is_success() {
            let message = parse_error_message(&raw).unwrap_or(raw);
            return Err(FetchError::Api {
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_str(&raw).map_err(|err| FetchError::Decode(err.to_string()))
    }
}

#[async_trait]
impl DocumentFetcher for NotionFetcher {
    async fn children(&self, node_id: &str) -> Result<Vec<RawBlock>, FetchError> {
        let mut blocks = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen_cursors = HashSet::new();

        loop {
            let mut url = self.endpoint(&format!("blocks/{node_id}/children"))?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("page_size", &self.config.page_size.to_string());
                if let Some(cursor) = cursor.as_deref() {
                    query.append_pair("start_cursor", cursor);
                }
            }

            let value = self.get_json(url).await?;
            let results = value
                .get("results")
                .and_then(|v| v.as_array())
                .ok_or_else(|| FetchError::Decode("missing `results` array".to_owned()))?;
            blocks.extend(results.iter().filter_map(decode_block));

            let has_more = value
                .get("has_more")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            cursor = value
                .get("next_cursor")
                .and_then(|v| v.as_str())
                .map(str::to_owned);
            let Some(next) = cursor.as_deref().filter(|_| has_more) else {
                break;
            };
            if !seen_cursors.insert(next.to_owned()) {
                tracing::warn!(
                    node_id,
                    cursor = next,
                    pages = seen_cursors.len() + 1,
                    "document API repeated a pagination cursor; stopping"
                );
                break;
            }
        }

        Ok(blocks)
    }

    async fn page_metadata(&self, page_id: &str) -> Result<PageMetadata, FetchError> {
        let url = self.endpoint(&format!("pages/{page_id}"))?;
        let value = self.get_json(url).await?;
        let properties = value
            .get("properties")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        let title = title_from_properties(&properties).unwrap_or_else(|| "Untitled".to_owned());

        Ok(PageMetadata {
            id: page_id.to_owned(),
            title,
            properties,
            last_edited_at: parse_timestamp(value.get("last_edited_time")),
        })
    }
}

fn parse_error_message(raw_json: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw_json).ok()?;
    Some(value.get("message")?.as_str()?.to_owned())
}

fn parse_timestamp(value: Option<&serde_json::Value>) -> Option<DateTime<Utc>> {
    let raw = value?.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn plain_text(rich_text: Option<&serde_json::Value>) -> String {
    let Some(parts) = rich_text.and_then(|v| v.as_array()) else {
        return String::new();
    };
    parts
        .iter()
        .filter_map(|part| part.get("plain_text").and_then(|v| v.as_str()))
        .collect()
}

fn title_from_properties(properties: &serde_json::Value) -> Option<String> {
    let map = properties.as_object()?;
    map.values()
        .find(|prop| prop.get("type").and_then(|v| v.as_str()) == Some("title"))
        .map(|prop| plain_text(prop.get("title")))
        .filter(|title| !title.trim().is_empty())
}

pub(crate) fn decode_block(value: &serde_json::Value) -> Option<RawBlock> {
    let id = value.get("id")?.as_str()?.to_owned();
    let tag = value.get("type")?.as_str()?;
    let kind = BlockKind::from_tag(tag);
    let payload = value.get(tag);

    let text = match kind {
        BlockKind::ChildPage => payload
            .and_then(|p| p.get("title"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_owned(),
        _ => plain_text(payload.and_then(|p| p.get("rich_text"))),
    };

    let mut block = RawBlock::new(id, kind, text);
    block.has_children = value
        .get("has_children")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    block.last_edited_at = parse_timestamp(value.get("last_edited_time"));
    if kind == BlockKind::ToDo {
        block.checked = payload
            .and_then(|p| p.get("checked"))
            .and_then(|v| v.as_bool());
    }
    if kind.heading_level().is_some() {
        block.toggleable = payload
            .and_then(|p| p.get("is_toggleable"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
    }
    Some(block)
}

/// Fixture-backed fetcher: node id → children, with injectable failures.
#[derive(Debug, Clone, Default)]
pub struct InMemoryFetcher {
    pages: HashMap<String, PageMetadata>,
    children: HashMap<String, Vec<RawBlock>>,
    failures: HashMap<String, FetchError>,
}

impl InMemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a page and its whole subtree. Nested `children` become
    /// separately fetchable nodes and are stripped from the returned blocks,
    /// the way the remote API returns one level at a time.
    pub fn with_page(mut self, page_id: &str, title: &str, blocks: Vec<RawBlock>) -> Self {
        self.pages.insert(
            page_id.to_owned(),
            PageMetadata {
                id: page_id.to_owned(),
                title: title.to_owned(),
                properties: serde_json::Value::Null,
                last_edited_at: None,
            },
        );
        self.insert_level(page_id, blocks);
        self
    }

    pub fn with_failure(mut self, node_id: &str, error: FetchError) -> Self {
        self.failures.insert(node_id.to_owned(), error);
        self
    }

    fn insert_level(&mut self, node_id: &str, blocks: Vec<RawBlock>) {
        let mut level = Vec::with_capacity(blocks.len());
        for mut block in blocks {
            let children = std::mem::take(&mut block.children);
            if !children.is_empty() {
                self.insert_level(&block.id, children);
            }
            level.push(block);
        }
        self.children.insert(node_id.to_owned(), level);
    }
}

#[async_trait]
impl DocumentFetcher for InMemoryFetcher {
    async fn children(&self, node_id: &str) -> Result<Vec<RawBlock>, FetchError> {
        if let Some(err) = self.failures.get(node_id) {
            return Err(err.clone());
        }
        Ok(self.children.get(node_id).cloned().unwrap_or_default())
    }

    async fn page_metadata(&self, page_id: &str) -> Result<PageMetadata, FetchError> {
        if let Some(err) = self.failures.get(page_id) {
            return Err(err.clone());
        }
        self.pages
            .get(page_id)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(page_id.to_owned()))
    }
}

/// Fetches the page's metadata and every subtree the extractors may need.
///
/// Levels are fetched breadth-first; siblings run concurrently up to
/// `options.concurrency` and are joined back in document order. A failed
/// child fetch is recorded on the block and does not abort the page.
pub async fn materialize_page(
    fetcher: Arc<dyn DocumentFetcher>,
    page_id: &str,
    options: &FetchOptions,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<PageTree, FetchError> {
    let metadata = retry(policy, cancel, "fetch page metadata", || {
        fetcher.page_metadata(page_id)
    })
    .await?;
    let roots = retry(policy, cancel, "fetch page blocks", || fetcher.children(page_id)).await?;

    let mut arena: Vec<Option<RawBlock>> = Vec::new();
    let mut kids: Vec<Vec<usize>> = Vec::new();
    let mut root_ids = Vec::with_capacity(roots.len());
    let mut frontier = Vec::new();
    let mut truncated = 0usize;

    for mut block in roots {
        block.depth = 0;
        let idx = push_node(&mut arena, &mut kids, block);
        root_ids.push(idx);
        schedule(&mut arena, idx, options.max_depth, &mut frontier, &mut truncated);
    }

    while !frontier.is_empty() {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let node_ids = frontier
            .iter()
            .map(|idx: &usize| {
                arena[*idx]
                    .as_ref()
                    .map(|b| b.id.clone())
                    .unwrap_or_default()
            })
            .collect::<Vec<_>>();
        let results =
            fetch_children_concurrently(&fetcher, &node_ids, options, policy, cancel).await?;

        let mut next = Vec::new();
        for (parent_idx, result) in frontier.iter().copied().zip(results) {
            let parent_depth = arena[parent_idx].as_ref().map(|b| b.depth).unwrap_or(0);
            match result {
                Ok(children) => {
                    for mut child in children {
                        child.depth = parent_depth + 1;
                        let idx = push_node(&mut arena, &mut kids, child);
                        kids[parent_idx].push(idx);
                        schedule(&mut arena, idx, options.max_depth, &mut next, &mut truncated);
                    }
                }
                Err(err) => {
                    if let Some(parent) = arena[parent_idx].as_mut() {
                        tracing::warn!(
                            block_id = %parent.id,
                            error = %err,
                            "children fetch failed; block will degrade to a placeholder"
                        );
                        parent.children_error = Some(err.to_string());
                    }
                }
            }
        }
        frontier = next;
    }

    if truncated > 0 {
        tracing::info!(
            page_id,
            truncated_blocks = truncated,
            max_depth = options.max_depth,
            "depth limit reached; deeper content was not fetched"
        );
    }

    let blocks = root_ids
        .into_iter()
        .filter_map(|idx| assemble(&mut arena, &kids, idx))
        .collect::<Vec<_>>();

    tracing::debug!(page_id, blocks = blocks.len(), "page materialized");
    Ok(PageTree {
        page_id: page_id.to_owned(),
        title: metadata.title,
        last_edited_at: metadata.last_edited_at,
        blocks,
    })
}

fn push_node(arena: &mut Vec<Option<RawBlock>>, kids: &mut Vec<Vec<usize>>, block: RawBlock) -> usize {
    arena.push(Some(block));
    kids.push(Vec::new());
    arena.len() - 1
}

fn schedule(
    arena: &mut [Option<RawBlock>],
    idx: usize,
    max_depth: usize,
    frontier: &mut Vec<usize>,
    truncated: &mut usize,
) {
    let Some(block) = arena[idx].as_mut() else {
        return;
    };
    if !block.wants_children() {
        return;
    }
    if block.depth >= max_depth {
        tracing::debug!(block_id = %block.id, depth = block.depth, "depth limit; skipping children");
        block.truncated = true;
        *truncated += 1;
        return;
    }
    frontier.push(idx);
}

fn assemble(arena: &mut [Option<RawBlock>], kids: &[Vec<usize>], idx: usize) -> Option<RawBlock> {
    let mut block = arena[idx].take()?;
    block.children = kids[idx]
        .iter()
        .filter_map(|child| assemble(arena, kids, *child))
        .collect();
    Some(block)
}

async fn fetch_children_concurrently(
    fetcher: &Arc<dyn DocumentFetcher>,
    node_ids: &[String],
    options: &FetchOptions,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<Vec<Result<Vec<RawBlock>, FetchError>>, FetchError> {
    let concurrency = options.concurrency.max(1).min(node_ids.len().max(1));
    let mut results: Vec<Option<Result<Vec<RawBlock>, FetchError>>> = vec![None; node_ids.len()];
    let mut join_set = tokio::task::JoinSet::new();
    let mut next_idx = 0usize;

    while next_idx < node_ids.len() || !join_set.is_empty() {
        while next_idx < node_ids.len() && join_set.len() < concurrency {
            let index = next_idx;
            let node_id = node_ids[index].clone();
            let fetcher = Arc::clone(fetcher);
            let policy = policy.clone();
            let cancel = cancel.clone();

            join_set.spawn(async move {
                let result = retry(&policy, &cancel, "fetch block children", || {
                    fetcher.children(&node_id)
                })
                .await;
                (index, result)
            });
            next_idx += 1;
        }

        let Some(joined) = join_set.join_next().await else {
            break;
        };
        let (index, result) =
            joined.map_err(|err| FetchError::Transport(format!("join children fetch: {err}")))?;
        if matches!(result, Err(FetchError::Cancelled)) {
            join_set.abort_all();
            return Err(FetchError::Cancelled);
        }
        results[index] = Some(result);
    }

    Ok(results
        .into_iter()
        .map(|slot| slot.unwrap_or(Err(FetchError::Cancelled)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            base_delay_ms: 1,
            max_delay_ms: 2,
            attempt_timeout_ms: 1_000,
            overall_timeout_ms: 5_000,
        }
    }

    fn fixture() -> InMemoryFetcher {
        InMemoryFetcher::new().with_page(
            "page",
            "Course notes",
            vec![
                RawBlock::new("t1", BlockKind::Toggle, "Module 1").with_children(vec![
                    RawBlock::new("t1a", BlockKind::Toggle, "Video A").with_children(vec![
                        RawBlock::new("t1a-p", BlockKind::Paragraph, "Deep content"),
                    ]),
                ]),
                // Collapsed toggle: no hint, but children exist.
                RawBlock::new("t2", BlockKind::Toggle, "Module 2"),
                RawBlock::new("p", BlockKind::Paragraph, "Intro"),
            ],
        )
    }

    #[tokio::test]
    async fn materializes_nested_toggles_in_document_order() -> anyhow::Result<()> {
        let fetcher: Arc<dyn DocumentFetcher> = Arc::new(fixture());
        let tree = materialize_page(
            fetcher,
            "page",
            &FetchOptions::default(),
            &fast_policy(),
            &CancellationToken::new(),
        )
        .await?;

        assert_eq!(tree.title, "Course notes");
        let ids = tree.walk().into_iter().map(|b| b.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["t1", "t1a", "t1a-p", "t2", "p"]);
        assert_eq!(tree.blocks[0].children[0].depth, 1);
        assert_eq!(tree.blocks[0].children[0].children[0].depth, 2);
        Ok(())
    }

    #[tokio::test]
    async fn child_fetch_failure_is_recorded_not_fatal() -> anyhow::Result<()> {
        let fetcher: Arc<dyn DocumentFetcher> = Arc::new(
            fixture().with_failure("t2", FetchError::Api {
                status: 400,
                message: "bad".to_owned(),
            }),
        );
        let tree = materialize_page(
            fetcher,
            "page",
            &FetchOptions::default(),
            &fast_policy(),
            &CancellationToken::new(),
        )
        .await?;

        let t2 = &tree.blocks[1];
        assert!(t2.children.is_empty());
        assert!(t2.children_error.as_deref().unwrap_or_default().contains("bad"));
        Ok(())
    }

    #[tokio::test]
    async fn depth_limit_truncates_silently() -> anyhow::Result<()> {
        let fetcher: Arc<dyn DocumentFetcher> = Arc::new(fixture());
        let options = FetchOptions {
            max_depth: 1,
            concurrency: 2,
            ..FetchOptions::default()
        };
        let tree = materialize_page(
            fetcher,
            "page",
            &options,
            &fast_policy(),
            &CancellationToken::new(),
        )
        .await?;

        let video = &tree.blocks[0].children[0];
        assert!(video.truncated);
        assert!(video.children.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn root_fetch_failure_is_an_error() {
        let fetcher: Arc<dyn DocumentFetcher> =
            Arc::new(fixture().with_failure("page", FetchError::NotFound("page".to_owned())));
        let err = materialize_page(
            fetcher,
            "page",
            &FetchOptions::default(),
            &fast_policy(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert_eq!(err, FetchError::NotFound("page".to_owned()));
    }

    #[test]
    fn decode_block_reads_notion_shapes() {
        let value = serde_json::json!({
            "id": "b1",
            "type": "heading_2",
            "has_children": false,
            "last_edited_time": "2026-01-02T03:04:05.000Z",
            "heading_2": {
                "is_toggleable": true,
                "rich_text": [{ "plain_text": "Week " }, { "plain_text": "3" }]
            }
        });
        let block = decode_block(&value).expect("decode");
        assert_eq!(block.kind, BlockKind::Heading2);
        assert_eq!(block.text, "Week 3");
        assert!(block.is_toggle());
        assert!(block.last_edited_at.is_some());

        let todo = serde_json::json!({
            "id": "b2",
            "type": "to_do",
            "to_do": { "checked": true, "rich_text": [{ "plain_text": "Done" }] }
        });
        let block = decode_block(&todo).expect("decode");
        assert_eq!(block.checked, Some(true));
    }
}
