use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Context as _;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::analyze::{StructuralProfile, analyze};
use crate::block::PageTree;
use crate::config::DigestConfig;
use crate::fetch::{DocumentFetcher, FetchError, materialize_page};
use crate::formats::{ActionItem, Priority, SourceRef, SummaryResult};
use crate::llm::{GenerationError, GenerationRequest, TextGenerator, extract_json_object};
use crate::observe::{PipelineEvent, PipelineObserver, TracingObserver};
use crate::prompt::{self, Prompt};
use crate::score::{ScoredCandidate, matched_lexicons, score_units};
use crate::select::{Selection, SelectionHistory, select};
use crate::store::{HistoryStore, RecencyStore, SummaryStore};
use crate::strategy::{Strategy, extract_candidates};

const MAX_ACTION_ITEMS: usize = 10;
const MAX_KEY_INSIGHTS: usize = 5;
const WORDS_PER_MINUTE: usize = 200;
const URGENCY_KEYWORDS: &[&str] = &["urgent", "asap", "immediately", "overdue", "deadline"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub primary_model: String,
    /// Cheaper model used once when the primary one reports a quota error.
    pub fallback_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub secondary_max_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            primary_model: "gpt-4.1".to_owned(),
            fallback_model: "gpt-4.1-mini".to_owned(),
            temperature: 0.3,
            max_tokens: 900,
            secondary_max_tokens: 400,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Fetch,
    Analyze,
    Extract,
    Score,
    Select,
    Preprocess,
    GenerateSummary,
    ExtractActions,
    ExtractInsights,
    Assemble,
    Persist,
    Complete,
    Failed,
}

impl RunStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Analyze => "analyze",
            Self::Extract => "extract",
            Self::Score => "score",
            Self::Select => "select",
            Self::Preprocess => "preprocess",
            Self::GenerateSummary => "generate_summary",
            Self::ExtractActions => "extract_actions",
            Self::ExtractInsights => "extract_insights",
            Self::Assemble => "assemble",
            Self::Persist => "persist",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("fetch page: {0}")]
    Fetch(FetchError),
    #[error("read history: {0:#}")]
    Store(anyhow::Error),
    #[error("generate summary: {0}")]
    Generation(GenerationError),
    #[error("internal invariant violated: {0}")]
    Invariant(String),
    #[error("run cancelled")]
    Cancelled,
}

impl From<FetchError> for RunError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Cancelled => Self::Cancelled,
            err => Self::Fetch(err),
        }
    }
}

impl From<GenerationError> for RunError {
    fn from(err: GenerationError) -> Self {
        match err {
            GenerationError::Cancelled => Self::Cancelled,
            err => Self::Generation(err),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(Box<SummaryResult>),
    /// Legitimate no-op: empty page, or nothing left that may be repeated.
    NothingToSummarize(String),
}

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub page_id: String,
    pub user_id: String,
}

/// Everything known about a page before history is consulted.
#[derive(Debug, Clone)]
pub struct PageCandidates {
    pub tree: PageTree,
    pub profile: StructuralProfile,
    pub strategy: Option<Strategy>,
    pub candidates: Vec<ScoredCandidate>,
}

pub struct Summarizer {
    fetcher: Arc<dyn DocumentFetcher>,
    generator: Arc<dyn TextGenerator>,
    history: Arc<dyn HistoryStore>,
    recency: Arc<dyn RecencyStore>,
    summaries: Arc<dyn SummaryStore>,
    observer: Arc<dyn PipelineObserver>,
    config: DigestConfig,
    fixed_now: Option<DateTime<Utc>>,
}

impl Summarizer {
    pub fn new<S>(
        fetcher: Arc<dyn DocumentFetcher>,
        generator: Arc<dyn TextGenerator>,
        store: Arc<S>,
    ) -> Self
    where
        S: HistoryStore + RecencyStore + SummaryStore + 'static,
    {
        Self {
            fetcher,
            generator,
            history: store.clone(),
            recency: store.clone(),
            summaries: store,
            observer: Arc::new(TracingObserver),
            config: DigestConfig::default(),
            fixed_now: None,
        }
    }

    pub fn with_config(mut self, config: DigestConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Pins the clock used for recency scoring and timestamps.
    pub fn with_clock(mut self, now: DateTime<Utc>) -> Self {
        self.fixed_now = Some(now);
        self
    }

    pub fn config(&self) -> &DigestConfig {
        &self.config
    }

    fn now(&self) -> DateTime<Utc> {
        self.fixed_now.unwrap_or_else(Utc::now)
    }

    fn enter(&self, stage: RunStage) {
        self.observer.record(PipelineEvent::StageEntered { stage });
    }

    /// Fetches, analyzes, extracts and scores one page.
    pub async fn gather_candidates(
        &self,
        page_id: &str,
        cancel: &CancellationToken,
    ) -> Result<PageCandidates, RunError> {
        gather_candidates(
            Arc::clone(&self.fetcher),
            &self.config,
            self.observer.as_ref(),
            self.now(),
            page_id,
            cancel,
        )
        .await
    }

    /// One full run for one user and page. At most one unit is summarized.
    pub async fn run(
        &self,
        request: &RunRequest,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, RunError> {
        let outcome = self.run_stages(request, cancel).await;
        match &outcome {
            Ok(_) => self.enter(RunStage::Complete),
            Err(err) => {
                self.enter(RunStage::Failed);
                tracing::warn!(
                    page_id = %request.page_id,
                    user_id = %request.user_id,
                    error = %err,
                    "run failed"
                );
            }
        }
        outcome
    }

    async fn run_stages(
        &self,
        request: &RunRequest,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, RunError> {
        let page = self.gather_candidates(&request.page_id, cancel).await?;
        if page.candidates.is_empty() {
            tracing::info!(page_id = %request.page_id, "page has no extractable content");
            return Ok(RunOutcome::NothingToSummarize(
                "the page has no extractable content".to_owned(),
            ));
        }
        let candidate_count = page.candidates.len();

        self.enter(RunStage::Select);
        let policy = &self.config.selection;
        let recent = self
            .history
            .recent_summaries(&request.user_id, policy.history_limit)
            .await
            .map_err(RunError::Store)?;
        let summarized = self
            .history
            .summarized_unit_ids(&request.user_id)
            .await
            .map_err(RunError::Store)?;
        let stats = self
            .history
            .history_stats(&request.user_id)
            .await
            .map_err(RunError::Store)?;
        let since = self.now() - Duration::hours(policy.recency_window_hours);
        let recently_processed = self
            .recency
            .recently_processed(&request.user_id, since)
            .await
            .map_err(RunError::Store)?;

        let history = SelectionHistory::from_recent(&recent, summarized, stats);
        let selection = select(
            page.candidates,
            &history,
            &recently_processed,
            policy,
            self.observer.as_ref(),
        );
        let (chosen, is_repetition) = match selection {
            Selection::Fresh(candidate) => (candidate, false),
            Selection::Repeat { candidate, .. } => (candidate, true),
            Selection::NoSelection { reason } => {
                tracing::info!(user_id = %request.user_id, %reason, "nothing to summarize");
                return Ok(RunOutcome::NothingToSummarize(reason));
            }
        };
        if let Err(err) = self
            .recency
            .mark_processed(&request.user_id, &chosen.unit.id, self.now())
            .await
        {
            tracing::warn!(unit_id = %chosen.unit.id, error = %err, "failed to mark unit processed");
        }

        self.check_cancelled(cancel)?;
        self.enter(RunStage::Preprocess);
        let formatted = prompt::preprocess(std::slice::from_ref(&chosen.unit), &self.config.prompt)
            .map_err(|err| RunError::Invariant(err.to_string()))?;
        let prior = is_repetition.then(|| {
            recent
                .iter()
                .filter(|s| s.source().is_some_and(|src| src.unit_id == chosen.unit.id))
                .map(|s| s.summary.clone())
                .collect::<Vec<_>>()
        });
        let summary_prompt =
            prompt::summary_prompt(&chosen.unit, &formatted, prior.as_deref(), &self.config.prompt);

        self.enter(RunStage::GenerateSummary);
        let (summary, model) = self.generate_summary(&summary_prompt, cancel).await?;

        self.enter(RunStage::ExtractActions);
        let action_items = match self
            .secondary(
                &prompt::action_items_prompt(&summary, &chosen.unit.title),
                &model,
                cancel,
            )
            .await?
        {
            Some(raw) => parse_action_items(&raw).unwrap_or_else(|err| {
                tracing::warn!(error = %format!("{err:#}"), "malformed action items; using none");
                Vec::new()
            }),
            None => Vec::new(),
        };

        self.enter(RunStage::ExtractInsights);
        let key_insights = match self
            .secondary(
                &prompt::key_insights_prompt(&summary, &chosen.unit.title),
                &model,
                cancel,
            )
            .await?
        {
            Some(raw) => parse_key_insights(&raw).unwrap_or_else(|err| {
                tracing::warn!(error = %format!("{err:#}"), "malformed key insights; using none");
                Vec::new()
            }),
            None => Vec::new(),
        };

        self.enter(RunStage::Assemble);
        let mut tags = BTreeSet::new();
        tags.insert(chosen.unit.kind().as_str().to_owned());
        tags.insert(page.profile.primary_pattern.as_str().to_owned());
        tags.extend(
            matched_lexicons(&chosen.unit, &self.config.scoring)
                .into_iter()
                .map(str::to_owned),
        );

        let word_count = crate::content::word_count(&summary);
        let result = SummaryResult {
            id: format!("sum_{}", uuid::Uuid::new_v4().simple()),
            user_id: request.user_id.clone(),
            page_id: request.page_id.clone(),
            source_content: vec![SourceRef {
                unit_id: chosen.unit.id.clone(),
                title: chosen.unit.title.clone(),
                kind: chosen.unit.kind(),
                page_id: chosen.unit.page_id.clone(),
                page_title: chosen.unit.page_title.clone(),
                word_count: chosen.unit.word_count,
            }],
            priority: derive_priority(&summary, &action_items),
            summary,
            action_items,
            key_insights,
            tags: tags.into_iter().take(8).collect(),
            word_count,
            reading_time_minutes: reading_time_minutes(word_count),
            is_repetition,
            model,
            style: self.config.prompt.style,
            candidate_count,
            created_at: self.now(),
        };
        if result.source_content.len() != 1 {
            return Err(RunError::Invariant(format!(
                "summary must have exactly one source, got {}",
                result.source_content.len()
            )));
        }

        self.enter(RunStage::Persist);
        if let Err(err) = self.summaries.save_summary(&result).await {
            tracing::warn!(
                summary_id = %result.id,
                error = %format!("{err:#}"),
                "failed to persist summary; returning it anyway"
            );
        }

        tracing::info!(
            summary_id = %result.id,
            unit_id = %chosen.unit.id,
            model = %result.model,
            repetition = is_repetition,
            "summary ready"
        );
        Ok(RunOutcome::Completed(Box::new(result)))
    }

    fn check_cancelled(&self, cancel: &CancellationToken) -> Result<(), RunError> {
        if cancel.is_cancelled() {
            return Err(RunError::Cancelled);
        }
        Ok(())
    }

    /// Primary model first; a quota error earns exactly one fallback call.
    async fn generate_summary(
        &self,
        prompt: &Prompt,
        cancel: &CancellationToken,
    ) -> Result<(String, String), RunError> {
        let generation = &self.config.generation;
        let request = GenerationRequest {
            instructions: prompt.instructions.clone(),
            input: prompt.input.clone(),
            model: generation.primary_model.clone(),
            temperature: generation.temperature,
            max_tokens: generation.max_tokens,
        };

        let first = self.generator.generate(&request, cancel).await;
        match first {
            Ok(text) => Ok((text.trim().to_owned(), request.model)),
            Err(err) if err.is_quota() => {
                tracing::warn!(
                    primary = %generation.primary_model,
                    fallback = %generation.fallback_model,
                    error = %err,
                    "quota exhausted; retrying once with the fallback model"
                );
                let request = GenerationRequest {
                    model: generation.fallback_model.clone(),
                    ..request
                };
                let text = self.generator.generate(&request, cancel).await?;
                Ok((text.trim().to_owned(), request.model))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Action and insight calls never fail the run, except on cancellation.
    async fn secondary(
        &self,
        prompt: &Prompt,
        model: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, RunError> {
        let request = GenerationRequest {
            instructions: prompt.instructions.clone(),
            input: prompt.input.clone(),
            model: model.to_owned(),
            temperature: 0.0,
            max_tokens: self.config.generation.secondary_max_tokens,
        };
        match self.generator.generate(&request, cancel).await {
            Ok(text) => Ok(Some(text)),
            Err(GenerationError::Cancelled) => Err(RunError::Cancelled),
            Err(err) => {
                tracing::warn!(model, error = %err, "secondary generation failed; using an empty list");
                Ok(None)
            }
        }
    }
}

/// Fetches, analyzes, extracts and scores one page. No history is read.
pub async fn gather_candidates(
    fetcher: Arc<dyn DocumentFetcher>,
    config: &DigestConfig,
    observer: &dyn PipelineObserver,
    now: DateTime<Utc>,
    page_id: &str,
    cancel: &CancellationToken,
) -> Result<PageCandidates, RunError> {
    observer.record(PipelineEvent::StageEntered {
        stage: RunStage::Fetch,
    });
    let tree = materialize_page(fetcher, page_id, &config.fetch, &config.retry, cancel).await?;

    observer.record(PipelineEvent::StageEntered {
        stage: RunStage::Analyze,
    });
    let profile = analyze(&tree.blocks, &tree.title);

    observer.record(PipelineEvent::StageEntered {
        stage: RunStage::Extract,
    });
    let extraction = extract_candidates(&tree, &profile, &config.extraction, observer);

    observer.record(PipelineEvent::StageEntered {
        stage: RunStage::Score,
    });
    let candidates = score_units(extraction.units, &config.scoring, now, observer);

    tracing::info!(
        page_id,
        pattern = profile.primary_pattern.as_str(),
        strategy = extraction.strategy.map(Strategy::as_str).unwrap_or("none"),
        candidates = candidates.len(),
        "page candidates ready"
    );

    Ok(PageCandidates {
        tree,
        profile,
        strategy: extraction.strategy,
        candidates,
    })
}

#[derive(Debug, Deserialize)]
struct ActionEnvelope {
    #[serde(default)]
    action_items: Vec<RawActionItem>,
}

#[derive(Debug, Deserialize)]
struct RawActionItem {
    text: String,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    due_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InsightEnvelope {
    #[serde(default)]
    key_insights: Vec<String>,
}

pub fn parse_action_items(raw: &str) -> anyhow::Result<Vec<ActionItem>> {
    let json = extract_json_object(raw).context("extract json object from action items output")?;
    let envelope: ActionEnvelope = serde_json::from_str(json).context("parse action items json")?;
    Ok(envelope
        .action_items
        .into_iter()
        .filter(|item| !item.text.trim().is_empty())
        .take(MAX_ACTION_ITEMS)
        .map(|item| ActionItem {
            text: item.text.trim().to_owned(),
            priority: item
                .priority
                .as_deref()
                .map(Priority::parse_loose)
                .unwrap_or(Priority::Medium),
            category: item
                .category
                .map(|c| c.trim().to_owned())
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| "general".to_owned()),
            due_date: item.due_date.filter(|d| !d.trim().is_empty()),
        })
        .collect())
}

pub fn parse_key_insights(raw: &str) -> anyhow::Result<Vec<String>> {
    let json = extract_json_object(raw).context("extract json object from key insights output")?;
    let envelope: InsightEnvelope = serde_json::from_str(json).context("parse key insights json")?;
    Ok(envelope
        .key_insights
        .into_iter()
        .map(|insight| insight.trim().to_owned())
        .filter(|insight| !insight.is_empty())
        .take(MAX_KEY_INSIGHTS)
        .collect())
}

pub fn derive_priority(summary: &str, action_items: &[ActionItem]) -> Priority {
    let lower = summary.to_lowercase();
    if action_items.iter().any(|a| a.priority == Priority::High)
        || URGENCY_KEYWORDS.iter().any(|k| lower.contains(k))
    {
        return Priority::High;
    }
    if !action_items.is_empty() {
        return Priority::Medium;
    }
    Priority::Low
}

pub fn reading_time_minutes(word_count: usize) -> u32 {
    u32::try_from(word_count.div_ceil(WORDS_PER_MINUTE).max(1)).unwrap_or(u32::MAX)
}
