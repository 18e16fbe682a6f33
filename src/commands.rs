use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::analyze::{StructuralProfile, analyze as analyze_blocks};
use crate::cli::{AnalyzeArgs, CandidatesArgs, PageArgs, RunArgs};
use crate::config::DigestConfig;
use crate::content::UnitKind;
use crate::fetch::{DocumentFetcher, NotionConfig, NotionFetcher, materialize_page};
use crate::observe::TracingObserver;
use crate::openai::{OpenAiConfig, OpenAiGenerator};
use crate::score::ScoreBreakdown;
use crate::store::LocalFsStore;
use crate::summarize::{RunOutcome, RunRequest, Summarizer, gather_candidates};

fn load_config(args: &PageArgs) -> anyhow::Result<DigestConfig> {
    DigestConfig::load(args.config.as_deref().map(Path::new))
}

fn notion_fetcher(config: &DigestConfig) -> anyhow::Result<Arc<dyn DocumentFetcher>> {
    let mut notion = NotionConfig::from_env().context("load notion config")?;
    notion.page_size = config.fetch.page_size;
    Ok(Arc::new(NotionFetcher::new(notion)?))
}

#[derive(Debug, Serialize)]
struct AnalyzeReport<'a> {
    page_id: &'a str,
    title: &'a str,
    profile: &'a StructuralProfile,
}

pub async fn analyze(args: AnalyzeArgs, cancel: CancellationToken) -> anyhow::Result<()> {
    let config = load_config(&args.page)?;
    let fetcher = notion_fetcher(&config)?;

    let tree = materialize_page(
        fetcher,
        &args.page.page,
        &config.fetch,
        &config.retry,
        &cancel,
    )
    .await
    .with_context(|| format!("fetch page {}", args.page.page))?;
    let profile = analyze_blocks(&tree.blocks, &tree.title);

    print_json(&AnalyzeReport {
        page_id: &tree.page_id,
        title: &tree.title,
        profile: &profile,
    })
}

#[derive(Debug, Serialize)]
struct CandidateRow<'a> {
    id: &'a str,
    kind: UnitKind,
    title: &'a str,
    word_count: usize,
    total: f64,
    breakdown: ScoreBreakdown,
}

#[derive(Debug, Serialize)]
struct CandidatesReport<'a> {
    page_id: &'a str,
    pattern: &'static str,
    strategy: Option<&'static str>,
    total_candidates: usize,
    candidates: Vec<CandidateRow<'a>>,
}

pub async fn candidates(args: CandidatesArgs, cancel: CancellationToken) -> anyhow::Result<()> {
    let config = load_config(&args.page)?;
    let fetcher = notion_fetcher(&config)?;

    let page = gather_candidates(
        fetcher,
        &config,
        &TracingObserver,
        Utc::now(),
        &args.page.page,
        &cancel,
    )
    .await
    .context("gather candidates")?;

    let mut ranked = page.candidates.iter().collect::<Vec<_>>();
    ranked.sort_by(|a, b| b.total.total_cmp(&a.total));

    print_json(&CandidatesReport {
        page_id: &page.tree.page_id,
        pattern: page.profile.primary_pattern.as_str(),
        strategy: page.strategy.map(|s| s.as_str()),
        total_candidates: page.candidates.len(),
        candidates: ranked
            .into_iter()
            .take(args.limit)
            .map(|c| CandidateRow {
                id: &c.unit.id,
                kind: c.unit.kind(),
                title: &c.unit.title,
                word_count: c.unit.word_count,
                total: c.total,
                breakdown: c.breakdown,
            })
            .collect(),
    })
}

pub async fn run(args: RunArgs, cancel: CancellationToken) -> anyhow::Result<()> {
    let mut config = load_config(&args.page)?;
    if let Some(style) = args.style {
        config.prompt.style = style;
    }
    if let Some(perspective) = args.perspective {
        config.prompt.perspective = perspective;
    }
    if let Some(language) = args.language {
        config.prompt.language = language;
    }

    let fetcher = notion_fetcher(&config)?;
    let generator = OpenAiGenerator::new(
        OpenAiConfig::from_env().context("load openai config")?,
        config.retry.clone(),
    )?;
    let store = Arc::new(LocalFsStore::new(&args.store));

    tracing::info!(
        page_id = %args.page.page,
        user_id = %args.user,
        store = %args.store,
        style = ?config.prompt.style,
        "run"
    );

    let summarizer = Summarizer::new(fetcher, Arc::new(generator), store).with_config(config);
    let request = RunRequest {
        page_id: args.page.page,
        user_id: args.user,
    };

    match summarizer.run(&request, &cancel).await? {
        RunOutcome::Completed(result) => print_json(&result),
        RunOutcome::NothingToSummarize(reason) => {
            tracing::info!(%reason, "nothing to summarize");
            Ok(())
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value).context("serialize output")?;
    println!("{json}");
    Ok(())
}
