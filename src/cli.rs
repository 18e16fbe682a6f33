use clap::{Args, Parser, Subcommand};

use crate::prompt::{Perspective, SummaryStyle};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the structural profile of a page.
    Analyze(AnalyzeArgs),
    /// List the scored content units of a page.
    Candidates(CandidatesArgs),
    /// Summarize one unit of a page for a user.
    Run(RunArgs),
}

#[derive(Debug, Args)]
pub struct PageArgs {
    /// Page id in the document workspace.
    #[arg(long)]
    pub page: String,

    /// YAML file overriding tunable constants.
    #[arg(long)]
    pub config: Option<String>,
}

#[derive(Debug, Args)]
pub struct AnalyzeArgs {
    #[command(flatten)]
    pub page: PageArgs,
}

#[derive(Debug, Args)]
pub struct CandidatesArgs {
    #[command(flatten)]
    pub page: PageArgs,

    /// Maximum candidates to print.
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub page: PageArgs,

    /// User whose history drives selection.
    #[arg(long)]
    pub user: String,

    /// Directory holding summaries and recency markers.
    #[arg(long)]
    pub store: String,

    /// Overrides `prompt.style` from the config file.
    #[arg(long, value_enum)]
    pub style: Option<SummaryStyle>,

    /// Overrides `prompt.perspective` from the config file.
    #[arg(long, value_enum)]
    pub perspective: Option<Perspective>,

    /// Overrides `prompt.language` from the config file.
    #[arg(long)]
    pub language: Option<String>,
}
