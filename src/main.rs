use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    pagedigest::logging::init().context("init logging")?;

    let cli = pagedigest::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted; cancelling in-flight requests");
            on_ctrl_c.cancel();
        }
    });

    match cli.command {
        pagedigest::cli::Command::Analyze(args) => {
            pagedigest::commands::analyze(args, cancel)
                .await
                .context("analyze")?;
        }
        pagedigest::cli::Command::Candidates(args) => {
            pagedigest::commands::candidates(args, cancel)
                .await
                .context("candidates")?;
        }
        pagedigest::cli::Command::Run(args) => {
            pagedigest::commands::run(args, cancel).await.context("run")?;
        }
    }

    Ok(())
}
