use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing::{info, warn};

use gh_issue_watch::config;
use gh_issue_watch::github::GithubClient;
use gh_issue_watch::pipeline;
use gh_issue_watch::telegram::{LogNotifier, Notifier, TelegramNotifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TestMode {
    /// Send one fixed message to the test topic
    Connection,
    /// Forward the newest open issue of every configured organization
    Orgs,
}

#[derive(Debug, Parser)]
#[command(author, version, about = "Announce new unassigned GitHub issues in Telegram topics")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Run a self-test instead of the rule pipeline
    #[arg(long, value_enum)]
    test: Option<TestMode>,

    /// Search and filter, but log messages instead of sending them
    #[arg(long)]
    dry_run: bool,

    /// Print an example configuration and exit
    #[arg(long)]
    print_example_config: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    if args.print_example_config {
        print!("{}", config::example());
        return Ok(());
    }

    let cfg = config::load(Some(&args.config))
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    for var in cfg.missing_credentials() {
        warn!(var, "credential not configured; the collaborator will reject requests");
    }

    let github = GithubClient::from_config(&cfg)?;
    let telegram;
    let notifier: &dyn Notifier = if args.dry_run {
        &LogNotifier
    } else {
        telegram = TelegramNotifier::from_config(&cfg)?;
        &telegram
    };

    match args.test {
        Some(TestMode::Connection) => {
            pipeline::run_connection_test(&cfg, notifier).await;
        }
        Some(TestMode::Orgs) => {
            pipeline::run_org_coverage(&cfg, &github, notifier).await;
        }
        None => {
            let summary =
                pipeline::run_rules(&cfg, chrono::Utc::now(), &github, &github, notifier).await;
            info!(
                forwarded = summary.forwarded,
                failed_batches = summary.failed_batches,
                "done"
            );
        }
    }

    Ok(())
}
