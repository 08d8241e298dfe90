use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use conductor::config::Config;
use conductor::dispatch::{DispatchOptions, Dispatcher, QueueSource, SilentReporter, TaskSource};
use conductor::pipeline::{Pipeline, PipelineOptions};
use conductor::server;
use conductor::store::StateStore;

mod commands;
use commands::Commands;

#[derive(Parser)]
#[command(name = "conductor")]
#[command(about = "Parallel AI coding-task orchestrator over Git worktrees")]
#[command(version)]
struct Cli {
    /// Enable verbose logging (and tee worker output to the terminal)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    let cwd = std::env::current_dir()?;
    let config = Config::load(&cwd);

    // One token for everything; ctrl-c terminates children and drains.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutting down");
                cancel.cancel();
            }
        });
    }

    match cli.command {
        Commands::Run {
            task,
            repo,
            base_branch,
            job_id,
            push,
            prefactor,
        } => {
            let store = StateStore::open(&config.db_path)?;
            let pipeline = Pipeline::new(store, config, cancel);
            let report = pipeline
                .run_job(
                    &task,
                    PipelineOptions {
                        repo_root: repo,
                        base_branch,
                        job_id,
                        push_result: push,
                        enable_prefactor: prefactor,
                        verbose_log: cli.verbose,
                    },
                )
                .await?;

            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.succeeded() {
                std::process::exit(1);
            }
        }

        Commands::Serve { port, db } => {
            server::serve(
                db.unwrap_or_else(|| config.db_path.clone()),
                port.unwrap_or(config.dashboard_port),
                cancel,
            )
            .await?;
        }

        Commands::Dispatch {
            tasks,
            once,
            interval_ms,
        } => {
            let store = StateStore::open(&config.db_path)?;
            let options = DispatchOptions {
                poll_interval: Duration::from_millis(
                    interval_ms.unwrap_or(config.poll_interval_ms),
                ),
                stop_when_empty: once || config.stop_when_empty,
                job_options: PipelineOptions {
                    verbose_log: cli.verbose,
                    ..PipelineOptions::default()
                },
            };
            let pipeline = Pipeline::new(store, config, cancel.clone());
            let sources: Vec<Arc<dyn TaskSource>> =
                vec![Arc::new(QueueSource::new("cli-queue", tasks))];
            Dispatcher::new(pipeline, options, cancel)
                .run(&sources, &SilentReporter)
                .await?;
        }
    }

    Ok(())
}
