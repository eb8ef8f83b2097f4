//! `demandflow`: runs the database-to-datalake job once.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use demandflow::cancellation::CancellationToken;
use demandflow::config::JobConfig;
use demandflow::job::DemandJob;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Exit status after a second Ctrl-C, as a shell reports SIGINT.
const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Product-to-material demand pipeline.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// TOML configuration file. `DEMANDFLOW_*` variables override it.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Runs every stage once.
    Run,
    /// Prints the stage chain with dependencies and retry policy.
    Stages,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

fn init_logging(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Pretty => registry.with(fmt::layer().with_target(false)).try_init()?,
        LogFormat::Json => registry.with(fmt::layer().json()).try_init()?,
    }
    Ok(())
}

/// The first interrupt cancels the run between stages; a second one calls `abort`.
async fn handle_interrupts<F, Fut>(
    mut next_interrupt: F,
    token: Arc<CancellationToken>,
    abort: impl FnOnce(),
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<()>>,
{
    if next_interrupt().await.is_err() {
        return;
    }
    warn!("Interrupt received, stopping after the current stage (press Ctrl-C again to abort)");
    token.cancel("interrupted");

    if next_interrupt().await.is_ok() {
        error!("Second interrupt received, aborting");
        abort();
    }
}

async fn run(config: &JobConfig) -> Result<bool> {
    let job = DemandJob::from_config(config)
        .await
        .context("failed to set up source and store")?;
    let graph = job.graph()?;

    let token = Arc::new(CancellationToken::new());
    let signal_token = token.clone();
    tokio::spawn(handle_interrupts(tokio::signal::ctrl_c, signal_token, || {
        std::process::exit(INTERRUPTED_EXIT_CODE)
    }));

    let run = graph.run_with_cancellation(&token).await;
    let summary = run.summary();

    if let Some((stage, err)) = run.failure() {
        error!(stage, kind = err.root_cause().kind(), error = %err, "Run failed");
    } else if run.is_success() {
        info!(run_id = %run.run_id, duration_ms = run.duration_ms, "Run succeeded");
    }
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(run.is_success())
}

async fn print_stages(config: &JobConfig) -> Result<()> {
    let graph = DemandJob::from_config(config).await?.graph()?;

    println!("{}", graph.name());
    for name in graph.execution_order() {
        let Some(spec) = graph.stage(name) else { continue };
        let mut deps: Vec<&str> = spec.dependencies.iter().map(String::as_str).collect();
        deps.sort_unstable();
        println!(
            "  {name:<22} after [{}]  retries={} delay={}s",
            deps.join(", "),
            spec.retry.retries,
            spec.retry.retry_delay.as_secs()
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.log_format)?;

    let config = JobConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Commands::Run => {
            if run(&config).await? {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
        Commands::Stages => {
            print_stages(&config).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Notify;

    fn interrupts(notify: &Arc<Notify>) -> impl FnMut() -> std::pin::Pin<Box<dyn Future<Output = io::Result<()>> + Send>> {
        let notify = notify.clone();
        move || {
            let notify = notify.clone();
            Box::pin(async move {
                notify.notified().await;
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn test_second_interrupt_aborts() {
        let notify = Arc::new(Notify::new());
        let token = Arc::new(CancellationToken::new());
        let aborted = Arc::new(AtomicBool::new(false));

        let flag = aborted.clone();
        let handler = tokio::spawn(handle_interrupts(interrupts(&notify), token.clone(), move || {
            flag.store(true, Ordering::SeqCst);
        }));

        notify.notify_one();
        while !token.is_cancelled() {
            tokio::task::yield_now().await;
        }
        assert_eq!(token.reason().as_deref(), Some("interrupted"));
        assert!(!aborted.load(Ordering::SeqCst));

        notify.notify_one();
        handler.await.unwrap();
        assert!(aborted.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_signal_setup_failure_leaves_run_alone() {
        let token = Arc::new(CancellationToken::new());
        let mut aborted = false;

        handle_interrupts(
            || async { Err(io::Error::new(io::ErrorKind::Other, "no signal handler")) },
            token.clone(),
            || aborted = true,
        )
        .await;

        assert!(!token.is_cancelled());
        assert!(!aborted);
    }
}
