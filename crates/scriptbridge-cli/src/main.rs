//! `scriptbridge` runs scripts through the execution bridge from a terminal.

mod console;

use std::{
    path::{Path, PathBuf},
    process::{ExitCode, Stdio},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use scriptbridge_core::BridgeConfig;
use scriptbridge_host::{RunController, RunSummary};
use scriptbridge_lang::TreeWalker;
use scriptbridge_transport::{Endpoint, LinkTasks, Side, connect, pair};
use scriptbridge_worker::ExecutionContext;
use tokio::{
    process::{Child, Command},
    task::JoinHandle,
};
use tracing_subscriber::EnvFilter;

use crate::console::{LineInput, echo_run};

/// How long an isolated worker gets to exit after its input closes.
const WORKER_EXIT_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "scriptbridge")]
#[command(about = "Run scripts through an isolated execution context", long_about = None)]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, global = true, env = "SCRIPTBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Interval between checks for an input answer (overrides the config file)
    #[arg(long, global = true, value_parser = clap::value_parser!(u64).range(1..))]
    poll_interval_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a script, answering its prompts from stdin
    Run {
        /// Script to run
        file: PathBuf,

        /// Run the execution context in a child process
        #[arg(long)]
        isolated: bool,
    },

    /// Serve an execution context over stdin/stdout (JSON lines)
    Worker,
}

impl Cli {
    fn bridge_config(&self) -> Result<BridgeConfig> {
        let mut config = match &self.config {
            Some(path) => BridgeConfig::load(path)?,
            None => BridgeConfig::default(),
        };
        if let Some(ms) = self.poll_interval_ms {
            config.input_poll_interval_ms = ms;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.bridge_config()?;

    match cli.command {
        Commands::Run { file, isolated } => run_script(&file, isolated, config).await,
        Commands::Worker => {
            ExecutionContext::new(Arc::new(TreeWalker::new()), config)
                .serve_stdio()
                .await;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Where the execution context lives for one invocation.
enum Backend {
    InProcess(JoinHandle<()>),
    Isolated { child: Child, tasks: LinkTasks },
}

impl Backend {
    fn in_process(config: &BridgeConfig) -> (Endpoint, Self) {
        let (host, worker) = pair();
        let context = ExecutionContext::new(Arc::new(TreeWalker::new()), config.clone()).spawn(worker);
        (host, Self::InProcess(context))
    }

    fn isolated(config: &BridgeConfig) -> Result<(Endpoint, Self)> {
        let exe = std::env::current_exe().context("Failed to locate the scriptbridge binary")?;
        let mut child = Command::new(exe)
            .arg("--poll-interval-ms")
            .arg(config.input_poll_interval_ms.to_string())
            .arg("worker")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .context("Failed to spawn worker process")?;

        let stdin = child.stdin.take().context("Worker stdin unavailable")?;
        let stdout = child.stdout.take().context("Worker stdout unavailable")?;
        tracing::debug!(pid = ?child.id(), "Spawned worker process");

        let (endpoint, tasks) = connect(stdout, stdin, Side::Host);
        Ok((endpoint, Self::Isolated { child, tasks }))
    }

    /// Wait for the execution context to stop once the host side has hung up.
    async fn shutdown(self) {
        let (mut child, tasks) = match self {
            Self::InProcess(context) => {
                if let Err(e) = context.await {
                    tracing::warn!("Execution context task failed: {e}");
                }
                return;
            }
            Self::Isolated { child, tasks } => (child, tasks),
        };
        tasks.flush().await;
        match tokio::time::timeout(WORKER_EXIT_GRACE, child.wait()).await {
            Ok(Ok(status)) => tracing::debug!(%status, "Worker exited"),
            Ok(Err(e)) => tracing::warn!("Failed to wait for worker: {e}"),
            Err(_) => {
                tracing::warn!("Worker did not exit, killing it");
                if let Err(e) = child.kill().await {
                    tracing::warn!("Failed to kill worker: {e}");
                }
            }
        }
    }
}

async fn run_script(file: &Path, isolated: bool, config: BridgeConfig) -> Result<ExitCode> {
    let source = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let (endpoint, backend) = if isolated {
        Backend::isolated(&config)?
    } else {
        Backend::in_process(&config)
    };

    let mut controller = RunController::new(endpoint, Arc::new(LineInput::stdin()), &config);
    controller.start_run(source)?;

    let events = controller.log().follow();
    let echo = tokio::spawn(async move { echo_run(events, &mut tokio::io::stdout()).await });

    let summary = wait_or_abort(&mut controller).await?;
    echo.await.context("Output task failed")??;

    drop(controller);
    backend.shutdown().await;

    eprintln!("Execution time {} ms", summary.elapsed.as_millis());
    Ok(if summary.succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Wait for the run to end; the first Ctrl-C aborts it.
async fn wait_or_abort(controller: &mut RunController) -> Result<RunSummary> {
    tokio::select! {
        summary = controller.wait_for_completion() => return Ok(summary?),
        signal = tokio::signal::ctrl_c() => signal.context("Failed to listen for Ctrl-C")?,
    }

    tracing::info!("Interrupted, aborting run");
    controller.abort()?;
    Ok(controller.wait_for_completion().await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_interval_flag_overrides_default() {
        let cli = Cli::parse_from(["scriptbridge", "run", "demo.lox", "--poll-interval-ms", "5"]);
        let config = cli.bridge_config().unwrap();
        assert_eq!(config.input_poll_interval_ms, 5);
        assert!(matches!(
            cli.command,
            Commands::Run { isolated: false, .. }
        ));
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        assert!(Cli::try_parse_from(["scriptbridge", "worker", "--poll-interval-ms", "0"]).is_err());
    }

    #[test]
    fn test_worker_subcommand() {
        let cli = Cli::parse_from(["scriptbridge", "--poll-interval-ms", "20", "worker"]);
        assert!(matches!(cli.command, Commands::Worker));
        assert_eq!(cli.poll_interval_ms, Some(20));
    }
}
