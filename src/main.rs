//! apprunner-demo: runs a small demo application and restarts it whenever a
//! source file under the watched directory changes.
//!
//! Edit any `.rs` file under `--dir` while it runs to trigger a restart.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use apprunner::{AppRef, Application, Registry, RunnerConfig};
use clap::Parser;
use tokio::task::JoinHandle;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "apprunner-demo")]
#[command(about = "Run a demo application and restart it when sources change")]
struct Args {
    /// Directory to watch (overrides `work_dir` from the config file)
    #[arg(short, long)]
    dir: Option<PathBuf>,

    /// Path to an apprunner.toml
    #[arg(short, long)]
    config: Option<PathBuf>,
}

/// Logs a heartbeat until stopped.
#[derive(Default)]
struct DemoApp {
    heartbeat: Option<JoinHandle<()>>,
}

#[async_trait::async_trait]
impl Application for DemoApp {
    async fn start(&mut self) -> Result<()> {
        info!(pid = std::process::id(), "Demo application started");
        self.heartbeat = Some(tokio::spawn(async {
            let mut ticks = 0u64;
            let mut interval = tokio::time::interval(Duration::from_secs(5));
            loop {
                interval.tick().await;
                ticks += 1;
                info!(ticks, "Demo application alive");
            }
        }));
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.abort();
        }
        info!(pid = std::process::id(), "Demo application stopped");
        Ok(())
    }
}

fn load_config(args: &Args) -> Result<RunnerConfig> {
    let mut config = match &args.config {
        Some(path) => RunnerConfig::load_from(path)?,
        None => RunnerConfig::load(args.dir.as_deref().unwrap_or(Path::new(".")))?,
    };
    if let Some(dir) = &args.dir {
        config.work_dir = dir.clone();
    }
    Ok(config)
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::from(apprunner::EXIT_SUPERVISOR_FAILED);
        },
    };

    let mut registry = Registry::new();
    if let Err(e) = registry.register_type::<DemoApp>() {
        eprintln!("Error: {e}");
        return ExitCode::from(apprunner::EXIT_SUPERVISOR_FAILED);
    }

    apprunner::run_with_config(registry, AppRef::of_type::<DemoApp>(), config)
}
