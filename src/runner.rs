//! Process entry point.
//!
//! The same binary plays two roles. Started by a user it becomes the
//! supervisor; started by the supervisor (with `APPRUNNER_FACTORY` set) it
//! becomes a worker that hosts the application.

use std::process::ExitCode;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use crate::config::RunnerConfig;
use crate::error::{EXIT_OK, EXIT_SUPERVISOR_FAILED, WorkerError};
use crate::factory::{AppFactory, AppRef, Registry, get_app_factory};
use crate::process::ProcessLauncher;
use crate::supervisor::Supervisor;
use crate::watch::NotifyWatcher;
use crate::{logging, os_signals, worker};

/// Run `app` under the reloading supervisor, configured from the current
/// directory's `apprunner.toml`.
pub fn run(registry: Registry, app: AppRef) -> ExitCode {
    match RunnerConfig::load(".") {
        Ok(config) => run_with_config(registry, app, config),
        Err(e) => {
            logging::init(crate::constants::DEFAULT_LOG_LEVEL);
            error!(error = %format!("{e:#}"), "Failed to load configuration");
            ExitCode::from(EXIT_SUPERVISOR_FAILED)
        },
    }
}

/// Like [`run`], with an explicit configuration.
///
/// Workers receive the same command line as the supervisor, so they should
/// arrive at the same configuration.
pub fn run_with_config(registry: Registry, app: AppRef, config: RunnerConfig) -> ExitCode {
    ExitCode::from(run_inner(&registry, &app, config))
}

fn run_inner(registry: &Registry, app: &AppRef, config: RunnerConfig) -> u8 {
    logging::init(&config.log_level);

    if let Some(payload) = worker::factory_from_env() {
        return run_worker(payload, registry, config.app_stop_timeout());
    }

    match supervise(app, config) {
        Ok(()) => EXIT_OK,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Error running server");
            EXIT_SUPERVISOR_FAILED
        },
    }
}

fn run_worker(
    payload: Result<AppFactory, WorkerError>,
    registry: &Registry,
    stop_timeout: Duration,
) -> u8 {
    let result = payload.and_then(|factory| {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(worker::serve_main_app(&factory, registry, stop_timeout))
    });

    match result {
        Ok(()) => EXIT_OK,
        Err(e) => {
            error!(error = %e, pid = std::process::id(), "Worker failed");
            e.exit_code()
        },
    }
}

fn supervise(app: &AppRef, config: RunnerConfig) -> Result<()> {
    let factory = get_app_factory(app)
        .with_context(|| format!("Failed to resolve application factory for {}", app.name()))?;

    let validation = config.validate()?;
    for warning in &validation.warnings {
        warn!(warning = %warning, "Configuration warning");
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    runtime.block_on(async move {
        let supervisor = Supervisor::new(
            factory.clone(),
            ProcessLauncher::current_exe(),
            config.supervisor_config(),
        );
        let watcher = NotifyWatcher::watch(
            &config.work_dir,
            config.watch_options(),
            supervisor.watch_token(),
        )?;
        info!(
            dir = %watcher.root().display(),
            factory = %factory,
            "Watching for source changes"
        );
        supervisor.start(watcher)?;

        let signal = tokio::select! {
            () = supervisor.wait() => Ok(()),
            signal = os_signals::wait_for_shutdown_signal() => signal,
        };
        if let Err(e) = &signal {
            error!(error = %e, "Failed to listen for shutdown signal");
        }

        info!("Shutting down server");
        let started = Instant::now();
        let closed = supervisor.close().await;
        info!(
            elapsed = %format!("{:.2}s", started.elapsed().as_secs_f64()),
            "Shutdown complete"
        );

        signal.context("Failed to listen for shutdown signal")?;
        closed?;
        Ok(())
    })
}
