//! Spawning worker processes.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use super::child::{ChildProcess, OsChild};
use crate::constants::FACTORY_ENV;
use crate::error::LaunchError;
use crate::factory::AppFactory;

/// Starts a new process hosting the application named by a factory.
pub trait Launcher: Send + Sync + 'static {
    /// Spawn one child. The returned process is already running.
    fn launch(&self, factory: &AppFactory) -> Result<Box<dyn ChildProcess>, LaunchError>;
}

/// Launches workers as real OS processes.
///
/// By default the worker is the current executable, re-run with the same
/// arguments and the factory descriptor in [`FACTORY_ENV`]. The worker side of
/// that protocol lives in [`crate::worker`].
#[derive(Debug, Clone, Default)]
pub struct ProcessLauncher {
    program: Option<PathBuf>,
    args: Vec<OsString>,
}

impl ProcessLauncher {
    /// Re-execute the current program with its original arguments.
    pub fn current_exe() -> Self {
        Self {
            program: None,
            args: std::env::args_os().skip(1).collect(),
        }
    }

    /// Run an explicit program instead of the current executable.
    pub fn with_program<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            program: Some(program.into()),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    fn program(&self) -> Result<PathBuf, LaunchError> {
        match &self.program {
            Some(program) => Ok(program.clone()),
            None => std::env::current_exe().map_err(|source| LaunchError::Program { source }),
        }
    }
}

impl Launcher for ProcessLauncher {
    fn launch(&self, factory: &AppFactory) -> Result<Box<dyn ChildProcess>, LaunchError> {
        let program = self.program()?;
        let payload = serde_json::to_string(factory)?;

        let mut cmd = Command::new(&program);
        cmd.args(&self.args)
            .env(FACTORY_ENV, payload)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|source| LaunchError::Spawn { program: program.clone(), source })?;

        debug!(
            program = %program.display(),
            pid = ?child.id(),
            factory = %factory,
            "Launched server process"
        );

        Ok(Box::new(OsChild::new(child)))
    }
}
