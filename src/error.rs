//! Error types for typed error handling.
//!
//! Each layer of the runner has its own error enum so callers can tell a
//! factory that cannot be resolved apart from a watcher that died or a child
//! process that could not be spawned. Only [`SupervisorError`] is fatal to the
//! supervising process.

use std::path::PathBuf;

/// Exit status of the supervising process after a clean shutdown.
pub const EXIT_OK: u8 = 0;

/// Exit status of the supervising process after a fatal supervisor error.
pub const EXIT_SUPERVISOR_FAILED: u8 = 2;

/// A factory descriptor could not be produced or resolved.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ResolutionError {
    /// No module with this path is registered.
    #[error("error importing '{module}': module not found")]
    ModuleNotFound { module: String },

    /// The module exists but does not define the symbol.
    #[error("module '{module}' does not define a '{symbol}' attribute/type")]
    SymbolNotFound { module: String, symbol: String },

    /// Async factories cannot be invoked as zero-argument constructors.
    #[error("async factory '{name}' is not supported, use a plain fn returning the application")]
    AsyncFactory { name: String },

    /// Closures and other unnamed callables cannot be found again by name.
    #[error("'{name}' has no stable path and cannot be resolved in a new process")]
    Anonymous { name: String },

    /// A textual descriptor was not of the form `module::path:symbol`.
    #[error("invalid factory descriptor '{descriptor}': expected 'module::path:symbol'")]
    InvalidDescriptor { descriptor: String },
}

impl ResolutionError {
    /// Create a module not found error.
    pub fn module_not_found(module: impl Into<String>) -> Self {
        Self::ModuleNotFound {
            module: module.into(),
        }
    }

    /// Create a symbol not found error.
    pub fn symbol_not_found(module: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self::SymbolNotFound {
            module: module.into(),
            symbol: symbol.into(),
        }
    }
}

/// Spawning a child process failed.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum LaunchError {
    /// The factory descriptor could not be serialized for the child.
    #[error("failed to encode factory descriptor: {0}")]
    Encode(#[from] serde_json::Error),

    /// The program to run could not be determined.
    #[error("failed to locate program to launch: {source}")]
    Program {
        #[source]
        source: std::io::Error,
    },

    /// The OS refused to spawn the process.
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The change watcher backend failed.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum WatchError {
    /// The watched directory could not be registered.
    #[error("failed to watch {path:?}: {source}")]
    Register {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    /// The backend reported an error while running.
    #[error("watcher backend error: {0}")]
    Backend(#[from] notify::Error),

    /// The backend went away without being stopped.
    #[error("watcher event channel closed unexpectedly")]
    Disconnected,
}

/// Fatal supervisor failure, surfaced to the entry point.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SupervisorError {
    /// The change-consumption loop failed because the watcher failed.
    #[error("error running server: {0}")]
    Watch(#[from] WatchError),

    /// A child process could not be launched.
    #[error("error running server: {0}")]
    Launch(#[from] LaunchError),

    /// The change-consumption task panicked or was torn down unexpectedly.
    #[error("supervisor task failed: {0}")]
    Task(String),

    /// Operation attempted after the supervisor reached `Stopped`.
    #[error("supervisor is stopped")]
    Closed,

    /// `start` was called on a supervisor that is already running.
    #[error("supervisor already started")]
    AlreadyStarted,
}

impl SupervisorError {
    /// Process exit status for this error.
    pub fn exit_code(&self) -> u8 {
        EXIT_SUPERVISOR_FAILED
    }
}

/// Failure inside a launched child process.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum WorkerError {
    /// The `APPRUNNER_FACTORY` payload was not a valid descriptor.
    #[error("invalid factory payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// The factory could not be resolved in this process.
    #[error("failed to resolve application factory: {0}")]
    Resolution(#[from] ResolutionError),

    /// `Application::start` failed.
    #[error("application failed to start: {0:#}")]
    Start(anyhow::Error),

    /// `Application::stop` failed.
    #[error("application failed to stop: {0:#}")]
    Stop(anyhow::Error),

    /// Installing the interrupt handler failed.
    #[error("failed to listen for interrupt: {0}")]
    Signal(#[from] std::io::Error),
}

impl WorkerError {
    /// Process exit status of the child for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Start(_) | Self::Stop(_) | Self::Signal(_) => 1,
            Self::Resolution(_) => 3,
            Self::Payload(_) => 4,
        }
    }
}
