//! apprunner: run an application in a child process and restart it when its
//! source files change.
//!
//! The crate is split the way the runner works at runtime:
//!
//! - [`factory`]: naming an application so another process can build it
//! - [`process`]: launching and stopping child processes
//! - [`watch`]: batching file-system changes
//! - [`supervisor`]: the restart state machine
//! - [`worker`]: the child side, hosting the application until SIGINT
//! - [`runner`]: the entry point that picks one of the two roles
//!
//! # Example
//!
//! ```ignore
//! use apprunner::{AppRef, Registry};
//!
//! fn main() -> std::process::ExitCode {
//!     let mut registry = Registry::new();
//!     registry.register_type::<Server>().expect("named type");
//!     apprunner::run(registry, AppRef::of_type::<Server>())
//! }
//! ```

pub mod app;
pub mod config;
pub mod constants;
pub mod error;
pub mod factory;
pub mod logging;
pub mod os_signals;
pub mod process;
pub mod runner;
pub mod supervisor;
pub mod watch;
pub mod worker;

pub use app::Application;
pub use config::{RunnerConfig, ValidationResult};
pub use error::{
    EXIT_OK, EXIT_SUPERVISOR_FAILED, LaunchError, ResolutionError, SupervisorError, WatchError,
    WorkerError,
};
pub use factory::{AppFactory, AppRef, Constructor, Registry, Resolve, get_app_factory};
pub use runner::{run, run_with_config};
pub use supervisor::{Phase, Supervisor, SupervisorConfig, SupervisorStatus};
pub use watch::{Change, ChangeBatch, ChangeKind, ChangeSource, NotifyWatcher, WatchOptions};
