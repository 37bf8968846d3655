//! Shared defaults and well-known names.

/// Environment variable carrying the JSON factory descriptor into a worker.
pub const FACTORY_ENV: &str = "APPRUNNER_FACTORY";

/// Optional configuration file looked up in the work directory.
pub const CONFIG_FILE: &str = "apprunner.toml";

/// Wait after SIGINT before escalating to SIGKILL.
pub const DEFAULT_GRACE_PERIOD_MS: u64 = 5_000;

/// Wait after SIGKILL for the OS to confirm termination.
pub const DEFAULT_KILL_TIMEOUT_MS: u64 = 1_000;

/// Bound on `Application::stop` inside the worker.
pub const DEFAULT_APP_STOP_TIMEOUT_MS: u64 = 5_000;

/// Window in which file events are folded into one batch.
pub const DEFAULT_DEBOUNCE_MS: u64 = 300;

/// Default log filter when `RUST_LOG` is not set.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Suffixes that mark a changed path as source code.
pub const DEFAULT_SOURCE_SUFFIXES: &[&str] = &[".rs"];

/// Directory names never reported by the watcher.
pub const DEFAULT_IGNORE_DIRS: &[&str] = &[".git", "target", "node_modules", "__pycache__"];
