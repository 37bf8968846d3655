//! Supervisor state and its public snapshot.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::constants::DEFAULT_SOURCE_SUFFIXES;
use crate::process::{ChildHandle, StopPolicy};

/// Lifecycle phase of the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No child yet; the first launch is pending.
    Starting,
    /// One live child, waiting for the next change batch.
    Running,
    /// Stopping the current child and launching its replacement.
    Restarting,
    /// Close requested; tearing everything down.
    Stopping,
    /// Terminal.
    Stopped,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Restarting => "restarting",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Restart and stop behavior of a [`super::Supervisor`].
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// A batch restarts the child only if some path ends with one of these.
    pub source_suffixes: Vec<String>,
    /// Timing of the SIGINT/SIGKILL sequence.
    pub stop: StopPolicy,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            source_suffixes: DEFAULT_SOURCE_SUFFIXES.iter().map(ToString::to_string).collect(),
            stop: StopPolicy::default(),
        }
    }
}

impl SupervisorConfig {
    /// Replace the source suffixes.
    #[must_use]
    pub fn with_source_suffixes<I, S>(mut self, suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.source_suffixes = suffixes.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the grace period and kill confirmation bound.
    #[must_use]
    pub fn with_stop_timeouts(mut self, grace_period: Duration, kill_timeout: Duration) -> Self {
        self.stop = StopPolicy {
            grace_period,
            kill_timeout,
        };
        self
    }
}

/// Mutable state, only touched under the supervisor's lock.
#[derive(Debug)]
pub(super) struct State {
    pub phase: Phase,
    pub current: Option<ChildHandle>,
    /// Restarts triggered by source changes. Never reset.
    pub restart_count: u64,
    /// Every batch received, source or not.
    pub changes_observed: u64,
    pub shutdown_requested: bool,
}

impl State {
    pub fn new() -> Self {
        Self {
            phase: Phase::Starting,
            current: None,
            restart_count: 0,
            changes_observed: 0,
            shutdown_requested: false,
        }
    }

    pub fn status(&self) -> SupervisorStatus {
        SupervisorStatus {
            phase: self.phase,
            pid: self.current.as_ref().and_then(ChildHandle::pid),
            generation: self.current.as_ref().map(ChildHandle::generation),
            started_at: self.current.as_ref().map(ChildHandle::started_at),
            restart_count: self.restart_count,
            changes_observed: self.changes_observed,
            shutdown_requested: self.shutdown_requested,
        }
    }
}

/// Point-in-time view of a supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorStatus {
    pub phase: Phase,
    /// Pid of the current child, if there is one.
    pub pid: Option<u32>,
    /// Restart count at which the current child was launched.
    pub generation: Option<u64>,
    /// Launch time of the current child.
    pub started_at: Option<DateTime<Utc>>,
    pub restart_count: u64,
    pub changes_observed: u64,
    pub shutdown_requested: bool,
}
