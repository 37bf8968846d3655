//! Graceful-then-forceful stop sequence.
//!
//! 1. SIGINT
//! 2. wait up to `grace_period`
//! 3. SIGKILL and wait up to `kill_timeout`
//!
//! A child that outlives step 3 is logged and left to the OS; the caller
//! always gets control back.

use std::time::Duration;

use tokio::time::{Instant, sleep, timeout, timeout_at};
use tracing::{debug, warn};

use super::child::{ChildExit, ChildHandle};
use crate::constants::{DEFAULT_GRACE_PERIOD_MS, DEFAULT_KILL_TIMEOUT_MS};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Timing for the stop sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopPolicy {
    /// Wait after SIGINT before escalating.
    pub grace_period: Duration,
    /// Wait after SIGKILL for the exit to be confirmed.
    pub kill_timeout: Duration,
}

impl Default for StopPolicy {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_millis(DEFAULT_GRACE_PERIOD_MS),
            kill_timeout: Duration::from_millis(DEFAULT_KILL_TIMEOUT_MS),
        }
    }
}

/// What the stop sequence observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The child had already exited before any signal was sent.
    AlreadyExited(Option<ChildExit>),
    /// The child exited within the grace period.
    Graceful(ChildExit),
    /// The child had to be killed.
    Killed(ChildExit),
    /// SIGKILL was sent but the exit was not confirmed in time.
    Unconfirmed,
}

/// Stop `handle`'s process, escalating from SIGINT to SIGKILL.
pub async fn stop_child(handle: &mut ChildHandle, policy: &StopPolicy) -> StopOutcome {
    let pid = handle.pid();
    let generation = handle.generation();

    if !handle.poll_alive() {
        let exit = handle.last_exit();
        warn!(
            pid = ?pid,
            generation,
            exit = %exit.map_or_else(|| "unknown".to_string(), |e| e.to_string()),
            "Server process already dead"
        );
        return StopOutcome::AlreadyExited(exit);
    }

    debug!(
        pid = ?pid,
        generation,
        uptime_ms = millis(handle.uptime()),
        "Stopping server process"
    );
    if let Err(e) = handle.process_mut().interrupt() {
        // Usually the process exited between the poll and the signal; the
        // wait below reaps it either way.
        debug!(pid = ?pid, error = %e, "Failed to send SIGINT");
    }

    let deadline = Instant::now() + policy.grace_period;
    match timeout_at(deadline, handle.process_mut().wait()).await {
        Ok(Ok(exit)) => {
            handle.mark_exited(exit);
            debug!(pid = ?pid, exit = %exit, "Process stopped");
            return StopOutcome::Graceful(exit);
        },
        Ok(Err(e)) => {
            warn!(pid = ?pid, error = %e, "Failed waiting for process, polling until grace period ends");
            if let Some(exit) = poll_until(handle, deadline).await {
                debug!(pid = ?pid, exit = %exit, "Process stopped");
                return StopOutcome::Graceful(exit);
            }
            warn!(
                pid = ?pid,
                grace_ms = millis(policy.grace_period),
                "Process has not terminated, sending SIGKILL"
            );
        },
        Err(_) => {
            warn!(
                pid = ?pid,
                grace_ms = millis(policy.grace_period),
                "Process has not terminated, sending SIGKILL"
            );
        },
    }

    if let Err(e) = handle.process_mut().kill() {
        warn!(pid = ?pid, error = %e, "Failed to send SIGKILL");
    }

    match timeout(policy.kill_timeout, handle.process_mut().wait()).await {
        Ok(Ok(exit)) => {
            handle.mark_exited(exit);
            debug!(pid = ?pid, exit = %exit, "Process killed");
            StopOutcome::Killed(exit)
        },
        Ok(Err(e)) => {
            warn!(pid = ?pid, error = %e, "Could not confirm process termination");
            StopOutcome::Unconfirmed
        },
        Err(_) => {
            warn!(
                pid = ?pid,
                timeout_ms = millis(policy.kill_timeout),
                "Process did not confirm termination after SIGKILL, continuing"
            );
            StopOutcome::Unconfirmed
        },
    }
}

/// Poll for exit until `deadline`. A process that cannot be polled counts as
/// alive.
async fn poll_until(handle: &mut ChildHandle, deadline: Instant) -> Option<ChildExit> {
    loop {
        if !handle.poll_alive() {
            return handle.last_exit();
        }
        let now = Instant::now();
        if now >= deadline {
            return None;
        }
        sleep((deadline - now).min(POLL_INTERVAL)).await;
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
