//! Child process abstraction and the supervisor's handle on it.

use std::fmt;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChildExit {
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
    /// Terminating signal, if the process was killed by one.
    pub signal: Option<i32>,
}

impl ChildExit {
    /// A normal exit with the given code.
    pub fn code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    /// Termination by signal.
    pub fn signaled(signal: i32) -> Self {
        Self {
            code: None,
            signal: Some(signal),
        }
    }

    /// Returns true if the process exited with status 0.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::ExitStatus> for ChildExit {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

impl fmt::Display for ChildExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(signal)) => write!(f, "signal {signal}"),
            (None, None) => f.write_str("unknown"),
        }
    }
}

/// A running child process as seen by the supervisor.
#[async_trait]
pub trait ChildProcess: Send {
    /// OS process id, `None` once the process has been reaped.
    fn id(&self) -> Option<u32>;

    /// Check for exit without blocking.
    fn try_exit(&mut self) -> io::Result<Option<ChildExit>>;

    /// Send the graceful stop signal (SIGINT).
    fn interrupt(&mut self) -> io::Result<()>;

    /// Send the forceful stop signal (SIGKILL).
    fn kill(&mut self) -> io::Result<()>;

    /// Wait for the process to exit and reap it.
    async fn wait(&mut self) -> io::Result<ChildExit>;
}

/// [`ChildProcess`] backed by a real OS process.
#[derive(Debug)]
pub struct OsChild {
    child: tokio::process::Child,
}

impl OsChild {
    /// Wrap a spawned tokio child.
    pub fn new(child: tokio::process::Child) -> Self {
        Self { child }
    }
}

#[async_trait]
impl ChildProcess for OsChild {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn try_exit(&mut self) -> io::Result<Option<ChildExit>> {
        Ok(self.child.try_wait()?.map(ChildExit::from))
    }

    #[cfg(unix)]
    fn interrupt(&mut self) -> io::Result<()> {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        let Some(pid) = self.child.id() else {
            return Ok(());
        };
        let pid = i32::try_from(pid).map_err(|_| io::Error::other("pid out of range"))?;
        kill(Pid::from_raw(pid), Signal::SIGINT).map_err(io::Error::from)
    }

    // No interrupt signal to deliver to another process here.
    #[cfg(not(unix))]
    fn interrupt(&mut self) -> io::Result<()> {
        self.child.start_kill()
    }

    fn kill(&mut self) -> io::Result<()> {
        self.child.start_kill()
    }

    async fn wait(&mut self) -> io::Result<ChildExit> {
        Ok(self.child.wait().await?.into())
    }
}

/// The supervisor's record of the current child.
pub struct ChildHandle {
    process: Box<dyn ChildProcess>,
    pid: Option<u32>,
    generation: u64,
    started_at: DateTime<Utc>,
    alive: bool,
    last_exit: Option<ChildExit>,
}

impl ChildHandle {
    /// Record a freshly launched process.
    ///
    /// `generation` is the supervisor's restart count at launch time.
    pub fn new(process: Box<dyn ChildProcess>, generation: u64) -> Self {
        let pid = process.id();
        Self {
            process,
            pid,
            generation,
            started_at: Utc::now(),
            alive: true,
            last_exit: None,
        }
    }

    /// Process id recorded at launch.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Restart count when this child was launched.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Launch timestamp.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Time since launch, by wall clock.
    pub fn uptime(&self) -> Duration {
        (Utc::now() - self.started_at).to_std().unwrap_or_default()
    }

    /// Last known exit status.
    pub fn last_exit(&self) -> Option<ChildExit> {
        self.last_exit
    }

    /// Liveness flag as of the last poll or wait.
    pub fn alive(&self) -> bool {
        self.alive
    }

    /// Poll the process and update the liveness flag.
    ///
    /// A process whose state cannot be queried is treated as alive so that
    /// the stop sequence still runs against it.
    pub fn poll_alive(&mut self) -> bool {
        if !self.alive {
            return false;
        }
        match self.process.try_exit() {
            Ok(Some(exit)) => self.mark_exited(exit),
            Ok(None) => {},
            Err(e) => {
                tracing::debug!(pid = ?self.pid, error = %e, "Failed to poll child process");
            },
        }
        self.alive
    }

    pub(crate) fn mark_exited(&mut self, exit: ChildExit) {
        self.alive = false;
        self.last_exit = Some(exit);
    }

    pub(crate) fn process_mut(&mut self) -> &mut dyn ChildProcess {
        self.process.as_mut()
    }
}

impl fmt::Debug for ChildHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildHandle")
            .field("pid", &self.pid)
            .field("generation", &self.generation)
            .field("started_at", &self.started_at)
            .field("alive", &self.alive)
            .field("last_exit", &self.last_exit)
            .finish_non_exhaustive()
    }
}
