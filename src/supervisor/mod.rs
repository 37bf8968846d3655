//! Restart-coordinating supervisor.
//!
//! The supervisor owns exactly one child process at a time and a background
//! task that consumes change batches:
//!
//! ```text
//! Starting -> Running -> Restarting -> Running -> ... -> Stopping -> Stopped
//! ```
//!
//! Every mutation of the current child and of the shutdown flag happens under
//! one async mutex. A restart holds that lock for its whole stop-and-launch
//! sequence, so [`Supervisor::close`] waits for it. Close cancels the shutdown
//! token before taking the lock, which the restart checks before launching:
//! a restart interrupted by close finishes stopping the old child and then
//! launches nothing.
//!
//! # Example
//!
//! ```ignore
//! let supervisor = Supervisor::new(factory, ProcessLauncher::current_exe(), SupervisorConfig::default());
//! let watcher = NotifyWatcher::watch(".", WatchOptions::default(), supervisor.watch_token())?;
//! supervisor.start(watcher)?;
//!
//! tokio::select! {
//!     () = supervisor.wait() => {},
//!     _ = tokio::signal::ctrl_c() => {},
//! }
//! supervisor.close().await?;
//! ```

mod state;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::SupervisorError;
use crate::factory::AppFactory;
use crate::process::{ChildHandle, Launcher, stop_child};
use crate::watch::{ChangeBatch, ChangeSource};

pub use state::{Phase, SupervisorConfig, SupervisorStatus};
use state::State;

/// Supervises one application process and restarts it on source changes.
pub struct Supervisor {
    inner: Arc<Inner>,
    task: Mutex<LoopTask>,
}

/// The change-consumption task, from `start` until `close` collects it.
enum LoopTask {
    NotStarted,
    Running(JoinHandle<Result<(), SupervisorError>>),
    Collected,
}

struct Inner {
    factory: AppFactory,
    launcher: Box<dyn Launcher>,
    config: SupervisorConfig,
    state: tokio::sync::Mutex<State>,
    shutdown: CancellationToken,
    finished: watch::Sender<bool>,
}

impl Supervisor {
    /// Create a supervisor. Nothing is launched until [`Supervisor::start`].
    pub fn new(factory: AppFactory, launcher: impl Launcher, config: SupervisorConfig) -> Self {
        let (finished, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                factory,
                launcher: Box::new(launcher),
                config,
                state: tokio::sync::Mutex::new(State::new()),
                shutdown: CancellationToken::new(),
                finished,
            }),
            task: Mutex::new(LoopTask::NotStarted),
        }
    }

    /// Stop signal for the change source.
    ///
    /// Cancelled as the first step of [`Supervisor::close`].
    pub fn watch_token(&self) -> CancellationToken {
        self.inner.shutdown.child_token()
    }

    /// Launch the first child and start consuming `source`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, source: impl ChangeSource) -> Result<(), SupervisorError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(SupervisorError::Closed);
        }
        let mut task = self.task.lock();
        if !matches!(*task, LoopTask::NotStarted) {
            return Err(SupervisorError::AlreadyStarted);
        }

        let inner = Arc::clone(&self.inner);
        *task = LoopTask::Running(tokio::spawn(async move { inner.run(source).await }));
        Ok(())
    }

    /// Resolves once the change-consumption loop has ended, either because
    /// it failed or because its source ran dry. Call [`Supervisor::close`]
    /// afterwards to collect the error.
    pub async fn wait(&self) {
        let mut finished = self.inner.finished.subscribe();
        // The sender lives in `inner`, which outlives this borrow.
        let _ = finished.wait_for(|done| *done).await;
    }

    /// Stop the watcher and the child, then end the consumption loop.
    ///
    /// Returns the loop's error if it had already failed. Calling `close`
    /// again after it returned is a no-op.
    pub async fn close(&self) -> Result<(), SupervisorError> {
        self.inner.shutdown.cancel();

        {
            let mut state = self.inner.state.lock().await;
            if state.phase == Phase::Stopped {
                return Ok(());
            }
            state.shutdown_requested = true;
            state.phase = Phase::Stopping;
            debug!(restart_count = state.restart_count, "Supervisor stopping");

            if let Some(mut handle) = state.current.take() {
                stop_child(&mut handle, &self.inner.config.stop).await;
            }
            state.phase = Phase::Stopped;
        }

        let task = std::mem::replace(&mut *self.task.lock(), LoopTask::Collected);
        let LoopTask::Running(task) = task else {
            return Ok(());
        };
        if !task.is_finished() {
            task.abort();
        }
        match task.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => Err(SupervisorError::Task(e.to_string())),
        }
    }

    /// Snapshot of the current state.
    ///
    /// Waits for an in-flight restart to finish.
    pub async fn status(&self) -> SupervisorStatus {
        self.inner.state.lock().await.status()
    }

    /// Restarts triggered so far.
    pub async fn restart_count(&self) -> u64 {
        self.inner.state.lock().await.restart_count
    }
}

/// Marks the loop finished however the task ends, including abort.
struct FinishedGuard<'a>(&'a watch::Sender<bool>);

impl Drop for FinishedGuard<'_> {
    fn drop(&mut self) {
        self.0.send_replace(true);
    }
}

impl Inner {
    async fn run(&self, mut source: impl ChangeSource) -> Result<(), SupervisorError> {
        let _finished = FinishedGuard(&self.finished);

        let result = self.consume(&mut source).await;
        if let Err(e) = &result {
            error!(error = %e, "Change consumption loop failed");
        }
        result
    }

    async fn consume(&self, source: &mut impl ChangeSource) -> Result<(), SupervisorError> {
        {
            let mut state = self.state.lock().await;
            if self.shutdown.is_cancelled() {
                return Ok(());
            }
            self.launch(&mut state)?;
        }

        loop {
            let next = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => return Ok(()),
                next = source.next_batch() => next,
            };

            match next {
                Some(Ok(batch)) => self.on_batch(batch).await?,
                Some(Err(e)) => return Err(e.into()),
                None => {
                    debug!("Change source ended");
                    return Ok(());
                },
            }
        }
    }

    async fn on_batch(&self, batch: ChangeBatch) -> Result<(), SupervisorError> {
        let mut state = self.state.lock().await;
        if state.shutdown_requested || self.shutdown.is_cancelled() {
            return Ok(());
        }

        state.changes_observed += 1;
        if !batch.touches_source(&self.config.source_suffixes) {
            debug!(changes = batch.len(), "No source files changed, not restarting");
            return Ok(());
        }

        state.restart_count += 1;
        state.phase = Phase::Restarting;
        debug!(
            changes = batch.len(),
            restart_count = state.restart_count,
            "Source changed, restarting server"
        );

        if let Some(mut handle) = state.current.take() {
            stop_child(&mut handle, &self.config.stop).await;
        }

        if self.shutdown.is_cancelled() {
            debug!("Close requested during restart, not relaunching");
            return Ok(());
        }

        self.launch(&mut state)
    }

    fn launch(&self, state: &mut State) -> Result<(), SupervisorError> {
        let process = self.launcher.launch(&self.factory)?;
        let handle = ChildHandle::new(process, state.restart_count);

        info!(
            pid = ?handle.pid(),
            generation = handle.generation(),
            factory = %self.factory,
            "Server process started"
        );

        state.current = Some(handle);
        state.phase = Phase::Running;
        Ok(())
    }
}
