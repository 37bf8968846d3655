//! OS signal handling for the supervisor and its workers.
//!
//! The supervisor shuts down on SIGINT or SIGTERM. A worker only ever
//! listens for SIGINT: that is the one graceful trigger the supervisor sends.
//! On non-Unix platforms both fall back to [`tokio::signal::ctrl_c`].

use std::io;

/// Waits until the supervising process is asked to shut down.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => {},
        _ = sigterm.recv() => {},
    }
    Ok(())
}

#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> io::Result<()> {
    tokio::signal::ctrl_c().await
}

/// SIGINT listener that is registered on creation.
///
/// Create it before any slow startup work so an early interrupt is queued
/// instead of killing the process with the default disposition.
#[derive(Debug)]
pub struct InterruptListener {
    #[cfg(unix)]
    signal: tokio::signal::unix::Signal,
}

impl InterruptListener {
    /// Register the listener. Must be called within a tokio runtime.
    #[cfg(unix)]
    pub fn new() -> io::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};

        Ok(Self {
            signal: signal(SignalKind::interrupt())?,
        })
    }

    #[cfg(not(unix))]
    pub fn new() -> io::Result<Self> {
        Ok(Self {})
    }

    /// Wait for the next interrupt.
    #[cfg(unix)]
    pub async fn recv(&mut self) {
        self.signal.recv().await;
    }

    #[cfg(not(unix))]
    pub async fn recv(&mut self) {
        let _ = tokio::signal::ctrl_c().await;
    }
}
