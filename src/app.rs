//! Application lifecycle contract.
//!
//! The supervised application only has to know how to start and how to stop.
//! Everything else (which process it runs in, when it is restarted) is decided
//! by the supervisor.

use anyhow::Result;
use async_trait::async_trait;

/// A long-running application hosted inside a worker process.
///
/// # Example
///
/// ```ignore
/// use apprunner::Application;
///
/// #[derive(Default)]
/// struct Server;
///
/// #[async_trait::async_trait]
/// impl Application for Server {
///     async fn start(&mut self) -> anyhow::Result<()> {
///         // bind sockets, spawn tasks ...
///         Ok(())
///     }
///
///     async fn stop(&mut self) -> anyhow::Result<()> {
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Application: Send {
    /// Perform setup. Must return once the application is ready to serve.
    async fn start(&mut self) -> Result<()>;

    /// Perform teardown. Awaited with a bounded timeout by the worker.
    async fn stop(&mut self) -> Result<()>;
}

#[async_trait]
impl<A: Application + ?Sized> Application for Box<A> {
    async fn start(&mut self) -> Result<()> {
        (**self).start().await
    }

    async fn stop(&mut self) -> Result<()> {
        (**self).stop().await
    }
}
