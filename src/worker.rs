//! Worker side: the body of a launched child process.
//!
//! A worker resolves its factory, starts the application, then idles until
//! SIGINT. It has no other way to be told to stop.

use std::future::Future;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::app::Application;
use crate::constants::FACTORY_ENV;
use crate::error::WorkerError;
use crate::factory::{AppFactory, Resolve};
use crate::os_signals::InterruptListener;

/// Read the factory handed over by the supervisor.
///
/// Returns `None` when this process is not a worker.
pub fn factory_from_env() -> Option<Result<AppFactory, WorkerError>> {
    let payload = std::env::var(FACTORY_ENV).ok()?;
    Some(serde_json::from_str(&payload).map_err(WorkerError::from))
}

/// Run the application until SIGINT.
pub async fn serve_main_app(
    factory: &AppFactory,
    resolver: &impl Resolve,
    stop_timeout: Duration,
) -> Result<(), WorkerError> {
    let mut interrupt = InterruptListener::new()?;
    serve_until(factory, resolver, stop_timeout, interrupt.recv()).await
}

/// Run the application until `shutdown` completes.
pub async fn serve_until<F>(
    factory: &AppFactory,
    resolver: &impl Resolve,
    stop_timeout: Duration,
    shutdown: F,
) -> Result<(), WorkerError>
where
    F: Future<Output = ()>,
{
    let mut app = factory.invoke(resolver)?;
    tokio::pin!(shutdown);

    debug!(factory = %factory, pid = std::process::id(), "Starting application");
    tokio::select! {
        biased;
        result = app.start() => result.map_err(WorkerError::Start)?,
        () = &mut shutdown => {
            warn!("Interrupted while starting, stopping application");
            return stop_app(app.as_mut(), stop_timeout).await;
        },
    }
    info!(factory = %factory, pid = std::process::id(), "Application started");

    shutdown.await;
    debug!("Interrupt received, stopping application");
    stop_app(app.as_mut(), stop_timeout).await
}

async fn stop_app(app: &mut dyn Application, stop_timeout: Duration) -> Result<(), WorkerError> {
    match timeout(stop_timeout, app.stop()).await {
        Ok(Ok(())) => {
            info!("Application stopped");
            Ok(())
        },
        Ok(Err(e)) => Err(WorkerError::Stop(e)),
        Err(_) => {
            warn!(
                timeout_ms = u64::try_from(stop_timeout.as_millis()).unwrap_or(u64::MAX),
                "Application stop timed out, exiting anyway"
            );
            Ok(())
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResolutionError;
    use crate::factory::Registry;
    use serial_test::serial;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default, Clone)]
    struct Calls {
        started: Arc<AtomicUsize>,
        stopped: Arc<AtomicUsize>,
    }

    enum Mode {
        Normal,
        FailStart,
        HangOnStop,
        HangOnStart,
    }

    struct TestApp {
        calls: Calls,
        mode: Mode,
    }

    #[async_trait::async_trait]
    impl Application for TestApp {
        async fn start(&mut self) -> anyhow::Result<()> {
            match self.mode {
                Mode::FailStart => anyhow::bail!("port already in use"),
                Mode::HangOnStart => std::future::pending().await,
                _ => {
                    self.calls.started.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
            }
        }

        async fn stop(&mut self) -> anyhow::Result<()> {
            if matches!(self.mode, Mode::HangOnStop) {
                std::future::pending::<()>().await;
            }
            self.calls.stopped.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn registry(mode: fn() -> Mode) -> (Registry, AppFactory, Calls) {
        let calls = Calls::default();
        let factory = AppFactory::new("tests", "TestApp");
        let mut registry = Registry::new();
        let captured = calls.clone();
        registry.register(factory.clone(), move || TestApp {
            calls: captured.clone(),
            mode: mode(),
        });
        (registry, factory, calls)
    }

    #[tokio::test]
    async fn test_start_then_stop_on_shutdown() {
        let (registry, factory, calls) = registry(|| Mode::Normal);

        let result = serve_until(&factory, &registry, Duration::from_secs(1), async {}).await;
        assert!(result.is_ok());
        assert_eq!(calls.started.load(Ordering::SeqCst), 1);
        assert_eq!(calls.stopped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unresolvable_factory_fails_with_resolution_error() {
        let (registry, _, _) = registry(|| Mode::Normal);
        let missing = AppFactory::new("no::such::module", "App");

        let err = serve_until(&missing, &registry, Duration::from_secs(1), async {})
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WorkerError::Resolution(ResolutionError::ModuleNotFound { .. })
        ));
        assert_ne!(err.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_start_failure_is_reported() {
        let (registry, factory, calls) = registry(|| Mode::FailStart);

        let err = serve_until(&factory, &registry, Duration::from_secs(1), async {})
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Start(_)));
        assert_eq!(err.exit_code(), 1);
        assert_eq!(calls.stopped.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_timeout_is_not_an_error() {
        let (registry, factory, calls) = registry(|| Mode::HangOnStop);

        let result = serve_until(&factory, &registry, Duration::from_secs(5), async {}).await;
        assert!(result.is_ok());
        assert_eq!(calls.started.load(Ordering::SeqCst), 1);
        assert_eq!(calls.stopped.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_during_start_still_stops() {
        let (registry, factory, calls) = registry(|| Mode::HangOnStart);

        let shutdown = tokio::time::sleep(Duration::from_secs(1));
        let result = serve_until(&factory, &registry, Duration::from_secs(1), shutdown).await;
        assert!(result.is_ok());
        assert_eq!(calls.stopped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_start_runs_before_an_already_pending_shutdown() {
        for _ in 0..32 {
            let (normal, factory, calls) = registry(|| Mode::Normal);
            serve_until(&factory, &normal, Duration::from_secs(1), async {})
                .await
                .unwrap();
            assert_eq!(calls.started.load(Ordering::SeqCst), 1);

            let (failing, factory, _) = registry(|| Mode::FailStart);
            let result = serve_until(&factory, &failing, Duration::from_secs(1), async {}).await;
            assert!(matches!(result, Err(WorkerError::Start(_))));
        }
    }

    #[test]
    #[serial]
    fn test_factory_from_env() {
        // SAFETY: serialized with the other environment tests.
        unsafe { std::env::remove_var(FACTORY_ENV) };
        assert!(factory_from_env().is_none());

        unsafe { std::env::set_var(FACTORY_ENV, r#"{"module":"demo","symbol":"App"}"#) };
        let factory = factory_from_env().unwrap().unwrap();
        assert_eq!(factory, AppFactory::new("demo", "App"));

        unsafe { std::env::set_var(FACTORY_ENV, "not json") };
        let err = factory_from_env().unwrap().unwrap_err();
        assert_eq!(err.exit_code(), 4);

        unsafe { std::env::remove_var(FACTORY_ENV) };
    }
}
