//! Tests for the restart state machine.
//!
//! Children are fakes that record every signal with a timestamp from tokio's
//! paused clock, so grace periods elapse instantly and deterministically.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use super::*;
use crate::error::{LaunchError, WatchError};
use crate::process::{ChildExit, ChildProcess};
use crate::watch::{Change, ChangeKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Behavior {
    /// Exits with code 0 on SIGINT.
    Cooperative,
    /// Ignores SIGINT, dies on SIGKILL.
    IgnoresInterrupt,
    /// Exits with this code right after launch.
    Crashes(i32),
    /// Survives both signals.
    Unkillable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    Interrupt,
    Kill,
}

#[derive(Debug, Clone, Copy)]
struct SignalRecord {
    pid: u32,
    signal: Signal,
    at: Instant,
}

#[derive(Default)]
struct Shared {
    signals: Mutex<Vec<SignalRecord>>,
    launches: Mutex<Vec<u32>>,
    /// Children that were still running when another launch happened.
    overlapping_launches: AtomicU32,
    exits: Mutex<Vec<watch::Receiver<Option<ChildExit>>>>,
}

impl Shared {
    fn launches(&self) -> usize {
        self.launches.lock().len()
    }

    fn signals_for(&self, pid: u32) -> Vec<SignalRecord> {
        self.signals
            .lock()
            .iter()
            .copied()
            .filter(|r| r.pid == pid)
            .collect()
    }

    fn pid(&self, index: usize) -> u32 {
        self.launches.lock()[index]
    }
}

struct FakeChild {
    pid: u32,
    behavior: Behavior,
    exit: watch::Sender<Option<ChildExit>>,
    shared: Arc<Shared>,
}

impl FakeChild {
    fn record(&self, signal: Signal) {
        self.shared.signals.lock().push(SignalRecord {
            pid: self.pid,
            signal,
            at: Instant::now(),
        });
    }
}

#[async_trait]
impl ChildProcess for FakeChild {
    fn id(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn try_exit(&mut self) -> io::Result<Option<ChildExit>> {
        Ok(*self.exit.borrow())
    }

    fn interrupt(&mut self) -> io::Result<()> {
        self.record(Signal::Interrupt);
        if self.behavior == Behavior::Cooperative {
            self.exit.send_replace(Some(ChildExit::code(0)));
        }
        Ok(())
    }

    fn kill(&mut self) -> io::Result<()> {
        self.record(Signal::Kill);
        if self.behavior != Behavior::Unkillable {
            self.exit.send_replace(Some(ChildExit::signaled(9)));
        }
        Ok(())
    }

    async fn wait(&mut self) -> io::Result<ChildExit> {
        let mut rx = self.exit.subscribe();
        let exit = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| io::Error::other("exit channel closed"))?;
        Ok((*exit).unwrap_or_default())
    }
}

struct FakeLauncher {
    shared: Arc<Shared>,
    behaviors: Mutex<VecDeque<Behavior>>,
    next_pid: AtomicU32,
    fail: AtomicBool,
}

impl FakeLauncher {
    /// Children take `behaviors` in order, then default to cooperative.
    fn new(behaviors: &[Behavior]) -> (Self, Arc<Shared>) {
        let shared = Arc::new(Shared::default());
        let launcher = Self {
            shared: Arc::clone(&shared),
            behaviors: Mutex::new(behaviors.iter().copied().collect()),
            next_pid: AtomicU32::new(100),
            fail: AtomicBool::new(false),
        };
        (launcher, shared)
    }

    fn failing() -> (Self, Arc<Shared>) {
        let (launcher, shared) = Self::new(&[]);
        launcher.fail.store(true, Ordering::SeqCst);
        (launcher, shared)
    }
}

impl Launcher for FakeLauncher {
    fn launch(&self, _factory: &AppFactory) -> Result<Box<dyn ChildProcess>, LaunchError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(LaunchError::Program {
                source: io::Error::new(io::ErrorKind::NotFound, "no such program"),
            });
        }

        let still_running = self
            .shared
            .exits
            .lock()
            .iter()
            .filter(|rx| rx.borrow().is_none())
            .count();
        self.shared
            .overlapping_launches
            .fetch_add(still_running as u32, Ordering::SeqCst);

        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let behavior = self
            .behaviors
            .lock()
            .pop_front()
            .unwrap_or(Behavior::Cooperative);

        let initial = match behavior {
            Behavior::Crashes(code) => Some(ChildExit::code(code)),
            _ => None,
        };
        let (exit, rx) = watch::channel(initial);
        self.shared.exits.lock().push(rx);
        self.shared.launches.lock().push(pid);

        Ok(Box::new(FakeChild {
            pid,
            behavior,
            exit,
            shared: Arc::clone(&self.shared),
        }))
    }
}

type Batches = mpsc::Sender<Result<ChangeBatch, WatchError>>;

fn config() -> SupervisorConfig {
    SupervisorConfig::default()
        .with_source_suffixes([".py"])
        .with_stop_timeouts(Duration::from_secs(5), Duration::from_secs(1))
}

fn start(launcher: FakeLauncher) -> (Supervisor, Batches) {
    let supervisor = Supervisor::new(AppFactory::new("demo", "Application"), launcher, config());
    let (tx, rx) = mpsc::channel(8);
    supervisor.start(rx).unwrap();
    (supervisor, tx)
}

fn modified(path: &str) -> ChangeBatch {
    std::iter::once(Change::new(ChangeKind::Modified, path)).collect()
}

async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..3_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

async fn settle(supervisor: &Supervisor) -> SupervisorStatus {
    // Let the loop pick up anything already queued.
    tokio::time::sleep(Duration::from_millis(50)).await;
    supervisor.status().await
}

#[tokio::test(start_paused = true)]
async fn test_starting_launches_one_child() {
    let (launcher, shared) = FakeLauncher::new(&[]);
    let (supervisor, _tx) = start(launcher);

    eventually("first launch", || shared.launches() == 1).await;
    let status = supervisor.status().await;
    assert_eq!(status.phase, Phase::Running);
    assert_eq!(status.pid, Some(shared.pid(0)));
    assert_eq!(status.restart_count, 0);

    supervisor.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_source_change_restarts_child() {
    let (launcher, shared) = FakeLauncher::new(&[]);
    let (supervisor, tx) = start(launcher);
    eventually("first launch", || shared.launches() == 1).await;

    tx.send(Ok(modified("app.py"))).await.unwrap();
    eventually("relaunch", || shared.launches() == 2).await;

    let status = settle(&supervisor).await;
    assert_eq!(status.phase, Phase::Running);
    assert_eq!(status.restart_count, 1);
    assert_eq!(status.changes_observed, 1);
    assert_eq!(status.pid, Some(shared.pid(1)));
    assert_eq!(status.generation, Some(1));
    assert!(status.started_at.is_some());

    let old = shared.signals_for(shared.pid(0));
    assert_eq!(old.len(), 1);
    assert_eq!(old[0].signal, Signal::Interrupt);
    assert!(shared.signals_for(shared.pid(1)).is_empty());

    supervisor.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_non_source_change_does_not_restart() {
    let (launcher, shared) = FakeLauncher::new(&[]);
    let (supervisor, tx) = start(launcher);
    eventually("first launch", || shared.launches() == 1).await;

    tx.send(Ok(modified("README.md"))).await.unwrap();
    let status = settle(&supervisor).await;

    assert_eq!(status.phase, Phase::Running);
    assert_eq!(status.changes_observed, 1);
    assert_eq!(status.restart_count, 0);
    assert_eq!(shared.launches(), 1);
    assert!(shared.signals_for(shared.pid(0)).is_empty());

    supervisor.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_unresponsive_child_is_killed_after_grace_period() {
    let (launcher, shared) = FakeLauncher::new(&[Behavior::IgnoresInterrupt]);
    let (supervisor, tx) = start(launcher);
    eventually("first launch", || shared.launches() == 1).await;

    tx.send(Ok(modified("app.py"))).await.unwrap();
    eventually("relaunch", || shared.launches() == 2).await;

    let signals = shared.signals_for(shared.pid(0));
    assert_eq!(signals.len(), 2);
    assert_eq!(signals[0].signal, Signal::Interrupt);
    assert_eq!(signals[1].signal, Signal::Kill);
    assert!(signals[1].at - signals[0].at >= Duration::from_secs(5));

    supervisor.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_unkillable_child_does_not_block_restart() {
    let (launcher, shared) = FakeLauncher::new(&[Behavior::Unkillable]);
    let (supervisor, tx) = start(launcher);
    eventually("first launch", || shared.launches() == 1).await;
    let started = Instant::now();

    tx.send(Ok(modified("app.py"))).await.unwrap();
    eventually("relaunch", || shared.launches() == 2).await;
    assert!(started.elapsed() >= Duration::from_secs(6));

    let signals = shared.signals_for(shared.pid(0));
    let sent: Vec<Signal> = signals.iter().map(|r| r.signal).collect();
    assert_eq!(sent, vec![Signal::Interrupt, Signal::Kill]);

    let status = settle(&supervisor).await;
    assert_eq!(status.phase, Phase::Running);
    assert_eq!(status.pid, Some(shared.pid(1)));

    supervisor.close().await.unwrap();
    assert_eq!(supervisor.status().await.phase, Phase::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_close_without_start_then_start_is_rejected() {
    let (launcher, shared) = FakeLauncher::new(&[]);
    let supervisor = Supervisor::new(AppFactory::new("demo", "Application"), launcher, config());

    supervisor.close().await.unwrap();
    let (_tx, rx) = mpsc::channel::<Result<ChangeBatch, WatchError>>(1);
    assert!(matches!(supervisor.start(rx), Err(SupervisorError::Closed)));
    assert_eq!(shared.launches(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_close_during_restart_launches_nothing() {
    let (launcher, shared) = FakeLauncher::new(&[Behavior::IgnoresInterrupt]);
    let (supervisor, tx) = start(launcher);
    eventually("first launch", || shared.launches() == 1).await;
    let first = shared.pid(0);

    tx.send(Ok(modified("app.py"))).await.unwrap();
    eventually("graceful signal", || !shared.signals_for(first).is_empty()).await;

    supervisor.close().await.unwrap();

    let status = supervisor.status().await;
    assert_eq!(status.phase, Phase::Stopped);
    assert_eq!(status.pid, None);
    assert!(status.shutdown_requested);
    assert_eq!(shared.launches(), 1);

    // The interrupted restart still completed its teardown.
    let signals = shared.signals_for(first);
    assert_eq!(signals.last().map(|r| r.signal), Some(Signal::Kill));
}

#[tokio::test(start_paused = true)]
async fn test_dead_child_is_replaced_without_signals() {
    let (launcher, shared) = FakeLauncher::new(&[Behavior::Crashes(3)]);
    let (supervisor, tx) = start(launcher);
    eventually("first launch", || shared.launches() == 1).await;

    tx.send(Ok(modified("app.py"))).await.unwrap();
    eventually("relaunch", || shared.launches() == 2).await;

    assert!(shared.signals_for(shared.pid(0)).is_empty());
    let status = settle(&supervisor).await;
    assert_eq!(status.phase, Phase::Running);
    assert_eq!(status.restart_count, 1);

    supervisor.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_batches_are_processed_in_order_without_overlap() {
    let (launcher, shared) = FakeLauncher::new(&[
        Behavior::IgnoresInterrupt,
        Behavior::Cooperative,
        Behavior::IgnoresInterrupt,
    ]);
    let (supervisor, tx) = start(launcher);
    eventually("first launch", || shared.launches() == 1).await;

    tx.send(Ok(modified("a.py"))).await.unwrap();
    tx.send(Ok(modified("notes.txt"))).await.unwrap();
    tx.send(Ok(modified("b.py"))).await.unwrap();
    tx.send(Ok(modified("c.py"))).await.unwrap();
    eventually("three restarts", || shared.launches() == 4).await;

    let status = settle(&supervisor).await;
    assert_eq!(status.restart_count, 3);
    assert_eq!(status.changes_observed, 4);
    assert_eq!(shared.overlapping_launches.load(Ordering::SeqCst), 0);

    supervisor.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_watcher_failure_is_fatal() {
    let (launcher, shared) = FakeLauncher::new(&[]);
    let (supervisor, tx) = start(launcher);
    eventually("first launch", || shared.launches() == 1).await;

    tx.send(Err(WatchError::Disconnected)).await.unwrap();
    supervisor.wait().await;

    let err = supervisor.close().await.unwrap_err();
    assert!(matches!(err, SupervisorError::Watch(WatchError::Disconnected)));

    // The child is still torn down on the way out.
    let signals = shared.signals_for(shared.pid(0));
    assert_eq!(signals.first().map(|r| r.signal), Some(Signal::Interrupt));
    assert_eq!(shared.launches(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_launch_failure_is_fatal() {
    let (launcher, shared) = FakeLauncher::failing();
    let (supervisor, _tx) = start(launcher);

    supervisor.wait().await;
    let err = supervisor.close().await.unwrap_err();
    assert!(matches!(err, SupervisorError::Launch(_)));
    assert_eq!(shared.launches(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_close_is_terminal() {
    let (launcher, shared) = FakeLauncher::new(&[]);
    let (supervisor, tx) = start(launcher);
    eventually("first launch", || shared.launches() == 1).await;

    supervisor.close().await.unwrap();
    assert_eq!(supervisor.status().await.phase, Phase::Stopped);

    // Later batches go nowhere and nothing relaunches.
    let _ = tx.send(Ok(modified("app.py"))).await;
    let status = settle(&supervisor).await;
    assert_eq!(status.restart_count, 0);
    assert_eq!(shared.launches(), 1);

    assert!(supervisor.close().await.is_ok());
    let (tx2, rx2) = mpsc::channel::<Result<ChangeBatch, WatchError>>(1);
    drop(tx2);
    assert!(matches!(supervisor.start(rx2), Err(SupervisorError::Closed)));
}

#[tokio::test(start_paused = true)]
async fn test_start_twice_is_rejected() {
    let (launcher, _shared) = FakeLauncher::new(&[]);
    let (supervisor, _tx) = start(launcher);

    let (_tx2, rx2) = mpsc::channel::<Result<ChangeBatch, WatchError>>(1);
    assert!(matches!(supervisor.start(rx2), Err(SupervisorError::AlreadyStarted)));

    supervisor.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_watch_token_cancelled_on_close() {
    let (launcher, _shared) = FakeLauncher::new(&[]);
    let (supervisor, _tx) = start(launcher);
    let token = supervisor.watch_token();
    assert!(!token.is_cancelled());

    supervisor.close().await.unwrap();
    assert!(token.is_cancelled());
}

#[tokio::test(start_paused = true)]
async fn test_source_ending_finishes_loop() {
    let (launcher, shared) = FakeLauncher::new(&[]);
    let (supervisor, tx) = start(launcher);
    eventually("first launch", || shared.launches() == 1).await;

    drop(tx);
    supervisor.wait().await;
    assert!(supervisor.close().await.is_ok());
}
