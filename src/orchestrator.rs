/// Lifecycle of one sync run: resolve the sensor, run activities, unwind on the first failure
use futures_util::future::BoxFuture;
use log::{debug, error, info, warn};
use std::future::Future;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{Component, SyncError};
use crate::utils::until_cancelled;

const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    Resolving,
    Running,
    ShuttingDown,
    Terminated,
}

/// A long-running task that observes the shared cancellation token
pub struct Activity {
    component: Component,
    task: BoxFuture<'static, Result<(), SyncError>>,
}

impl Activity {
    pub fn new<F>(component: Component, task: F) -> Self
    where
        F: Future<Output = Result<(), SyncError>> + Send + 'static,
    {
        Activity {
            component,
            task: Box::pin(task),
        }
    }
}

pub struct Orchestrator {
    cancel: CancellationToken,
    state: OrchestratorState,
    shutdown_grace: Duration,
}

impl Orchestrator {
    pub fn new(cancel: CancellationToken) -> Self {
        Orchestrator {
            cancel,
            state: OrchestratorState::Idle,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    /// How long activities get to return after cancellation before they are aborted
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    fn transition(&mut self, next: OrchestratorState) {
        debug!("{} {:?} -> {:?}", Component::App, self.state, next);
        self.state = next;
    }

    /// Resolve with `resolve`, then run the activities built by `start` until shutdown
    ///
    /// Returns the first activity error, or `Ok(())` when shutdown was requested
    /// through the cancellation token. A resolution failure is returned as is
    /// and no activity is started.
    pub async fn run<T, R, S>(&mut self, resolve: R, start: S) -> Result<(), SyncError>
    where
        R: Future<Output = Result<T, SyncError>>,
        S: FnOnce(T, CancellationToken) -> Vec<Activity>,
    {
        self.transition(OrchestratorState::Resolving);
        let resolved = match until_cancelled(&self.cancel, resolve).await.and_then(|r| r) {
            Ok(resolved) => resolved,
            Err(e) => {
                self.transition(OrchestratorState::Terminated);
                return Err(e);
            }
        };

        self.transition(OrchestratorState::Running);
        let activities = start(resolved, self.cancel.clone());
        let result = self.supervise(activities).await;

        self.transition(OrchestratorState::Terminated);
        result
    }

    async fn supervise(&mut self, activities: Vec<Activity>) -> Result<(), SyncError> {
        // Completions are keyed by spawn order; several activities may share a component
        let (tx, mut rx) = mpsc::channel(activities.len().max(1));
        let mut remaining = Vec::with_capacity(activities.len());
        let mut aborts = Vec::with_capacity(activities.len());

        for (index, activity) in activities.into_iter().enumerate() {
            let component = activity.component;
            let handle = tokio::spawn(activity.task);
            let abort = handle.abort_handle();
            let tx = tx.clone();

            // Reports panics and aborts through the same channel as results
            tokio::spawn(async move {
                let result = match handle.await {
                    Ok(result) => result,
                    Err(e) => Err(SyncError::TaskFailed {
                        component,
                        reason: e.to_string(),
                    }),
                };
                let _ = tx.send((index, component, result)).await;
            });

            remaining.push((index, component));
            aborts.push(abort);
        }
        drop(tx);

        let mut first_error: Option<SyncError> = None;

        let cancel = self.cancel.clone();
        while !remaining.is_empty() && self.state == OrchestratorState::Running {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("{} Shutdown requested", Component::App);
                }
                completion = rx.recv() => {
                    let Some((index, component, result)) = completion else { break };
                    remaining.retain(|(i, _)| *i != index);
                    if result.is_ok() {
                        info!("{} stopped, shutting down", component);
                    }
                    record(&mut first_error, component, result);
                    cancel.cancel();
                }
            }
            self.transition(OrchestratorState::ShuttingDown);
        }

        let drain = async {
            while !remaining.is_empty() {
                match rx.recv().await {
                    Some((index, component, result)) => {
                        remaining.retain(|(i, _)| *i != index);
                        record(&mut first_error, component, result);
                    }
                    None => break,
                }
            }
        };

        if tokio::time::timeout(self.shutdown_grace, drain).await.is_err() {
            for (_, component) in &remaining {
                warn!("{}", SyncError::ShutdownTimeout(*component));
            }
            for abort in &aborts {
                abort.abort();
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn record(first_error: &mut Option<SyncError>, component: Component, result: Result<(), SyncError>) {
    match result {
        Ok(()) => debug!("{} activity finished", component),
        Err(e) if e.is_cancellation() => debug!("{} activity cancelled", component),
        Err(e) if first_error.is_none() => {
            error!("{} {}", component, e);
            *first_error = Some(e);
        }
        Err(e) => warn!("{} also failed during shutdown: {}", component, e),
    }
}

async fn wait_for_shutdown_signal() -> Result<&'static str, SyncError> {
    let mut terminate = signal(SignalKind::terminate()).map_err(SyncError::Signal)?;
    tokio::select! {
        interrupted = tokio::signal::ctrl_c() => {
            interrupted.map_err(SyncError::Signal)?;
            Ok("interrupt")
        }
        _ = terminate.recv() => Ok("terminate"),
    }
}

/// Cancel `cancel` on SIGINT or SIGTERM; the listener exits once `cancel` fires
pub fn spawn_signal_listener(cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            received = wait_for_shutdown_signal() => match received {
                Ok(name) => {
                    info!("{} Received {} signal", Component::App, name);
                    cancel.cancel();
                }
                Err(e) => error!("{} {}", Component::App, e),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    async fn until_cancel(cancel: CancellationToken, stopped: Arc<AtomicBool>) -> Result<(), SyncError> {
        cancel.cancelled().await;
        stopped.store(true, Ordering::SeqCst);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn external_cancellation_terminates_cleanly() {
        let cancel = CancellationToken::new();
        let mut orchestrator = Orchestrator::new(cancel.clone());
        let monitor_stopped = Arc::new(AtomicBool::new(false));
        let playback_stopped = Arc::new(AtomicBool::new(false));

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let (monitor, playback) = (Arc::clone(&monitor_stopped), Arc::clone(&playback_stopped));
        let result = orchestrator
            .run(async { Ok(()) }, move |(), token| {
                vec![
                    Activity::new(Component::Ble, until_cancel(token.clone(), monitor)),
                    Activity::new(Component::Playback, until_cancel(token, playback)),
                ]
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(orchestrator.state(), OrchestratorState::Terminated);
        assert!(monitor_stopped.load(Ordering::SeqCst));
        assert!(playback_stopped.load(Ordering::SeqCst));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn playback_error_stops_monitor_and_is_reported() {
        let cancel = CancellationToken::new();
        let mut orchestrator = Orchestrator::new(cancel.clone());
        let monitor_stopped = Arc::new(AtomicBool::new(false));

        let monitor = Arc::clone(&monitor_stopped);
        let result = orchestrator
            .run(async { Ok(()) }, move |(), token| {
                vec![
                    Activity::new(Component::Ble, until_cancel(token, monitor)),
                    Activity::new(Component::Playback, async {
                        tokio::time::sleep(Duration::from_millis(500)).await;
                        Err(SyncError::Playback("backend closed".into()))
                    }),
                ]
            })
            .await;

        match result {
            Err(SyncError::Playback(reason)) => assert_eq!(reason, "backend closed"),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(cancel.is_cancelled());
        assert!(monitor_stopped.load(Ordering::SeqCst));
        assert_eq!(orchestrator.state(), OrchestratorState::Terminated);
    }

    #[tokio::test(start_paused = true)]
    async fn first_error_wins() {
        let mut orchestrator = Orchestrator::new(CancellationToken::new());

        let result = orchestrator
            .run(async { Ok(()) }, |(), token| {
                vec![
                    Activity::new(Component::Ble, async {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Err(SyncError::ConnectionLost)
                    }),
                    Activity::new(Component::Playback, async move {
                        token.cancelled().await;
                        Err(SyncError::Playback("late failure".into()))
                    }),
                ]
            })
            .await;

        assert!(matches!(result, Err(SyncError::ConnectionLost)));
    }

    #[tokio::test]
    async fn resolution_failure_starts_nothing() {
        let mut orchestrator = Orchestrator::new(CancellationToken::new());
        let started = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&started);
        let result = orchestrator
            .run(
                async { Err::<(), _>(SyncError::ServiceNotFound("no CSC service".into())) },
                move |(), _| {
                    flag.store(true, Ordering::SeqCst);
                    Vec::new()
                },
            )
            .await;

        assert!(matches!(result, Err(SyncError::ServiceNotFound(_))));
        assert!(!started.load(Ordering::SeqCst));
        assert_eq!(orchestrator.state(), OrchestratorState::Terminated);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_resolution() {
        let cancel = CancellationToken::new();
        let mut orchestrator = Orchestrator::new(cancel.clone());
        cancel.cancel();

        let result = orchestrator
            .run(std::future::pending::<Result<(), SyncError>>(), |(), _| Vec::new())
            .await;

        assert!(matches!(result, Err(SyncError::ContextCancelled)));
        assert_eq!(orchestrator.state(), OrchestratorState::Terminated);
    }

    #[tokio::test(start_paused = true)]
    async fn stragglers_are_aborted_after_grace() {
        let cancel = CancellationToken::new();
        let mut orchestrator =
            Orchestrator::new(cancel.clone()).with_shutdown_grace(Duration::from_secs(1));

        let started = Instant::now();
        let result = orchestrator
            .run(async { Ok(()) }, |(), token| {
                token.cancel();
                vec![Activity::new(Component::Playback, std::future::pending())]
            })
            .await;

        assert!(result.is_ok());
        assert!(cancel.is_cancelled());
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(1) && elapsed < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_every_activity_sharing_a_component() {
        let cancel = CancellationToken::new();
        let mut orchestrator = Orchestrator::new(cancel.clone());
        let slow_stopped = Arc::new(AtomicBool::new(false));

        let slow = Arc::clone(&slow_stopped);
        let result = orchestrator
            .run(async { Ok(()) }, move |(), token| {
                vec![
                    Activity::new(Component::Ble, async {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Ok(())
                    }),
                    Activity::new(Component::Ble, async move {
                        token.cancelled().await;
                        tokio::time::sleep(Duration::from_millis(500)).await;
                        slow.store(true, Ordering::SeqCst);
                        Ok(())
                    }),
                ]
            })
            .await;

        assert!(result.is_ok());
        assert!(slow_stopped.load(Ordering::SeqCst));
        assert_eq!(orchestrator.state(), OrchestratorState::Terminated);
    }
}
