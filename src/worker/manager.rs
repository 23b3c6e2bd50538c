use std::fmt;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tokio::sync::{mpsc as async_mpsc, oneshot};
use tracing::{error, info, warn};

use crate::client::Shared;
use crate::config::RestartPolicy;
use crate::error::BridgeError;

use super::channel::{Inbound, InboundSender, OutboundReceiver};
use super::dispatcher::{ExecutorConfig, run_executor};
use super::state::StateCell;

/// How a worker incarnation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    /// The inbound channel closed and every queued request was answered.
    Clean,
    /// The handle could not be opened or maintained.
    Failed(String),
    /// The worker thread panicked.
    Panicked,
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Clean => f.write_str("clean shutdown"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
            Self::Panicked => f.write_str("panicked"),
        }
    }
}

/// Lifecycle notifications published by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    Started { incarnation: u32 },
    Exited {
        incarnation: u32,
        exit: WorkerExit,
        rejected: usize,
    },
    Restarting { attempt: u32, backoff: Duration },
    /// No further workers will be started.
    Stopped { reason: String },
}

/// The async side of one running worker incarnation.
pub(crate) struct WorkerHandle {
    pub(crate) incarnation: u32,
    responses: OutboundReceiver,
    exit: oneshot::Receiver<Result<(), BridgeError>>,
}

impl WorkerHandle {
    /// Wait for the thread to finish and report why it did.
    pub(crate) async fn exit(self) -> WorkerExit {
        match self.exit.await {
            Ok(Ok(())) => WorkerExit::Clean,
            Ok(Err(err)) => WorkerExit::Failed(err.to_string()),
            Err(_) => WorkerExit::Panicked,
        }
    }
}

/// Spawn a worker thread that opens `config.db_path` and serves requests.
///
/// # Errors
/// Returns [`BridgeError::ConnectionError`] if the thread cannot be spawned.
pub(crate) fn spawn_worker(
    config: ExecutorConfig,
    state: StateCell,
    incarnation: u32,
) -> Result<(InboundSender, WorkerHandle), BridgeError> {
    let (sender, receiver) = mpsc::channel::<Inbound>();
    let (responder, responses) = async_mpsc::unbounded_channel();
    let (exit_tx, exit_rx) = oneshot::channel();

    thread::Builder::new()
        .name(format!("sqlite-bridge-worker-{incarnation}"))
        .spawn(move || {
            let result = run_executor(&config, &receiver, &responder, &state);
            // Close the queue before the response channel: once the supervisor sees the
            // responses end, no request can still be accepted by this incarnation.
            drop(receiver);
            state.terminate();
            let _ = exit_tx.send(result);
            drop(responder);
        })
        .map_err(|err| {
            BridgeError::ConnectionError(format!("failed to spawn SQLite worker thread: {err}"))
        })?;

    Ok((
        sender,
        WorkerHandle {
            incarnation,
            responses,
            exit: exit_rx,
        },
    ))
}

/// Route responses to the correlator, then handle the worker's exit and restart policy.
///
/// Runs until shutdown or until the restart policy gives up.
pub(crate) async fn supervise(shared: Arc<Shared>, mut worker: WorkerHandle) {
    let shutdown = shared.shutdown.clone();
    let reason = loop {
        let incarnation = worker.incarnation;
        let _ = shared.events.send(WorkerEvent::Started { incarnation });

        let mut closing = shutdown.is_cancelled();
        if closing {
            shared.link.detach();
        }
        loop {
            tokio::select! {
                frame = worker.responses.recv() => match frame {
                    Some(frame) => shared.deliver(&frame),
                    None => break,
                },
                () = shutdown.cancelled(), if !closing => {
                    closing = true;
                    info!(incarnation, "bridge shutting down; draining worker");
                    shared.link.detach();
                }
            }
        }

        let exit = worker.exit().await;
        shared.link.detach();
        shared.state.terminate();
        let rejected = shared.correlator.fail_all(|| {
            BridgeError::ConnectionLost(format!("SQLite worker {incarnation} exited"))
        });
        match &exit {
            WorkerExit::Clean => info!(incarnation, rejected, "worker stopped"),
            other => error!(incarnation, rejected, "worker stopped: {other}"),
        }
        let _ = shared.events.send(WorkerEvent::Exited {
            incarnation,
            exit,
            rejected,
        });

        if shutdown.is_cancelled() {
            break "shutdown requested".to_owned();
        }

        let RestartPolicy::Bounded {
            max_restarts,
            backoff,
        } = shared.options.restart
        else {
            break "restart policy is `never`".to_owned();
        };
        let attempt = shared.restarts.load(Ordering::SeqCst) + 1;
        if attempt > max_restarts {
            break format!("gave up after {max_restarts} restarts");
        }
        shared.restarts.store(attempt, Ordering::SeqCst);
        warn!(attempt, ?backoff, "restarting SQLite worker");
        let _ = shared.events.send(WorkerEvent::Restarting { attempt, backoff });

        tokio::select! {
            () = shutdown.cancelled() => break "shutdown requested".to_owned(),
            () = tokio::time::sleep(backoff) => {}
        }

        shared.state.reset();
        match spawn_worker(shared.executor_config(), shared.state.clone(), incarnation + 1) {
            Ok((sender, next)) => {
                shared.link.attach(sender);
                worker = next;
            }
            Err(err) => {
                shared.state.terminate();
                break format!("respawn failed: {err}");
            }
        }
    };

    info!("SQLite worker supervisor stopped: {reason}");
    let _ = shared.events.send(WorkerEvent::Stopped { reason });
    shared.stopped.cancel();
}
