use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
#[cfg(feature = "test-utils")]
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tokio::sync::broadcast;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

use crate::config::{BridgeOptions, BridgeOptionsBuilder};
use crate::correlator::Correlator;
use crate::error::BridgeError;
use crate::types::{Payload, Row, RunResult, SqlValue};
use crate::wire::{
    Command, Frame, Request, StatementKind, Step, decode_response, encode_request,
};
use crate::worker::{
    ExecutorConfig, ExecutorState, Inbound, StateCell, WorkerEvent, WorkerExit, WorkerLink,
    spawn_worker, supervise,
};

const EVENT_CAPACITY: usize = 64;

/// State shared between client handles and the supervisor task.
pub(crate) struct Shared {
    pub(crate) options: BridgeOptions,
    pub(crate) correlator: Correlator<JsonValue>,
    pub(crate) link: WorkerLink,
    pub(crate) state: StateCell,
    pub(crate) restarts: AtomicU32,
    pub(crate) events: broadcast::Sender<WorkerEvent>,
    pub(crate) shutdown: CancellationToken,
    pub(crate) stopped: CancellationToken,
}

impl Shared {
    pub(crate) fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig::from(&self.options)
    }

    /// Route one response frame to the caller waiting on its id.
    pub(crate) fn deliver(&self, frame: &[u8]) {
        match decode_response(frame) {
            Ok(response) => {
                let id = response.id;
                if !self.correlator.settle(id, response.outcome.into_result()) {
                    warn!(id, "discarding response for unknown or abandoned request");
                }
            }
            Err(err) => warn!("discarding undecodable response frame: {err}"),
        }
    }

    /// Register a request, encode it with its id and hand it to the worker.
    ///
    /// Registration and the channel send happen under the link lock, so a request is
    /// either queued on the live worker or rejected here; a concurrent worker exit
    /// sweeps it up with `ConnectionLost`.
    async fn submit(
        &self,
        encode: impl FnOnce(u64) -> Result<Frame, BridgeError>,
    ) -> Result<JsonValue, BridgeError> {
        let ticket = {
            let link = self.link.lock();
            let Some(sender) = link.as_ref() else {
                return Err(BridgeError::ConnectionLost(
                    "SQLite worker is not running".into(),
                ));
            };
            let ticket = self.correlator.register();
            let frame = match encode(ticket.id) {
                Ok(frame) => frame,
                Err(err) => {
                    self.correlator.abandon(ticket.id);
                    return Err(err);
                }
            };
            if sender.send(Inbound::Frame(frame)).is_err() {
                self.correlator.fail(
                    ticket.id,
                    BridgeError::ConnectionLost("SQLite worker closed".into()),
                );
            }
            ticket
        };
        debug!(id = ticket.id, "request dispatched");
        self.correlator
            .wait(ticket, self.options.request_timeout)
            .await
    }

    async fn dispatch(&self, command: Command) -> Result<JsonValue, BridgeError> {
        self.submit(|id| encode_request(&Request { id, command }))
            .await
    }

    /// Dispatch a caller-built JSON body with a fresh correlation id.
    async fn dispatch_raw(&self, mut body: JsonValue) -> Result<JsonValue, BridgeError> {
        if !body.is_object() {
            return Err(BridgeError::ProtocolError(
                "request body must be a JSON object".into(),
            ));
        }
        self.submit(move |id| {
            body["id"] = JsonValue::from(id);
            Ok(serde_json::to_vec(&body)?)
        })
        .await
    }
}

/// Caller-facing handle to a single-writer SQLite bridge.
///
/// Cheap to clone; every clone talks to the same worker. The worker shuts down once the
/// last clone is dropped or [`BridgeClient::shutdown`] is called.
#[derive(Clone)]
pub struct BridgeClient {
    shared: Arc<Shared>,
    _shutdown_on_drop: Arc<DropGuard>,
}

impl BridgeClient {
    #[must_use]
    pub fn builder(db_path: impl Into<std::path::PathBuf>) -> BridgeOptionsBuilder {
        BridgeOptionsBuilder::new(db_path)
    }

    /// Spawn the worker, wait until it has opened the database, and start supervising it.
    ///
    /// # Errors
    /// Returns `ConfigError` for invalid options, or `ConnectionError` if the worker cannot
    /// be spawned or cannot open the database.
    pub async fn open(options: BridgeOptions) -> Result<Self, BridgeError> {
        options.validate()?;

        let state = StateCell::new();
        let (sender, worker) = spawn_worker(ExecutorConfig::from(&options), state.clone(), 1)?;

        let mut state_rx = state.subscribe();
        let ready = state_rx
            .wait_for(|s| *s != ExecutorState::Starting)
            .await
            .map(|s| s.is_ready())
            .unwrap_or(false);
        if !ready {
            drop(sender);
            let reason = match worker.exit().await {
                WorkerExit::Failed(reason) => reason,
                other => other.to_string(),
            };
            return Err(BridgeError::ConnectionError(reason));
        }

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let shutdown = CancellationToken::new();
        let shared = Arc::new(Shared {
            options,
            correlator: Correlator::new(),
            link: WorkerLink::new(sender),
            state,
            restarts: AtomicU32::new(0),
            events,
            shutdown: shutdown.clone(),
            stopped: CancellationToken::new(),
        });
        tokio::spawn(supervise(Arc::clone(&shared), worker));

        Ok(Self {
            shared,
            _shutdown_on_drop: Arc::new(shutdown.drop_guard()),
        })
    }

    /// Send one statement of `kind` and return the raw JSON payload.
    ///
    /// # Errors
    /// Returns `ProtocolError` for `transaction` (use [`BridgeClient::transaction`]) or `exec`
    /// with parameters, plus any error the request settles with.
    pub async fn send(
        &self,
        kind: StatementKind,
        statement: impl Into<String>,
        params: Vec<SqlValue>,
    ) -> Result<JsonValue, BridgeError> {
        let command = Command::single(kind, statement, params)?;
        self.shared.dispatch(command).await
    }

    /// Execute a mutating statement.
    ///
    /// # Errors
    /// Returns `QueryError` if the statement fails, or a timeout/connection error.
    pub async fn run(
        &self,
        statement: impl Into<String>,
        params: Vec<SqlValue>,
    ) -> Result<RunResult, BridgeError> {
        let data = self.send(StatementKind::Run, statement, params).await?;
        decode_payload(StatementKind::Run, data)
    }

    /// Fetch at most one row.
    ///
    /// # Errors
    /// Returns `QueryError` if the statement fails, or a timeout/connection error.
    pub async fn get(
        &self,
        statement: impl Into<String>,
        params: Vec<SqlValue>,
    ) -> Result<Option<Row>, BridgeError> {
        let data = self.send(StatementKind::Get, statement, params).await?;
        decode_payload(StatementKind::Get, data)
    }

    /// Fetch every row, in result order.
    ///
    /// # Errors
    /// Returns `QueryError` if the statement fails, or a timeout/connection error.
    pub async fn all(
        &self,
        statement: impl Into<String>,
        params: Vec<SqlValue>,
    ) -> Result<Vec<Row>, BridgeError> {
        let data = self.send(StatementKind::All, statement, params).await?;
        decode_payload(StatementKind::All, data)
    }

    /// Execute a raw script; statements run in textual order.
    ///
    /// # Errors
    /// Returns `QueryError` at the first failing statement, or a timeout/connection error.
    pub async fn exec(&self, script: impl Into<String>) -> Result<(), BridgeError> {
        self.send(StatementKind::Exec, script, Vec::new()).await?;
        Ok(())
    }

    /// Run `steps` atomically and return the last step's payload.
    ///
    /// # Errors
    /// Returns `QueryError` naming the failing step (after a full rollback), `ProtocolError`
    /// for an empty batch, or a timeout/connection error.
    pub async fn transaction(&self, steps: Vec<Step>) -> Result<Payload, BridgeError> {
        let Some(last_kind) = steps.last().map(|step| step.kind) else {
            return Err(BridgeError::ProtocolError(
                "transaction requires at least one step".into(),
            ));
        };
        let data = self.shared.dispatch(Command::Transaction { steps }).await?;
        payload_from_json(last_kind, data)
    }

    /// Send a hand-built request body; the correlation id is filled in.
    ///
    /// # Errors
    /// Returns whatever the worker answers with, typically `ProtocolError` for bodies it
    /// cannot parse.
    pub async fn send_raw(&self, body: JsonValue) -> Result<JsonValue, BridgeError> {
        self.shared.dispatch_raw(body).await
    }

    /// Close the worker's queue. Already-queued requests are still answered; requests
    /// made after this returns fail with `ConnectionLost`.
    pub fn shutdown(&self) {
        self.shared.link.detach();
        self.shared.shutdown.cancel();
    }

    /// Wait until the supervisor has stopped for good: after [`BridgeClient::shutdown`],
    /// or once the restart policy gives up.
    pub async fn closed(&self) {
        self.shared.stopped.cancelled().await;
    }

    /// Whether a live worker is currently attached.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.link.is_attached()
    }

    #[must_use]
    pub fn executor_state(&self) -> ExecutorState {
        self.shared.state.get()
    }

    /// Number of requests still waiting for a response.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.correlator.len()
    }

    /// How many times the worker has been respawned.
    #[must_use]
    pub fn restarts(&self) -> u32 {
        self.shared.restarts.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.shared.events.subscribe()
    }

    #[must_use]
    pub fn options(&self) -> &BridgeOptions {
        &self.shared.options
    }

    /// Make the current worker stall for `after` and then die as if its handle failed.
    ///
    /// # Errors
    /// Returns `ConnectionLost` if no worker is attached.
    #[cfg(feature = "test-utils")]
    #[doc(hidden)]
    pub fn simulate_crash_for_tests(&self, after: Duration) -> Result<(), BridgeError> {
        let link = self.shared.link.lock();
        link.as_ref()
            .and_then(|sender| sender.send(Inbound::Crash { after }).ok())
            .ok_or_else(|| BridgeError::ConnectionLost("SQLite worker is not running".into()))
    }
}

fn decode_payload<T: DeserializeOwned>(kind: StatementKind, data: JsonValue) -> Result<T, BridgeError> {
    serde_json::from_value(data)
        .map_err(|err| BridgeError::ProtocolError(format!("unexpected `{kind}` payload: {err}")))
}

fn payload_from_json(kind: StatementKind, data: JsonValue) -> Result<Payload, BridgeError> {
    match kind {
        StatementKind::Run => decode_payload(kind, data).map(Payload::Run),
        StatementKind::Get => decode_payload(kind, data).map(Payload::Row),
        StatementKind::All => decode_payload(kind, data).map(Payload::Rows),
        StatementKind::Exec | StatementKind::Transaction => Ok(Payload::Done),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    use serde_json::json;

    use crate::wire::{Outcome, Response, encode_response};

    fn detached_shared() -> Shared {
        let (sender, _receiver) = mpsc::channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Shared {
            options: BridgeOptions::new("unused.db"),
            correlator: Correlator::new(),
            link: WorkerLink::new(sender),
            state: StateCell::new(),
            restarts: AtomicU32::new(0),
            events,
            shutdown: CancellationToken::new(),
            stopped: CancellationToken::new(),
        }
    }

    fn success(id: u64, data: JsonValue) -> Frame {
        encode_response(&Response {
            id,
            outcome: Outcome::Success(data),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn deliver_skips_junk_and_unknown_ids() {
        let shared = detached_shared();
        let ticket = shared.correlator.register();
        let id = ticket.id;

        shared.deliver(b"\x00 not a response");
        shared.deliver(br#"{"status": "success"}"#);
        shared.deliver(&success(id + 100, json!({"v": 1})));
        assert_eq!(shared.correlator.len(), 1, "caller must still be waiting");

        let answer = success(id, json!({"v": 2}));
        shared.deliver(&answer);
        assert!(shared.correlator.is_empty());
        assert_eq!(
            shared.correlator.wait(ticket, None).await.unwrap(),
            json!({"v": 2})
        );

        // A duplicate answer after settlement changes nothing.
        shared.deliver(&answer);
        assert!(shared.correlator.is_empty());
    }

    #[test]
    fn executor_config_follows_options() {
        let shared = detached_shared();
        let config = shared.executor_config();
        assert_eq!(config.db_path, shared.options.db_path);
        assert_eq!(config.busy_timeout, shared.options.busy_timeout);
    }
}
