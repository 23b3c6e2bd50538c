use std::path::PathBuf;
use std::time::Duration;

use rusqlite::Connection;
use tracing::{debug, error, info, warn};

use crate::config::BridgeOptions;
use crate::error::BridgeError;
use crate::sqlite::{build_rows, first_row, open_connection, values_as_tosql};
use crate::types::{Payload, RunResult, SqlValue};
use crate::wire::{
    Command, DecodeError, Frame, Outcome, Response, StatementKind, Step, decode_request,
    encode_response,
};

use super::channel::{Inbound, InboundReceiver, OutboundSender};
use super::state::{ExecutorState, StateCell};

/// Startup configuration handed to each executor instance.
#[derive(Debug, Clone)]
pub(crate) struct ExecutorConfig {
    pub(crate) db_path: PathBuf,
    pub(crate) busy_timeout: Duration,
}

impl From<&BridgeOptions> for ExecutorConfig {
    fn from(options: &BridgeOptions) -> Self {
        Self {
            db_path: options.db_path.clone(),
            busy_timeout: options.busy_timeout,
        }
    }
}

/// Executor loop. Owns the connection for its whole lifetime.
///
/// Returns `Ok(())` once the inbound channel closes and every queued request has been
/// answered. Returns `Err` when the handle cannot be opened, which ends the instance.
pub(super) fn run_executor(
    config: &ExecutorConfig,
    receiver: &InboundReceiver,
    responder: &OutboundSender,
    state: &StateCell,
) -> Result<(), BridgeError> {
    let mut conn = match open_connection(&config.db_path, config.busy_timeout) {
        Ok(conn) => conn,
        Err(err) => {
            error!(path = %config.db_path.display(), "worker failed to connect to database: {err}");
            state.terminate();
            return Err(err);
        }
    };
    state.transition(ExecutorState::Idle);

    while let Ok(message) = receiver.recv() {
        match message {
            Inbound::Frame(frame) => {
                state.transition(ExecutorState::Executing);
                let reply = handle_frame(&mut conn, &frame);
                state.transition(ExecutorState::Idle);
                if let Some(reply) = reply {
                    if responder.send(reply).is_err() {
                        warn!("response channel closed; stopping worker");
                        break;
                    }
                }
            }
            #[cfg(any(test, feature = "test-utils"))]
            Inbound::Crash { after } => {
                std::thread::sleep(after);
                state.terminate();
                return Err(BridgeError::ConnectionError(
                    "worker terminated by crash hook".into(),
                ));
            }
        }
    }

    info!("worker inbound channel closed; shutting down");
    state.terminate();
    Ok(())
}

/// Answer one request frame. `None` only when the frame carried no usable id.
fn handle_frame(conn: &mut Connection, frame: &[u8]) -> Option<Frame> {
    let response = match decode_request(frame) {
        Ok(request) => {
            let kind = request.command.kind();
            debug!(id = request.id, %kind, "executing request");
            Response {
                id: request.id,
                outcome: execute(conn, request.command),
            }
        }
        Err(DecodeError {
            id: Some(id),
            error,
        }) => {
            warn!(id, "rejecting request: {error}");
            Response {
                id,
                outcome: Outcome::failure(&error),
            }
        }
        Err(DecodeError { id: None, error }) => {
            error!("dropping request frame without a correlation id: {error}");
            return None;
        }
    };
    Some(encode_or_fail(&response))
}

fn encode_or_fail(response: &Response) -> Frame {
    match encode_response(response) {
        Ok(frame) => frame,
        Err(err) => {
            warn!(id = response.id, "failed to encode response: {err}");
            let fallback = Response {
                id: response.id,
                outcome: Outcome::failure(&err),
            };
            // A failure outcome is two strings and an id; it always serializes.
            encode_response(&fallback).unwrap_or_default()
        }
    }
}

fn execute(conn: &mut Connection, command: Command) -> Outcome {
    let kind = command.kind();
    match run_command(conn, command).and_then(|payload| {
        payload
            .to_json()
            .map_err(|err| BridgeError::QueryError(format!("result cannot be encoded: {err}")))
    }) {
        Ok(data) => Outcome::Success(data),
        Err(err) => {
            debug!(%kind, "statement failed: {err}");
            Outcome::failure(&err)
        }
    }
}

fn run_command(conn: &mut Connection, command: Command) -> Result<Payload, BridgeError> {
    match command {
        Command::Run { statement, params } => {
            execute_statement(conn, StatementKind::Run, &statement, &params)
        }
        Command::Get { statement, params } => {
            execute_statement(conn, StatementKind::Get, &statement, &params)
        }
        Command::All { statement, params } => {
            execute_statement(conn, StatementKind::All, &statement, &params)
        }
        Command::Exec { script } => {
            conn.execute_batch(&script)?;
            Ok(Payload::Done)
        }
        Command::Transaction { steps } => execute_transaction(conn, &steps),
    }
}

fn execute_statement(
    conn: &Connection,
    kind: StatementKind,
    statement: &str,
    params: &[SqlValue],
) -> Result<Payload, BridgeError> {
    let mut stmt = conn.prepare(statement)?;
    match kind {
        StatementKind::Run => {
            let param_refs = values_as_tosql(params);
            let changed_row_count = stmt.execute(&param_refs[..])?;
            Ok(Payload::Run(RunResult {
                changed_row_count,
                last_inserted_id: conn.last_insert_rowid(),
            }))
        }
        StatementKind::Get => Ok(Payload::Row(first_row(&mut stmt, params)?)),
        StatementKind::All => Ok(Payload::Rows(build_rows(&mut stmt, params)?)),
        StatementKind::Exec | StatementKind::Transaction => Err(BridgeError::ProtocolError(
            format!("`{kind}` cannot run as a single statement"),
        )),
    }
}

/// All steps commit together or none do. The payload is the last step's.
fn execute_transaction(conn: &mut Connection, steps: &[Step]) -> Result<Payload, BridgeError> {
    let tx = conn.transaction()?;
    let mut last = Payload::Done;

    for (index, step) in steps.iter().enumerate() {
        match execute_statement(&tx, step.kind, &step.statement, &step.params) {
            Ok(payload) => last = payload,
            Err(err) => {
                if let Err(rollback_err) = tx.rollback() {
                    error!("transaction rollback failed: {rollback_err}");
                }
                return Err(BridgeError::QueryError(format!(
                    "transaction step {} failed: {err}",
                    index + 1
                )));
            }
        }
    }

    tx.commit()?;
    Ok(last)
}
