//! Request/response frames exchanged between the client and the executor thread.
//!
//! Frames are JSON documents:
//!
//! ```text
//! Request  = { id, kind: "run"|"get"|"all"|"exec"|"transaction",
//!              statement?, params?, steps?: [{kind?, statement, params?}] }
//! Response = { id, status: "success"|"error", data?, error?, code?: "query"|"protocol" }
//! ```

use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::BridgeError;
use crate::types::SqlValue;

/// Encoded message carried over the worker channels.
pub type Frame = Vec<u8>;

/// Statement kinds understood by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StatementKind {
    /// Mutating statement; reports changed rows and last rowid
    Run,
    /// At most one row
    Get,
    /// Every row, in result order
    All,
    /// Raw script, no parameters
    Exec,
    /// Atomic batch of steps
    Transaction,
}

impl StatementKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Run => "run",
            Self::Get => "get",
            Self::All => "all",
            Self::Exec => "exec",
            Self::Transaction => "transaction",
        }
    }

    /// Whether this kind may appear as a step inside a transaction.
    #[must_use]
    pub fn allowed_in_transaction(self) -> bool {
        matches!(self, Self::Run | Self::Get | Self::All)
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatementKind {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "run" => Ok(Self::Run),
            "get" => Ok(Self::Get),
            "all" => Ok(Self::All),
            "exec" => Ok(Self::Exec),
            "transaction" => Ok(Self::Transaction),
            other => Err(BridgeError::ProtocolError(format!(
                "unknown statement kind `{other}`"
            ))),
        }
    }
}

/// One statement of a transaction batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub kind: StatementKind,
    pub statement: String,
    pub params: Vec<SqlValue>,
}

impl Step {
    /// A `run` step; the common case for write batches.
    pub fn new(statement: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            kind: StatementKind::Run,
            statement: statement.into(),
            params,
        }
    }

    #[must_use]
    pub fn with_kind(mut self, kind: StatementKind) -> Self {
        self.kind = kind;
        self
    }
}

/// Decoded body of a request. One variant per statement kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Run {
        statement: String,
        params: Vec<SqlValue>,
    },
    Get {
        statement: String,
        params: Vec<SqlValue>,
    },
    All {
        statement: String,
        params: Vec<SqlValue>,
    },
    Exec {
        script: String,
    },
    Transaction {
        steps: Vec<Step>,
    },
}

impl Command {
    /// Build a single-statement command for `kind`.
    ///
    /// # Errors
    /// Returns `BridgeError::ProtocolError` for `transaction`, which needs steps, and for
    /// `exec` with bound parameters.
    pub fn single(
        kind: StatementKind,
        statement: impl Into<String>,
        params: Vec<SqlValue>,
    ) -> Result<Self, BridgeError> {
        let statement = statement.into();
        match kind {
            StatementKind::Run => Ok(Self::Run { statement, params }),
            StatementKind::Get => Ok(Self::Get { statement, params }),
            StatementKind::All => Ok(Self::All { statement, params }),
            StatementKind::Exec if params.is_empty() => Ok(Self::Exec { script: statement }),
            StatementKind::Exec => Err(BridgeError::ProtocolError(
                "exec does not accept bound parameters".into(),
            )),
            StatementKind::Transaction => Err(BridgeError::ProtocolError(
                "transaction requires a list of steps".into(),
            )),
        }
    }

    #[must_use]
    pub fn kind(&self) -> StatementKind {
        match self {
            Self::Run { .. } => StatementKind::Run,
            Self::Get { .. } => StatementKind::Get,
            Self::All { .. } => StatementKind::All,
            Self::Exec { .. } => StatementKind::Exec,
            Self::Transaction { .. } => StatementKind::Transaction,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: u64,
    pub command: Command,
}

/// Failure class carried in the `code` member of an error response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCode {
    Query,
    Protocol,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(JsonValue),
    Failure { code: ErrorCode, message: String },
}

impl Outcome {
    /// Map a per-request failure into its wire class.
    #[must_use]
    pub fn failure(err: &BridgeError) -> Self {
        match err {
            BridgeError::ProtocolError(message) => Outcome::Failure {
                code: ErrorCode::Protocol,
                message: message.clone(),
            },
            BridgeError::QueryError(message) => Outcome::Failure {
                code: ErrorCode::Query,
                message: message.clone(),
            },
            other => Outcome::Failure {
                code: ErrorCode::Query,
                message: other.to_string(),
            },
        }
    }

    /// Turn the outcome back into the caller-facing result.
    ///
    /// # Errors
    /// Returns `QueryError` or `ProtocolError` for failure outcomes.
    pub fn into_result(self) -> Result<JsonValue, BridgeError> {
        match self {
            Outcome::Success(data) => Ok(data),
            Outcome::Failure {
                code: ErrorCode::Query,
                message,
            } => Err(BridgeError::QueryError(message)),
            Outcome::Failure {
                code: ErrorCode::Protocol,
                message,
            } => Err(BridgeError::ProtocolError(message)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: u64,
    pub outcome: Outcome,
}

/// A request frame that could not be turned into a [`Request`].
///
/// `id` is kept whenever the frame carried one, so the executor can still answer it.
#[derive(Debug)]
pub struct DecodeError {
    pub id: Option<u64>,
    pub error: BridgeError,
}

// Raw JSON shapes. Kept private so decoding always goes through validation.

#[derive(Serialize, Deserialize)]
struct WireStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    statement: String,
    #[serde(default)]
    params: Vec<SqlValue>,
}

#[derive(Serialize, Deserialize)]
struct WireRequest {
    id: u64,
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    statement: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    params: Vec<SqlValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    steps: Option<Vec<WireStep>>,
}

#[derive(Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
enum WireStatus {
    Success,
    Error,
}

#[derive(Serialize, Deserialize)]
struct WireResponse {
    id: u64,
    status: WireStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    code: Option<ErrorCode>,
}

/// Encode a request into a frame.
///
/// # Errors
/// Returns `BridgeError::ProtocolError` if a parameter has no JSON form (a NaN or
/// infinite real).
pub fn encode_request(request: &Request) -> Result<Frame, BridgeError> {
    let kind = request.command.kind().as_str().to_owned();
    let wire = match &request.command {
        Command::Run { statement, params }
        | Command::Get { statement, params }
        | Command::All { statement, params } => WireRequest {
            id: request.id,
            kind,
            statement: Some(statement.clone()),
            params: params.clone(),
            steps: None,
        },
        Command::Exec { script } => WireRequest {
            id: request.id,
            kind,
            statement: Some(script.clone()),
            params: Vec::new(),
            steps: None,
        },
        Command::Transaction { steps } => WireRequest {
            id: request.id,
            kind,
            statement: None,
            params: Vec::new(),
            steps: Some(
                steps
                    .iter()
                    .map(|step| WireStep {
                        kind: Some(step.kind.as_str().to_owned()),
                        statement: step.statement.clone(),
                        params: step.params.clone(),
                    })
                    .collect(),
            ),
        },
    };
    serde_json::to_vec(&wire)
        .map_err(|err| BridgeError::ProtocolError(format!("cannot encode request: {err}")))
}

/// Decode and validate a request frame.
///
/// # Errors
/// Returns a [`DecodeError`] holding a `ProtocolError` for malformed JSON, unknown kinds,
/// missing statements, and empty or invalid transaction steps.
pub fn decode_request(frame: &[u8]) -> Result<Request, DecodeError> {
    let value: JsonValue = serde_json::from_slice(frame).map_err(|err| DecodeError {
        id: None,
        error: BridgeError::ProtocolError(format!("malformed request: {err}")),
    })?;
    let id = value.get("id").and_then(JsonValue::as_u64);
    let protocol = |message: String| DecodeError {
        id,
        error: BridgeError::ProtocolError(message),
    };

    let wire: WireRequest = serde_json::from_value(value)
        .map_err(|err| protocol(format!("malformed request: {err}")))?;
    let kind = wire
        .kind
        .parse::<StatementKind>()
        .map_err(|error| DecodeError { id, error })?;

    let command = if kind == StatementKind::Transaction {
        let steps = wire
            .steps
            .ok_or_else(|| protocol("transaction requires a list of steps".into()))?;
        if steps.is_empty() {
            return Err(protocol("transaction requires at least one step".into()));
        }
        let steps = steps
            .into_iter()
            .map(|step| {
                let step_kind = match step.kind.as_deref() {
                    None => StatementKind::Run,
                    Some(raw) => raw
                        .parse::<StatementKind>()
                        .map_err(|error| DecodeError { id, error })?,
                };
                if !step_kind.allowed_in_transaction() {
                    return Err(protocol(format!(
                        "`{step_kind}` is not allowed inside a transaction"
                    )));
                }
                Ok(Step {
                    kind: step_kind,
                    statement: step.statement,
                    params: step.params,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Command::Transaction { steps }
    } else {
        let statement = wire
            .statement
            .ok_or_else(|| protocol(format!("`{kind}` requires a statement")))?;
        Command::single(kind, statement, wire.params).map_err(|error| DecodeError { id, error })?
    };

    Ok(Request {
        id: wire.id,
        command,
    })
}

/// Encode a response into a frame.
///
/// # Errors
/// Returns `BridgeError::CodecError` if serialization fails.
pub fn encode_response(response: &Response) -> Result<Frame, BridgeError> {
    let wire = match &response.outcome {
        Outcome::Success(data) => WireResponse {
            id: response.id,
            status: WireStatus::Success,
            data: Some(data.clone()),
            error: None,
            code: None,
        },
        Outcome::Failure { code, message } => WireResponse {
            id: response.id,
            status: WireStatus::Error,
            data: None,
            error: Some(message.clone()),
            code: Some(*code),
        },
    };
    Ok(serde_json::to_vec(&wire)?)
}

/// Decode a response frame.
///
/// # Errors
/// Returns `BridgeError::CodecError` if the frame is not a response document.
pub fn decode_response(frame: &[u8]) -> Result<Response, BridgeError> {
    let wire: WireResponse = serde_json::from_slice(frame)?;
    let outcome = match wire.status {
        WireStatus::Success => Outcome::Success(wire.data.unwrap_or(JsonValue::Null)),
        WireStatus::Error => Outcome::Failure {
            code: wire.code.unwrap_or(ErrorCode::Query),
            message: wire.error.unwrap_or_else(|| "unknown error".into()),
        },
    };
    Ok(Response {
        id: wire.id,
        outcome,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn round_trip(request: Request) {
        let frame = encode_request(&request).unwrap();
        let decoded = decode_request(&frame).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn requests_survive_encoding() {
        round_trip(Request {
            id: 1,
            command: Command::Run {
                statement: "INSERT INTO games(title) VALUES(?)".into(),
                params: vec![SqlValue::Text("Foo".into()), SqlValue::Real(1.5)],
            },
        });
        round_trip(Request {
            id: u64::MAX,
            command: Command::Exec {
                script: "CREATE TABLE t(x); INSERT INTO t VALUES (1);".into(),
            },
        });
        round_trip(Request {
            id: 9,
            command: Command::Transaction {
                steps: vec![
                    Step::new("INSERT INTO t VALUES (?)", vec![SqlValue::Blob(vec![1, 2])]),
                    Step::new("SELECT * FROM t", Vec::new()).with_kind(StatementKind::All),
                ],
            },
        });
    }

    #[test]
    fn unknown_kind_keeps_the_id() {
        let frame = serde_json::to_vec(&json!({"id": 42, "kind": "explode", "statement": "x"})).unwrap();
        let err = decode_request(&frame).unwrap_err();
        assert_eq!(err.id, Some(42));
        assert!(err.error.is_protocol());
    }

    #[test]
    fn malformed_frames_are_protocol_errors() {
        let err = decode_request(b"not json").unwrap_err();
        assert_eq!(err.id, None);
        assert!(err.error.is_protocol());

        let frame = serde_json::to_vec(&json!({"id": 3, "kind": "get"})).unwrap();
        let err = decode_request(&frame).unwrap_err();
        assert_eq!(err.id, Some(3));

        let frame = serde_json::to_vec(&json!({"id": 4, "kind": "transaction", "steps": []})).unwrap();
        assert!(decode_request(&frame).unwrap_err().error.is_protocol());

        let frame = serde_json::to_vec(&json!({
            "id": 5,
            "kind": "transaction",
            "steps": [{"kind": "exec", "statement": "DELETE FROM t"}]
        }))
        .unwrap();
        assert!(decode_request(&frame).unwrap_err().error.is_protocol());
    }

    #[test]
    fn step_kind_defaults_to_run() {
        let frame = serde_json::to_vec(&json!({
            "id": 6,
            "kind": "transaction",
            "steps": [{"statement": "DELETE FROM t"}]
        }))
        .unwrap();
        let request = decode_request(&frame).unwrap();
        let Command::Transaction { steps } = request.command else {
            panic!("expected transaction");
        };
        assert_eq!(steps[0].kind, StatementKind::Run);
        assert!(steps[0].params.is_empty());
    }

    #[test]
    fn non_finite_params_are_refused() {
        for bad in [f64::INFINITY, f64::NEG_INFINITY, f64::NAN] {
            let err = encode_request(&Request {
                id: 10,
                command: Command::Run {
                    statement: "INSERT INTO t VALUES (?)".into(),
                    params: vec![SqlValue::Real(bad)],
                },
            })
            .unwrap_err();
            assert!(err.is_protocol(), "{err}");
        }
    }

    #[test]
    fn kind_names_parse() {
        assert_eq!("all".parse::<StatementKind>().unwrap(), StatementKind::All);
        assert!("ALL".parse::<StatementKind>().unwrap_err().is_protocol());
    }

    #[test]
    fn responses_carry_error_class() {
        let response = Response {
            id: 8,
            outcome: Outcome::failure(&BridgeError::ProtocolError("bad".into())),
        };
        let decoded = decode_response(&encode_response(&response).unwrap()).unwrap();
        assert_eq!(decoded, response);
        assert!(decoded.outcome.into_result().unwrap_err().is_protocol());

        let legacy = br#"{"id": 2, "status": "error", "error": "no such table: x"}"#;
        let err = decode_response(legacy).unwrap().outcome.into_result().unwrap_err();
        assert!(err.is_query());
    }
}
