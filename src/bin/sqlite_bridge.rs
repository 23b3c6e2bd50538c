//! Open a bridge against a database file and run one statement through it.
//!
//! ```text
//! sqlite-bridge --db launcher.db get "SELECT COUNT(*) AS c FROM games"
//! sqlite-bridge --db launcher.db run "INSERT INTO games(title) VALUES (?)" --param '"Foo"'
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use sqlite_bridge::prelude::*;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "sqlite-bridge", version, about = "Run a statement through the single-writer SQLite bridge")]
struct Args {
    /// Path to the SQLite database file
    #[arg(long)]
    db: PathBuf,

    /// Fail the request if no response arrives within this many milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Statement kind
    #[arg(value_enum)]
    kind: StatementKind,

    /// SQL text (a script for `exec`). For `transaction`, steps are split on `;`, so a
    /// literal containing `;` cannot be used and `--param` is rejected
    statement: String,

    /// Bind parameter as JSON (`1`, `2.5`, `"text"`, `null`); repeat in order
    #[arg(long = "param")]
    params: Vec<String>,
}

fn parse_param(raw: &str) -> SqlValue {
    serde_json::from_str(raw).unwrap_or_else(|_| SqlValue::Text(raw.to_owned()))
}

/// Split a `transaction` statement into `run` steps.
fn transaction_steps(statement: &str, params: &[String]) -> Result<Vec<Step>, BridgeError> {
    if !params.is_empty() {
        return Err(BridgeError::ProtocolError(
            "--param is not supported for `transaction`; inline the values".into(),
        ));
    }
    Ok(statement
        .split(';')
        .map(str::trim)
        .filter(|sql| !sql.is_empty())
        .map(|sql| Step::new(sql, Vec::new()))
        .collect())
}

async fn run(args: Args) -> Result<serde_json::Value, BridgeError> {
    let steps = if args.kind == StatementKind::Transaction {
        Some(transaction_steps(&args.statement, &args.params)?)
    } else {
        None
    };

    let mut builder = BridgeClient::builder(&args.db);
    if let Some(ms) = args.timeout_ms {
        builder = builder.request_timeout(Duration::from_millis(ms));
    }
    let bridge = builder.build().await?;
    let params = args.params.iter().map(|raw| parse_param(raw)).collect();

    let data = if let Some(steps) = steps {
        let payload = bridge.transaction(steps).await?;
        payload.to_json()?
    } else {
        bridge.send(args.kind, args.statement, params).await?
    };

    bridge.shutdown();
    bridge.closed().await;
    Ok(data)
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match run(Args::parse()).await {
        Ok(data) => match serde_json::to_string_pretty(&data) {
            Ok(text) => {
                println!("{text}");
                ExitCode::SUCCESS
            }
            Err(err) => {
                error!("failed to render result: {err}");
                ExitCode::FAILURE
            }
        },
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_splits_on_semicolons() {
        let steps = transaction_steps("INSERT INTO t VALUES (1); ; UPDATE t SET x = 2;", &[]).unwrap();
        let sql: Vec<_> = steps.iter().map(|step| step.statement.as_str()).collect();
        assert_eq!(sql, ["INSERT INTO t VALUES (1)", "UPDATE t SET x = 2"]);
        assert!(steps.iter().all(|step| step.kind == StatementKind::Run));
    }

    #[test]
    fn transaction_refuses_params() {
        let err = transaction_steps("INSERT INTO t VALUES (?)", &["1".to_owned()]).unwrap_err();
        assert!(err.is_protocol());
    }
}
