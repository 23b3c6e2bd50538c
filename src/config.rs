use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::BridgeClient;
use crate::error::BridgeError;

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5_000);

/// What the supervisor does when a worker exits without being asked to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum RestartPolicy {
    /// Leave the bridge disconnected; every later request fails with `ConnectionLost`.
    #[default]
    Never,
    /// Respawn a fresh worker up to `max_restarts` times over the bridge's lifetime.
    Bounded {
        max_restarts: u32,
        #[serde(rename = "backoff_ms", with = "millis")]
        backoff: Duration,
    },
}

/// Options for opening a bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeOptions {
    pub db_path: PathBuf,
    #[serde(
        rename = "request_timeout_ms",
        default,
        with = "optional_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub request_timeout: Option<Duration>,
    #[serde(default)]
    pub restart: RestartPolicy,
    #[serde(rename = "busy_timeout_ms", default = "default_busy_timeout", with = "millis")]
    pub busy_timeout: Duration,
}

fn default_busy_timeout() -> Duration {
    DEFAULT_BUSY_TIMEOUT
}

impl BridgeOptions {
    #[must_use]
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            request_timeout: None,
            restart: RestartPolicy::Never,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    /// Check the options before anything is spawned.
    ///
    /// # Errors
    /// Returns `BridgeError::ConfigError` for an empty database path or a zero request timeout.
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.db_path.as_os_str().is_empty() {
            return Err(BridgeError::ConfigError(
                "database path must not be empty".into(),
            ));
        }
        if self.request_timeout.is_some_and(|t| t.is_zero()) {
            return Err(BridgeError::ConfigError(
                "request timeout must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Fluent builder for [`BridgeOptions`].
#[derive(Debug, Clone)]
pub struct BridgeOptionsBuilder {
    opts: BridgeOptions,
}

impl BridgeOptionsBuilder {
    #[must_use]
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            opts: BridgeOptions::new(db_path),
        }
    }

    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.opts.request_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn restart(mut self, restart: RestartPolicy) -> Self {
        self.opts.restart = restart;
        self
    }

    #[must_use]
    pub fn busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.opts.busy_timeout = busy_timeout;
        self
    }

    #[must_use]
    pub fn finish(self) -> BridgeOptions {
        self.opts
    }

    /// Open a bridge with these options.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError` if the options are invalid or the worker cannot open the database.
    pub async fn build(self) -> Result<BridgeClient, BridgeError> {
        BridgeClient::open(self.finish()).await
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

mod optional_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::ref_option)]
    pub(super) fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => super::millis::serialize(duration, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_from_json_with_defaults() {
        let opts: BridgeOptions = serde_json::from_str(r#"{"db_path": "launcher.db"}"#).unwrap();
        assert_eq!(opts, BridgeOptions::new("launcher.db"));
        assert_eq!(opts.busy_timeout, DEFAULT_BUSY_TIMEOUT);
    }

    #[test]
    fn loads_restart_policy() {
        let opts: BridgeOptions = serde_json::from_str(
            r#"{
                "db_path": "launcher.db",
                "request_timeout_ms": 250,
                "restart": {"policy": "bounded", "max_restarts": 3, "backoff_ms": 100}
            }"#,
        )
        .unwrap();
        assert_eq!(opts.request_timeout, Some(Duration::from_millis(250)));
        assert_eq!(
            opts.restart,
            RestartPolicy::Bounded {
                max_restarts: 3,
                backoff: Duration::from_millis(100),
            }
        );

        let back = serde_json::to_value(&opts).unwrap();
        assert_eq!(back["restart"]["backoff_ms"], 100);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(BridgeOptions::new("").validate().is_err());
        let zero = BridgeOptionsBuilder::new("x.db")
            .request_timeout(Duration::ZERO)
            .finish();
        assert!(matches!(zero.validate(), Err(BridgeError::ConfigError(_))));
        assert!(BridgeOptionsBuilder::new("x.db").finish().validate().is_ok());
    }
}
