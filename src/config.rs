use std::env;
use std::time::Duration;

pub(crate) const TRANSPORTER_ENV: &str = "MOLECULER_TRANSPORTER";
pub(crate) const NODE_ID_ENV: &str = "MOLECULER_NODE_ID";
pub(crate) const NAMESPACE_ENV: &str = "MOLECULER_NAMESPACE";
pub(crate) const HEARTBEAT_INTERVAL_ENV: &str = "MOLECULER_HEARTBEAT_INTERVAL";
pub(crate) const REQUEST_TIMEOUT_ENV: &str = "MOLECULER_REQUEST_TIMEOUT";

pub(crate) const DEFAULT_TRANSPORTER: &str = "nats://localhost:4222";
pub(crate) const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
pub(crate) const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Connection and timing configuration for a [`crate::Broker`].
///
/// Every field has a programmatic setter on [`crate::BrokerBuilder`]; the
/// `from_env` constructor reads the `MOLECULER_*` environment variables,
/// falling back to the documented defaults for anything unset or
/// unparsable.
#[derive(Clone, Debug)]
pub struct BrokerConfig {
    pub transporter: String,
    pub node_id: String,
    pub namespace: String,
    pub heartbeat_interval: Duration,
    pub request_timeout: Duration,
}

impl BrokerConfig {
    /// Builds a config from `MOLECULER_*` environment variables, defaulting
    /// the node id to `<hostname>-<short-uuid>` when unset.
    pub fn from_env() -> Self {
        Self {
            transporter: env::var(TRANSPORTER_ENV).unwrap_or_else(|_| DEFAULT_TRANSPORTER.into()),
            node_id: env::var(NODE_ID_ENV).unwrap_or_else(|_| default_node_id()),
            namespace: env::var(NAMESPACE_ENV).unwrap_or_default(),
            heartbeat_interval: env::var(HEARTBEAT_INTERVAL_ENV)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL),
            request_timeout: env::var(REQUEST_TIMEOUT_ENV)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            transporter: DEFAULT_TRANSPORTER.into(),
            node_id: default_node_id(),
            namespace: String::new(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

pub(crate) fn default_node_id() -> String {
    let host = hostname_guess();
    let short = uuid::Uuid::new_v4().simple().to_string();
    format!("{host}-{}", &short[..8])
}

fn hostname_guess() -> String {
    env::var("HOSTNAME")
        .or_else(|_| env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "node".to_string())
}
