//! Immutable configuration records.
//!
//! Every component receives its configuration at construction; nothing
//! reads the environment after startup. Defaults follow the documented
//! endpoint map (ports 5555 to 5565) and can be overridden per name
//! through the environment, with a few of them also exposed as CLI flags.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::SiteId;

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

/// Execution mode of the central coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CcMode {
    Serial,
    Threaded,
}

impl fmt::Display for CcMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CcMode::Serial => f.write_str("serial"),
            CcMode::Threaded => f.write_str("threaded"),
        }
    }
}

impl FromStr for CcMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "serial" => Ok(CcMode::Serial),
            "threaded" => Ok(CcMode::Threaded),
            other => Err(format!("unknown coordinator mode: {other}")),
        }
    }
}

/// Configuration of the storage site process (storage manager, operation
/// log, replication, and health).
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub node_id: SiteId,
    /// Request/reply endpoint the actors connect to.
    pub rep_bind: String,
    /// Outbound replication endpoint the peer subscribes to.
    pub repl_pub_bind: String,
    /// The peer's outbound replication endpoint.
    pub repl_sub_connect: String,
    pub health_rep_bind: String,
    pub heartbeat_pub_bind: String,
    pub heartbeat_interval: Duration,
    pub snapshot_interval_ops: u64,
    pub retain_last_n: usize,
    pub loan_duration_days: i64,
    pub max_renewals: u8,
}

impl StorageConfig {
    pub fn from_env() -> Self {
        Self {
            data_dir: PathBuf::from(env_or("SM_DATA_DIR", "./data/siteA")),
            node_id: env_parse("SM_NODE_ID", SiteId::A),
            rep_bind: env_or("SM_REP_BIND", "0.0.0.0:5560"),
            repl_pub_bind: env_or("REPL_PUB_BIND", "0.0.0.0:5562"),
            repl_sub_connect: env_or("REPL_SUB_CONNECT", "127.0.0.1:5563"),
            health_rep_bind: env_or("HEALTH_REP_BIND", "0.0.0.0:5564"),
            heartbeat_pub_bind: env_or("HB_PUB_BIND", "0.0.0.0:5565"),
            heartbeat_interval: Duration::from_millis(env_parse("HEARTBEAT_INTERVAL_MS", 2000)),
            snapshot_interval_ops: env_parse("SNAPSHOT_INTERVAL_OPS", 500),
            retain_last_n: env_parse("OL_RETAIN_LAST_N", 1000),
            loan_duration_days: env_parse("LOAN_DURATION_DAYS", 14),
            max_renewals: env_parse("MAX_RENEWALS", 2),
        }
    }
}

/// Configuration of the central coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Client-facing request/reply endpoint.
    pub client_bind: String,
    /// Topic publication endpoint the async actors subscribe to.
    pub pub_bind: String,
    /// The loan actor's request/reply endpoint.
    pub loan_connect: String,
    pub mode: CcMode,
    pub workers: usize,
    pub renew_duration_days: i64,
}

impl CoordinatorConfig {
    pub fn from_env() -> Self {
        let mode = env_or("CC_MODE", "serial")
            .parse()
            .unwrap_or(CcMode::Serial);
        Self {
            client_bind: env_or("CC_CLIENT_BIND", "0.0.0.0:5555"),
            pub_bind: env_or("CC_PUB_BIND", "0.0.0.0:5556"),
            loan_connect: env_or("LOAN_REP_CONNECT", "127.0.0.1:5557"),
            mode,
            workers: env_parse("CC_WORKERS", 8),
            renew_duration_days: env_parse("RENEW_DURATION_DAYS", 7),
        }
    }
}

/// Configuration of the loan actor.
#[derive(Debug, Clone)]
pub struct LoanActorConfig {
    pub rep_bind: String,
    pub sm_connect: String,
}

impl LoanActorConfig {
    pub fn from_env() -> Self {
        Self {
            rep_bind: env_or("LOAN_REP_BIND", "0.0.0.0:5557"),
            sm_connect: env_or("SM_REP_CONNECT", "127.0.0.1:5560"),
        }
    }
}

/// Configuration of a topic-consuming actor (renew, return).
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// The coordinator's publication endpoint.
    pub pub_connect: String,
    pub sm_connect: String,
}

impl ConsumerConfig {
    pub fn from_env() -> Self {
        Self {
            pub_connect: env_or("CC_PUB_CONNECT", "127.0.0.1:5556"),
            sm_connect: env_or("SM_REP_CONNECT", "127.0.0.1:5560"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cc_mode_parses_both_modes() {
        assert_eq!("serial".parse::<CcMode>().unwrap(), CcMode::Serial);
        assert_eq!("threaded".parse::<CcMode>().unwrap(), CcMode::Threaded);
        assert!("parallel".parse::<CcMode>().is_err());
    }

    #[test]
    fn test_storage_defaults_match_endpoint_map() {
        let config = StorageConfig::from_env();
        assert!(config.rep_bind.ends_with("5560"));
        assert!(config.repl_pub_bind.ends_with("5562"));
        assert_eq!(config.heartbeat_interval, Duration::from_millis(2000));
        assert_eq!(config.snapshot_interval_ops, 500);
        assert_eq!(config.retain_last_n, 1000);
        assert_eq!(config.max_renewals, 2);
    }
}
