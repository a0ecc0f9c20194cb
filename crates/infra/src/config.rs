//! Environment-driven configuration.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `BIND_ADDR` | `0.0.0.0:8080` |
//! | `USE_PERSISTENT_STORES` | `false` |
//! | `DATABASE_URL` | required when persistent |
//! | `REDIS_URL` | `redis://localhost:6379` |
//! | `JOURNAL_DELETION_QUEUE` | `journal.account-deletion` |
//! | `JOURNAL_MAX_DELIVERIES` | `5` |

use std::net::SocketAddr;

use thiserror::Error;

use journal_events::{ACCOUNT_DELETION_QUEUE, DEFAULT_MAX_DELIVERIES};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} is required when USE_PERSISTENT_STORES=true")]
    Missing { var: &'static str },

    #[error("invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub use_persistent_stores: bool,
    pub database_url: Option<String>,
    pub redis_url: String,
    pub deletion_queue: String,
    pub max_deliveries: u32,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build the config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let bind_addr = parse_or(&get, "BIND_ADDR", || SocketAddr::from(([0, 0, 0, 0], 8080)))?;
        let use_persistent_stores = parse_or(&get, "USE_PERSISTENT_STORES", || false)?;
        let max_deliveries: u32 = parse_or(&get, "JOURNAL_MAX_DELIVERIES", || DEFAULT_MAX_DELIVERIES)?;
        if max_deliveries == 0 {
            return Err(ConfigError::Invalid {
                var: "JOURNAL_MAX_DELIVERIES",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let database_url = get("DATABASE_URL");
        if use_persistent_stores && database_url.is_none() {
            return Err(ConfigError::Missing { var: "DATABASE_URL" });
        }

        Ok(Self {
            bind_addr,
            use_persistent_stores,
            database_url,
            redis_url: get("REDIS_URL").unwrap_or_else(|| "redis://localhost:6379".to_string()),
            deletion_queue: get("JOURNAL_DELETION_QUEUE")
                .unwrap_or_else(|| ACCOUNT_DELETION_QUEUE.to_string()),
            max_deliveries,
        })
    }
}

fn parse_or<T>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: impl FnOnce() -> T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match get(var) {
        None => Ok(default()),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
            value: raw,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let cfg = config(&[]).unwrap();

        assert_eq!(cfg.bind_addr, "0.0.0.0:8080".parse().unwrap());
        assert!(!cfg.use_persistent_stores);
        assert_eq!(cfg.database_url, None);
        assert_eq!(cfg.redis_url, "redis://localhost:6379");
        assert_eq!(cfg.deletion_queue, "journal.account-deletion");
        assert_eq!(cfg.max_deliveries, 5);
    }

    #[test]
    fn persistent_mode_requires_database_url() {
        let err = config(&[("USE_PERSISTENT_STORES", "true")]).unwrap_err();
        assert_eq!(err, ConfigError::Missing { var: "DATABASE_URL" });

        let cfg = config(&[
            ("USE_PERSISTENT_STORES", "true"),
            ("DATABASE_URL", "postgres://localhost/journal"),
        ])
        .unwrap();
        assert!(cfg.use_persistent_stores);
    }

    #[test]
    fn malformed_values_are_rejected() {
        for (var, value) in [
            ("BIND_ADDR", "nowhere"),
            ("USE_PERSISTENT_STORES", "maybe"),
            ("JOURNAL_MAX_DELIVERIES", "-1"),
            ("JOURNAL_MAX_DELIVERIES", "0"),
        ] {
            let err = config(&[(var, value)]).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid { var: v, .. } if v == var), "{var}={value}");
        }
    }
}
