//! Handler configuration.
//!
//! Wait timeouts and the conflict retry budget, loaded from environment
//! variables. Every value has a default so an empty environment is valid.

use crate::error::LifecycleError;
use std::time::Duration;

/// Default timeout for each wait step, in seconds.
pub const DEFAULT_WAIT_TIMEOUT_SECS: u64 = 300;

/// Default number of refetch-and-retry rounds on a write conflict.
pub const DEFAULT_CONFLICT_RETRIES: u32 = 3;

pub const ENV_CREATE_TIMEOUT: &str = "VM_CREATE_TIMEOUT_SECONDS";
pub const ENV_LEASE_TIMEOUT: &str = "VM_LEASE_TIMEOUT_SECONDS";
pub const ENV_DELETE_TIMEOUT: &str = "VM_DELETE_TIMEOUT_SECONDS";
pub const ENV_CONFLICT_RETRIES: &str = "VM_CONFLICT_RETRIES";

/// Timeouts and retry budget for lifecycle operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleConfig {
    /// How long create waits for the VM to report ready.
    pub create_timeout: Duration,
    /// How long create waits for every lease-waiting interface to get an address.
    pub lease_timeout: Duration,
    /// How long delete waits for the deletion event.
    pub delete_timeout: Duration,
    /// Refetch-and-retry rounds for version-checked writes.
    pub conflict_retries: u32,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            create_timeout: Duration::from_secs(DEFAULT_WAIT_TIMEOUT_SECS),
            lease_timeout: Duration::from_secs(DEFAULT_WAIT_TIMEOUT_SECS),
            delete_timeout: Duration::from_secs(DEFAULT_WAIT_TIMEOUT_SECS),
            conflict_retries: DEFAULT_CONFLICT_RETRIES,
        }
    }
}

impl LifecycleConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, LifecycleError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, LifecycleError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Ok(Self {
            create_timeout: seconds(&lookup, ENV_CREATE_TIMEOUT)?.unwrap_or(defaults.create_timeout),
            lease_timeout: seconds(&lookup, ENV_LEASE_TIMEOUT)?.unwrap_or(defaults.lease_timeout),
            delete_timeout: seconds(&lookup, ENV_DELETE_TIMEOUT)?.unwrap_or(defaults.delete_timeout),
            conflict_retries: parse(&lookup, ENV_CONFLICT_RETRIES)?.unwrap_or(defaults.conflict_retries),
        })
    }

    /// Same timeout for all three waits (used by tests).
    #[cfg(test)]
    pub fn with_timeouts(timeout: Duration) -> Self {
        Self {
            create_timeout: timeout,
            lease_timeout: timeout,
            delete_timeout: timeout,
            ..Self::default()
        }
    }
}

fn parse<F, T>(lookup: &F, key: &str) -> Result<Option<T>, LifecycleError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            LifecycleError::InvalidConfig(format!("{} must be a non-negative integer, got '{}'", key, raw))
        }),
    }
}

fn seconds<F>(lookup: &F, key: &str) -> Result<Option<Duration>, LifecycleError>
where
    F: Fn(&str) -> Option<String>,
{
    match parse::<F, u64>(lookup, key)? {
        Some(0) => Err(LifecycleError::InvalidConfig(format!("{} must be greater than zero", key))),
        other => Ok(other.map(Duration::from_secs)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = LifecycleConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config, LifecycleConfig::default());
        assert_eq!(config.create_timeout, Duration::from_secs(300));
        assert_eq!(config.conflict_retries, 3);
    }

    #[test]
    fn test_overrides() {
        let config = LifecycleConfig::from_lookup(lookup_from(&[
            (ENV_CREATE_TIMEOUT, "60"),
            (ENV_LEASE_TIMEOUT, " 120 "),
            (ENV_CONFLICT_RETRIES, "0"),
        ]))
        .unwrap();

        assert_eq!(config.create_timeout, Duration::from_secs(60));
        assert_eq!(config.lease_timeout, Duration::from_secs(120));
        assert_eq!(config.delete_timeout, Duration::from_secs(300));
        assert_eq!(config.conflict_retries, 0);
    }

    #[test]
    fn test_rejects_garbage_and_zero_timeouts() {
        let err = LifecycleConfig::from_lookup(lookup_from(&[(ENV_DELETE_TIMEOUT, "soon")])).unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidConfig(_)));

        let err = LifecycleConfig::from_lookup(lookup_from(&[(ENV_CREATE_TIMEOUT, "0")])).unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidConfig(_)));
    }
}
