use std::time::Duration;

use tracing::warn;

/// Signing policy knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningConfig {
    /// Most `manager` role accounts one corporation may hold per link.
    pub max_employee_managers: u64,
    pub verification_code_expiry: Duration,
    /// Wait limit for the serialization lock; `None` waits indefinitely.
    /// Lock providers built with `from_config` honor it.
    pub lock_timeout: Option<Duration>,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            max_employee_managers: 5,
            verification_code_expiry: Duration::from_secs(300),
            lock_timeout: None,
        }
    }
}

impl SigningConfig {
    /// Read overrides from the environment; unset or unparsable values keep
    /// their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            max_employee_managers: parse_var(&lookup, "CLA_MAX_EMPLOYEE_MANAGERS")
                .unwrap_or(defaults.max_employee_managers),
            verification_code_expiry: parse_var(&lookup, "CLA_VERIFICATION_CODE_EXPIRY_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.verification_code_expiry),
            lock_timeout: parse_var(&lookup, "CLA_LOCK_TIMEOUT_MS")
                .map(Duration::from_millis)
                .or(defaults.lock_timeout),
        }
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Option<T> {
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(name, value = %raw, "ignoring unparsable setting");
            None
        }
    }
}
