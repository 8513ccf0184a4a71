//! Limits for the fuzz driver.

use std::path::PathBuf;

use web_time::Duration;

use crate::TurnsError;

/// Environment variable overriding [`FuzzConfig::max_steps`].
pub const ENV_MAX_STEPS: &str = "MAX_STEPS";
/// Environment variable overriding [`FuzzConfig::timeout`], in milliseconds.
pub const ENV_TIMEOUT: &str = "TIMEOUT";
/// Environment variable overriding [`FuzzConfig::max_errors`].
pub const ENV_MAX_ERRORS: &str = "MAX_ERRORS";
/// Environment variable setting [`FuzzConfig::crash_dir`].
pub const ENV_CRASH_DIR: &str = "CRASH_DIR";

/// Configuration for a [`FuzzDriver`](crate::FuzzDriver).
///
/// # Forward Compatibility
///
/// New fields may be added to this struct in future versions. Always use the
/// `..FuzzConfig::default()` pattern when constructing instances.
///
/// # Example
///
/// ```
/// use fortress_turns::FuzzConfig;
/// use web_time::Duration;
///
/// let config = FuzzConfig {
///     max_steps: 500,
///     timeout: Duration::from_secs(1),
///     ..FuzzConfig::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "FuzzConfig has no effect unless passed to FuzzDriver::new()"]
pub struct FuzzConfig {
    /// Accepted actions per run before reporting `MaxSteps`.
    ///
    /// Default: 2048
    pub max_steps: usize,

    /// Wall-clock budget per run before reporting `Timeout`.
    ///
    /// Default: 250ms
    pub timeout: Duration,

    /// Crashes after which the driver refuses to continue.
    ///
    /// Default: 100
    pub max_errors: usize,

    /// Where crash artifacts are written. `None` keeps them in memory only.
    ///
    /// Default: `None`
    pub crash_dir: Option<PathBuf>,

    /// Verbs the driver never plays.
    ///
    /// Default: `["undo", "ping"]`
    pub excluded_verbs: Vec<String>,
}

impl Default for FuzzConfig {
    fn default() -> Self {
        Self {
            max_steps: 2048,
            timeout: Duration::from_millis(250),
            max_errors: 100,
            crash_dir: None,
            excluded_verbs: vec!["undo".to_owned(), "ping".to_owned()],
        }
    }
}

impl FuzzConfig {
    /// Creates a new `FuzzConfig` with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Short runs for smoke tests and CI.
    pub fn quick() -> Self {
        Self {
            max_steps: 256,
            timeout: Duration::from_millis(50),
            max_errors: 10,
            ..Self::default()
        }
    }

    /// Long runs for overnight soak testing.
    pub fn thorough() -> Self {
        Self {
            max_steps: 16_384,
            timeout: Duration::from_secs(5),
            max_errors: 1000,
            ..Self::default()
        }
    }

    /// Defaults overridden by `MAX_STEPS`, `TIMEOUT` (ms), `MAX_ERRORS` and
    /// `CRASH_DIR`.
    ///
    /// # Errors
    ///
    /// Returns [`TurnsError::InvalidConfig`] for a variable that is set but
    /// not a number, or a result that does not validate.
    pub fn from_env() -> Result<Self, TurnsError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// [`from_env`](Self::from_env) with an injectable lookup.
    ///
    /// # Errors
    ///
    /// As [`from_env`](Self::from_env).
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, TurnsError> {
        let mut config = Self::default();
        if let Some(steps) = parse_var(&lookup, ENV_MAX_STEPS)? {
            config.max_steps = steps;
        }
        if let Some(millis) = parse_var(&lookup, ENV_TIMEOUT)? {
            config.timeout = Duration::from_millis(millis);
        }
        if let Some(errors) = parse_var(&lookup, ENV_MAX_ERRORS)? {
            config.max_errors = errors;
        }
        if let Some(dir) = lookup(ENV_CRASH_DIR).filter(|dir| !dir.is_empty()) {
            config.crash_dir = Some(PathBuf::from(dir));
        }
        config.validate()?;
        Ok(config)
    }

    /// Sets the crash artifact directory.
    pub fn with_crash_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.crash_dir = Some(dir.into());
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`TurnsError::InvalidConfig`] if `max_steps` or `max_errors`
    /// is zero, or `timeout` is zero.
    pub fn validate(&self) -> Result<(), TurnsError> {
        if self.max_steps == 0 {
            return Err(TurnsError::InvalidConfig {
                info: "max_steps must be at least 1".to_owned(),
            });
        }
        if self.max_errors == 0 {
            return Err(TurnsError::InvalidConfig {
                info: "max_errors must be at least 1".to_owned(),
            });
        }
        if self.timeout.is_zero() {
            return Err(TurnsError::InvalidConfig {
                info: "timeout must be non-zero".to_owned(),
            });
        }
        Ok(())
    }

    /// Returns `true` if the driver must not play `verb`.
    #[must_use]
    pub fn is_excluded(&self, verb: &str) -> bool {
        self.excluded_verbs.iter().any(|v| v == verb)
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>, TurnsError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|err| TurnsError::InvalidConfig {
                info: format!("{name} must be a non-negative integer, got {raw:?} ({err})"),
            }),
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn presets_validate() {
        assert!(FuzzConfig::default().validate().is_ok());
        assert!(FuzzConfig::quick().validate().is_ok());
        assert!(FuzzConfig::thorough().validate().is_ok());
        assert!(FuzzConfig::new().is_excluded("undo"));
        assert!(!FuzzConfig::new().is_excluded("move"));
    }

    #[test]
    fn env_overrides_defaults() {
        let config = FuzzConfig::from_vars(vars(&[
            ("MAX_STEPS", "5"),
            ("TIMEOUT", "1000"),
            ("MAX_ERRORS", "3"),
            ("CRASH_DIR", "/tmp/crashes"),
        ]))
        .unwrap();
        assert_eq!(config.max_steps, 5);
        assert_eq!(config.timeout, Duration::from_secs(1));
        assert_eq!(config.max_errors, 3);
        assert_eq!(config.crash_dir, Some(PathBuf::from("/tmp/crashes")));
    }

    #[test]
    fn unset_env_keeps_defaults() {
        assert_eq!(FuzzConfig::from_vars(vars(&[])).unwrap(), FuzzConfig::default());
    }

    #[test]
    fn garbage_env_is_rejected() {
        let err = FuzzConfig::from_vars(vars(&[("MAX_STEPS", "lots")])).unwrap_err();
        assert!(matches!(err, TurnsError::InvalidConfig { .. }));
        assert!(FuzzConfig::from_vars(vars(&[("MAX_ERRORS", "0")])).is_err());
    }
}
