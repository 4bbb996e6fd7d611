use crate::extract::DEFAULT_MAX_BODY_SIZE;
use serde::Deserialize;
use std::time::Duration;

/// Limits shared by the pipeline and the transport.
///
/// Every field has a default, so a partial document is enough:
/// ```
/// use micro_api::Config;
///
/// let config = Config::from_json_str(r#"{"max_body_size": 1024}"#).unwrap();
/// assert_eq!(config.max_body_size(), 1024);
/// assert_eq!(config.read_timeout().as_secs(), 60);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    max_body_size: usize,
    read_timeout_ms: u64,
    drain_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self { max_body_size: DEFAULT_MAX_BODY_SIZE, read_timeout_ms: 60_000, drain_timeout_ms: 30_000 }
    }
}

impl Config {
    pub fn from_json_str(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    #[must_use]
    pub fn with_max_body_size(mut self, max_body_size: usize) -> Self {
        self.max_body_size = max_body_size;
        self
    }

    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout_ms = millis(timeout);
        self
    }

    #[must_use]
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout_ms = millis(timeout);
        self
    }

    /// Largest accepted request body, in bytes
    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }

    /// Upper bound for reading one request body
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// How long shutdown waits for in-flight connections
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

fn millis(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.max_body_size(), 20 * 1024 * 1024);
        assert_eq!(config.read_timeout(), Duration::from_secs(60));
        assert_eq!(config.drain_timeout(), Duration::from_secs(30));
        assert_eq!(Config::from_json_str("{}").unwrap(), config);
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_json_str(r#"{"read_timeout_ms": 5000, "drain_timeout_ms": 1000}"#).unwrap();
        assert_eq!(config.read_timeout(), Duration::from_secs(5));
        assert_eq!(config.drain_timeout(), Duration::from_secs(1));

        let config = Config::default().with_max_body_size(16).with_read_timeout(Duration::from_secs(2));
        assert_eq!(config.max_body_size(), 16);
        assert_eq!(config.read_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        assert!(Config::from_json_str(r#"{"max_body": 1}"#).is_err());
    }

    #[test]
    fn test_sub_second_timeouts_are_kept() {
        let config = Config::default().with_read_timeout(Duration::from_millis(500)).with_drain_timeout(Duration::from_millis(250));
        assert_eq!(config.read_timeout(), Duration::from_millis(500));
        assert_eq!(config.drain_timeout(), Duration::from_millis(250));

        let config = Config::from_json_str(r#"{"read_timeout_ms": 1500}"#).unwrap();
        assert_eq!(config.read_timeout(), Duration::from_millis(1500));
    }
}
