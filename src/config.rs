use std::{fmt, num::ParseIntError, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(2000);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_WORKER_THREADS: usize = 5;

static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// How many times a stream may retry before giving up
///
/// Deserializes from a signed integer: any negative value means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum MaxRetries {
    #[default]
    Unlimited,
    Limited(u32),
}

impl From<i64> for MaxRetries {
    fn from(value: i64) -> Self {
        match u32::try_from(value) {
            Ok(n) => MaxRetries::Limited(n),
            Err(_) if value > 0 => MaxRetries::Limited(u32::MAX),
            Err(_) => MaxRetries::Unlimited,
        }
    }
}

impl From<i32> for MaxRetries {
    fn from(value: i32) -> Self {
        i64::from(value).into()
    }
}

impl From<MaxRetries> for i64 {
    fn from(value: MaxRetries) -> Self {
        match value {
            MaxRetries::Unlimited => -1,
            MaxRetries::Limited(n) => i64::from(n),
        }
    }
}

impl FromStr for MaxRetries {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unlimited" => Ok(MaxRetries::Unlimited),
            s => s.parse::<i64>().map(MaxRetries::from),
        }
    }
}

impl fmt::Display for MaxRetries {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaxRetries::Unlimited => f.write_str("unlimited"),
            MaxRetries::Limited(n) => write!(f, "{n}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    #[serde(rename = "retry_interval_ms", with = "duration_ms")]
    pub retry_interval: Duration,
    pub max_retries: MaxRetries,
    pub auto_reconnect: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retry_interval: DEFAULT_RETRY_INTERVAL,
            max_retries: MaxRetries::Unlimited,
            auto_reconnect: true,
        }
    }
}

impl RetryConfig {
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn max_retries(mut self, max_retries: impl Into<MaxRetries>) -> Self {
        self.max_retries = max_retries.into();
        self
    }

    pub fn auto_reconnect(mut self, auto_reconnect: bool) -> Self {
        self.auto_reconnect = auto_reconnect;
        self
    }
}

/// Settings for the worker pool and HTTP client shared by every stream of a
/// [`StreamClient`](crate::StreamClient)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    pub worker_threads: usize,
    pub thread_name: String,
    #[serde(rename = "connect_timeout_ms", with = "duration_ms")]
    pub connect_timeout: Duration,
    #[serde(rename = "read_timeout_ms", with = "duration_ms")]
    pub read_timeout: Duration,
    /// How long `shutdown()` lets close frames drain before the pool stops
    #[serde(rename = "shutdown_grace_ms", with = "duration_ms")]
    pub shutdown_grace: Duration,
    pub tcp_nodelay: bool,
    pub user_agent: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            worker_threads: DEFAULT_WORKER_THREADS,
            thread_name: "stream-client-worker".to_owned(),
            connect_timeout: Duration::from_secs(10),
            read_timeout: DEFAULT_READ_TIMEOUT,
            shutdown_grace: Duration::from_secs(1),
            tcp_nodelay: true,
            user_agent: APP_USER_AGENT.to_owned(),
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_max_retries_is_unlimited() {
        assert_eq!(MaxRetries::from(-1), MaxRetries::Unlimited);
        assert_eq!(MaxRetries::from(-42i64), MaxRetries::Unlimited);
        assert_eq!(MaxRetries::from(0), MaxRetries::Limited(0));
        assert_eq!("3".parse::<MaxRetries>().unwrap(), MaxRetries::Limited(3));
        assert_eq!("unlimited".parse::<MaxRetries>().unwrap(), MaxRetries::Unlimited);
    }

    #[test]
    fn retry_config_from_json() {
        let config: RetryConfig =
            serde_json::from_str(r#"{"retry_interval_ms": 100, "max_retries": -1}"#).unwrap();
        assert_eq!(config.retry_interval, Duration::from_millis(100));
        assert_eq!(config.max_retries, MaxRetries::Unlimited);
        assert!(config.auto_reconnect);
    }

    #[test]
    fn client_options_defaults() {
        let options: ClientOptions = serde_json::from_str(r#"{"worker_threads": 2}"#).unwrap();
        assert_eq!(options.worker_threads, 2);
        assert_eq!(options.read_timeout, DEFAULT_READ_TIMEOUT);
        assert_eq!(options.thread_name, "stream-client-worker");
    }
}
