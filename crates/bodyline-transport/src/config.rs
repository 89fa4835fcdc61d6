//! Client configuration.
//!
//! A [`ClientConfig`] can be built in code with the `with_*` methods or
//! loaded from TOML:
//!
//! ```toml
//! [client]
//! user_agent = "mirror/1.2"
//! connect_timeout = "5s"
//! timeout = "30s"
//! read_timeout = "2m"
//! upload_capacity = 16
//! download_capacity = 8
//! http2_only = false
//! pool_idle_timeout = "90s"
//! max_idle_per_host = 32
//!
//! [client.headers]
//! accept = "application/octet-stream"
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use bodyline_bridge::DEFAULT_CAPACITY;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};

pub const DEFAULT_USER_AGENT: &str = concat!("bodyline/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub user_agent: String,
    pub connect_timeout: Option<Duration>,
    /// Deadline for sending the request and receiving the response head.
    pub timeout: Option<Duration>,
    /// Deadline for buffered body reads (`bytes`, `text`, `json`).
    pub read_timeout: Option<Duration>,
    pub upload_capacity: usize,
    pub download_capacity: usize,
    pub http2_only: bool,
    pub pool_idle_timeout: Option<Duration>,
    pub max_idle_per_host: usize,
    pub default_headers: HeaderMap,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            connect_timeout: Some(Duration::from_secs(10)),
            timeout: None,
            read_timeout: None,
            upload_capacity: DEFAULT_CAPACITY,
            download_capacity: DEFAULT_CAPACITY,
            http2_only: false,
            pool_idle_timeout: Some(Duration::from_secs(90)),
            max_idle_per_host: 32,
            default_headers: HeaderMap::new(),
        }
    }
}

/// On-disk form of the configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub client: ClientSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientSection {
    pub user_agent: Option<String>,
    pub connect_timeout: Option<String>,
    pub timeout: Option<String>,
    pub read_timeout: Option<String>,
    pub upload_capacity: Option<usize>,
    pub download_capacity: Option<usize>,
    pub http2_only: Option<bool>,
    pub pool_idle_timeout: Option<String>,
    pub max_idle_per_host: Option<usize>,
    pub headers: Option<BTreeMap<String, String>>,
}

impl ClientConfig {
    pub fn from_file(path: impl AsRef<Path>) -> ClientResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ClientError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ClientResult<Self> {
        let file: ConfigFile =
            toml::from_str(content).map_err(|e| ClientError::Config(e.to_string()))?;
        Self::default().merge(file.client)
    }

    /// Overlay the values present in `section` onto this config.
    pub fn merge(mut self, section: ClientSection) -> ClientResult<Self> {
        if let Some(user_agent) = section.user_agent {
            self.user_agent = user_agent;
        }
        if let Some(value) = section.connect_timeout {
            self.connect_timeout = Some(duration_field("connect_timeout", &value)?);
        }
        if let Some(value) = section.timeout {
            self.timeout = Some(duration_field("timeout", &value)?);
        }
        if let Some(value) = section.read_timeout {
            self.read_timeout = Some(duration_field("read_timeout", &value)?);
        }
        if let Some(value) = section.pool_idle_timeout {
            self.pool_idle_timeout = Some(duration_field("pool_idle_timeout", &value)?);
        }
        if let Some(capacity) = section.upload_capacity {
            self.upload_capacity = capacity;
        }
        if let Some(capacity) = section.download_capacity {
            self.download_capacity = capacity;
        }
        if let Some(http2_only) = section.http2_only {
            self.http2_only = http2_only;
        }
        if let Some(max_idle) = section.max_idle_per_host {
            self.max_idle_per_host = max_idle;
        }
        for (name, value) in section.headers.unwrap_or_default() {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ClientError::Config(format!("header name `{name}`: {e}")))?;
            let value = HeaderValue::from_str(&value)
                .map_err(|e| ClientError::Config(format!("header `{name}`: {e}")))?;
            self.default_headers.insert(name, value);
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> ClientResult<()> {
        if self.upload_capacity == 0 {
            return Err(ClientError::Config("upload_capacity must be at least 1".into()));
        }
        if self.download_capacity == 0 {
            return Err(ClientError::Config("download_capacity must be at least 1".into()));
        }
        Ok(())
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: impl Into<Option<Duration>>) -> Self {
        self.connect_timeout = timeout.into();
        self
    }

    pub fn with_timeout(mut self, timeout: impl Into<Option<Duration>>) -> Self {
        self.timeout = timeout.into();
        self
    }

    pub fn with_read_timeout(mut self, timeout: impl Into<Option<Duration>>) -> Self {
        self.read_timeout = timeout.into();
        self
    }

    pub fn with_upload_capacity(mut self, capacity: usize) -> Self {
        self.upload_capacity = capacity;
        self
    }

    pub fn with_download_capacity(mut self, capacity: usize) -> Self {
        self.download_capacity = capacity;
        self
    }

    pub fn with_http2_only(mut self, enabled: bool) -> Self {
        self.http2_only = enabled;
        self
    }

    pub fn with_pool_idle_timeout(mut self, timeout: impl Into<Option<Duration>>) -> Self {
        self.pool_idle_timeout = timeout.into();
        self
    }

    pub fn with_max_idle_per_host(mut self, max: usize) -> Self {
        self.max_idle_per_host = max;
        self
    }

    pub fn with_default_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.default_headers.insert(name, value);
        self
    }
}

fn duration_field(field: &str, value: &str) -> ClientResult<Duration> {
    parse_duration(value)
        .ok_or_else(|| ClientError::Config(format!("invalid duration for `{field}`: {value:?}")))
}

/// Parse a duration string like "5s", "500ms", "2m". A bare number is
/// taken as seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.trim().parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.trim().parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim().parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("10"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration("soon"), None);
    }

    #[test]
    fn defaults_are_valid() {
        let config = ClientConfig::default();
        config.validate().unwrap();
        assert_eq!(config.download_capacity, 8);
        assert!(config.user_agent.starts_with("bodyline/"));
        assert_eq!(config.timeout, None);
    }

    #[test]
    fn empty_file_keeps_defaults() {
        let config = ClientConfig::from_toml_str("").unwrap();
        assert_eq!(config.upload_capacity, DEFAULT_CAPACITY);
        assert_eq!(config.connect_timeout, Some(Duration::from_secs(10)));
    }

    #[test]
    fn file_values_override_defaults() {
        let config = ClientConfig::from_toml_str(
            r#"
            [client]
            user_agent = "mirror/1.2"
            timeout = "30s"
            read_timeout = "2m"
            upload_capacity = 16
            http2_only = true

            [client.headers]
            accept = "application/octet-stream"
            "#,
        )
        .unwrap();

        assert_eq!(config.user_agent, "mirror/1.2");
        assert_eq!(config.timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.read_timeout, Some(Duration::from_secs(120)));
        assert_eq!(config.upload_capacity, 16);
        assert!(config.http2_only);
        assert_eq!(
            config.default_headers.get("accept").unwrap(),
            "application/octet-stream"
        );
    }

    #[test]
    fn bad_duration_names_the_field() {
        let err = ClientConfig::from_toml_str("[client]\ntimeout = \"soon\"").unwrap_err();
        assert_eq!(
            err,
            ClientError::Config("invalid duration for `timeout`: \"soon\"".into())
        );
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let err = ClientConfig::from_toml_str("[client]\ndownload_capacity = 0").unwrap_err();
        assert!(err.is_builder());
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = ClientConfig::from_file("/nonexistent/bodyline.toml").unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
    }
}
