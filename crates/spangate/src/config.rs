//! Configuration for the spangate sidecar.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SidecarError, SidecarResult};

/// Sidecar configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SidecarConfig {
    /// HTTP server settings.
    pub server: ServerSettings,
    /// Remote Spanner settings.
    pub spanner: SpannerSettings,
    /// Tenant defaults applied when a path parameter is empty.
    pub defaults: TenantDefaults,
    /// Telemetry settings.
    pub telemetry: TelemetrySettings,
}

impl SidecarConfig {
    /// Create a new configuration builder.
    pub fn builder() -> SidecarConfigBuilder {
        SidecarConfigBuilder::default()
    }

    /// Load configuration from a TOML or JSON file.
    pub fn from_file(path: impl Into<PathBuf>) -> SidecarResult<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| SidecarError::config(format!("failed to read config file: {e}")))?;

        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");
        match extension {
            "toml" => toml::from_str(&content)
                .map_err(|e| SidecarError::config(format!("invalid TOML: {e}"))),
            "json" => serde_json::from_str(&content)
                .map_err(|e| SidecarError::config(format!("invalid JSON: {e}"))),
            _ => Err(SidecarError::config(format!(
                "unsupported config format: {extension}"
            ))),
        }
    }

    /// Apply environment variable overrides.
    ///
    /// Environment variables are prefixed with `SPANGATE_` and use uppercase
    /// `snake_case`. The tenant defaults (`SPANGATE_PROJECT_ID` and friends)
    /// are read once at process start; they act as fallbacks for empty path
    /// parameters, never as overrides of an explicit request value.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(port) = std::env::var("SPANGATE_LISTEN_PORT") {
            if let Ok(port) = port.parse() {
                self.server.listen_port = port;
            }
        }

        if let Ok(endpoint) = std::env::var("SPANGATE_SPANNER_ENDPOINT") {
            self.spanner.endpoint = endpoint;
        }

        if let Ok(project) = std::env::var("SPANGATE_PROJECT_ID") {
            self.defaults.project_id = project;
        }

        if let Ok(instance) = std::env::var("SPANGATE_INSTANCE_ID") {
            self.defaults.instance_id = instance;
        }

        if let Ok(database) = std::env::var("SPANGATE_DATABASE_ID") {
            self.defaults.database_id = database;
        }

        if let Ok(timeout) = std::env::var("SPANGATE_PROBE_TIMEOUT_MS") {
            if let Ok(millis) = timeout.parse::<u64>() {
                self.spanner.probe_timeout = Duration::from_millis(millis);
            }
        }

        if let Ok(timeout) = std::env::var("SPANGATE_FORWARD_TIMEOUT") {
            if let Ok(secs) = timeout.parse::<u64>() {
                self.spanner.forward_timeout = Duration::from_secs(secs);
            }
        }

        if let Ok(level) = std::env::var("SPANGATE_LOG_LEVEL") {
            self.telemetry.log_level = level;
        }

        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> SidecarResult<()> {
        if self.spanner.endpoint.is_empty() {
            return Err(SidecarError::config("spanner.endpoint is required"));
        }

        if !self.spanner.endpoint.starts_with("http://")
            && !self.spanner.endpoint.starts_with("https://")
        {
            return Err(SidecarError::config(
                "spanner.endpoint must start with http:// or https://",
            ));
        }

        if self.spanner.probe_timeout.is_zero() {
            return Err(SidecarError::config("spanner.probe_timeout must be non-zero"));
        }

        Ok(())
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Address to bind to.
    pub listen_addr: String,
    /// Port the sidecar listens on.
    pub listen_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0".to_string(),
            listen_port: 8080,
        }
    }
}

/// Remote Spanner settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpannerSettings {
    /// Base URL of the Spanner API surface the sidecar talks to.
    pub endpoint: String,
    /// Value of the `x-grpc-proxy-endpoint` header: the upstream endpoint the
    /// proxy in front of us should dial.
    pub proxy_endpoint: String,
    /// Value of the `x-grpc-proxy-project` header: the project the proxy
    /// itself runs under.
    pub proxy_project: String,
    /// Hard timeout for the readiness probe.
    #[serde(with = "duration_serde")]
    pub probe_timeout: Duration,
    /// Timeout for forwarded calls.
    #[serde(with = "duration_serde")]
    pub forward_timeout: Duration,
}

impl Default for SpannerSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9020".to_string(),
            proxy_endpoint: "spanner.googleapis.com:443".to_string(),
            proxy_project: String::new(),
            probe_timeout: Duration::from_millis(1500),
            forward_timeout: Duration::from_secs(30),
        }
    }
}

/// Tenant defaults, normally sourced from the environment at process start.
///
/// Each field fills in for an *empty* path parameter on `/init`, `/test` and
/// `/listInstances`; an explicit parameter always wins.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantDefaults {
    /// Default tenant project id.
    pub project_id: String,
    /// Default instance id.
    pub instance_id: String,
    /// Default database id.
    pub database_id: String,
}

/// Telemetry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    /// Service name for logging.
    pub service_name: String,
    /// Default log level when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            service_name: "spangate".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Builder for `SidecarConfig`.
#[derive(Debug, Default)]
pub struct SidecarConfigBuilder {
    config: SidecarConfig,
}

impl SidecarConfigBuilder {
    /// Set the listen port.
    #[must_use]
    pub fn listen_port(mut self, port: u16) -> Self {
        self.config.server.listen_port = port;
        self
    }

    /// Set the listen address.
    #[must_use]
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.server.listen_addr = addr.into();
        self
    }

    /// Set the Spanner endpoint.
    #[must_use]
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.spanner.endpoint = endpoint.into();
        self
    }

    /// Set the proxy project.
    #[must_use]
    pub fn proxy_project(mut self, project: impl Into<String>) -> Self {
        self.config.spanner.proxy_project = project.into();
        self
    }

    /// Set the readiness probe timeout.
    #[must_use]
    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.config.spanner.probe_timeout = timeout;
        self
    }

    /// Set the forward timeout.
    #[must_use]
    pub fn forward_timeout(mut self, timeout: Duration) -> Self {
        self.config.spanner.forward_timeout = timeout;
        self
    }

    /// Set the tenant defaults.
    #[must_use]
    pub fn defaults(
        mut self,
        project: impl Into<String>,
        instance: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        self.config.defaults.project_id = project.into();
        self.config.defaults.instance_id = instance.into();
        self.config.defaults.database_id = database.into();
        self
    }

    /// Build the configuration.
    pub fn build(self) -> SidecarResult<SidecarConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Duration (de)serialization accepting `1500ms`, `30s`, `5m` or bare seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = if duration.subsec_millis() == 0 {
            format!("{}s", duration.as_secs())
        } else {
            format!("{}ms", duration.as_millis())
        };
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        let (number, unit): (&str, fn(u64) -> Duration) =
            if let Some(stripped) = s.strip_suffix("ms") {
                (stripped, Duration::from_millis)
            } else if let Some(stripped) = s.strip_suffix('s') {
                (stripped, Duration::from_secs)
            } else if let Some(stripped) = s.strip_suffix('m') {
                (stripped, |n| Duration::from_secs(n * 60))
            } else {
                (s, Duration::from_secs)
            };

        number
            .trim()
            .parse()
            .map(unit)
            .map_err(|_| format!("invalid duration: {s}"))
    }
}
