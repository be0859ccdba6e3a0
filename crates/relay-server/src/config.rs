//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (RELAY_*)
//! - TOML configuration file

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Plain HTTP port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Secondary TLS listener.
    #[serde(default)]
    pub tls: TlsConfig,

    /// Command bridging.
    #[serde(default)]
    pub bridge: BridgeSettings,

    /// Passive listener streams.
    #[serde(default)]
    pub listeners: ListenerConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// TLS listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Serve the secondary TLS port.
    #[serde(default = "default_tls_enabled")]
    pub enabled: bool,

    /// TLS port.
    #[serde(default = "default_tls_port")]
    pub port: u16,

    /// PEM certificate chain.
    #[serde(default = "default_cert_path")]
    pub cert_path: Option<PathBuf>,

    /// PEM private key.
    #[serde(default = "default_key_path")]
    pub key_path: Option<PathBuf>,
}

/// Command bridging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeSettings {
    /// How long a command waits for a peer callback, in milliseconds.
    #[serde(default = "default_callback_timeout")]
    pub callback_timeout_ms: u64,
}

/// Passive listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Keep-alive interval in milliseconds.
    #[serde(default = "default_ping_interval")]
    pub ping_interval_ms: u64,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum peer frame size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

// Default value functions
fn default_host() -> String {
    std::env::var("RELAY_HOST").unwrap_or_else(|_| "0.0.0.0".to_string())
}

fn default_port() -> u16 {
    env_parse("RELAY_HTTP_PORT").unwrap_or(80)
}

fn default_tls_enabled() -> bool {
    std::env::var("RELAY_USE_HTTPS").map_or(false, |v| v == "true")
}

fn default_tls_port() -> u16 {
    env_parse("RELAY_HTTPS_PORT").unwrap_or(443)
}

fn default_cert_path() -> Option<PathBuf> {
    std::env::var_os("RELAY_SSL_CERT_PATH").map(PathBuf::from)
}

fn default_key_path() -> Option<PathBuf> {
    std::env::var_os("RELAY_SSL_KEY_PATH").map(PathBuf::from)
}

fn default_callback_timeout() -> u64 {
    env_parse("RELAY_CALLBACK_TIMEOUT").unwrap_or(5_000)
}

fn default_ping_interval() -> u64 {
    env_parse("RELAY_SSE_PING_INTERVAL").unwrap_or(60_000)
}

fn default_max_message_size() -> usize {
    100 * 1024 // 100 KB
}

fn default_true() -> bool {
    true
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            tls: TlsConfig::default(),
            bridge: BridgeSettings::default(),
            listeners: ListenerConfig::default(),
            limits: LimitsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: default_tls_enabled(),
            port: default_tls_port(),
            cert_path: default_cert_path(),
            key_path: default_key_path(),
        }
    }
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            callback_timeout_ms: default_callback_timeout(),
        }
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            ping_interval_ms: default_ping_interval(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl TlsConfig {
    /// Certificate and key paths, when TLS is enabled and both are set.
    #[must_use]
    pub fn pem_files(&self) -> Option<(&Path, &Path)> {
        if !self.enabled {
            return None;
        }
        Some((self.cert_path.as_deref()?, self.key_path.as_deref()?))
    }
}

impl BridgeSettings {
    /// The callback timeout.
    #[must_use]
    pub fn callback_timeout(&self) -> Duration {
        Duration::from_millis(self.callback_timeout_ms)
    }
}

impl ListenerConfig {
    /// The keep-alive interval.
    #[must_use]
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms.max(1))
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "relay.toml",
            "/etc/relay/relay.toml",
            "~/.config/relay/relay.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the plain HTTP socket address.
    ///
    /// # Errors
    ///
    /// Returns an error if the host is not a valid IP address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        socket_addr(&self.host, self.port)
    }

    /// Get the TLS socket address.
    ///
    /// # Errors
    ///
    /// Returns an error if the host is not a valid IP address.
    pub fn tls_bind_addr(&self) -> Result<SocketAddr> {
        socket_addr(&self.host, self.tls.port)
    }
}

fn socket_addr(host: &str, port: u16) -> Result<SocketAddr> {
    format!("{host}:{port}")
        .parse()
        .with_context(|| format!("Invalid host:port {host}:{port}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "127.0.0.1"
            port = 9000

            [tls]
            enabled = true
            port = 9443
            cert_path = "/certs/cert.pem"
            key_path = "/certs/key.pem"

            [bridge]
            callback_timeout_ms = 2500

            [listeners]
            ping_interval_ms = 15000
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9000);
        assert_eq!(config.bridge.callback_timeout(), Duration::from_millis(2500));
        assert_eq!(config.listeners.ping_interval(), Duration::from_secs(15));
        assert_eq!(
            config.tls.pem_files(),
            Some((Path::new("/certs/cert.pem"), Path::new("/certs/key.pem")))
        );
        assert_eq!(config.tls_bind_addr().unwrap().port(), 9443);
    }

    #[test]
    fn test_config_bind_addr() {
        let toml_str = r#"
            host = "127.0.0.1"
            port = 8080
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.bind_addr().unwrap().port(), 8080);

        let config: Config = toml::from_str(r#"host = "not a host""#).unwrap();
        assert!(config.bind_addr().is_err());
    }

    #[test]
    fn test_tls_requires_both_paths() {
        let tls = TlsConfig {
            enabled: true,
            port: 443,
            cert_path: Some("/certs/cert.pem".into()),
            key_path: None,
        };
        assert!(tls.pem_files().is_none());

        let tls = TlsConfig {
            enabled: false,
            key_path: Some("/certs/key.pem".into()),
            ..tls
        };
        assert!(tls.pem_files().is_none());
    }

    #[test]
    fn test_limits_default() {
        assert_eq!(LimitsConfig::default().max_message_size, 100 * 1024);
        assert!(MetricsConfig::default().enabled);
    }
}
