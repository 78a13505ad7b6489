//! Configuration management

use crate::router::RouterConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use serde::{Deserialize, Serialize};
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Serve nodes, forwarding hop and retry budget
    pub router: RouterConfig,
    /// Server certificate for TLS listeners
    pub tls: TlsSection,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, crate::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), crate::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::Error::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| crate::Error::Config(format!("Failed to write config: {}", e)))
    }
}

/// Server-side TLS material (PEM files)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsSection {
    /// Certificate chain path
    pub cert: Option<String>,
    /// Private key path
    pub key: Option<String>,
}

impl TlsSection {
    /// Build the server TLS config, or `None` when no certificate is configured
    pub fn load_server_config(&self) -> Result<Option<Arc<rustls::ServerConfig>>, crate::Error> {
        let (cert_path, key_path) = match (&self.cert, &self.key) {
            (Some(cert), Some(key)) => (cert, key),
            (None, None) => return Ok(None),
            _ => {
                return Err(crate::Error::Config(
                    "tls.cert and tls.key must be set together".to_string(),
                ))
            }
        };

        let certs = load_certs(cert_path)?;
        let key = load_private_key(key_path)?;

        let config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| crate::Error::Config(format!("Failed to build TLS server config: {}", e)))?;

        info!("TLS certificate loaded from {}", cert_path);
        Ok(Some(Arc::new(config)))
    }
}

fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>, crate::Error> {
    let file = std::fs::File::open(path)
        .map_err(|e| crate::Error::Config(format!("Failed to open cert file {}: {}", path, e)))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| crate::Error::Config(format!("Failed to parse PEM certificates: {}", e)))?;

    if certs.is_empty() {
        return Err(crate::Error::Config(format!("No certificates found in {}", path)));
    }
    Ok(certs)
}

fn load_private_key(path: &str) -> Result<PrivateKeyDer<'static>, crate::Error> {
    let file = std::fs::File::open(path)
        .map_err(|e| crate::Error::Config(format!("Failed to open key file {}: {}", path, e)))?;

    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| crate::Error::Config(format!("Failed to parse PEM private key: {}", e)))?
        .ok_or_else(|| crate::Error::Config(format!("No private key found in {}", path)))
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (pretty, compact, full)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Output format; unknown names fall back to the full formatter
    pub fn log_format(&self) -> LogFormat {
        match self.format.to_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Full,
        }
    }
}

/// `tracing-subscriber` formatter selected by `logging.format`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Compact,
    Full,
}

/// Generate example configuration
pub fn generate_example_config() -> Config {
    Config {
        router: RouterConfig {
            serve_nodes: vec![
                "tcp://:10800?target=127.0.0.1:22".to_string(),
                "tun://:8421/10.233.0.1:8421?net=223.254.0.100/16&route=10.0.0.0/8".to_string(),
            ],
            chain_node: Some("tcp+tls://10.233.0.1:10800?sni=hop.example".to_string()),
            ..Default::default()
        },
        tls: TlsSection {
            cert: Some("cert.pem".to_string()),
            key: Some("key.pem".to_string()),
        },
        logging: LoggingConfig::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::TlsPolicy;

    #[test]
    fn test_example_config_round_trip() {
        let config = generate_example_config();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();

        assert_eq!(parsed.router, config.router);
        assert_eq!(parsed.tls, config.tls);
        assert_eq!(parsed.logging.level, "info");
    }

    #[test]
    fn test_sections_default() {
        let config: Config = toml::from_str(
            r#"
            [router]
            serve_nodes = ["tcp://:8080"]
            tls_policy = "required"
            "#,
        )
        .unwrap();

        assert_eq!(config.router.serve_nodes, vec!["tcp://:8080"]);
        assert_eq!(config.router.retries, crate::router::DEFAULT_RETRIES);
        assert_eq!(config.router.tls_policy, TlsPolicy::Required);
        assert!(config.router.chain_node.is_none());
        assert!(config.tls.load_server_config().unwrap().is_none());
    }

    #[test]
    fn test_log_format_names() {
        let mut logging = LoggingConfig::default();
        assert_eq!(logging.log_format(), LogFormat::Pretty);

        logging.format = "compact".to_string();
        assert_eq!(logging.log_format(), LogFormat::Compact);

        logging.format = "json".to_string();
        assert_eq!(logging.log_format(), LogFormat::Full);
    }

    #[test]
    fn test_half_configured_tls_rejected() {
        let tls = TlsSection {
            cert: Some("cert.pem".to_string()),
            key: None,
        };
        assert!(matches!(tls.load_server_config(), Err(crate::Error::Config(_))));
    }

    #[test]
    fn test_load_server_config_from_pem() {
        let dir = std::env::temp_dir().join(format!("hopchain-tls-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert_path = dir.join("cert.pem");
        let key_path = dir.join("key.pem");
        std::fs::write(&cert_path, cert.cert.pem()).unwrap();
        std::fs::write(&key_path, cert.key_pair.serialize_pem()).unwrap();

        let tls = TlsSection {
            cert: Some(cert_path.display().to_string()),
            key: Some(key_path.display().to_string()),
        };
        assert!(tls.load_server_config().unwrap().is_some());

        std::fs::remove_dir_all(&dir).ok();
    }
}
