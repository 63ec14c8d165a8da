//! Configuration management

use std::{path::Path, path::PathBuf, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// TLS configuration
    pub tls: TlsConfig,
    /// Portal (authentication) configuration
    pub portal: PortalConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Time a client gets to complete the TLS handshake
    #[serde(with = "humantime_serde")]
    pub handshake_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8443,
            shutdown_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

/// How client certificates are verified during the handshake
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientVerification {
    /// Do not request a client certificate
    None,
    /// Require a certificate but accept any chain; the portal decides
    AcceptAny,
    /// Require a certificate chaining to `ca_file`
    #[default]
    TrustedCa,
}

/// TLS listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Serve HTTPS (plain HTTP when false)
    pub enabled: bool,
    /// PEM certificate chain of the server
    pub certificate_file: Option<PathBuf>,
    /// PEM private key of the server
    pub private_key_file: Option<PathBuf>,
    /// Client certificate verification mode
    pub client_verification: ClientVerification,
    /// PEM bundle of CAs trusted to issue client certificates
    pub ca_file: Option<PathBuf>,
    /// Fresh ephemeral key exchange on every handshake (no session resumption)
    pub single_use_keys: bool,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            certificate_file: None,
            private_key_file: None,
            client_verification: ClientVerification::default(),
            ca_file: None,
            single_use_keys: true,
        }
    }
}

/// Portal configuration: who may log in
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    /// Let clients without certificate in as the anonymous avatar
    pub allow_anonymous: bool,
    /// Ordered identity rules, first match wins; no match denies
    pub rules: Vec<IdentityRuleConfig>,
}

/// One identity rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityRuleConfig {
    /// Criteria; every criterion given must match
    #[serde(rename = "match")]
    pub match_criteria: IdentityMatchConfig,
    /// What to do when the criteria match
    #[serde(default)]
    pub action: RuleAction,
}

/// Identity criteria. Strings accept the `*`, `prefix*`, `*suffix` and
/// `*contains*` globs; `fingerprint` is an exact SHA-256 (hex, colons optional).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityMatchConfig {
    /// Subject common name
    pub cn: Option<String>,
    /// Subject organizational unit
    pub ou: Option<String>,
    /// Any SAN URI (e.g. SPIFFE IDs)
    pub san_uri: Option<String>,
    /// Any SAN DNS name
    pub san_dns: Option<String>,
    /// Certificate SHA-256 fingerprint
    pub fingerprint: Option<String>,
    /// Match every certificate
    pub any: Option<bool>,
}

/// Rule action
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    /// Let the identity in
    #[default]
    Allow,
    /// Refuse the identity
    Deny,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist, cannot be parsed,
    /// or describes an inconsistent TLS setup.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // env_files feed the environment layer below, so they are read first.
        let env_files: Vec<String> = figment.extract_inner("env_files").unwrap_or_default();
        Self::load_env_files(&env_files);

        // CERTGATE_TLS__CA_FILE=/etc/certgate/ca.pem
        figment = figment.merge(Env::prefixed("CERTGATE_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.tls.expand_paths();
        config.validate()?;

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Files that don't exist are silently skipped.
    fn load_env_files(env_files: &[String]) {
        for path_str in env_files {
            let expanded = expand_home(Path::new(path_str));
            if expanded.exists() {
                match dotenvy::from_path(&expanded) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {}", expanded.display());
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {}: {e}", expanded.display());
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {}", expanded.display());
            }
        }
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first inconsistency.
    pub fn validate(&self) -> Result<()> {
        if !self.tls.enabled {
            return Ok(());
        }
        if self.tls.certificate_file.is_none() || self.tls.private_key_file.is_none() {
            return Err(Error::Config(
                "tls.certificate_file and tls.private_key_file are required when tls.enabled"
                    .to_string(),
            ));
        }
        if self.tls.client_verification == ClientVerification::TrustedCa
            && self.tls.ca_file.is_none()
        {
            return Err(Error::Config(
                "tls.ca_file is required for client_verification: trusted_ca".to_string(),
            ));
        }
        Ok(())
    }
}

impl TlsConfig {
    fn expand_paths(&mut self) {
        for path in [
            &mut self.certificate_file,
            &mut self.private_key_file,
            &mut self.ca_file,
        ]
        .into_iter()
        .flatten()
        {
            *path = expand_home(path);
        }
    }
}

/// Replace a leading `~` with the home directory.
fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(serde::de::Error::custom)
        } else {
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use pretty_assertions::assert_eq;

    use super::*;

    fn write_yaml(dir: &tempfile::TempDir, yaml: &str) -> PathBuf {
        let path = dir.path().join("certgate.yaml");
        std::fs::write(&path, yaml).unwrap();
        path
    }

    #[test]
    fn defaults_require_certificates() {
        let config = Config::default();
        assert!(config.tls.enabled);
        assert!(config.tls.single_use_keys);
        assert_eq!(config.tls.client_verification, ClientVerification::TrustedCa);
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let err = Config::load(Some(Path::new("/nonexistent/certgate.yaml"))).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("not found")));
    }

    #[test]
    fn full_yaml_is_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_yaml(
            &dir,
            r#"
server:
  host: "0.0.0.0"
  port: 9443
  shutdown_timeout: "5s"
  handshake_timeout: "2s"
tls:
  certificate_file: /etc/certgate/server.crt
  private_key_file: /etc/certgate/server.key
  client_verification: trusted_ca
  ca_file: /etc/certgate/ca.pem
portal:
  allow_anonymous: true
  rules:
    - match: { cn: "mallory" }
      action: deny
    - match: { san_uri: "spiffe://example.org/*" }
"#,
        );

        let config = Config::load(Some(&path)).unwrap();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 9443);
        assert_eq!(config.server.shutdown_timeout, Duration::from_secs(5));
        assert_eq!(config.server.handshake_timeout, Duration::from_secs(2));
        assert_eq!(
            config.tls.ca_file.as_deref(),
            Some(Path::new("/etc/certgate/ca.pem"))
        );
        assert!(config.portal.allow_anonymous);
        assert_eq!(config.portal.rules.len(), 2);
        assert_eq!(config.portal.rules[0].action, RuleAction::Deny);
        assert_eq!(config.portal.rules[1].action, RuleAction::Allow);
        assert_eq!(
            config.portal.rules[1].match_criteria.san_uri.as_deref(),
            Some("spiffe://example.org/*")
        );
    }

    #[test]
    fn plain_http_needs_no_certificates() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_yaml(&dir, "tls:\n  enabled: false\n");
        let config = Config::load(Some(&path)).unwrap();
        assert!(!config.tls.enabled);
    }

    #[test]
    fn trusted_ca_requires_ca_file() {
        let config = Config {
            tls: TlsConfig {
                certificate_file: Some("server.crt".into()),
                private_key_file: Some("server.key".into()),
                ..TlsConfig::default()
            },
            ..Config::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("ca_file"));
    }

    #[test]
    fn accept_any_needs_no_ca_file() {
        let config = Config {
            tls: TlsConfig {
                certificate_file: Some("server.crt".into()),
                private_key_file: Some("server.key".into()),
                client_verification: ClientVerification::AcceptAny,
                ..TlsConfig::default()
            },
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn home_is_expanded() {
        let Some(home) = dirs::home_dir() else {
            return;
        };
        assert_eq!(expand_home(Path::new("~/certs/ca.pem")), home.join("certs/ca.pem"));
        assert_eq!(expand_home(Path::new("/abs/ca.pem")), PathBuf::from("/abs/ca.pem"));
    }

    #[test]
    fn env_files_are_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let env_path = dir.path().join("test.env");
        let mut f = std::fs::File::create(&env_path).unwrap();
        writeln!(f, "CERTGATE_TEST_ENV_FILE_KEY=from_env_file").unwrap();
        drop(f);

        Config::load_env_files(&[env_path.to_string_lossy().to_string()]);

        assert_eq!(
            std::env::var("CERTGATE_TEST_ENV_FILE_KEY").unwrap(),
            "from_env_file"
        );
    }

    #[test]
    fn env_files_override_config_values() {
        let dir = tempfile::tempdir().unwrap();
        let env_path = dir.path().join("gate.env");
        std::fs::write(&env_path, "CERTGATE_TLS__SINGLE_USE_KEYS=false\n").unwrap();
        let path = write_yaml(
            &dir,
            &format!(
                "env_files:\n  - {}\ntls:\n  enabled: false\n",
                env_path.display()
            ),
        );

        let config = Config::load(Some(&path)).unwrap();

        assert_eq!(config.env_files.len(), 1);
        assert!(!config.tls.single_use_keys);
    }

    #[test]
    fn durations_accept_units() {
        #[derive(Deserialize)]
        struct D {
            #[serde(with = "humantime_serde")]
            d: Duration,
        }
        let parse = |s: &str| serde_yaml::from_str::<D>(&format!("d: \"{s}\"")).unwrap().d;
        assert_eq!(parse("250ms"), Duration::from_millis(250));
        assert_eq!(parse("30s"), Duration::from_secs(30));
        assert_eq!(parse("2m"), Duration::from_secs(120));
        assert_eq!(parse("7"), Duration::from_secs(7));
    }
}
