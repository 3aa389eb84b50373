//! Client configuration (§6, §6a). TOML + `serde`, one small named
//! default-function per field in the same style as the host application's
//! `WideConfig`/`StorageConfig`, plus `dotenvy`-sourced secret overrides.

use crate::error::ConfigError;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    V4,
    V6,
}

fn default_address_family() -> AddressFamily {
    AddressFamily::V4
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DefaultContentType {
    PlainText,
    Opaque,
    Tlv,
    Json,
}

impl DefaultContentType {
    pub fn as_content_format(self) -> crate::codec::ContentFormat {
        match self {
            DefaultContentType::PlainText => crate::codec::ContentFormat::PlainText,
            DefaultContentType::Opaque => crate::codec::ContentFormat::Opaque,
            DefaultContentType::Tlv => crate::codec::ContentFormat::Tlv,
            DefaultContentType::Json => crate::codec::ContentFormat::Json,
        }
    }
}

fn default_content_type() -> DefaultContentType {
    DefaultContentType::Tlv
}

fn default_coap_port() -> u16 {
    5683
}

/// Factory-provisioned bootstrap data that skips the bootstrap exchange
/// entirely (§4.6.1, §6).
#[derive(Debug, Clone, Deserialize)]
pub struct FactoryBootstrapConfig {
    pub server_uri: String,
    pub short_server_id: u16,
    pub lifetime_secs: u32,
}

/// A schema descriptor naming an object definition source to load before
/// the object store or any engine is constructed (§6, §6a). Resolution of
/// the file itself is this client's concern, not the core's — this client
/// demo treats every source as an object ID it already knows how to build
/// (the Device object, in `main.rs`), the same way the host application's
/// `object_definition_sources` equivalent (`StorageConfig`'s tiering rules)
/// name concerns the binary already links in rather than loading plugins.
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectDefinitionSource {
    pub object_id: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PskCredentials {
    pub identity: String,
    #[serde(default)]
    pub key_hex: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CertificateCredentials {
    pub cert_path: String,
    pub key_path: String,
}

/// Top-level config loaded from `client.toml` (§6a).
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub endpoint_name: String,

    #[serde(default = "default_coap_port")]
    pub coap_port: u16,

    #[serde(default = "default_address_family")]
    pub address_family: AddressFamily,

    #[serde(default)]
    pub bootstrap_server_uri: Option<String>,

    #[serde(default)]
    pub factory_bootstrap_config: Option<FactoryBootstrapConfig>,

    #[serde(default = "default_content_type")]
    pub default_content_type: DefaultContentType,

    #[serde(default)]
    pub object_definition_sources: Vec<ObjectDefinitionSource>,

    #[serde(default)]
    pub psk: Option<PskCredentials>,

    #[serde(default)]
    pub certificate: Option<CertificateCredentials>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            endpoint_name: String::new(),
            coap_port: default_coap_port(),
            address_family: default_address_family(),
            bootstrap_server_uri: None,
            factory_bootstrap_config: None,
            default_content_type: default_content_type(),
            object_definition_sources: Vec::new(),
            psk: None,
            certificate: None,
        }
    }
}

impl ClientConfig {
    /// Reads `path` if it exists, falling back to [`ClientConfig::default`]
    /// with a warning when it does not (§6a: "the same optional-file-with-
    /// logged-fallback idiom as the host application's config loader").
    /// Environment-sourced secrets are then merged over whatever TOML
    /// supplied, env taking precedence.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            let config: ClientConfig = toml::from_str(&contents)?;
            tracing::info!("loaded client config from {}", path.display());
            config
        } else {
            tracing::warn!("config file not found at {}, using defaults", path.display());
            ClientConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// PSK key and certificate paths may be supplied via environment
    /// variables instead of the TOML file (§6a), read once at startup,
    /// mirroring the host application's `CLICKHOUSE_PASSWORD`-style
    /// convention.
    fn apply_env_overrides(&mut self) {
        if let Ok(key_hex) = std::env::var("LWM2M_PSK_KEY_HEX") {
            let psk = self.psk.get_or_insert_with(|| PskCredentials {
                identity: String::new(),
                key_hex: String::new(),
            });
            psk.key_hex = key_hex;
        }
        if let Ok(identity) = std::env::var("LWM2M_PSK_IDENTITY") {
            let psk = self.psk.get_or_insert_with(|| PskCredentials {
                identity: String::new(),
                key_hex: String::new(),
            });
            psk.identity = identity;
        }
    }

    /// Enforces §6a's mutual-exclusion and required-field checks. Called
    /// once at startup, not scattered across call sites.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint_name.trim().is_empty() {
            return Err(ConfigError::MissingEndpointName);
        }
        let has_bootstrap_uri = self.bootstrap_server_uri.is_some();
        let has_factory_config = self.factory_bootstrap_config.is_some();
        if has_bootstrap_uri == has_factory_config {
            return Err(ConfigError::AmbiguousBootstrapSource);
        }
        for (index, source) in self.object_definition_sources.iter().enumerate() {
            if source.object_id == crate::path::INVALID_ID {
                return Err(ConfigError::BadDefinitionSource {
                    index,
                    reason: "object_id must not be the INVALID_ID sentinel".to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_endpoint_name_is_rejected() {
        let config = ClientConfig { bootstrap_server_uri: Some("coap://bs".into()), ..ClientConfig::default() };
        assert!(matches!(config.validate(), Err(ConfigError::MissingEndpointName)));
    }

    #[test]
    fn bootstrap_source_must_be_exactly_one() {
        let mut config = ClientConfig { endpoint_name: "ep".into(), ..ClientConfig::default() };
        assert!(matches!(config.validate(), Err(ConfigError::AmbiguousBootstrapSource)));

        config.bootstrap_server_uri = Some("coap://bs".into());
        assert!(config.validate().is_ok());

        config.factory_bootstrap_config =
            Some(FactoryBootstrapConfig { server_uri: "coap://bs".into(), short_server_id: 123, lifetime_secs: 86400 });
        assert!(matches!(config.validate(), Err(ConfigError::AmbiguousBootstrapSource)));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = ClientConfig::load("/nonexistent/path/client.toml").unwrap();
        assert_eq!(config.coap_port, 5683);
        assert_eq!(config.address_family, AddressFamily::V4);
        assert_eq!(config.default_content_type, DefaultContentType::Tlv);
    }

    #[test]
    fn parses_minimal_toml() {
        let toml = r#"
            endpoint_name = "client-1"
            bootstrap_server_uri = "coap://bs.example:5683"
        "#;
        let config: ClientConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.endpoint_name, "client-1");
        assert_eq!(config.coap_port, 5683);
        assert!(config.validate().is_ok());
    }
}
