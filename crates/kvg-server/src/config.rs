use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;

use kvg_sdk::KvgConfig;
use serde::{Deserialize, Serialize};

use crate::error::{ServerError, ServerResult};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Answer CORS preflights from any origin.
    pub permissive_cors: bool,
    pub kvg: KvgConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 7474)),
            permissive_cors: false,
            kvg: KvgConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_toml_str(s: &str) -> ServerResult<Self> {
        toml::from_str(s).map_err(|e| ServerError::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> ServerResult<Self> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    pub fn to_toml_string(&self) -> ServerResult<String> {
        toml::to_string_pretty(self).map_err(|e| ServerError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvg_sdk::StoreConfig;

    #[test]
    fn default_config() {
        let c = ServerConfig::default();
        assert_eq!(c.bind_addr, "127.0.0.1:7474".parse::<SocketAddr>().unwrap());
        assert!(!c.permissive_cors);
        assert_eq!(c.kvg.store, StoreConfig::Memory);
    }

    #[test]
    fn nested_store_section() {
        let c = ServerConfig::from_toml_str(
            r#"
            bind_addr = "0.0.0.0:9000"

            [kvg.store]
            backend = "sqlite"
            path = "kvg.db"

            [kvg.limits]
            traversal_max_depth = 4
            "#,
        )
        .unwrap();
        assert_eq!(c.bind_addr.port(), 9000);
        assert!(matches!(c.kvg.store, StoreConfig::Sqlite { .. }));
        assert_eq!(c.kvg.limits.traversal_max_depth, 4);
        assert_eq!(c.kvg.limits.merge_hard_limit, 500);
    }

    #[test]
    fn rendered_default_parses_back() {
        let text = ServerConfig::default().to_toml_string().unwrap();
        assert_eq!(ServerConfig::from_toml_str(&text).unwrap(), ServerConfig::default());
    }

    #[test]
    fn bad_address_is_a_config_error() {
        let err = ServerConfig::from_toml_str("bind_addr = \"nowhere\"").unwrap_err();
        assert!(matches!(err, ServerError::Config(_)));
    }
}
