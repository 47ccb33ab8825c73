// Runtime configuration from the environment and an optional .env file

use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::display::HandleCatalog;
use crate::protocol::{load_document, state_for, ProtocolSet};
use crate::registry::Edition;

pub const DEFAULT_DATA_DIR: &str = "data/protocol";
pub const DEFAULT_VERSION: &str = "1.20.1";
pub const DEFAULT_STATE: &str = "play";
pub const DEFAULT_LOG_DIR: &str = "logs";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub version: String,
    pub state: String,
    pub edition: Edition,
    pub log_dir: PathBuf,
}

/// Loads the first `.env` found, checking:
/// 1. Current working directory
/// 2. One level up
/// 3. Two levels up (workspace root when running from a member crate)
pub fn load_env() {
    let env_locations = [".env", "../.env", "../../.env"];
    for location in &env_locations {
        let path = Path::new(location);
        if path.exists() && dotenv::from_path(path).is_ok() {
            debug!(path = location, "loaded environment file");
            return;
        }
    }
    dotenv::dotenv().ok();
}

impl Config {
    /// Loads `.env`, then reads the `PROTODEF_*` variables.
    pub fn from_env() -> Result<Self> {
        load_env();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any variable source; unset variables take
    /// their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let edition_name = var("PROTODEF_EDITION", "java");
        let edition = Edition::from_str(&edition_name)
            .ok_or_else(|| anyhow!("Invalid PROTODEF_EDITION '{}', expected java or bedrock", edition_name))?;

        Ok(Self {
            data_dir: PathBuf::from(var("PROTODEF_DATA_DIR", DEFAULT_DATA_DIR)),
            version: var("PROTODEF_VERSION", DEFAULT_VERSION),
            state: var("PROTODEF_STATE", DEFAULT_STATE),
            edition,
            log_dir: PathBuf::from(var("PROTODEF_LOG_DIR", DEFAULT_LOG_DIR)),
        })
    }

    /// Schema file for the configured version: `<data_dir>/<version>/protocol.json`
    /// when present, else `<data_dir>/proto-<version>.yml`.
    pub fn protocol_path(&self) -> PathBuf {
        let json = self.data_dir.join(&self.version).join("protocol.json");
        if json.exists() {
            return json;
        }
        self.data_dir.join(format!("proto-{}.yml", self.version))
    }

    /// Loads the configured schema and compiles it, with display handles
    /// allocated for every field name the schema mentions.
    pub fn load_protocol(&self) -> Result<(ProtocolSet, HandleCatalog)> {
        let path = self.protocol_path();
        let document = load_document(&path)?;
        let mut catalog = HandleCatalog::new();
        let registry = catalog.build_registry(self.edition, &document);
        let set = ProtocolSet::from_document(&document, state_for(&document, &self.state), &registry)
            .map_err(|e| anyhow!("Failed to build protocol from {}: {}", path.display(), e))?;
        Ok((set, catalog))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.data_dir, PathBuf::from(DEFAULT_DATA_DIR));
        assert_eq!(config.version, DEFAULT_VERSION);
        assert_eq!(config.state, "play");
        assert_eq!(config.edition, Edition::Java);
        assert_eq!(config.log_dir, PathBuf::from("logs"));
    }

    #[test]
    fn test_overrides_and_bad_edition() {
        let config = Config::from_lookup(lookup(&[
            ("PROTODEF_EDITION", "bedrock"),
            ("PROTODEF_VERSION", "1.21.111"),
        ]))
        .unwrap();
        assert_eq!(config.edition, Edition::Bedrock);
        assert_eq!(config.version, "1.21.111");

        assert!(Config::from_lookup(lookup(&[("PROTODEF_EDITION", "pocket")])).is_err());
    }

    #[test]
    fn test_protocol_path_prefers_json() {
        let dir = std::env::temp_dir().join(format!("mc-protodef-cfg-{}", uuid::Uuid::new_v4()));
        let data_dir = dir.to_string_lossy().to_string();
        let config = Config::from_lookup(lookup(&[("PROTODEF_DATA_DIR", data_dir.as_str())])).unwrap();
        assert_eq!(config.protocol_path(), dir.join("proto-1.20.1.yml"));

        std::fs::create_dir_all(dir.join("1.20.1")).unwrap();
        std::fs::write(dir.join("1.20.1").join("protocol.json"), "{}").unwrap();
        assert_eq!(config.protocol_path(), dir.join("1.20.1").join("protocol.json"));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
