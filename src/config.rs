use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILE: &str = "Brokerage.toml";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// Path of the SQLite database, or `:memory:`.
    pub database_url: String,
    pub bcrypt_cost: u32,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "brokerage.db".to_string(),
            bcrypt_cost: bcrypt::DEFAULT_COST,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Defaults, overlaid by the TOML file at `path` (if present), overlaid
    /// by `BROKERAGE_*` environment variables.
    pub fn figment(path: impl AsRef<Path>) -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("BROKERAGE_"))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, figment::Error> {
        Self::figment(path).extract()
    }
}
