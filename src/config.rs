use std::{collections::HashMap, path::PathBuf};

use config::{Config, ConfigError, Environment};
use serde::Deserialize;

const DEFAULT_PREFIX: &str = "/usr/local";

pub struct FormulateConfig {
    /// Root prefix, the `%(root)s` template variable.
    pub prefix: PathBuf,
    /// Kegs are installed under `<cellar>/<name>/<version>`.
    pub cellar: PathBuf,
}

impl FormulateConfig {
    pub fn load() -> anyhow::Result<Self> {
        Ok(RawConfig::load(None)?.into())
    }
}

impl From<RawConfig> for FormulateConfig {
    fn from(raw: RawConfig) -> Self {
        let prefix = raw.prefix.unwrap_or_else(|| PathBuf::from(DEFAULT_PREFIX));
        let cellar = raw.cellar.unwrap_or_else(|| prefix.join("Cellar"));
        FormulateConfig { prefix, cellar }
    }
}

#[derive(Default, Debug, Deserialize, PartialEq, Eq)]
struct RawConfig {
    prefix: Option<PathBuf>,
    cellar: Option<PathBuf>,
}

impl RawConfig {
    fn load(env: Option<HashMap<String, String>>) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(
                Environment::with_prefix("FORMULATE")
                    .separator("_")
                    .source(env),
            )
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn load_empty() {
        let env = HashMap::from([]);
        let config = RawConfig::load(Some(env)).unwrap();
        assert_eq!(
            config,
            RawConfig {
                prefix: None,
                cellar: None
            }
        );

        let config = FormulateConfig::from(config);
        assert_eq!(config.prefix, PathBuf::from("/usr/local"));
        assert_eq!(config.cellar, PathBuf::from("/usr/local/Cellar"));
    }

    #[test]
    fn load_environment() {
        let env = HashMap::from([
            ("FORMULATE_PREFIX".to_owned(), "/opt/homebrew".to_owned()),
            ("FORMULATE_CELLAR".to_owned(), "/opt/kegs".to_owned()),
        ]);
        let config = RawConfig::load(Some(env)).unwrap();
        assert_eq!(
            config,
            RawConfig {
                prefix: Some("/opt/homebrew".into()),
                cellar: Some("/opt/kegs".into())
            }
        );
    }

    #[test]
    fn cellar_follows_prefix() {
        let env = HashMap::from([("FORMULATE_PREFIX".to_owned(), "/opt/homebrew".to_owned())]);
        let config = FormulateConfig::from(RawConfig::load(Some(env)).unwrap());
        assert_eq!(config.cellar, PathBuf::from("/opt/homebrew/Cellar"));
    }
}
