use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

pub use compkit_bootstrap::ConfigProvider;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config for component '{component}': {source}")]
    Invalid {
        component: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("component '{component}' has no key '{key}'")]
    MissingKey { component: String, key: String },
}

/// Options every component block understands, whatever the component.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct CommonOptions {
    #[serde(default = "default_load_enabled")]
    load_enabled: bool,
    #[serde(default, with = "humantime_serde")]
    construction_timeout: Option<Duration>,
}

fn default_load_enabled() -> bool {
    true
}

impl Default for CommonOptions {
    fn default() -> Self {
        Self {
            load_enabled: true,
            construction_timeout: None,
        }
    }
}

/// The configuration block of one component, as handed to its factory.
#[derive(Debug, Clone)]
pub struct ComponentConfig {
    name: String,
    raw: serde_json::Value,
    common: CommonOptions,
}

impl ComponentConfig {
    /// Wrap a raw block. `null` (no block at all) means "all defaults".
    pub fn new(name: impl Into<String>, raw: serde_json::Value) -> Result<Self, ConfigError> {
        let name = name.into();
        let common = match &raw {
            serde_json::Value::Object(_) => {
                CommonOptions::deserialize(&raw).map_err(|source| ConfigError::Invalid {
                    component: name.clone(),
                    source,
                })?
            }
            _ => CommonOptions::default(),
        };
        Ok(Self { name, raw, common })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn raw(&self) -> &serde_json::Value {
        &self.raw
    }

    /// `load-enabled: false` removes the component from the run entirely.
    pub fn load_enabled(&self) -> bool {
        self.common.load_enabled
    }

    /// Per-component override of the manager's construction timeout.
    pub fn construction_timeout(&self) -> Option<Duration> {
        self.common.construction_timeout
    }

    /// Deserialize the whole block into the component's own options type.
    ///
    /// Unknown keys are the type's business; use `#[serde(deny_unknown_fields)]`
    /// there only if the type also declares the common keys.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, ConfigError> {
        let value = match &self.raw {
            serde_json::Value::Null => serde_json::Value::Object(Default::default()),
            other => other.clone(),
        };
        serde_json::from_value(value).map_err(|source| ConfigError::Invalid {
            component: self.name.clone(),
            source,
        })
    }

    /// One typed key of the block.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T, ConfigError> {
        let value = self
            .raw
            .get(key)
            .cloned()
            .ok_or_else(|| ConfigError::MissingKey {
                component: self.name.clone(),
                key: key.to_string(),
            })?;
        serde_json::from_value(value).map_err(|source| ConfigError::Invalid {
            component: self.name.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct HttpOptions {
        port: u16,
        #[serde(default)]
        host: Option<String>,
    }

    #[test]
    fn defaults_without_block() {
        let cfg = ComponentConfig::new("http", serde_json::Value::Null).unwrap();
        assert!(cfg.load_enabled());
        assert_eq!(cfg.construction_timeout(), None);
        assert_eq!(cfg.name(), "http");
    }

    #[test]
    fn common_keys_are_read() {
        let cfg = ComponentConfig::new(
            "http",
            json!({"load-enabled": false, "construction-timeout": "1500ms", "port": 8080}),
        )
        .unwrap();
        assert!(!cfg.load_enabled());
        assert_eq!(cfg.construction_timeout(), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn typed_parse_and_get() {
        let cfg = ComponentConfig::new("http", json!({"port": 8080})).unwrap();
        let opts: HttpOptions = cfg.parse().unwrap();
        assert_eq!(
            opts,
            HttpOptions {
                port: 8080,
                host: None
            }
        );
        assert_eq!(cfg.get::<u16>("port").unwrap(), 8080);
        assert!(matches!(
            cfg.get::<u16>("missing"),
            Err(ConfigError::MissingKey { .. })
        ));
    }

    #[test]
    fn bad_common_key_is_an_error() {
        let err = ComponentConfig::new("http", json!({"load-enabled": "maybe"})).unwrap_err();
        assert!(err.to_string().contains("invalid config for component 'http'"));
    }
}
