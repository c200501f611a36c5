use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use crate::config::{ComponentConfig, ConfigError, ConfigProvider};
use crate::context::ComponentContext;
use crate::contracts::{Component, ComponentFactory};

/// The function type submitted by component crates via `inventory::submit!`.
pub struct Registrator(pub fn(&mut ComponentList));

inventory::collect!(Registrator);

/// Ordered list of `(name, factory)` pairs, before configuration is applied.
#[derive(Default)]
pub struct ComponentList {
    entries: Vec<(String, ComponentFactory)>,
}

impl std::fmt::Debug for ComponentList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentList")
            .field("components", &self.names())
            .finish()
    }
}

impl ComponentList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect every component submitted through [`Registrator`], sorted by name.
    pub fn discover() -> Self {
        let mut list = Self::default();
        for r in ::inventory::iter::<Registrator> {
            r.0(&mut list);
        }
        list.entries.sort_by(|a, b| a.0.cmp(&b.0));
        list
    }

    pub fn append<T, F, Fut>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        T: Component,
        F: Fn(ComponentConfig, ComponentContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.add(name, ComponentFactory::new(factory));
        self
    }

    pub fn add(&mut self, name: impl Into<String>, factory: ComponentFactory) {
        self.entries.push((name.into(), factory));
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Attach configuration blocks and produce the read-only registry.
    pub fn build(self, config: &dyn ConfigProvider) -> Result<ComponentRegistry, RegistryError> {
        let mut seen = HashSet::new();
        let mut entries = Vec::with_capacity(self.entries.len());
        let mut errors = Vec::new();

        for (name, factory) in self.entries {
            if !seen.insert(name.clone()) {
                errors.push(RegistryError::Duplicate(name));
                continue;
            }
            let raw = config
                .get_component_config(&name)
                .cloned()
                .unwrap_or(serde_json::Value::Null);
            match ComponentConfig::new(name.clone(), raw) {
                Ok(config) => entries.push(RegistryEntry {
                    enabled: config.load_enabled(),
                    name,
                    factory,
                    config,
                }),
                Err(source) => errors.push(RegistryError::InvalidConfig {
                    component: name,
                    source,
                }),
            }
        }

        for configured in config.component_names() {
            if !seen.contains(&configured) {
                tracing::warn!(
                    component = %configured,
                    "Config block for a component that is not registered; ignoring"
                );
            }
        }

        match errors.len() {
            0 => {}
            1 => return Err(errors.remove(0)),
            _ => return Err(RegistryError::Multiple(errors)),
        }

        let registry = ComponentRegistry { entries };
        tracing::info!(
            enabled = ?registry.enabled().map(|e| e.name.as_str()).collect::<Vec<_>>(),
            disabled = ?registry.disabled_names(),
            "Component registry built"
        );
        Ok(registry)
    }

    /// Build with no configuration blocks at all.
    pub fn build_default(self) -> Result<ComponentRegistry, RegistryError> {
        self.build(&NoConfig)
    }
}

struct NoConfig;

impl ConfigProvider for NoConfig {
    fn get_component_config(&self, _component_name: &str) -> Option<&serde_json::Value> {
        None
    }

    fn component_names(&self) -> Vec<String> {
        Vec::new()
    }
}

/// One registered component: name, factory, configuration block, enabled flag.
pub struct RegistryEntry {
    pub name: String,
    pub factory: ComponentFactory,
    pub config: ComponentConfig,
    pub enabled: bool,
}

impl RegistryEntry {
    /// Per-component timeout, falling back to the manager-wide default.
    pub fn construction_timeout(&self, default: Option<Duration>) -> Option<Duration> {
        self.config.construction_timeout().or(default)
    }
}

impl std::fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("name", &self.name)
            .field("enabled", &self.enabled)
            .field("construction_timeout", &self.config.construction_timeout())
            .finish()
    }
}

/// Static, read-only list of components for one run, in registration order.
#[derive(Debug)]
pub struct ComponentRegistry {
    entries: Vec<RegistryEntry>,
}

impl ComponentRegistry {
    pub fn entries(&self) -> &[RegistryEntry] {
        &self.entries
    }

    pub fn enabled(&self) -> impl Iterator<Item = &RegistryEntry> {
        self.entries.iter().filter(|e| e.enabled)
    }

    pub fn disabled_names(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| !e.enabled)
            .map(|e| e.name.as_str())
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<&RegistryEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn into_entries(self) -> Vec<RegistryEntry> {
        self.entries
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("component '{0}' is registered more than once")]
    Duplicate(String),
    #[error("invalid configuration for component '{component}'")]
    InvalidConfig {
        component: String,
        #[source]
        source: ConfigError,
    },
    #[error("invalid registry configuration:\n{}", .0.iter().map(|e| format!("  - {e}")).collect::<Vec<_>>().join("\n"))]
    Multiple(Vec<RegistryError>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct Dummy;
    impl Component for Dummy {}

    struct MapConfig(HashMap<String, serde_json::Value>);

    impl ConfigProvider for MapConfig {
        fn get_component_config(&self, name: &str) -> Option<&serde_json::Value> {
            self.0.get(name)
        }
        fn component_names(&self) -> Vec<String> {
            self.0.keys().cloned().collect()
        }
    }

    fn dummy_list(names: &[&str]) -> ComponentList {
        let mut list = ComponentList::new();
        for name in names {
            list.add(*name, ComponentFactory::from_default::<Dummy>());
        }
        list
    }

    #[test]
    fn build_preserves_registration_order() {
        let reg = dummy_list(&["config", "logger", "http"]).build_default().unwrap();
        let names: Vec<_> = reg.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["config", "logger", "http"]);
        assert!(reg.enabled().all(|e| e.enabled));
    }

    #[test]
    fn duplicate_reported() {
        let err = dummy_list(&["a", "a"]).build_default().unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate(name) if name == "a"));
    }

    #[test]
    fn several_errors_are_collected() {
        let cfg = MapConfig(HashMap::from([(
            "b".to_string(),
            serde_json::json!({"load-enabled": 3}),
        )]));
        let err = dummy_list(&["a", "a", "b"]).build(&cfg).unwrap_err();
        match err {
            RegistryError::Multiple(errors) => {
                assert_eq!(errors.len(), 2);
                let text = RegistryError::Multiple(errors).to_string();
                assert!(text.contains("registered more than once"));
                assert!(text.contains("invalid configuration for component 'b'"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn load_enabled_false_disables_entry() {
        let cfg = MapConfig(HashMap::from([
            (
                "logger".to_string(),
                serde_json::json!({"load-enabled": false}),
            ),
            ("ghost".to_string(), serde_json::json!({})),
        ]));
        let reg = dummy_list(&["config", "logger"]).build(&cfg).unwrap();
        assert_eq!(reg.disabled_names(), vec!["logger"]);
        assert_eq!(reg.enabled().count(), 1);
        assert!(!reg.get("logger").unwrap().enabled);
    }

    #[test]
    fn construction_timeout_falls_back_to_default() {
        let cfg = MapConfig(HashMap::from([(
            "slow".to_string(),
            serde_json::json!({"construction-timeout": "2s"}),
        )]));
        let reg = dummy_list(&["slow", "fast"]).build(&cfg).unwrap();
        let default = Some(Duration::from_secs(30));
        assert_eq!(
            reg.get("slow").unwrap().construction_timeout(default),
            Some(Duration::from_secs(2))
        );
        assert_eq!(reg.get("fast").unwrap().construction_timeout(default), default);
    }
}
