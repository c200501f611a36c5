use crate::config::AppConfig;
use std::sync::Arc;

/// Read access to per-component configuration blocks.
pub trait ConfigProvider: Send + Sync {
    /// Get the configuration block for a specific component
    fn get_component_config(&self, component_name: &str) -> Option<&serde_json::Value>;

    /// Names of every component that has a configuration block.
    fn component_names(&self) -> Vec<String>;
}

/// Implementation of ConfigProvider that uses AppConfig
pub struct AppConfigProvider(Arc<AppConfig>);

impl AppConfigProvider {
    pub fn new(config: AppConfig) -> Self {
        Self(Arc::new(config))
    }

    pub fn from_arc(config: Arc<AppConfig>) -> Self {
        Self(config)
    }

    pub fn inner(&self) -> &AppConfig {
        &self.0
    }
}

impl ConfigProvider for AppConfigProvider {
    fn get_component_config(&self, component_name: &str) -> Option<&serde_json::Value> {
        self.0.components.get(component_name)
    }

    fn component_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.0.components.keys().cloned().collect();
        names.sort();
        names
    }
}
