use async_trait::async_trait;
use compkit::{Component, ComponentConfig, ComponentContext, ComponentFactory, ComponentList};
use serde::Deserialize;
use tracing::info;

use crate::format::{render, FormatError, StatsFormat};
use crate::storage::{StatisticsRequest, Storage};

/// Component that owns the process-wide statistics [`Storage`].
///
/// The storage is shared by every component that resolves this one and is
/// safe for concurrent use. Extenders registered by dependents are released
/// before this component stops, since dependents are torn down first.
pub struct StatisticsStorageComponent {
    storage: Storage,
    default_format: StatsFormat,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct StatisticsStorageConfig {
    #[serde(default)]
    default_format: StatsFormat,
}

impl StatisticsStorageComponent {
    pub const NAME: &'static str = "statistics-storage";

    pub async fn create(cfg: ComponentConfig, _ctx: ComponentContext) -> anyhow::Result<Self> {
        let cfg: StatisticsStorageConfig = cfg.parse()?;
        info!(format = ?cfg.default_format, "Statistics storage created");
        Ok(Self {
            storage: Storage::new(),
            default_format: cfg.default_format,
        })
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Collect everything under `prefix` and render it.
    /// An empty `format` means the configured default.
    pub fn render(&self, prefix: &str, format: &str) -> Result<String, FormatError> {
        let format = if format.is_empty() {
            self.default_format
        } else {
            format.parse()?
        };
        let tree = self
            .storage
            .get_as_json(&StatisticsRequest::with_prefix(prefix));
        Ok(render(&tree, format))
    }
}

#[async_trait]
impl Component for StatisticsStorageComponent {
    async fn on_all_components_loaded(&self) -> anyhow::Result<()> {
        info!(
            extenders = self.storage.extender_count(),
            "Statistics storage ready"
        );
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        let left = self.storage.extender_count();
        if left > 0 {
            tracing::warn!(extenders = left, "Statistics extenders still registered at stop");
        }
        Ok(())
    }
}

fn register(list: &mut ComponentList) {
    list.add(
        StatisticsStorageComponent::NAME,
        ComponentFactory::new(StatisticsStorageComponent::create),
    );
}

inventory::submit! {
    compkit::Registrator(register)
}
