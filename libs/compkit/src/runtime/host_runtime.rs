//! Host Runtime - one process-level run: load → wait → reverse teardown.

use tokio_util::sync::CancellationToken;

use compkit_bootstrap::ManagerConfig;

use crate::registry::ComponentRegistry;
use crate::runtime::ComponentManager;

/// Owns the registry and the shutdown token of one process run.
pub struct HostRuntime {
    registry: ComponentRegistry,
    manager_cfg: ManagerConfig,
    cancel: CancellationToken,
}

impl HostRuntime {
    /// Prepare a run. Nothing is constructed until [`run_full_cycle`](Self::run_full_cycle).
    pub fn new(
        registry: ComponentRegistry,
        manager_cfg: ManagerConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            manager_cfg,
            cancel,
        }
    }

    /// Load every component, serve until `cancel` fires, then tear down.
    ///
    /// A failed load returns the aggregate `LoadError` (already torn down).
    /// Cancelling during the load aborts it the same way.
    pub async fn run_full_cycle(self) -> anyhow::Result<()> {
        tracing::info!("Phase: load");
        let manager =
            ComponentManager::start_with_cancel(self.registry, &self.manager_cfg, &self.cancel)
                .await?;

        tracing::info!(
            run_id = %manager.run_id(),
            components = manager.realized_order().len(),
            "Phase: serve"
        );
        self.cancel.cancelled().await;

        tracing::info!("Phase: teardown");
        manager.shutdown().await;
        Ok(())
    }
}
