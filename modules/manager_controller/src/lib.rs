//! Manager Controller - publishes the component manager's state as statistics.

use std::sync::Arc;

use async_trait::async_trait;
use compkit::{
    Component, ComponentConfig, ComponentContext, ComponentFactory, ComponentList, ComponentState,
    LoadMonitor, ManagerSnapshot,
};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use statistics_storage::{StatisticsEntry, StatisticsStorageComponent};

/// Statistics prefix the manager state is reported under.
pub const STATISTICS_PREFIX: &str = "components";

const ALL_STATES: [ComponentState; 5] = [
    ComponentState::Pending,
    ComponentState::Constructing,
    ComponentState::Ready,
    ComponentState::Failed,
    ComponentState::Cancelled,
];

pub struct ManagerControllerComponent {
    monitor: LoadMonitor,
    entry: Mutex<Option<StatisticsEntry>>,
    _statistics: Arc<StatisticsStorageComponent>,
}

impl ManagerControllerComponent {
    pub const NAME: &'static str = "manager-controller";

    pub async fn create(_cfg: ComponentConfig, ctx: ComponentContext) -> anyhow::Result<Self> {
        let statistics = ctx
            .find::<StatisticsStorageComponent>(StatisticsStorageComponent::NAME)
            .await?;
        let monitor = ctx.load_monitor();

        let reporter = monitor.clone();
        let entry = statistics
            .storage()
            .register_extender(STATISTICS_PREFIX, move |_| match reporter.snapshot() {
                Some(snapshot) => report(&snapshot),
                None => Value::Object(Map::new()),
            });

        Ok(Self {
            monitor,
            entry: Mutex::new(Some(entry)),
            _statistics: statistics,
        })
    }

    /// Current snapshot of the run this component belongs to.
    pub fn snapshot(&self) -> Option<ManagerSnapshot> {
        self.monitor.snapshot()
    }
}

#[async_trait]
impl Component for ManagerControllerComponent {
    async fn on_all_components_loaded(&self) -> anyhow::Result<()> {
        if let Some(snapshot) = self.monitor.snapshot() {
            tracing::info!(
                run_id = %snapshot.run_id,
                ready = snapshot.count(ComponentState::Ready),
                "Manager controller reporting"
            );
        }
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.entry.lock().take();
        Ok(())
    }
}

/// Statistics tree for one snapshot:
/// `{run_id, run_state, counts: {<state>: n, total}, list: {<name>: {state, seq, error}}}`.
pub fn report(snapshot: &ManagerSnapshot) -> Value {
    let mut counts = Map::new();
    for state in ALL_STATES {
        counts.insert(state.as_str().to_string(), json!(snapshot.count(state)));
    }
    counts.insert("total".to_string(), json!(snapshot.components.len()));

    let list: Map<String, Value> = snapshot
        .components
        .iter()
        .map(|c| {
            let mut item = Map::new();
            item.insert("state".to_string(), json!(c.state));
            if let Some(seq) = c.construction_seq {
                item.insert("seq".to_string(), json!(seq));
            }
            if let Some(error) = &c.error {
                item.insert("error".to_string(), json!(error));
            }
            (c.name.clone(), Value::Object(item))
        })
        .collect();

    json!({
        "run_id": snapshot.run_id.to_string(),
        "run_state": snapshot.run_state,
        "counts": counts,
        "list": list,
    })
}

fn register(list: &mut ComponentList) {
    list.add(
        ManagerControllerComponent::NAME,
        ComponentFactory::new(ManagerControllerComponent::create),
    );
}

inventory::submit! {
    compkit::Registrator(register)
}

#[cfg(test)]
mod tests {
    use super::*;
    use compkit::{ComponentManager, ComponentSnapshot, ManagerConfig, RunState};

    #[test]
    fn report_counts_states_and_lists_components() {
        let snapshot = ManagerSnapshot {
            run_id: Default::default(),
            run_state: RunState::Aborted,
            components: vec![
                ComponentSnapshot {
                    name: "config".into(),
                    state: ComponentState::Ready,
                    construction_seq: Some(0),
                    settled_at: None,
                    error: None,
                    torn_down: true,
                },
                ComponentSnapshot {
                    name: "http".into(),
                    state: ComponentState::Failed,
                    construction_seq: Some(1),
                    settled_at: None,
                    error: Some("bind failed".into()),
                    torn_down: false,
                },
            ],
        };

        let value = report(&snapshot);
        assert_eq!(value["run_state"], json!("aborted"));
        assert_eq!(value["counts"]["ready"], json!(1));
        assert_eq!(value["counts"]["failed"], json!(1));
        assert_eq!(value["counts"]["pending"], json!(0));
        assert_eq!(value["counts"]["total"], json!(2));
        assert_eq!(value["list"]["http"]["error"], json!("bind failed"));
        assert_eq!(value["list"]["config"]["seq"], json!(0));
        assert!(value["list"]["config"].get("error").is_none());
    }

    #[tokio::test]
    async fn publishes_manager_state_through_statistics_storage() {
        let mut list = ComponentList::new();
        // Registered before its dependency on purpose.
        register(&mut list);
        list.add(
            StatisticsStorageComponent::NAME,
            ComponentFactory::new(StatisticsStorageComponent::create),
        );

        let manager = ComponentManager::start(list.build_default().unwrap(), &ManagerConfig::default())
            .await
            .unwrap();
        assert_eq!(
            manager.realized_order(),
            vec![StatisticsStorageComponent::NAME, ManagerControllerComponent::NAME]
        );

        let stats = manager
            .get::<StatisticsStorageComponent>(StatisticsStorageComponent::NAME)
            .unwrap();
        let text = stats.render(STATISTICS_PREFIX, "prometheus-untyped").unwrap();
        assert!(text.contains("components_counts_ready 2"));
        assert!(text.contains("components_list_manager_controller_seq 1"));

        let controller = manager
            .get::<ManagerControllerComponent>(ManagerControllerComponent::NAME)
            .unwrap();
        assert_eq!(controller.snapshot().unwrap().run_state, RunState::Completed);

        drop((stats, controller));
        manager.shutdown().await;
    }
}
