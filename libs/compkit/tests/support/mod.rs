#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use compkit::{
    async_trait, Component, ComponentFactory, ComponentHandle, ComponentList, ConfigProvider,
};
use parking_lot::Mutex;

/// Shared, ordered log of lifecycle events written by test components.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().push(event.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    /// Component names of every event with `kind`, in order.
    pub fn of(&self, kind: &str) -> Vec<String> {
        let prefix = format!("{kind}:");
        self.0
            .lock()
            .iter()
            .filter_map(|e| e.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    pub fn count(&self, event: &str) -> usize {
        self.0.lock().iter().filter(|e| *e == event).count()
    }
}

/// Generic component that keeps its dependencies alive and journals its hooks.
pub struct Node {
    pub name: String,
    journal: Journal,
    _deps: Vec<ComponentHandle>,
}

#[async_trait]
impl Component for Node {
    async fn on_all_components_loaded(&self) -> anyhow::Result<()> {
        self.journal.push(format!("loaded:{}", self.name));
        Ok(())
    }

    async fn on_all_components_are_stopping(&self) {
        self.journal.push(format!("stopping:{}", self.name));
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.journal.push(format!("stop:{}", self.name));
        Ok(())
    }
}

pub fn node(name: &'static str, deps: &'static [&'static str], journal: &Journal) -> ComponentFactory {
    slow_node(name, deps, Duration::ZERO, journal)
}

/// Sleeps for `delay` before resolving its dependencies.
pub fn slow_node(
    name: &'static str,
    deps: &'static [&'static str],
    delay: Duration,
    journal: &Journal,
) -> ComponentFactory {
    let journal = journal.clone();
    ComponentFactory::new(move |_cfg, ctx| {
        let journal = journal.clone();
        async move {
            journal.push(format!("build:{name}"));
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let mut held = Vec::new();
            for dep in deps {
                held.push(ctx.resolve(dep).await?);
            }
            journal.push(format!("built:{name}"));
            Ok::<_, anyhow::Error>(Node {
                name: name.to_string(),
                journal,
                _deps: held,
            })
        }
    })
}

/// Resolves `deps`, then fails with `message`.
pub fn failing(
    name: &'static str,
    deps: &'static [&'static str],
    message: &'static str,
    journal: &Journal,
) -> ComponentFactory {
    let journal = journal.clone();
    ComponentFactory::new(move |_cfg, ctx| {
        let journal = journal.clone();
        async move {
            journal.push(format!("build:{name}"));
            for dep in deps {
                ctx.resolve(dep).await?;
            }
            Err::<Node, _>(anyhow::anyhow!(message))
        }
    })
}

pub fn list(entries: Vec<(&'static str, ComponentFactory)>) -> ComponentList {
    let mut list = ComponentList::new();
    for (name, factory) in entries {
        list.add(name, factory);
    }
    list
}

/// Config blocks keyed by component name.
#[derive(Default)]
pub struct MapConfig(pub HashMap<String, serde_json::Value>);

impl MapConfig {
    pub fn with(mut self, name: &str, block: serde_json::Value) -> Self {
        self.0.insert(name.to_string(), block);
        self
    }
}

impl ConfigProvider for MapConfig {
    fn get_component_config(&self, component_name: &str) -> Option<&serde_json::Value> {
        self.0.get(component_name)
    }

    fn component_names(&self) -> Vec<String> {
        self.0.keys().cloned().collect()
    }
}

pub fn position(order: &[String], name: &str) -> usize {
    order
        .iter()
        .position(|n| n == name)
        .unwrap_or_else(|| panic!("{name} missing from {order:?}"))
}
