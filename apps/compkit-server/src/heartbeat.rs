//! Demo component: ticks in the background between load and teardown and
//! publishes its tick count as statistics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use compkit::{Component, ComponentConfig, ComponentContext, ComponentFactory, ComponentList};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use statistics_storage::{StatisticsEntry, StatisticsStorageComponent};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const NAME: &str = "heartbeat";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct HeartbeatConfig {
    #[serde(default = "default_interval", with = "humantime_serde")]
    interval: Duration,
}

fn default_interval() -> Duration {
    Duration::from_secs(30)
}

pub struct Heartbeat {
    interval: Duration,
    beats: Arc<AtomicU64>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    _entry: StatisticsEntry,
    _statistics: Arc<StatisticsStorageComponent>,
}

impl Heartbeat {
    pub async fn create(cfg: ComponentConfig, ctx: ComponentContext) -> anyhow::Result<Self> {
        let cfg: HeartbeatConfig = cfg.parse()?;
        if cfg.interval.is_zero() {
            anyhow::bail!("heartbeat interval must be positive");
        }

        let statistics = ctx
            .find::<StatisticsStorageComponent>(StatisticsStorageComponent::NAME)
            .await?;
        let beats = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&beats);
        let entry = statistics.storage().register_extender(NAME, move |_| {
            json!({"beats": counter.load(Ordering::Relaxed)})
        });

        Ok(Self {
            interval: cfg.interval,
            beats,
            cancel: ctx.cancellation_token(),
            task: Mutex::new(None),
            _entry: entry,
            _statistics: statistics,
        })
    }
}

#[async_trait]
impl Component for Heartbeat {
    async fn on_all_components_loaded(&self) -> anyhow::Result<()> {
        let beats = Arc::clone(&self.beats);
        let cancel = self.cancel.clone();
        let interval = self.interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let n = beats.fetch_add(1, Ordering::Relaxed) + 1;
                        tracing::info!(beats = n, "heartbeat");
                    }
                }
            }
        });
        *self.task.lock() = Some(handle);
        tracing::info!(interval = ?self.interval, "Heartbeat started");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.cancel.cancel();
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            handle.await?;
        }
        tracing::info!(beats = self.beats.load(Ordering::Relaxed), "Heartbeat stopped");
        Ok(())
    }
}

fn register(list: &mut ComponentList) {
    list.add(NAME, ComponentFactory::new(Heartbeat::create));
}

inventory::submit! {
    compkit::Registrator(register)
}
