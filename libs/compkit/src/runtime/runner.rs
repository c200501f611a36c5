//! Compkit runtime runner.
//!
//! Design notes:
//! - The registry is built from an explicit or discovered [`ComponentList`]
//!   plus the per-component config blocks.
//! - Phase order: **load → serve → teardown**.
//! - Shutdown can be driven by OS signals, an external `CancellationToken`,
//!   or an arbitrary future.

use std::{future::Future, pin::Pin, sync::Arc};

use compkit_bootstrap::{wait_for_shutdown, ManagerConfig};
use tokio_util::sync::CancellationToken;

use crate::config::ConfigProvider;
use crate::registry::ComponentList;
use crate::runtime::HostRuntime;

/// How the runtime should decide when to stop.
pub enum ShutdownOptions {
    /// Listen for OS signals (Ctrl+C / SIGTERM).
    Signals,
    /// An external `CancellationToken` controls the lifecycle.
    Token(CancellationToken),
    /// An arbitrary future; when it completes, we initiate shutdown.
    Future(Pin<Box<dyn Future<Output = ()> + Send>>),
}

/// Options for running the compkit runner.
pub struct RunOptions {
    /// Components to construct, in registry order.
    pub components: ComponentList,
    /// Provider of component config blocks (raw JSON by component name).
    pub config: Arc<dyn ConfigProvider>,
    /// Construction timeout and teardown grace.
    pub manager: ManagerConfig,
    /// Shutdown strategy.
    pub shutdown: ShutdownOptions,
}

/// Full cycle: load → serve → teardown.
///
/// Thin wrapper around [`HostRuntime`] that sets up the shutdown trigger.
pub async fn run(opts: RunOptions) -> anyhow::Result<()> {
    let cancel = match &opts.shutdown {
        ShutdownOptions::Token(t) => t.clone(),
        _ => CancellationToken::new(),
    };

    match opts.shutdown {
        ShutdownOptions::Signals => {
            let c = cancel.clone();
            tokio::spawn(async move {
                match wait_for_shutdown().await {
                    Ok(signal) => {
                        tracing::info!(?signal, "shutdown: signal received");
                    }
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            "shutdown: primary waiter failed; falling back to ctrl_c()"
                        );
                        let _ = tokio::signal::ctrl_c().await;
                    }
                }
                c.cancel();
            });
        }
        ShutdownOptions::Future(waiter) => {
            let c = cancel.clone();
            tokio::spawn(async move {
                waiter.await;
                tracing::info!("shutdown: external future completed");
                c.cancel();
            });
        }
        ShutdownOptions::Token(_) => {
            tracing::info!("shutdown: external token will control lifecycle");
        }
    }

    let registry = opts.components.build(opts.config.as_ref())?;
    let host = HostRuntime::new(registry, opts.manager, cancel);
    host.run_full_cycle().await
}
