//! # Compkit - concurrent component construction
//!
//! A component is built by an async factory that may look up other components
//! while it runs. Lookups suspend until the dependency is constructed, so the
//! dependency graph is discovered at runtime instead of being declared.
//!
//! - **Concurrent**: one task per component; independent components build in parallel.
//! - **Deadlock-free**: lookups that would close a cycle fail with `CyclicDependency`.
//! - **Fail-fast**: the first failure cancels every other construction.
//! - **Ordered teardown**: components stop in the reverse of the order they became Ready.
//!
//! ## Example
//!
//! ```rust,ignore
//! use compkit::{Component, ComponentConfig, ComponentContext, ComponentList};
//! use std::sync::Arc;
//!
//! struct Http {
//!     config: Arc<Config>,
//! }
//! impl Component for Http {}
//!
//! async fn make_http(_cfg: ComponentConfig, ctx: ComponentContext) -> anyhow::Result<Http> {
//!     let config = ctx.find::<Config>("config").await?;
//!     Ok(Http { config })
//! }
//!
//! let components = ComponentList::new()
//!     .append("config", make_config)
//!     .append("http", make_http);
//! ```
//!
//! Component crates can instead register themselves for discovery:
//!
//! ```rust,ignore
//! compkit::inventory::submit! {
//!     compkit::Registrator(|list| {
//!         list.add("http", compkit::ComponentFactory::new(make_http));
//!     })
//! }
//! ```

pub use anyhow::Result;
pub use async_trait::async_trait;

// Re-export inventory for user convenience
pub use inventory;

pub mod config;
pub mod context;
pub mod contracts;
pub mod error;
pub mod registry;
pub mod runtime;
pub mod state;

pub use config::{ComponentConfig, ConfigError, ConfigProvider};
pub use context::{ComponentContext, LoadMonitor};
pub use contracts::{Component, ComponentFactory, ComponentHandle};
pub use error::{error_chain, CancelledComponent, ComponentError, FailedComponent, LoadError};
pub use registry::{ComponentList, ComponentRegistry, Registrator, RegistryEntry, RegistryError};
pub use runtime::{run, ComponentManager, HostRuntime, RunOptions, ShutdownOptions};
pub use state::{ComponentSnapshot, ComponentState, ManagerSnapshot, RunState};

pub use compkit_bootstrap::ManagerConfig;
