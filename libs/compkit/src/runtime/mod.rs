mod component_manager;
mod dependency_context;
mod host_runtime;
mod runner;

pub use component_manager::ComponentManager;
pub use dependency_context::{DependencyContext, Settled};
pub use host_runtime::HostRuntime;
pub use runner::{run, RunOptions, ShutdownOptions};
