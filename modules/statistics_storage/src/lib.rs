//! Statistics storage component: extenders register subtrees under a dotted
//! prefix and the whole tree is collected on demand.

pub mod format;
pub mod module;
pub mod storage;

pub use format::{render, FormatError, StatsFormat};
pub use module::StatisticsStorageComponent;
pub use storage::{StatisticsEntry, StatisticsRequest, Storage};
