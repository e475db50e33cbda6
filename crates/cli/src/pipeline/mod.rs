//! Relay orchestration module.

mod lifecycle;
mod orchestrator;
mod stats;

pub use lifecycle::TaskGroup;
pub use orchestrator::{Relay, RelayConfig, RelayMode};
pub use stats::RelayStats;
