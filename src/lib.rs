pub mod config;
pub mod executor;
pub mod harvest;
pub mod model;
pub mod sink;
pub mod traits;

// Re-export common types for convenience
pub use config::{load_config, parse_config, ConfigError, CycleFailurePolicy, HarvestSettings};
pub use executor::*;
pub use model::*;
pub use sink::{ChannelSink, JsonLinesSink};
pub use traits::*;
