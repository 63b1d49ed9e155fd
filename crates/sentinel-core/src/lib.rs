//! sentinel-core — configuration and small shared helpers.

pub mod config;
pub mod duration;

pub use config::{
    DatabaseConfig, EndpointConfig, PerformanceConfig, PolicyConfig, RoutesConfig, RuntimeConfig,
    SchedulerConfig, SecurityConfig, SentinelConfig, StorageConfig, TargetConfig,
};
pub use duration::{epoch_millis, parse_duration};
