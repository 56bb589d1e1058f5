pub mod config;
pub mod duration;

pub use config::{ConfigError, ControllerConfig, OperatorConfig, PodTemplateConfig, StateConfig};
pub use duration::parse_duration;
