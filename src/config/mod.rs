//! 配置模块
//!
//! 静态部署目标配置与默认常量

pub mod constants;
pub mod target;

pub use target::{ConfigError, DeployConfig, DeploymentTarget, TargetConfig};
