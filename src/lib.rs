//! cutover - 单机容器切换与镜像保留
//!
//! 从源码仓库拉取、停止并删除旧容器、清理旧镜像、无缓存重建、
//! 启动新容器并等待其健康

pub mod config;
pub mod domain;
pub mod error;
pub mod infra;
pub mod services;

#[cfg(test)]
mod testing;

pub use config::{DeployConfig, DeploymentTarget};
pub use error::{CutoverError, CutoverResult};
pub use services::cutover::CutoverController;
pub use services::retention::{RetentionCollector, RetentionReport};
