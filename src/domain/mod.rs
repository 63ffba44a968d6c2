//! 领域模型模块
//!
//! 纯数据结构，不依赖 tokio / 外部命令

pub mod container;
pub mod deploy;
pub mod image;

// Re-exports for convenience
pub use container::{
    HealthCheck, HealthStatus, PortBinding, RemoveOutcome, ResourceLimits, RestartPolicy,
    RunSpec, StopOutcome,
};
pub use deploy::{CutoverReport, CutoverState, CutoverStep, DeployStage, StageStatus};
pub use image::{ImageDescriptor, ImageFamily};
