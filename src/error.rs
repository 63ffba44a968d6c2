//! 统一错误处理
//!
//! 切换流程中任一致命错误都会让控制器立即停止，不做回滚

use std::time::Duration;
use thiserror::Error;

use crate::domain::{CutoverStep, HealthStatus};
use crate::infra::GatewayError;

/// 切换流程错误
#[derive(Debug, Error)]
pub enum CutoverError {
    /// fetch / checkout / pull 失败
    #[error("Source sync failed: {0}")]
    SourceSync(#[source] GatewayError),

    /// 运行时调用失败（非“容器不存在”）
    #[error("Container runtime error during {step}: {source}")]
    TransientRuntime {
        step: CutoverStep,
        #[source]
        source: GatewayError,
    },

    /// 镜像构建失败
    #[error("Image build failed: {0}")]
    BuildFailure(#[source] GatewayError),

    /// 预算内未达到 healthy
    #[error("Container '{container}' not healthy after {budget:?} (last status: {last_status})")]
    HealthTimeout {
        container: String,
        budget: Duration,
        last_status: HealthStatus,
        log_tail: String,
    },

    /// 用户取消
    #[error("Deployment cancelled by user")]
    UserCancelled,
}

impl CutoverError {
    pub fn runtime(step: CutoverStep, source: GatewayError) -> Self {
        Self::TransientRuntime { step, source }
    }

    /// 出错的步骤
    pub fn step(&self) -> Option<CutoverStep> {
        match self {
            CutoverError::SourceSync(_) => Some(CutoverStep::Fetching),
            CutoverError::TransientRuntime { step, .. } => Some(*step),
            CutoverError::BuildFailure(_) => Some(CutoverStep::Building),
            CutoverError::HealthTimeout { .. } => Some(CutoverStep::HealthPolling),
            CutoverError::UserCancelled => None,
        }
    }

    /// 诊断用的容器日志
    pub fn log_tail(&self) -> Option<&str> {
        match self {
            CutoverError::HealthTimeout { log_tail, .. } => Some(log_tail),
            _ => None,
        }
    }

    /// 所有错误（包括用户取消）都以 1 退出
    pub fn exit_code(&self) -> i32 {
        1
    }
}

/// 便捷类型别名
pub type CutoverResult<T> = Result<T, CutoverError>;
