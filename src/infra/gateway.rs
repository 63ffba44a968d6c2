//! 外部协作方接口
//!
//! 控制器与回收器只通过这两个 trait 访问容器运行时与源码仓库

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

use crate::domain::{
    HealthStatus, ImageDescriptor, ImageFamily, RemoveOutcome, RunSpec, StopOutcome,
};
use crate::infra::command::CommandError;

/// 网关调用错误
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Command(#[from] CommandError),

    /// 命令以非零状态退出
    #[error("`{command}` failed: {stderr}")]
    Failed { command: String, stderr: String },

    /// 输出无法解析
    #[error("Unexpected output from `{command}`: {detail}")]
    Parse { command: String, detail: String },
}

impl GatewayError {
    pub fn failed(command: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::Failed {
            command: command.into(),
            stderr: stderr.into(),
        }
    }

    pub fn parse(command: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Parse {
            command: command.into(),
            detail: detail.into(),
        }
    }
}

/// 容器运行时网关
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// 停止容器；不存在时返回 [`StopOutcome::NotFound`]
    async fn stop_container(&self, name: &str) -> Result<StopOutcome, GatewayError>;

    /// 删除容器；不存在时返回 [`RemoveOutcome::NotFound`]
    async fn remove_container(&self, name: &str) -> Result<RemoveOutcome, GatewayError>;

    async fn list_images(&self, family: &ImageFamily) -> Result<Vec<ImageDescriptor>, GatewayError>;

    /// 按 `repository:tag` 移除标签，或按 ID 删除镜像；
    /// 最后一个标签被移除时镜像本身随之删除
    async fn remove_image(&self, reference: &str) -> Result<(), GatewayError>;

    /// 清理无标签镜像，返回删除数量
    async fn prune_dangling_images(&self) -> Result<usize, GatewayError>;

    /// 无缓存构建镜像，返回镜像 ID
    async fn build_image(
        &self,
        context: &Path,
        dockerfile: &Path,
        tag: &str,
    ) -> Result<String, GatewayError>;

    /// 网络不存在时创建
    async fn ensure_network(&self, name: &str) -> Result<(), GatewayError>;

    /// 启动容器，返回容器 ID
    async fn run_container(&self, spec: &RunSpec) -> Result<String, GatewayError>;

    async fn health_status(&self, name: &str) -> Result<HealthStatus, GatewayError>;

    async fn logs(&self, name: &str, tail: usize) -> Result<String, GatewayError>;
}

/// 源码仓库网关
#[async_trait]
pub trait SourceControl: Send + Sync {
    async fn fetch(&self) -> Result<(), GatewayError>;

    async fn checkout(&self, reference: &str) -> Result<(), GatewayError>;

    /// 只允许 fast-forward
    async fn pull(&self, reference: &str) -> Result<(), GatewayError>;

    /// 当前 HEAD 的短哈希
    async fn head_revision(&self) -> Result<String, GatewayError>;
}
