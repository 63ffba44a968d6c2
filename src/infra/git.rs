//! 基于 git CLI 的源码仓库

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::constants::GIT_TIMEOUT_SECS;
use crate::infra::command::CommandRunner;
use crate::infra::gateway::{GatewayError, SourceControl};

/// 在工作目录中执行 `git`
pub struct GitCli {
    work_dir: PathBuf,
    remote: String,
    timeout: Duration,
}

impl GitCli {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            remote: "origin".to_string(),
            timeout: Duration::from_secs(GIT_TIMEOUT_SECS),
        }
    }

    /// 远端名，默认 `origin`
    pub fn with_remote(mut self, remote: impl Into<String>) -> Self {
        self.remote = remote.into();
        self
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    async fn git(&self, args: &[&str]) -> Result<String, GatewayError> {
        let command = format!("git {}", args.join(" "));
        debug!(command = %command, work_dir = %self.work_dir.display(), "Running git");

        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        let output =
            CommandRunner::run_simple("git", &args, Some(&self.work_dir), self.timeout).await?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(GatewayError::failed(command, stderr));
        }
        if !stdout.is_empty() {
            info!(stream = "stdout", "{}", stdout);
        }
        Ok(stdout)
    }
}

#[async_trait]
impl SourceControl for GitCli {
    async fn fetch(&self) -> Result<(), GatewayError> {
        self.git(&["fetch", "--prune", self.remote.as_str()]).await.map(|_| ())
    }

    async fn checkout(&self, reference: &str) -> Result<(), GatewayError> {
        self.git(&["checkout", reference]).await.map(|_| ())
    }

    async fn pull(&self, reference: &str) -> Result<(), GatewayError> {
        self.git(&["pull", "--ff-only", self.remote.as_str(), reference])
            .await
            .map(|_| ())
    }

    async fn head_revision(&self) -> Result<String, GatewayError> {
        self.git(&["rev-parse", "--short", "HEAD"]).await
    }
}
