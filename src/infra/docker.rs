//! 基于 docker CLI 的容器运行时

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::process::Output;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::constants::{BUILD_OUTPUT_TAIL_LINES, BUILD_TIMEOUT_SECS, COMMAND_TIMEOUT_SECS};
use crate::domain::{
    HealthStatus, ImageDescriptor, ImageFamily, RemoveOutcome, RunSpec, StopOutcome,
};
use crate::infra::command::CommandRunner;
use crate::infra::gateway::{ContainerRuntime, GatewayError};

const IMAGE_FORMAT: &str = "{{.ID}}|{{.Repository}}|{{.Tag}}|{{.CreatedAt}}";
const HEALTH_FORMAT: &str = "{{if .State.Health}}{{.State.Health.Status}}{{else}}none{{end}}";

/// 通过 `docker` 命令驱动的容器运行时
pub struct DockerCli {
    program: String,
    command_timeout: Duration,
    build_timeout: Duration,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self {
            program: "docker".to_string(),
            command_timeout: Duration::from_secs(COMMAND_TIMEOUT_SECS),
            build_timeout: Duration::from_secs(BUILD_TIMEOUT_SECS),
        }
    }
}

impl DockerCli {
    pub fn new() -> Self {
        Self::default()
    }

    fn describe(&self, args: &[String]) -> String {
        format!("{} {}", self.program, args.join(" "))
    }

    async fn run(&self, args: Vec<String>) -> Result<Output, GatewayError> {
        debug!(command = %self.describe(&args), "Running docker command");
        Ok(CommandRunner::run_simple(&self.program, &args, None, self.command_timeout).await?)
    }

    /// 要求退出码为 0，返回去掉首尾空白的 stdout
    async fn run_checked(&self, args: Vec<String>) -> Result<String, GatewayError> {
        let command = self.describe(&args);
        let output = self.run(args).await?;
        if !output.status.success() {
            return Err(GatewayError::failed(command, stderr_of(&output)));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn stop_container(&self, name: &str) -> Result<StopOutcome, GatewayError> {
        let args = to_args(&["stop", name]);
        let command = self.describe(&args);
        let output = self.run(args).await?;

        if output.status.success() {
            return Ok(StopOutcome::Stopped);
        }
        let stderr = stderr_of(&output);
        if is_no_such_container(&stderr) {
            return Ok(StopOutcome::NotFound);
        }
        Err(GatewayError::failed(command, stderr))
    }

    async fn remove_container(&self, name: &str) -> Result<RemoveOutcome, GatewayError> {
        let args = to_args(&["rm", name]);
        let command = self.describe(&args);
        let output = self.run(args).await?;

        if output.status.success() {
            return Ok(RemoveOutcome::Removed);
        }
        let stderr = stderr_of(&output);
        if is_no_such_container(&stderr) {
            return Ok(RemoveOutcome::NotFound);
        }
        Err(GatewayError::failed(command, stderr))
    }

    async fn list_images(&self, family: &ImageFamily) -> Result<Vec<ImageDescriptor>, GatewayError> {
        let mut args = to_args(&["images", "--format", IMAGE_FORMAT]);
        args.push("--filter".to_string());
        args.push(format!("reference={}", family.reference_filter()));
        if let Some(label) = &family.label_filter {
            args.push("--filter".to_string());
            args.push(format!("label={}", label));
        }

        let command = self.describe(&args);
        let stdout = self.run_checked(args).await?;
        parse_image_lines(&stdout).map_err(|detail| GatewayError::parse(command, detail))
    }

    async fn remove_image(&self, reference: &str) -> Result<(), GatewayError> {
        self.run_checked(to_args(&["rmi", reference])).await.map(|_| ())
    }

    async fn prune_dangling_images(&self) -> Result<usize, GatewayError> {
        let stdout = self.run_checked(to_args(&["image", "prune", "-f"])).await?;
        Ok(count_pruned(&stdout))
    }

    async fn build_image(
        &self,
        context: &Path,
        dockerfile: &Path,
        tag: &str,
    ) -> Result<String, GatewayError> {
        let args = vec![
            "build".to_string(),
            "--no-cache".to_string(),
            "--progress=plain".to_string(),
            "-t".to_string(),
            tag.to_string(),
            "-f".to_string(),
            dockerfile.display().to_string(),
            context.display().to_string(),
        ];
        let command = self.describe(&args);
        info!(command = %command, "Building image");

        let result = CommandRunner::run_with_streaming(
            &self.program,
            &args,
            context,
            self.build_timeout,
            BUILD_OUTPUT_TAIL_LINES,
        )
        .await?;

        if !result.status.success() {
            return Err(GatewayError::failed(command, result.tail.join("\n")));
        }

        self.run_checked(to_args(&["image", "inspect", "--format", "{{.Id}}", tag]))
            .await
    }

    async fn ensure_network(&self, name: &str) -> Result<(), GatewayError> {
        let output = self.run(to_args(&["network", "inspect", name])).await?;
        if output.status.success() {
            return Ok(());
        }

        info!(network = %name, "Network missing, creating");
        self.run_checked(to_args(&["network", "create", name]))
            .await
            .map(|_| ())
    }

    async fn run_container(&self, spec: &RunSpec) -> Result<String, GatewayError> {
        let container_id = self.run_checked(spec.docker_args()).await?;
        Ok(container_id)
    }

    async fn health_status(&self, name: &str) -> Result<HealthStatus, GatewayError> {
        let args = health_args(name);
        let command = self.describe(&args);
        let stdout = self.run_checked(args).await?;
        HealthStatus::parse(&stdout)
            .ok_or_else(|| GatewayError::parse(command, format!("unknown health status '{}'", stdout)))
    }

    async fn logs(&self, name: &str, tail: usize) -> Result<String, GatewayError> {
        let args = vec![
            "logs".to_string(),
            "--tail".to_string(),
            tail.to_string(),
            name.to_string(),
        ];
        let command = self.describe(&args);
        let output = self.run(args).await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(GatewayError::failed(command, stderr.trim()));
        }

        // docker logs 把容器的 stdout / stderr 原样分开输出
        let lines: Vec<&str> = stdout
            .lines()
            .chain(stderr.lines())
            .filter(|line| !line.is_empty())
            .collect();
        Ok(lines.join("\n"))
    }
}

/// `docker image prune` 只列出真正删除的镜像（`deleted: sha256:...`），
/// 仍被容器引用的悬空镜像不会出现
fn count_pruned(stdout: &str) -> usize {
    stdout
        .lines()
        .filter(|line| line.trim_start().to_lowercase().starts_with("deleted:"))
        .count()
}

/// 限定 `--type container`，避免同名镜像被 inspect 到
fn health_args(name: &str) -> Vec<String> {
    to_args(&["inspect", "--type", "container", "--format", HEALTH_FORMAT, name])
}

fn to_args(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

fn is_no_such_container(stderr: &str) -> bool {
    stderr.to_lowercase().contains("no such container")
}

/// 解析 `docker images --format 'ID|Repository|Tag|CreatedAt'` 的输出
fn parse_image_lines(stdout: &str) -> Result<Vec<ImageDescriptor>, String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let parts: Vec<&str> = line.splitn(4, '|').collect();
            if parts.len() != 4 {
                return Err(format!("malformed image line '{}'", line));
            }
            let created_at = parse_created_at(parts[3])
                .ok_or_else(|| format!("bad creation time '{}'", parts[3]))?;
            Ok(ImageDescriptor::new(parts[0], parts[1], parts[2], created_at))
        })
        .collect()
}

/// `2024-01-15 10:30:00 +0000 UTC` → UTC 时间，忽略末尾的时区名
fn parse_created_at(raw: &str) -> Option<DateTime<Utc>> {
    let head: Vec<&str> = raw.split_whitespace().take(3).collect();
    if head.len() != 3 {
        return None;
    }
    DateTime::parse_from_str(&head.join(" "), "%Y-%m-%d %H:%M:%S %z")
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
