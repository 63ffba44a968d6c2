//! 容器相关领域模型

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// 停止容器的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    /// 不存在同名容器（首次部署）
    NotFound,
}

/// 删除容器的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    NotFound,
}

/// 运行时上报的健康状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Starting,
    Healthy,
    Unhealthy,
    /// 容器未配置健康检查
    None,
}

impl HealthStatus {
    /// 解析 `docker inspect` 输出的 `.State.Health.Status`
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "starting" => Some(Self::Starting),
            "healthy" => Some(Self::Healthy),
            "unhealthy" => Some(Self::Unhealthy),
            "none" | "" => Some(Self::None),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
            Self::None => "none",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 端口映射，宿主端只绑定回环地址
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    pub host: u16,
    pub container: u16,
}

impl fmt::Display for PortBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "127.0.0.1:{}:{}", self.host, self.container)
    }
}

/// 资源限制
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// e.g. "1g", "512m"
    pub memory: Option<String>,
    /// e.g. "1.5"
    pub cpus: Option<String>,
}

/// 嵌入容器的健康检查
#[derive(Debug, Clone, PartialEq)]
pub struct HealthCheck {
    pub command: String,
    pub interval: Duration,
    pub timeout: Duration,
    pub retries: u32,
    pub start_period: Option<Duration>,
}

/// 重启策略，配置中写作 `"no"` / `"unless-stopped"`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    No,
    #[default]
    UnlessStopped,
}

impl RestartPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::No => "no",
            Self::UnlessStopped => "unless-stopped",
        }
    }
}

/// 启动新容器所需的全部参数
#[derive(Debug, Clone, PartialEq)]
pub struct RunSpec {
    pub image: String,
    pub name: String,
    pub env_file: Option<PathBuf>,
    pub limits: ResourceLimits,
    pub port: PortBinding,
    pub network: Option<String>,
    pub restart: RestartPolicy,
    pub health: HealthCheck,
}

impl RunSpec {
    /// `docker run` 参数，始终以 `-d` 后台运行
    pub fn docker_args(&self) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            self.name.clone(),
        ];

        if let Some(env_file) = &self.env_file {
            args.push("--env-file".to_string());
            args.push(env_file.display().to_string());
        }
        if let Some(memory) = &self.limits.memory {
            args.push("--memory".to_string());
            args.push(memory.clone());
        }
        if let Some(cpus) = &self.limits.cpus {
            args.push("--cpus".to_string());
            args.push(cpus.clone());
        }

        args.push("-p".to_string());
        args.push(self.port.to_string());

        if let Some(network) = &self.network {
            args.push("--network".to_string());
            args.push(network.clone());
        }

        args.push("--restart".to_string());
        args.push(self.restart.as_str().to_string());

        args.push("--health-cmd".to_string());
        args.push(self.health.command.clone());
        args.push("--health-interval".to_string());
        args.push(format_secs(self.health.interval));
        args.push("--health-timeout".to_string());
        args.push(format_secs(self.health.timeout));
        args.push("--health-retries".to_string());
        args.push(self.health.retries.to_string());
        if let Some(start_period) = self.health.start_period {
            args.push("--health-start-period".to_string());
            args.push(format_secs(start_period));
        }

        args.push(self.image.clone());
        args
    }
}

fn format_secs(d: Duration) -> String {
    format!("{}s", d.as_secs())
}
