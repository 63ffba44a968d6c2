//! 部署目标配置
//!
//! 从静态 TOML 文件加载，每个 `[targets.<name>]` 对应一个服务环境

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::config::constants::{
    DEFAULT_KEEP_IMAGES, HEALTHCHECK_INTERVAL_SECS, HEALTHCHECK_RETRIES, HEALTHCHECK_TIMEOUT_SECS,
    HEALTH_BUDGET_SECS, HEALTH_LOG_TAIL_LINES, HEALTH_POLL_INTERVAL_SECS,
};
use crate::domain::{
    HealthCheck, ImageFamily, PortBinding, ResourceLimits, RestartPolicy, RunSpec,
};

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Unknown target '{name}' (available: {available})")]
    UnknownTarget { name: String, available: String },

    #[error("Invalid target '{target}': {reason}")]
    Invalid { target: String, reason: String },
}

/// 配置文件
#[derive(Debug, Clone, Deserialize)]
pub struct DeployConfig {
    #[serde(default)]
    pub targets: BTreeMap<String, TargetConfig>,
    /// 配置文件所在目录，用于解析相对路径
    #[serde(skip)]
    base_dir: PathBuf,
}

/// 单个目标的原始配置
#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    /// Git 分支
    pub branch: String,
    /// Git 远端，默认 `origin`
    #[serde(default = "default_remote")]
    pub remote: String,
    /// 源码目录
    pub work_dir: PathBuf,
    /// 镜像仓库名（如 healthcare-api）
    pub repository: String,
    #[serde(default = "default_tag")]
    pub tag: String,
    /// 容器名称
    pub container: String,
    pub env_file: Option<PathBuf>,
    #[serde(default = "default_dockerfile")]
    pub dockerfile: PathBuf,
    #[serde(default = "default_build_context")]
    pub build_context: PathBuf,
    pub network: Option<String>,
    /// 重启策略，默认 `unless-stopped`
    #[serde(default)]
    pub restart: RestartPolicy,
    pub ports: PortsConfig,
    #[serde(default)]
    pub resources: ResourcesConfig,
    pub health: HealthConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PortsConfig {
    pub host: u16,
    pub container: u16,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourcesConfig {
    pub memory: Option<String>,
    pub cpus: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    /// 容器内执行的健康检查命令
    pub command: String,
    #[serde(default = "default_healthcheck_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_healthcheck_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_healthcheck_retries")]
    pub retries: u32,
    pub start_period_secs: Option<u64>,
    /// 部署侧轮询间隔
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// 部署侧等待 healthy 的总预算
    #[serde(default = "default_budget")]
    pub budget_secs: u64,
    #[serde(default = "default_log_tail")]
    pub log_tail: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_keep")]
    pub keep: usize,
    pub tag_filter: Option<String>,
    /// `key=value`
    pub label: Option<String>,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            keep: DEFAULT_KEEP_IMAGES,
            tag_filter: None,
            label: None,
        }
    }
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_tag() -> String {
    "latest".to_string()
}

fn default_dockerfile() -> PathBuf {
    PathBuf::from("Dockerfile")
}

fn default_build_context() -> PathBuf {
    PathBuf::from(".")
}

fn default_healthcheck_interval() -> u64 {
    HEALTHCHECK_INTERVAL_SECS
}

fn default_healthcheck_timeout() -> u64 {
    HEALTHCHECK_TIMEOUT_SECS
}

fn default_healthcheck_retries() -> u32 {
    HEALTHCHECK_RETRIES
}

fn default_poll_interval() -> u64 {
    HEALTH_POLL_INTERVAL_SECS
}

fn default_budget() -> u64 {
    HEALTH_BUDGET_SECS
}

fn default_log_tail() -> usize {
    HEALTH_LOG_TAIL_LINES
}

fn default_keep() -> usize {
    DEFAULT_KEEP_IMAGES
}

/// 解析后的部署目标，一次切换内不可变
#[derive(Debug, Clone)]
pub struct DeploymentTarget {
    pub name: String,
    pub branch: String,
    pub remote: String,
    pub work_dir: PathBuf,
    pub repository: String,
    pub tag: String,
    pub container: String,
    pub env_file: Option<PathBuf>,
    pub dockerfile: PathBuf,
    pub build_context: PathBuf,
    pub network: Option<String>,
    pub restart: RestartPolicy,
    pub port: PortBinding,
    pub limits: ResourceLimits,
    pub health: HealthCheck,
    pub poll_interval: Duration,
    pub health_budget: Duration,
    pub log_tail: usize,
    pub family: ImageFamily,
}

impl DeploymentTarget {
    /// `repository:tag`
    pub fn image(&self) -> String {
        format!("{}:{}", self.repository, self.tag)
    }

    pub fn run_spec(&self) -> RunSpec {
        RunSpec {
            image: self.image(),
            name: self.container.clone(),
            env_file: self.env_file.clone(),
            limits: self.limits.clone(),
            port: self.port,
            network: self.network.clone(),
            restart: self.restart,
            health: self.health.clone(),
        }
    }
}

impl DeployConfig {
    /// 从文件加载
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        // 构建时子进程的工作目录是构建上下文，传给 docker 的路径必须是绝对路径
        let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let base_dir = if parent.is_absolute() {
            parent
        } else {
            std::env::current_dir()
                .map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?
                .join(parent)
        };
        Self::from_toml(&content, base_dir)
    }

    pub fn from_toml(content: &str, base_dir: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let mut config: DeployConfig = toml::from_str(content)?;
        config.base_dir = base_dir.into();
        Ok(config)
    }

    pub fn target_names(&self) -> Vec<&str> {
        self.targets.keys().map(String::as_str).collect()
    }

    /// 解析并校验目标
    pub fn target(&self, name: &str) -> Result<DeploymentTarget, ConfigError> {
        let raw = self
            .targets
            .get(name)
            .ok_or_else(|| ConfigError::UnknownTarget {
                name: name.to_string(),
                available: self.target_names().join(", "),
            })?;

        let invalid = |reason: &str| ConfigError::Invalid {
            target: name.to_string(),
            reason: reason.to_string(),
        };

        for (field, value) in [
            ("branch", &raw.branch),
            ("remote", &raw.remote),
            ("repository", &raw.repository),
            ("tag", &raw.tag),
            ("container", &raw.container),
            ("health.command", &raw.health.command),
        ] {
            if value.trim().is_empty() {
                return Err(invalid(&format!("{} must not be empty", field)));
            }
        }
        if raw.ports.host == 0 || raw.ports.container == 0 {
            return Err(invalid("ports must be non-zero"));
        }
        if raw.health.poll_interval_secs == 0 {
            return Err(invalid("health.poll_interval_secs must be positive"));
        }
        if raw.health.poll_interval_secs > raw.health.budget_secs {
            return Err(invalid("health.poll_interval_secs exceeds health.budget_secs"));
        }

        let work_dir = resolve(&self.base_dir, &raw.work_dir);

        let mut family = ImageFamily::new(&raw.repository, raw.retention.keep);
        if let Some(tag) = &raw.retention.tag_filter {
            family = family.with_tag_filter(tag);
        }
        if let Some(label) = &raw.retention.label {
            family = family.with_label_filter(label);
        }

        Ok(DeploymentTarget {
            name: name.to_string(),
            branch: raw.branch.clone(),
            remote: raw.remote.clone(),
            env_file: raw.env_file.as_ref().map(|p| resolve(&work_dir, p)),
            dockerfile: resolve(&work_dir, &raw.dockerfile),
            build_context: resolve(&work_dir, &raw.build_context),
            work_dir,
            repository: raw.repository.clone(),
            tag: raw.tag.clone(),
            container: raw.container.clone(),
            network: raw.network.clone(),
            restart: raw.restart,
            port: PortBinding {
                host: raw.ports.host,
                container: raw.ports.container,
            },
            limits: ResourceLimits {
                memory: raw.resources.memory.clone(),
                cpus: raw.resources.cpus.clone(),
            },
            health: HealthCheck {
                command: raw.health.command.clone(),
                interval: Duration::from_secs(raw.health.interval_secs),
                timeout: Duration::from_secs(raw.health.timeout_secs),
                retries: raw.health.retries,
                start_period: raw.health.start_period_secs.map(Duration::from_secs),
            },
            poll_interval: Duration::from_secs(raw.health.poll_interval_secs),
            health_budget: Duration::from_secs(raw.health.budget_secs),
            log_tail: raw.health.log_tail,
            family,
        })
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
