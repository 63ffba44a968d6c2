//! 控制器与回收器测试共用的内存网关

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::config::DeploymentTarget;
use crate::domain::{
    HealthCheck, HealthStatus, ImageDescriptor, ImageFamily, PortBinding, RemoveOutcome,
    ResourceLimits, RestartPolicy, RunSpec, StopOutcome,
};
use crate::infra::gateway::{ContainerRuntime, GatewayError, SourceControl};

/// 容器名与仓库名均为 `name`、标签 `dev`、保留 2 个镜像的部署目标
pub fn target(name: &str) -> DeploymentTarget {
    DeploymentTarget {
        name: "dev".to_string(),
        branch: "develop".to_string(),
        remote: "origin".to_string(),
        work_dir: PathBuf::from("/srv").join(name),
        repository: name.to_string(),
        tag: "dev".to_string(),
        container: name.to_string(),
        env_file: Some(PathBuf::from("/srv").join(name).join(".env.dev")),
        dockerfile: PathBuf::from("/srv").join(name).join("Dockerfile"),
        build_context: PathBuf::from("/srv").join(name),
        network: Some("svc-net".to_string()),
        restart: RestartPolicy::UnlessStopped,
        port: PortBinding { host: 8001, container: 8000 },
        limits: ResourceLimits {
            memory: Some("1g".to_string()),
            cpus: Some("1.0".to_string()),
        },
        health: HealthCheck {
            command: "curl -f http://localhost:8000/health || exit 1".to_string(),
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(5),
            retries: 3,
            start_period: None,
        },
        poll_interval: Duration::from_secs(2),
        health_budget: Duration::from_secs(60),
        log_tail: 50,
        family: ImageFamily::new(name, 2),
    }
}

/// 创建于 unix 时间 `t` 秒的镜像
pub fn image(id: &str, repository: &str, tag: &str, t: i64) -> ImageDescriptor {
    let created_at = Utc.timestamp_opt(t, 0).single().unwrap_or_default();
    ImageDescriptor::new(id, repository, tag, created_at)
}

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub id: String,
    pub image: String,
    pub running: bool,
}

pub struct FakeState {
    pub containers: BTreeMap<String, FakeContainer>,
    pub images: Vec<ImageDescriptor>,
    pub dangling: usize,
    pub networks: HashSet<String>,
    /// 按顺序记录的网关调用（不含健康查询）
    pub calls: Vec<String>,
    pub health_polls: u32,
    pub health_script: VecDeque<HealthStatus>,
    pub steady_health: HealthStatus,
    pub logs: String,
    pub undeletable: HashSet<String>,
    pub fail_stop: bool,
    pub fail_list: bool,
    pub fail_prune: bool,
    pub fail_build: bool,
    pub fail_run: bool,
    /// 停止后容器自行消失（`--rm`）
    pub auto_remove: bool,
    clock: i64,
    next_container: u32,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            containers: BTreeMap::new(),
            images: Vec::new(),
            dangling: 0,
            networks: HashSet::new(),
            calls: Vec::new(),
            health_polls: 0,
            health_script: VecDeque::new(),
            steady_health: HealthStatus::Healthy,
            logs: String::new(),
            undeletable: HashSet::new(),
            fail_stop: false,
            fail_list: false,
            fail_prune: false,
            fail_build: false,
            fail_run: false,
            auto_remove: false,
            clock: 1_000,
            next_container: 0,
        }
    }
}

#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<FakeState>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(configure: impl FnOnce(&mut FakeState)) -> Self {
        let runtime = Self::new();
        configure(&mut runtime.state());
        runtime
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn called(&self, prefix: &str) -> bool {
        self.state().calls.iter().any(|c| c.starts_with(prefix))
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn stop_container(&self, name: &str) -> Result<StopOutcome, GatewayError> {
        let mut state = self.state();
        state.calls.push(format!("stop {}", name));
        if state.fail_stop {
            return Err(GatewayError::failed(
                format!("docker stop {}", name),
                "Cannot connect to the Docker daemon",
            ));
        }
        let auto_remove = state.auto_remove;
        match state.containers.get_mut(name) {
            Some(container) => {
                container.running = false;
                if auto_remove {
                    state.containers.remove(name);
                }
                Ok(StopOutcome::Stopped)
            }
            None => Ok(StopOutcome::NotFound),
        }
    }

    async fn remove_container(&self, name: &str) -> Result<RemoveOutcome, GatewayError> {
        let mut state = self.state();
        state.calls.push(format!("rm {}", name));
        match state.containers.get(name) {
            Some(container) if container.running => Err(GatewayError::failed(
                format!("docker rm {}", name),
                "You cannot remove a running container",
            )),
            Some(_) => {
                state.containers.remove(name);
                Ok(RemoveOutcome::Removed)
            }
            None => Ok(RemoveOutcome::NotFound),
        }
    }

    async fn list_images(&self, family: &ImageFamily) -> Result<Vec<ImageDescriptor>, GatewayError> {
        let mut state = self.state();
        state.calls.push(format!("images {}", family.reference_filter()));
        if state.fail_list {
            return Err(GatewayError::failed("docker images", "daemon unavailable"));
        }
        let tag_prefix = family.tag_filter.as_deref().map(|t| t.trim_end_matches('*'));
        Ok(state
            .images
            .iter()
            .filter(|img| img.repository == family.repository)
            .filter(|img| tag_prefix.map_or(true, |p| img.tag.starts_with(p)))
            .cloned()
            .collect())
    }

    /// 与 docker 一致：按标签移除只去掉该标签，按 ID 删除多标签镜像会被拒绝
    async fn remove_image(&self, reference: &str) -> Result<(), GatewayError> {
        let mut state = self.state();
        state.calls.push(format!("rmi {}", reference));
        let command = format!("docker rmi {}", reference);

        let by_id = state.images.iter().any(|img| img.id == reference);
        let id = match state.images.iter().find(|img| img.id == reference || img.reference() == reference) {
            Some(img) => img.id.clone(),
            None => {
                return Err(GatewayError::failed(
                    command,
                    format!("Error response from daemon: No such image: {}", reference),
                ))
            }
        };

        if state.undeletable.contains(&id) {
            return Err(GatewayError::failed(
                command,
                "image is being used by running container",
            ));
        }

        if by_id {
            let tags = state
                .images
                .iter()
                .filter(|img| img.id == id && !img.is_dangling())
                .count();
            if tags > 1 {
                return Err(GatewayError::failed(
                    command,
                    format!(
                        "conflict: unable to delete {} (must be forced) - image is referenced in multiple repositories",
                        id
                    ),
                ));
            }
            state.images.retain(|img| img.id != id);
        } else {
            state.images.retain(|img| img.reference() != reference);
        }
        Ok(())
    }

    async fn prune_dangling_images(&self) -> Result<usize, GatewayError> {
        let mut state = self.state();
        state.calls.push("prune".to_string());
        if state.fail_prune {
            return Err(GatewayError::failed("docker image prune -f", "prune already running"));
        }
        Ok(std::mem::take(&mut state.dangling))
    }

    async fn build_image(
        &self,
        _context: &Path,
        _dockerfile: &Path,
        tag: &str,
    ) -> Result<String, GatewayError> {
        let mut state = self.state();
        state.calls.push(format!("build {}", tag));
        if state.fail_build {
            return Err(GatewayError::failed(
                "docker build",
                "failed to solve: failed to read dockerfile",
            ));
        }

        let (repository, tag_name) = tag.rsplit_once(':').unwrap_or((tag, "latest"));
        // 旧镜像失去标签后变为悬空镜像
        let before = state.images.len();
        state.images.retain(|img| img.reference() != tag);
        state.dangling += before - state.images.len();

        state.clock += 1;
        let id = format!("sha256:{:04}", state.clock);
        let built = image(&id, repository, tag_name, state.clock);
        state.images.push(built);
        Ok(id)
    }

    async fn ensure_network(&self, name: &str) -> Result<(), GatewayError> {
        let mut state = self.state();
        state.calls.push(format!("network {}", name));
        state.networks.insert(name.to_string());
        Ok(())
    }

    async fn run_container(&self, spec: &RunSpec) -> Result<String, GatewayError> {
        let mut state = self.state();
        state.calls.push(format!("run {}", spec.name));
        if state.fail_run || state.containers.contains_key(&spec.name) {
            return Err(GatewayError::failed(
                "docker run",
                format!("Conflict. The container name \"/{}\" is already in use", spec.name),
            ));
        }
        state.next_container += 1;
        let id = format!("ctr-{}", state.next_container);
        state.containers.insert(
            spec.name.clone(),
            FakeContainer {
                id: id.clone(),
                image: spec.image.clone(),
                running: true,
            },
        );
        Ok(id)
    }

    async fn health_status(&self, name: &str) -> Result<HealthStatus, GatewayError> {
        let mut state = self.state();
        state.health_polls += 1;
        if !state.containers.contains_key(name) {
            return Err(GatewayError::failed(
                format!("docker inspect {}", name),
                format!("Error: No such container: {}", name),
            ));
        }
        let steady = state.steady_health;
        Ok(state.health_script.pop_front().unwrap_or(steady))
    }

    async fn logs(&self, name: &str, tail: usize) -> Result<String, GatewayError> {
        let mut state = self.state();
        state.calls.push(format!("logs {} {}", name, tail));
        let lines: Vec<&str> = state.logs.lines().collect();
        let start = lines.len().saturating_sub(tail);
        Ok(lines[start..].join("\n"))
    }
}

#[derive(Default)]
pub struct FakeSourceState {
    pub calls: Vec<String>,
    pub fail_pull: bool,
    pub revision: Option<String>,
}

#[derive(Default)]
pub struct FakeSource {
    state: Mutex<FakeSourceState>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::with(|s| s.revision = Some("a1b2c3d".to_string()))
    }

    pub fn with(configure: impl FnOnce(&mut FakeSourceState)) -> Self {
        let source = Self::default();
        configure(&mut source.state());
        source
    }

    pub fn state(&self) -> MutexGuard<'_, FakeSourceState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }
}

#[async_trait]
impl SourceControl for FakeSource {
    async fn fetch(&self) -> Result<(), GatewayError> {
        self.state().calls.push("fetch".to_string());
        Ok(())
    }

    async fn checkout(&self, reference: &str) -> Result<(), GatewayError> {
        self.state().calls.push(format!("checkout {}", reference));
        Ok(())
    }

    async fn pull(&self, reference: &str) -> Result<(), GatewayError> {
        let mut state = self.state();
        state.calls.push(format!("pull {}", reference));
        if state.fail_pull {
            return Err(GatewayError::failed(
                format!("git pull --ff-only origin {}", reference),
                "fatal: Not possible to fast-forward, aborting.",
            ));
        }
        Ok(())
    }

    async fn head_revision(&self) -> Result<String, GatewayError> {
        self.state()
            .revision
            .clone()
            .ok_or_else(|| GatewayError::failed("git rev-parse --short HEAD", "not a git repository"))
    }
}
