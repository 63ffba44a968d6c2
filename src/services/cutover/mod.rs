//! 容器切换控制器
//!
//! 按固定顺序执行：拉取源码 → 停止旧容器 → 删除旧容器 → 镜像保留 →
//! 无缓存构建 → 启动新容器 → 健康检查。任一致命错误立即停止，不做回滚。

mod context;
pub mod health;

pub use context::CutoverContext;
pub use health::{wait_until_healthy, HealthPolicy, PollOutcome};

use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::DeploymentTarget;
use crate::domain::{CutoverReport, CutoverStep, RemoveOutcome, StageStatus, StopOutcome};
use crate::error::{CutoverError, CutoverResult};
use crate::infra::gateway::{ContainerRuntime, SourceControl};
use crate::services::retention::RetentionCollector;

/// 单个部署目标的切换控制器
pub struct CutoverController<'a> {
    runtime: &'a dyn ContainerRuntime,
    source: &'a dyn SourceControl,
    target: &'a DeploymentTarget,
}

impl<'a> CutoverController<'a> {
    pub fn new(
        runtime: &'a dyn ContainerRuntime,
        source: &'a dyn SourceControl,
        target: &'a DeploymentTarget,
    ) -> Self {
        Self {
            runtime,
            source,
            target,
        }
    }

    /// 执行一次完整切换，结果总是以报告形式返回
    pub async fn run(&self) -> CutoverReport {
        let run_id = Uuid::new_v4();
        let span = info_span!("cutover", run_id = %run_id, target = %self.target.name);

        async move {
            info!(
                image = %self.target.image(),
                container = %self.target.container,
                branch = %self.target.branch,
                "Starting cutover"
            );

            let mut ctx = CutoverContext::new(run_id);
            let result = self.execute(&mut ctx).await;
            ctx.finish(self.target, result)
        }
        .instrument(span)
        .await
    }

    async fn execute(&self, ctx: &mut CutoverContext) -> CutoverResult<()> {
        self.fetch(ctx).await?;
        self.stop_old(ctx).await?;
        self.remove_old(ctx).await?;
        self.retain_images(ctx).await;
        self.build(ctx).await?;
        self.start_new(ctx).await?;
        self.poll_health(ctx).await
    }

    async fn fetch(&self, ctx: &mut CutoverContext) -> CutoverResult<()> {
        ctx.enter(CutoverStep::Fetching);
        let branch = &self.target.branch;

        self.source.fetch().await.map_err(CutoverError::SourceSync)?;
        self.source
            .checkout(branch)
            .await
            .map_err(CutoverError::SourceSync)?;
        self.source
            .pull(branch)
            .await
            .map_err(CutoverError::SourceSync)?;

        match self.source.head_revision().await {
            Ok(revision) => {
                info!(branch = %branch, revision = %revision, "Source up to date");
                ctx.state.revision = Some(revision);
            }
            Err(e) => {
                warn!(branch = %branch, error = %e, "Failed to read HEAD revision");
            }
        }

        let revision = ctx.state.revision.clone();
        ctx.complete(StageStatus::Success, revision);
        Ok(())
    }

    async fn stop_old(&self, ctx: &mut CutoverContext) -> CutoverResult<()> {
        ctx.enter(CutoverStep::StoppingOld);
        let container = &self.target.container;

        let outcome = self
            .runtime
            .stop_container(container)
            .await
            .map_err(|e| CutoverError::runtime(CutoverStep::StoppingOld, e))?;

        match outcome {
            StopOutcome::Stopped => {
                info!(container = %container, "Stopped old container");
                ctx.state.previous_stopped = true;
                ctx.complete(StageStatus::Success, None);
            }
            StopOutcome::NotFound => {
                info!(container = %container, "No existing container to stop");
                ctx.complete(StageStatus::Absent, Some("no existing container".to_string()));
            }
        }
        Ok(())
    }

    async fn remove_old(&self, ctx: &mut CutoverContext) -> CutoverResult<()> {
        ctx.enter(CutoverStep::RemovingOld);
        let container = &self.target.container;

        let outcome = self
            .runtime
            .remove_container(container)
            .await
            .map_err(|e| CutoverError::runtime(CutoverStep::RemovingOld, e))?;

        match outcome {
            RemoveOutcome::Removed => {
                info!(container = %container, "Removed old container");
                ctx.complete(StageStatus::Success, None);
            }
            RemoveOutcome::NotFound if ctx.state.previous_stopped => {
                // 停止后容器已自行消失（如 --rm），目标状态已达成
                warn!(container = %container, "Container disappeared after stop");
                ctx.complete(
                    StageStatus::Absent,
                    Some("container disappeared after stop".to_string()),
                );
            }
            RemoveOutcome::NotFound => {
                info!(container = %container, "No existing container to remove");
                ctx.complete(StageStatus::Absent, Some("no existing container".to_string()));
            }
        }
        Ok(())
    }

    /// 镜像保留失败只记录，不中断切换
    async fn retain_images(&self, ctx: &mut CutoverContext) {
        ctx.enter(CutoverStep::RetainingImages);

        match RetentionCollector::new(self.runtime)
            .collect(&self.target.family)
            .await
        {
            Ok(report) => {
                if !report.is_clean() {
                    warn!(
                        family = %report.family,
                        failures = report.failures.len(),
                        "Image retention finished with failures"
                    );
                }
                ctx.complete(StageStatus::Success, Some(report.summary()));
            }
            Err(e) => {
                warn!(family = %self.target.family.reference_filter(), error = %e, "Image retention failed, continuing");
                ctx.complete(StageStatus::Failed, Some(e.to_string()));
            }
        }
    }

    async fn build(&self, ctx: &mut CutoverContext) -> CutoverResult<()> {
        ctx.enter(CutoverStep::Building);
        let image = self.target.image();

        info!(
            image = %image,
            revision = ctx.state.revision.as_deref().unwrap_or("-"),
            dockerfile = %self.target.dockerfile.display(),
            "Building image without cache"
        );

        let image_id = self
            .runtime
            .build_image(&self.target.build_context, &self.target.dockerfile, &image)
            .await
            .map_err(CutoverError::BuildFailure)?;

        info!(image = %image, image_id = %image_id, "Image built");
        ctx.state.image_id = Some(image_id.clone());
        ctx.complete(StageStatus::Success, Some(image_id));
        Ok(())
    }

    async fn start_new(&self, ctx: &mut CutoverContext) -> CutoverResult<()> {
        ctx.enter(CutoverStep::StartingNew);

        if let Some(network) = &self.target.network {
            self.runtime
                .ensure_network(network)
                .await
                .map_err(|e| CutoverError::runtime(CutoverStep::StartingNew, e))?;
        }

        let spec = self.target.run_spec();
        let container_id = self
            .runtime
            .run_container(&spec)
            .await
            .map_err(|e| CutoverError::runtime(CutoverStep::StartingNew, e))?;

        info!(
            container = %spec.name,
            container_id = %container_id,
            port = %spec.port,
            "Started new container"
        );
        ctx.state.container_id = Some(container_id.clone());
        ctx.complete(StageStatus::Success, Some(container_id));
        Ok(())
    }

    async fn poll_health(&self, ctx: &mut CutoverContext) -> CutoverResult<()> {
        ctx.enter(CutoverStep::HealthPolling);
        let container = &self.target.container;
        let policy = HealthPolicy {
            interval: self.target.poll_interval,
            budget: self.target.health_budget,
        };

        match wait_until_healthy(self.runtime, container, policy).await {
            PollOutcome::Healthy { polls, elapsed } => {
                info!(container = %container, polls, elapsed_ms = elapsed.as_millis() as u64, "Container healthy");
                ctx.complete(
                    StageStatus::Success,
                    Some(format!("healthy after {} polls", polls)),
                );
                Ok(())
            }
            PollOutcome::TimedOut {
                polls,
                last_status,
                ..
            } => {
                error!(
                    container = %container,
                    polls,
                    last_status = %last_status,
                    "Container not healthy within budget"
                );

                let log_tail = match self.runtime.logs(container, self.target.log_tail).await {
                    Ok(logs) => logs,
                    Err(e) => {
                        warn!(container = %container, error = %e, "Failed to fetch container logs");
                        String::new()
                    }
                };
                for line in log_tail.lines() {
                    error!(container = %container, "{}", line);
                }

                Err(CutoverError::HealthTimeout {
                    container: container.clone(),
                    budget: policy.budget,
                    last_status,
                    log_tail,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::HealthStatus;
    use crate::testing::{image, target, FakeRuntime, FakeSource};
    use std::time::Duration;

    #[tokio::test]
    async fn test_first_deploy_without_existing_container() {
        let runtime = FakeRuntime::new();
        let source = FakeSource::new();
        let target = target("svc-a");

        let report = CutoverController::new(&runtime, &source, &target).run().await;

        assert!(report.is_healthy(), "{:?}", report.error);
        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.revision.as_deref(), Some("a1b2c3d"));
        assert_eq!(report.image_id.as_deref(), Some("sha256:1001"));
        assert_eq!(report.container_id.as_deref(), Some("ctr-1"));
        assert_eq!(
            report.stage(CutoverStep::StoppingOld).unwrap().status,
            StageStatus::Absent
        );
        assert_eq!(
            report.stage(CutoverStep::RemovingOld).unwrap().status,
            StageStatus::Absent
        );

        assert_eq!(source.calls(), vec!["fetch", "checkout develop", "pull develop"]);
        assert_eq!(
            runtime.calls(),
            vec![
                "stop svc-a",
                "rm svc-a",
                "images svc-a",
                "prune",
                "build svc-a:dev",
                "network svc-net",
                "run svc-a",
            ]
        );
    }

    #[tokio::test]
    async fn test_repeated_cutover_replaces_container() {
        let runtime = FakeRuntime::new();
        let source = FakeSource::new();
        let target = target("svc-a");
        let controller = CutoverController::new(&runtime, &source, &target);

        let first = controller.run().await;
        let second = controller.run().await;

        assert!(first.is_healthy());
        assert!(second.is_healthy());
        assert_eq!(first.image, second.image);
        assert_ne!(first.run_id, second.run_id);

        assert_eq!(
            second.stage(CutoverStep::StoppingOld).unwrap().status,
            StageStatus::Success
        );
        assert_eq!(
            second.stage(CutoverStep::RemovingOld).unwrap().status,
            StageStatus::Success
        );

        let state = runtime.state();
        assert_eq!(state.containers.len(), 1);
        assert_eq!(state.containers["svc-a"].id, "ctr-2");
        assert_eq!(state.containers["svc-a"].image, "svc-a:dev");
        // 第一次构建的镜像被新构建取代后成为悬空镜像
        assert_eq!(state.images.len(), 1);
        assert_eq!(state.dangling, 1);
    }

    #[tokio::test]
    async fn test_retention_runs_before_build() {
        let runtime = FakeRuntime::with(|s| {
            s.images = (1..=4)
                .map(|t| image(&format!("I{}", t), "svc-a", &format!("v{}", t), t))
                .collect();
        });
        let source = FakeSource::new();
        let target = target("svc-a");

        let report = CutoverController::new(&runtime, &source, &target).run().await;

        assert!(report.is_healthy());
        let calls = runtime.calls();
        let rmi_last = calls.iter().rposition(|c| c.starts_with("rmi")).unwrap();
        let build = calls.iter().position(|c| c.starts_with("build")).unwrap();
        assert!(rmi_last < build);
        assert!(calls.contains(&"rmi svc-a:v1".to_string()));
        assert!(calls.contains(&"rmi svc-a:v2".to_string()));
        assert!(!calls.contains(&"rmi svc-a:v3".to_string()));
    }

    #[tokio::test]
    async fn test_build_failure_stops_before_start() {
        let runtime = FakeRuntime::with(|s| s.fail_build = true);
        let source = FakeSource::new();
        let target = target("svc-a");

        let report = CutoverController::new(&runtime, &source, &target).run().await;

        assert_eq!(report.outcome, CutoverStep::Failed);
        assert_eq!(report.failed_step, Some(CutoverStep::Building));
        assert_eq!(report.exit_code(), 1);
        assert!(!runtime.called("run"));
        assert!(!runtime.called("network"));
        assert_eq!(
            report.stage(CutoverStep::Building).unwrap().status,
            StageStatus::Failed
        );
        assert_eq!(
            report.stage(CutoverStep::StartingNew).unwrap().status,
            StageStatus::Skipped
        );
        assert_eq!(runtime.state().health_polls, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_timeout_attaches_log_tail() {
        let runtime = FakeRuntime::with(|s| {
            s.steady_health = HealthStatus::Unhealthy;
            s.logs = (1..=80)
                .map(|i| format!("line {}", i))
                .collect::<Vec<_>>()
                .join("\n");
        });
        let source = FakeSource::new();
        let target = target("svc-a");

        let started = tokio::time::Instant::now();
        let report = CutoverController::new(&runtime, &source, &target).run().await;
        let elapsed = started.elapsed();

        assert_eq!(report.failed_step, Some(CutoverStep::HealthPolling));
        assert_eq!(report.exit_code(), 1);
        assert!(elapsed >= Duration::from_secs(60));
        assert!(elapsed <= Duration::from_secs(62));
        assert!(runtime.called("logs svc-a 50"));

        let log_tail = report.log_tail.unwrap();
        let lines: Vec<&str> = log_tail.lines().collect();
        assert_eq!(lines.len(), 50);
        assert_eq!(lines[0], "line 31");
        assert_eq!(lines[49], "line 80");
        assert!(report.error.unwrap().contains("last status: unhealthy"));
    }

    #[tokio::test]
    async fn test_stop_error_is_fatal() {
        let runtime = FakeRuntime::with(|s| s.fail_stop = true);
        let source = FakeSource::new();
        let target = target("svc-a");

        let report = CutoverController::new(&runtime, &source, &target).run().await;

        assert_eq!(report.failed_step, Some(CutoverStep::StoppingOld));
        assert_eq!(runtime.calls(), vec!["stop svc-a"]);
        assert!(report
            .error
            .as_deref()
            .unwrap_or_default()
            .contains("Cannot connect"));
        for step in &CutoverStep::SEQUENCE[2..] {
            assert_eq!(report.stage(*step).unwrap().status, StageStatus::Skipped);
        }
    }

    #[tokio::test]
    async fn test_start_failure_is_fatal() {
        let runtime = FakeRuntime::with(|s| s.fail_run = true);
        let source = FakeSource::new();
        let target = target("svc-a");

        let report = CutoverController::new(&runtime, &source, &target).run().await;

        assert_eq!(report.outcome, CutoverStep::Failed);
        assert_eq!(report.failed_step, Some(CutoverStep::StartingNew));
        assert_eq!(report.exit_code(), 1);
        assert!(report.image_id.is_some());
        assert!(report.container_id.is_none());
        assert!(report
            .error
            .as_deref()
            .unwrap_or_default()
            .contains("starting_new"));
        assert_eq!(
            report.stage(CutoverStep::StartingNew).unwrap().status,
            StageStatus::Failed
        );
        assert_eq!(
            report.stage(CutoverStep::HealthPolling).unwrap().status,
            StageStatus::Skipped
        );
        assert_eq!(runtime.state().health_polls, 0);
    }

    #[tokio::test]
    async fn test_container_gone_after_stop_still_proceeds() {
        let runtime = FakeRuntime::new();
        let source = FakeSource::new();
        let target = target("svc-a");
        let controller = CutoverController::new(&runtime, &source, &target);

        assert!(controller.run().await.is_healthy());

        // 第二次切换：旧容器以 --rm 运行，停止后即消失
        runtime.state().auto_remove = true;
        let report = controller.run().await;

        assert!(report.is_healthy(), "{:?}", report.error);
        assert_eq!(
            report.stage(CutoverStep::StoppingOld).unwrap().status,
            StageStatus::Success
        );
        let removing = report.stage(CutoverStep::RemovingOld).unwrap();
        assert_eq!(removing.status, StageStatus::Absent);
        assert_eq!(
            removing.message.as_deref(),
            Some("container disappeared after stop")
        );
        assert_eq!(runtime.state().containers["svc-a"].id, "ctr-2");
    }

    #[tokio::test]
    async fn test_retention_failure_does_not_abort() {
        let runtime = FakeRuntime::with(|s| s.fail_list = true);
        let source = FakeSource::new();
        let target = target("svc-a");

        let report = CutoverController::new(&runtime, &source, &target).run().await;

        assert!(report.is_healthy());
        assert_eq!(
            report.stage(CutoverStep::RetainingImages).unwrap().status,
            StageStatus::Failed
        );
        assert!(runtime.called("run svc-a"));
    }

    #[tokio::test]
    async fn test_pull_failure_is_fatal() {
        let runtime = FakeRuntime::new();
        let source = FakeSource::with(|s| s.fail_pull = true);
        let target = target("svc-a");

        let report = CutoverController::new(&runtime, &source, &target).run().await;

        assert_eq!(report.failed_step, Some(CutoverStep::Fetching));
        assert!(runtime.calls().is_empty());
        assert!(report.revision.is_none());
    }

    #[tokio::test]
    async fn test_missing_revision_is_not_fatal() {
        let runtime = FakeRuntime::new();
        let source = FakeSource::with(|_| {});
        let target = target("svc-a");

        let report = CutoverController::new(&runtime, &source, &target).run().await;

        assert!(report.is_healthy());
        assert!(report.revision.is_none());
    }
}
