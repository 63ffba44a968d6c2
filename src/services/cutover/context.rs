//! 切换执行上下文
//!
//! 保存一次切换的运行时状态与各阶段信息，结束时生成报告

use chrono::{DateTime, Utc};
use tracing::{error, info};
use uuid::Uuid;

use crate::config::DeploymentTarget;
use crate::domain::{CutoverReport, CutoverState, CutoverStep, DeployStage, StageStatus};
use crate::error::CutoverResult;

pub struct CutoverContext {
    pub run_id: Uuid,
    pub state: CutoverState,
    stages: Vec<DeployStage>,
    started_at: DateTime<Utc>,
}

impl CutoverContext {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            state: CutoverState::default(),
            stages: CutoverStep::SEQUENCE
                .iter()
                .copied()
                .map(DeployStage::new)
                .collect(),
            started_at: Utc::now(),
        }
    }

    fn stage_mut(&mut self, step: CutoverStep) -> Option<&mut DeployStage> {
        self.stages.iter_mut().find(|s| s.step == step)
    }

    /// 进入下一步骤
    pub fn enter(&mut self, step: CutoverStep) {
        self.state.step = step;
        let total = self.stages.len();
        let position = self.stages.iter().position(|s| s.step == step);
        if let Some(index) = position {
            let stage = &mut self.stages[index];
            stage.start();
            info!(step = %step, "[{}/{}] {}", index + 1, total, stage.display_name);
        }
    }

    /// 完成当前步骤
    pub fn complete(&mut self, status: StageStatus, message: Option<String>) {
        let step = self.state.step;
        if let Some(stage) = self.stage_mut(step) {
            stage.finish(status, message);
        }
    }

    /// 收尾：标记失败步骤与被跳过的后续步骤，输出阶段摘要
    pub fn finish(mut self, target: &DeploymentTarget, result: CutoverResult<()>) -> CutoverReport {
        let mut failed_step = None;
        let mut error_message = None;
        let mut log_tail = None;

        match &result {
            Ok(()) => {
                self.state.step = CutoverStep::Healthy;
            }
            Err(e) => {
                let step = e.step().unwrap_or(self.state.step);
                if let Some(stage) = self.stage_mut(step) {
                    stage.finish(StageStatus::Failed, Some(e.to_string()));
                }
                for stage in self
                    .stages
                    .iter_mut()
                    .filter(|s| s.status == StageStatus::Pending)
                {
                    stage.skip(Some(format!("{} failed", step)));
                }

                self.state.step = CutoverStep::Failed;
                self.state.error = Some(e.to_string());
                failed_step = Some(step);
                error_message = Some(e.to_string());
                log_tail = e.log_tail().map(str::to_string);
            }
        }

        info!("=== Stage Summary ===");
        for stage in &self.stages {
            info!("{}", stage.summary_line());
        }

        match (&failed_step, &error_message) {
            (Some(step), Some(message)) => {
                error!(step = %step, error = %message, "Cutover FAILED");
            }
            _ => {
                info!(
                    image = %target.image(),
                    container = %target.container,
                    revision = self.state.revision.as_deref().unwrap_or("-"),
                    "Cutover HEALTHY"
                );
            }
        }

        CutoverReport {
            run_id: self.run_id,
            target: target.name.clone(),
            image: target.image(),
            container: target.container.clone(),
            outcome: self.state.step,
            failed_step,
            stages: self.stages,
            revision: self.state.revision,
            image_id: self.state.image_id,
            container_id: self.state.container_id,
            error: error_message,
            log_tail,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}
