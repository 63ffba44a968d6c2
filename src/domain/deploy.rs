//! 部署相关领域模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// 切换流程的步骤
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CutoverStep {
    Fetching,
    StoppingOld,
    RemovingOld,
    RetainingImages,
    Building,
    StartingNew,
    HealthPolling,
    Healthy,
    Failed,
}

impl CutoverStep {
    /// 非终态步骤，按执行顺序
    pub const SEQUENCE: [CutoverStep; 7] = [
        CutoverStep::Fetching,
        CutoverStep::StoppingOld,
        CutoverStep::RemovingOld,
        CutoverStep::RetainingImages,
        CutoverStep::Building,
        CutoverStep::StartingNew,
        CutoverStep::HealthPolling,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CutoverStep::Fetching => "fetching",
            CutoverStep::StoppingOld => "stopping_old",
            CutoverStep::RemovingOld => "removing_old",
            CutoverStep::RetainingImages => "retaining_images",
            CutoverStep::Building => "building",
            CutoverStep::StartingNew => "starting_new",
            CutoverStep::HealthPolling => "health_polling",
            CutoverStep::Healthy => "healthy",
            CutoverStep::Failed => "failed",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            CutoverStep::Fetching => "Fetch Source",
            CutoverStep::StoppingOld => "Stop Old Container",
            CutoverStep::RemovingOld => "Remove Old Container",
            CutoverStep::RetainingImages => "Image Retention",
            CutoverStep::Building => "Docker Build",
            CutoverStep::StartingNew => "Start New Container",
            CutoverStep::HealthPolling => "Health Check",
            CutoverStep::Healthy => "Healthy",
            CutoverStep::Failed => "Failed",
        }
    }

    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, CutoverStep::Healthy | CutoverStep::Failed)
    }
}

impl fmt::Display for CutoverStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 阶段状态
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Success,
    /// 目标本就不存在（如首次部署时没有旧容器）
    Absent,
    Failed,
    Skipped,
}

impl StageStatus {
    pub fn icon(&self) -> &'static str {
        match self {
            StageStatus::Success => "✓",
            StageStatus::Failed => "✗",
            StageStatus::Absent => "∅",
            StageStatus::Skipped => "⊘",
            StageStatus::Running => "⟳",
            StageStatus::Pending => "○",
        }
    }
}

/// 部署阶段信息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeployStage {
    pub step: CutoverStep,
    pub display_name: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// 持续时间（毫秒）
    pub duration_ms: Option<i64>,
    pub status: StageStatus,
    pub message: Option<String>,
}

impl DeployStage {
    /// 创建新的待执行阶段
    pub fn new(step: CutoverStep) -> Self {
        Self {
            step,
            display_name: step.display_name().to_string(),
            started_at: None,
            finished_at: None,
            duration_ms: None,
            status: StageStatus::Pending,
            message: None,
        }
    }

    /// 开始执行阶段
    pub fn start(&mut self) {
        self.started_at = Some(Utc::now());
        self.status = StageStatus::Running;
    }

    /// 完成阶段
    pub fn finish(&mut self, status: StageStatus, message: Option<String>) {
        let now = Utc::now();
        self.finished_at = Some(now);
        self.status = status;
        self.message = message;
        if let Some(started) = self.started_at {
            self.duration_ms = Some((now - started).num_milliseconds());
        }
    }

    /// 跳过阶段
    pub fn skip(&mut self, reason: Option<String>) {
        self.status = StageStatus::Skipped;
        self.message = reason;
    }

    /// 摘要行，如 `✓ Docker Build (1532ms)`
    pub fn summary_line(&self) -> String {
        let duration = self
            .duration_ms
            .map(|d| format!("{}ms", d))
            .unwrap_or_else(|| "-".to_string());
        match &self.message {
            Some(message) => format!(
                "{} {} ({}) - {}",
                self.status.icon(),
                self.display_name,
                duration,
                message
            ),
            None => format!("{} {} ({})", self.status.icon(), self.display_name, duration),
        }
    }
}

/// 单次切换的运行时状态，仅在一次调用内存在
#[derive(Clone, Debug)]
pub struct CutoverState {
    pub step: CutoverStep,
    pub error: Option<String>,
    /// 旧容器是否被成功停止
    pub previous_stopped: bool,
    pub revision: Option<String>,
    pub image_id: Option<String>,
    pub container_id: Option<String>,
}

impl Default for CutoverState {
    fn default() -> Self {
        Self {
            step: CutoverStep::Fetching,
            error: None,
            previous_stopped: false,
            revision: None,
            image_id: None,
            container_id: None,
        }
    }
}

/// 切换结果报告
#[derive(Clone, Debug, Serialize)]
pub struct CutoverReport {
    pub run_id: Uuid,
    pub target: String,
    pub image: String,
    pub container: String,
    /// 终态：healthy / failed
    pub outcome: CutoverStep,
    /// 失败发生的步骤
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<CutoverStep>,
    pub stages: Vec<DeployStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// 健康检查超时时附带的容器日志
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_tail: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl CutoverReport {
    pub fn is_healthy(&self) -> bool {
        self.outcome == CutoverStep::Healthy
    }

    /// 进程退出码：仅 HEALTHY 为 0
    pub fn exit_code(&self) -> i32 {
        if self.is_healthy() {
            0
        } else {
            1
        }
    }

    pub fn stage(&self, step: CutoverStep) -> Option<&DeployStage> {
        self.stages.iter().find(|s| s.step == step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_sequence_is_non_terminal() {
        assert!(CutoverStep::SEQUENCE.iter().all(|s| !s.is_terminal()));
        assert!(CutoverStep::Healthy.is_terminal());
        assert!(CutoverStep::Failed.is_terminal());
        assert_eq!(CutoverStep::SEQUENCE[0], CutoverStep::Fetching);
        assert_eq!(CutoverStep::SEQUENCE[6], CutoverStep::HealthPolling);
    }

    #[test]
    fn test_deploy_stage_lifecycle() {
        let mut stage = DeployStage::new(CutoverStep::Building);
        assert_eq!(stage.status, StageStatus::Pending);
        assert_eq!(stage.display_name, "Docker Build");

        stage.start();
        assert_eq!(stage.status, StageStatus::Running);
        assert!(stage.started_at.is_some());

        stage.finish(StageStatus::Success, None);
        assert_eq!(stage.status, StageStatus::Success);
        assert!(stage.finished_at.is_some());
        assert!(stage.duration_ms.is_some());
        assert!(stage.summary_line().starts_with("✓ Docker Build ("));
    }

    #[test]
    fn test_skipped_stage_summary() {
        let mut stage = DeployStage::new(CutoverStep::StartingNew);
        stage.skip(Some("previous step failed".to_string()));
        assert_eq!(
            stage.summary_line(),
            "⊘ Start New Container (-) - previous step failed"
        );
    }

    #[test]
    fn test_step_serializes_snake_case() {
        let json = serde_json::to_string(&CutoverStep::HealthPolling).unwrap();
        assert_eq!(json, "\"health_polling\"");
    }
}
