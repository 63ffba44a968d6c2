//! 健康检查轮询
//!
//! 有明确截止时间的有界循环：每次休眠都被截断到剩余预算，
//! 因此最迟在 budget + interval 内结束

use std::time::Duration;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, warn};

use crate::domain::HealthStatus;
use crate::infra::gateway::ContainerRuntime;

#[derive(Debug, Clone, Copy)]
pub struct HealthPolicy {
    pub interval: Duration,
    pub budget: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Healthy {
        polls: u32,
        elapsed: Duration,
    },
    TimedOut {
        polls: u32,
        elapsed: Duration,
        last_status: HealthStatus,
    },
}

/// 轮询容器健康状态直到 healthy 或预算耗尽
///
/// 查询失败只记录日志，不中断轮询
pub async fn wait_until_healthy(
    runtime: &dyn ContainerRuntime,
    container: &str,
    policy: HealthPolicy,
) -> PollOutcome {
    let started = Instant::now();
    let deadline = started + policy.budget;
    let mut polls = 0u32;
    let mut last_status = HealthStatus::None;

    loop {
        polls += 1;

        match timeout_at(deadline + policy.interval, runtime.health_status(container)).await {
            Ok(Ok(status)) => {
                debug!(container, poll = polls, status = %status, "Health status");
                last_status = status;
                if status == HealthStatus::Healthy {
                    return PollOutcome::Healthy {
                        polls,
                        elapsed: started.elapsed(),
                    };
                }
            }
            Ok(Err(e)) => {
                warn!(container, poll = polls, error = %e, "Health status query failed");
            }
            Err(_) => {
                warn!(container, poll = polls, "Health status query timed out");
            }
        }

        let now = Instant::now();
        if now >= deadline {
            return PollOutcome::TimedOut {
                polls,
                elapsed: started.elapsed(),
                last_status,
            };
        }

        sleep(policy.interval.min(deadline - now)).await;
    }
}
