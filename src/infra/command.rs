//! 命令执行器
//!
//! 提供统一的命令执行接口，支持：
//! - 实时输出转发到 tracing
//! - 超时控制
//! - 保留最后若干行输出用于失败诊断

use std::collections::VecDeque;
use std::path::Path;
use std::process::{ExitStatus, Output, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{error, info};

/// 命令执行器
pub struct CommandRunner;

/// 命令执行错误
#[derive(Debug, Error)]
pub enum CommandError {
    /// 命令启动失败
    #[error("Failed to spawn `{program}`: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },
    /// 命令超时
    #[error("`{program}` timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },
    /// 等待命令完成失败
    #[error("Failed to wait for `{program}`: {source}")]
    WaitFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// 流式执行结果
#[derive(Debug)]
pub struct StreamedOutput {
    /// 退出状态
    pub status: ExitStatus,
    /// 最后若干行输出（stdout 与 stderr 交错）
    pub tail: Vec<String>,
}

type Tail = Arc<Mutex<VecDeque<String>>>;

impl CommandRunner {
    /// 执行命令并把输出逐行转发到日志
    ///
    /// 超时后进程会被杀掉并返回 [`CommandError::Timeout`]。
    pub async fn run_with_streaming(
        program: &str,
        args: &[String],
        work_dir: &Path,
        timeout: Duration,
        tail_lines: usize,
    ) -> Result<StreamedOutput, CommandError> {
        let mut child = Command::new(program)
            .args(args)
            .current_dir(work_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CommandError::SpawnFailed {
                program: program.to_string(),
                source,
            })?;

        let tail: Tail = Arc::new(Mutex::new(VecDeque::with_capacity(tail_lines)));

        let stdout_task = child
            .stdout
            .take()
            .map(|out| tokio::spawn(forward_lines(BufReader::new(out), "stdout", tail.clone(), tail_lines)));
        let stderr_task = child
            .stderr
            .take()
            .map(|err| tokio::spawn(forward_lines(BufReader::new(err), "stderr", tail.clone(), tail_lines)));

        let result = tokio::select! {
            _ = tokio::time::sleep(timeout) => {
                error!(program, ?timeout, "Command timed out, killing process");
                let _ = child.kill().await;
                Err(CommandError::Timeout { program: program.to_string(), timeout })
            }
            status = child.wait() => {
                status.map_err(|source| CommandError::WaitFailed { program: program.to_string(), source })
            }
        };

        // 等待输出读取完成
        if let Some(task) = stdout_task {
            let _ = task.await;
        }
        if let Some(task) = stderr_task {
            let _ = task.await;
        }

        let status = result?;
        let tail = tail
            .lock()
            .map(|lines| lines.iter().cloned().collect())
            .unwrap_or_default();

        Ok(StreamedOutput { status, tail })
    }

    /// 执行简单命令（无流式输出）
    ///
    /// 用于输出需要解析的场景（如 docker images / docker inspect）
    pub async fn run_simple(
        program: &str,
        args: &[String],
        work_dir: Option<&Path>,
        timeout: Duration,
    ) -> Result<Output, CommandError> {
        let mut command = Command::new(program);
        command.args(args).kill_on_drop(true);
        if let Some(dir) = work_dir {
            command.current_dir(dir);
        }

        tokio::select! {
            result = command.output() => {
                result.map_err(|source| CommandError::SpawnFailed { program: program.to_string(), source })
            }
            _ = tokio::time::sleep(timeout) => {
                Err(CommandError::Timeout { program: program.to_string(), timeout })
            }
        }
    }
}

async fn forward_lines<R>(reader: R, stream: &'static str, tail: Tail, tail_lines: usize)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    while let Ok(Some(line)) = lines.next_line().await {
        info!(stream, "{}", line);
        if tail_lines == 0 {
            continue;
        }
        if let Ok(mut buf) = tail.lock() {
            if buf.len() == tail_lines {
                buf.pop_front();
            }
            buf.push_back(line);
        }
    }
}
