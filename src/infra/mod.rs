//! 基础设施模块
//!
//! 封装外部依赖（docker、git、命令执行、终端交互）

pub mod command;
pub mod docker;
pub mod gateway;
pub mod git;
pub mod prompt;

pub use command::CommandRunner;
pub use docker::DockerCli;
pub use gateway::{ContainerRuntime, GatewayError, SourceControl};
pub use git::GitCli;
