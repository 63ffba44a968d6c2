//! 常量

/// 默认配置文件
pub const DEFAULT_CONFIG_FILE: &str = "cutover.toml";

/// 健康轮询间隔（秒）
pub const HEALTH_POLL_INTERVAL_SECS: u64 = 2;

/// 健康轮询总预算（秒）
pub const HEALTH_BUDGET_SECS: u64 = 60;

/// 健康检查失败时附带的日志行数
pub const HEALTH_LOG_TAIL_LINES: usize = 50;

/// 嵌入容器的健康检查默认参数
pub const HEALTHCHECK_INTERVAL_SECS: u64 = 10;
pub const HEALTHCHECK_TIMEOUT_SECS: u64 = 5;
pub const HEALTHCHECK_RETRIES: u32 = 3;

/// 默认保留镜像数量
pub const DEFAULT_KEEP_IMAGES: usize = 2;

/// 普通 docker 命令超时（秒）
pub const COMMAND_TIMEOUT_SECS: u64 = 120;

/// 镜像构建超时（秒）
pub const BUILD_TIMEOUT_SECS: u64 = 1800; // 30 分钟

/// git 命令超时（秒）
pub const GIT_TIMEOUT_SECS: u64 = 300;

/// 构建失败时保留的输出行数
pub const BUILD_OUTPUT_TAIL_LINES: usize = 20;

/// 版本号
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
