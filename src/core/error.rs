//! 错误处理模块
//!
//! 定义了框架中使用的统一错误类型。
//!
//! # 错误分类
//!
//! - API 调用失败（设备/资源创建、命令列表操作）：携带失败调用、结果码、文件与行号，
//!   一律视为致命错误
//! - Fence 等待超时：仅在配置了等待上限时出现，报告为 `DeviceLost`
//! - 配置错误：配置文件缺失、解析失败或取值非法
//!
//! 本模块不提供任何重试或降级路径。

use std::fmt;

/// 统一的 Result 类型
pub type Result<T> = std::result::Result<T, DxLearnError>;

/// DXLearn 的错误类型
#[derive(Debug)]
pub enum DxLearnError {
    /// 配置错误
    Config(ConfigError),

    /// 图形 API 错误
    Graphics(GraphicsError),

    /// IO 错误
    Io(std::io::Error),

    /// 初始化错误
    Initialization(String),

    /// 运行时错误
    Runtime(String),
}

/// 配置相关的错误
#[derive(Debug)]
pub enum ConfigError {
    /// 配置文件未找到
    FileNotFound(String),

    /// 配置文件解析失败
    ParseError(String),

    /// 配置值无效
    InvalidValue { field: String, reason: String },
}

/// 图形 API 相关的错误
#[derive(Debug)]
pub enum GraphicsError {
    /// 某个 API 调用返回失败码
    ApiCall {
        call: String,
        code: i32,
        file: &'static str,
        line: u32,
    },

    /// 交换链错误
    SwapchainError(String),

    /// 资源创建失败
    ResourceCreation(String),

    /// 命令记录或提交失败
    CommandExecution(String),

    /// 在等待上限内 GPU 没有到达目标 fence 值
    DeviceLost {
        waited_for: u64,
        completed: u64,
        timeout_ms: u64,
    },
}

impl GraphicsError {
    /// 构造一个 API 调用错误
    ///
    /// 一般通过 `dx_check!` 宏调用，由宏填入调用文本、文件和行号。
    pub fn api_call(call: impl Into<String>, code: i32, file: &'static str, line: u32) -> Self {
        GraphicsError::ApiCall {
            call: call.into(),
            code,
            file,
            line,
        }
    }
}

impl fmt::Display for DxLearnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DxLearnError::Config(e) => write!(f, "Configuration error: {}", e),
            DxLearnError::Graphics(e) => write!(f, "Graphics error: {}", e),
            DxLearnError::Io(e) => write!(f, "IO error: {}", e),
            DxLearnError::Initialization(msg) => write!(f, "Initialization error: {}", msg),
            DxLearnError::Runtime(msg) => write!(f, "Runtime error: {}", msg),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {}", path),
            ConfigError::ParseError(msg) => write!(f, "Failed to parse config: {}", msg),
            ConfigError::InvalidValue { field, reason } => {
                write!(f, "Invalid value for '{}': {}", field, reason)
            }
        }
    }
}

impl fmt::Display for GraphicsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphicsError::ApiCall { call, code, file, line } => write!(
                f,
                "{} failed in {}; line {}; error: 0x{:08X}",
                call, file, line, *code as u32
            ),
            GraphicsError::SwapchainError(msg) => write!(f, "Swapchain error: {}", msg),
            GraphicsError::ResourceCreation(msg) => write!(f, "Resource creation failed: {}", msg),
            GraphicsError::CommandExecution(msg) => write!(f, "Command execution failed: {}", msg),
            GraphicsError::DeviceLost { waited_for, completed, timeout_ms } => write!(
                f,
                "Device lost: fence value {} not reached within {} ms (completed {})",
                waited_for, timeout_ms, completed
            ),
        }
    }
}

impl std::error::Error for DxLearnError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DxLearnError::Io(e) => Some(e),
            DxLearnError::Config(e) => Some(e),
            DxLearnError::Graphics(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for ConfigError {}
impl std::error::Error for GraphicsError {}

// 实现 From trait 以便于错误转换
impl From<std::io::Error> for DxLearnError {
    fn from(err: std::io::Error) -> Self {
        DxLearnError::Io(err)
    }
}

impl From<ConfigError> for DxLearnError {
    fn from(err: ConfigError) -> Self {
        DxLearnError::Config(err)
    }
}

impl From<GraphicsError> for DxLearnError {
    fn from(err: GraphicsError) -> Self {
        DxLearnError::Graphics(err)
    }
}
