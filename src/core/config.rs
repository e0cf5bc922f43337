//! 配置管理模块
//!
//! 提供配置的加载、解析和管理功能。
//! 支持从 TOML 配置文件加载，也支持命令行参数覆盖。
//!
//! # 配置文件格式 (config.toml)
//!
//! ```toml
//! [window]
//! width = 800
//! height = 600
//! title = "DXLearn"
//!
//! [graphics]
//! backend = "software"        # 或 "dx12"
//! vsync = true
//! frame_resources = 3
//! swap_chain_buffers = 2
//! # fence_wait_timeout_ms = 2000   # 不设置则无限等待
//!
//! [demo]
//! kind = "blend"              # shapes, light, blend, trees, stencil
//! max_frames = 600
//!
//! [logging]
//! level = "info"              # trace, debug, info, warn, error
//! file_output = false
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::error::{ConfigError, Result};
use crate::renderer::stage::DemoKind;

/// 帧资源环允许的最大槽位数
pub const MAX_FRAME_RESOURCES: usize = 8;

/// 配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// 窗口配置
    #[serde(default)]
    pub window: WindowConfig,

    /// 图形配置
    #[serde(default)]
    pub graphics: GraphicsConfig,

    /// 演示配置
    #[serde(default)]
    pub demo: DemoConfig,

    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// 窗口配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    /// 窗口宽度
    #[serde(default = "default_width")]
    pub width: u32,

    /// 窗口高度
    #[serde(default = "default_height")]
    pub height: u32,

    /// 窗口标题
    #[serde(default = "default_title")]
    pub title: String,
}

/// 图形配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphicsConfig {
    /// 图形后端选择
    #[serde(default = "default_backend")]
    pub backend: GraphicsBackend,

    /// 垂直同步
    #[serde(default = "default_vsync")]
    pub vsync: bool,

    /// 帧资源环的槽位数 N
    #[serde(default = "default_frame_resources")]
    pub frame_resources: usize,

    /// 交换链后台缓冲数量
    #[serde(default = "default_swap_chain_buffers")]
    pub swap_chain_buffers: usize,

    /// Fence 等待上限（毫秒），`None` 表示无限等待
    #[serde(default)]
    pub fence_wait_timeout_ms: Option<u64>,

    /// 后台缓冲清屏颜色
    #[serde(default = "default_clear_color")]
    pub clear_color: [f32; 4],
}

/// 图形后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphicsBackend {
    /// 无窗口的模拟 GPU 队列
    Software,
    /// DirectX 12 后端
    Dx12,
}

/// 演示配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoConfig {
    /// 演示类型
    #[serde(default = "default_demo_kind")]
    pub kind: DemoKind,

    /// 最多运行的帧数，0 表示不限
    #[serde(default = "default_max_frames")]
    pub max_frames: u64,

    /// 模拟 GPU 允许落后的 signal 数量（仅 software 后端）
    #[serde(default = "default_gpu_latency")]
    pub gpu_latency: usize,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    /// 是否输出到文件
    #[serde(default = "default_file_output")]
    pub file_output: bool,

    /// 日志文件路径
    #[serde(default = "default_log_file")]
    pub log_file: String,
}

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

// 默认值函数
fn default_width() -> u32 { 800 }
fn default_height() -> u32 { 600 }
fn default_title() -> String { "DXLearn".to_string() }
fn default_backend() -> GraphicsBackend { GraphicsBackend::Software }
fn default_vsync() -> bool { true }
fn default_frame_resources() -> usize { 3 }
fn default_swap_chain_buffers() -> usize { 2 }
fn default_clear_color() -> [f32; 4] { [0.7, 0.7, 0.7, 1.0] }
fn default_demo_kind() -> DemoKind { DemoKind::Blend }
fn default_max_frames() -> u64 { 600 }
fn default_gpu_latency() -> usize { 1 }
fn default_log_level() -> LogLevel { LogLevel::Info }
fn default_file_output() -> bool { false }
fn default_log_file() -> String { "dxlearn.log".to_string() }

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            title: default_title(),
        }
    }
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            vsync: default_vsync(),
            frame_resources: default_frame_resources(),
            swap_chain_buffers: default_swap_chain_buffers(),
            fence_wait_timeout_ms: None,
            clear_color: default_clear_color(),
        }
    }
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            kind: default_demo_kind(),
            max_frames: default_max_frames(),
            gpu_latency: default_gpu_latency(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: default_file_output(),
            log_file: default_log_file(),
        }
    }
}

impl Config {
    /// 从配置文件加载
    ///
    /// # 示例
    ///
    /// ```no_run
    /// use dx_learn::core::Config;
    ///
    /// let config = Config::from_file("config.toml").unwrap();
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let contents = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound(path_str.clone()))?;

        Self::from_toml_str(&contents)
    }

    /// 从 TOML 文本解析
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()).into())
    }

    /// 从配置文件加载，如果文件不存在则使用默认配置
    pub fn from_file_or_default<P: AsRef<Path>>(path: P) -> Self {
        Self::from_file(path).unwrap_or_default()
    }

    /// 从命令行参数覆盖配置
    ///
    /// 支持的参数：
    /// - `--dx12` / `--software`: 选择图形后端
    /// - `--width <value>` / `--height <value>`: 窗口尺寸
    /// - `--frames <value>`: 最多运行的帧数
    /// - `--demo <name>`: 演示类型
    /// - `--frame-resources <value>`: 帧资源环大小
    pub fn apply_args<I>(&mut self, args: I)
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let args: Vec<String> = args.into_iter().map(|s| s.as_ref().to_string()).collect();

        if args.iter().any(|a| a == "--dx12") {
            self.graphics.backend = GraphicsBackend::Dx12;
        }

        if args.iter().any(|a| a == "--software") {
            self.graphics.backend = GraphicsBackend::Software;
        }

        let value_of = |flag: &str| -> Option<&String> {
            args.iter().position(|a| a == flag).and_then(|idx| args.get(idx + 1))
        };

        if let Some(width) = value_of("--width").and_then(|s| s.parse().ok()) {
            self.window.width = width;
        }

        if let Some(height) = value_of("--height").and_then(|s| s.parse().ok()) {
            self.window.height = height;
        }

        if let Some(frames) = value_of("--frames").and_then(|s| s.parse().ok()) {
            self.demo.max_frames = frames;
        }

        if let Some(count) = value_of("--frame-resources").and_then(|s| s.parse().ok()) {
            self.graphics.frame_resources = count;
        }

        if let Some(kind) = value_of("--demo").and_then(|s| DemoKind::from_name(s)) {
            self.demo.kind = kind;
        }
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<()> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(ConfigError::InvalidValue {
                field: "window.width/height".to_string(),
                reason: "Window dimensions must be greater than 0".to_string(),
            }.into());
        }

        if self.graphics.frame_resources == 0 || self.graphics.frame_resources > MAX_FRAME_RESOURCES {
            return Err(ConfigError::InvalidValue {
                field: "graphics.frame_resources".to_string(),
                reason: format!("Frame resource count must be within 1..={}", MAX_FRAME_RESOURCES),
            }.into());
        }

        if !(2..=4).contains(&self.graphics.swap_chain_buffers) {
            return Err(ConfigError::InvalidValue {
                field: "graphics.swap_chain_buffers".to_string(),
                reason: "Swap chain buffer count must be 2, 3 or 4".to_string(),
            }.into());
        }

        if self.graphics.fence_wait_timeout_ms == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "graphics.fence_wait_timeout_ms".to_string(),
                reason: "Timeout must be positive; omit it to wait forever".to_string(),
            }.into());
        }

        Ok(())
    }
}

impl GraphicsBackend {
    /// 获取后端名称
    pub fn name(&self) -> &'static str {
        match self {
            GraphicsBackend::Software => "Software",
            GraphicsBackend::Dx12 => "DirectX 12",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.window.width, 800);
        assert_eq!(config.window.height, 600);
        assert_eq!(config.graphics.backend, GraphicsBackend::Software);
        assert_eq!(config.graphics.frame_resources, 3);
        assert_eq!(config.graphics.swap_chain_buffers, 2);
        assert_eq!(config.graphics.fence_wait_timeout_ms, None);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.window.width = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.graphics.frame_resources = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.graphics.fence_wait_timeout_ms = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = Config::from_toml_str(
            "[graphics]\nframe_resources = 2\nfence_wait_timeout_ms = 500\n\n[demo]\nkind = \"stencil\"\n",
        ).unwrap();
        assert_eq!(config.graphics.frame_resources, 2);
        assert_eq!(config.graphics.fence_wait_timeout_ms, Some(500));
        assert_eq!(config.demo.kind, DemoKind::Stencil);
        assert_eq!(config.window.width, 800);
        assert_eq!(config.logging.level, LogLevel::Info);
    }

    #[test]
    fn test_apply_args() {
        let mut config = Config::default();
        config.apply_args(["dx_learn", "--dx12", "--width", "1280", "--frames", "42", "--demo", "shapes"]);
        assert_eq!(config.graphics.backend, GraphicsBackend::Dx12);
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.window.height, 600);
        assert_eq!(config.demo.max_frames, 42);
        assert_eq!(config.demo.kind, DemoKind::Shapes);
    }
}
