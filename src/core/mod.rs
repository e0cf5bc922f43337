//! 核心功能模块
//!
//! 与具体图形 API 无关的基础功能：配置、错误处理、日志、数学类型和帧时钟。
//!
//! # 模块组织
//!
//! - `config`：从 TOML 文件和命令行加载配置
//! - `error`：统一的错误类型
//! - `log`：基于 tracing 的日志初始化
//! - `math`：nalgebra 类型别名与矩阵辅助函数
//! - `timer`：可暂停的帧时钟与帧统计

pub mod config;
pub mod error;
pub mod log;
pub mod math;
pub mod timer;

// 重新导出常用类型，方便使用
pub use config::Config;
pub use error::{DxLearnError, GraphicsError, Result};
pub use math::Matrix4;
pub use timer::{FrameClock, FrameStats};
