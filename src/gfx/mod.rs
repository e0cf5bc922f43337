//! 图形后端模块
//!
//! 本模块封装了不同图形后端的底层实现，包括：
//! - software：无窗口的模拟 GPU 队列，用于测试和无头运行
//! - DirectX 12：Windows 平台的图形 API
//!
//! 所有后端都实现了统一的 `GraphicsBackend` trait，
//! 帧资源环、fence 同步和命令录制只依赖这个 trait。

pub mod backend;
pub mod software;
#[cfg(target_os = "windows")]
pub mod dx12;

pub use backend::GraphicsBackend;
pub use software::{SoftwareBackend, SoftwareGpu};
#[cfg(target_os = "windows")]
pub use dx12::Dx12Backend;
