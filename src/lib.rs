//! DXLearn - 帧资源环与 GPU fence 演示框架
//!
//! 一组逐步递进的 DirectX 12 演示（几何体、光照、混合、树木公告板、模板镜面）
//! 共用的 CPU/GPU 同步骨架：CPU 最多领先 GPU N 帧，每帧使用一个帧资源槽位，
//! 槽位只有在 GPU 越过它的 fence 值之后才会被复用。
//!
//! # 模块结构
//!
//! - `core`: 核心功能模块（配置、错误处理、日志、数学、帧时钟）
//! - `renderer`: 帧资源环、fence 时间线、命令录制、场景与演示阶段
//! - `gfx`: 图形后端（软件模拟与 DirectX 12）
//!
//! # 使用示例
//!
//! ```no_run
//! use dx_learn::gfx::{SoftwareBackend, SoftwareGpu};
//! use dx_learn::renderer::stage::DemoKind;
//! use dx_learn::renderer::{Renderer, RendererSettings};
//!
//! let settings = RendererSettings::default();
//! let backend = SoftwareBackend::new(SoftwareGpu::new(Some(2)), 2, settings.width, settings.height);
//! let mut renderer = Renderer::new(backend, settings, DemoKind::Stencil.stages()).unwrap();
//! for _ in 0..10 {
//!     renderer.frame().unwrap();
//! }
//! ```

pub mod core;
pub mod gfx;
pub mod renderer;
