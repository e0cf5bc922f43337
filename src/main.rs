//! DXLearn - 帧资源环与 GPU fence 演示
//!
//! 每个演示都跑在同一个同步骨架上：CPU 最多领先 GPU N 帧，
//! 槽位的分配器和常量缓冲区只有在 GPU 越过它的 fence 值之后才会被复用。
//!
//! # 使用方法
//!
//! ```bash
//! # 使用配置文件（默认 software 后端，无窗口）
//! cargo run
//!
//! # 运行模板镜面演示 300 帧
//! cargo run -- --demo stencil --frames 300
//!
//! # 使用 DirectX 12（仅 Windows）
//! cargo run -- --dx12 --demo blend
//! ```
//!
//! # 架构概览
//!
//! ```text
//! ┌─────────────┐
//! │   main.rs   │  应用程序入口
//! └──────┬──────┘
//!        │
//! ┌──────▼──────┐
//! │  Renderer   │  帧资源环 + fence 时间线 + 阶段流水线
//! └──────┬──────┘
//!        │
//!   ┌────┴─────┐
//!   │          │
//! ┌─▼──────┐ ┌─▼──┐
//! │Software│ │DX12│  具体后端实现
//! └────────┘ └────┘
//! ```

use anyhow::Context;
use tracing::{error, info};

use dx_learn::core::config::{Config, GraphicsBackend as BackendKind};
use dx_learn::core::log;
use dx_learn::gfx::{SoftwareBackend, SoftwareGpu};
use dx_learn::renderer::{Renderer, RendererSettings};

/// 应用程序入口点
///
/// # 初始化流程
///
/// 1. 加载配置文件（config.toml）
/// 2. 应用命令行参数覆盖
/// 3. 验证配置
/// 4. 初始化日志系统
/// 5. 按后端进入无头循环或窗口事件循环
fn main() {
    let mut config = Config::from_file_or_default("config.toml");
    config.apply_args(std::env::args());

    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    let log_file = if config.logging.file_output {
        Some(config.logging.log_file.as_str())
    } else {
        None
    };
    if let Err(e) = log::init_logger(config.logging.level, config.logging.file_output, log_file) {
        eprintln!("{}", e);
    }
    info!("DXLearn starting...");
    info!(version = env!("CARGO_PKG_VERSION"), "Application initialized");

    info!(
        backend = config.graphics.backend.name(),
        demo = config.demo.kind.name(),
        width = config.window.width,
        height = config.window.height,
        frame_resources = config.graphics.frame_resources,
        fence_wait_timeout_ms = ?config.graphics.fence_wait_timeout_ms,
        "Graphics configuration"
    );

    let result = match config.graphics.backend {
        BackendKind::Software => run_headless(&config),
        BackendKind::Dx12 => run_windowed(&config),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }

    info!("DXLearn finished");
}

/// 在模拟 GPU 队列上运行，不创建窗口
fn run_headless(config: &Config) -> anyhow::Result<()> {
    let settings = RendererSettings::from_config(config);
    let gpu = SoftwareGpu::new(Some(config.demo.gpu_latency));
    let backend = SoftwareBackend::new(
        gpu.clone(),
        config.graphics.swap_chain_buffers,
        settings.width,
        settings.height,
    );

    let mut renderer = Renderer::new(backend, settings, config.demo.kind.stages())
        .context("Failed to initialize renderer")?;
    info!(stages = ?renderer.stages().names(), "Entering headless loop...");

    let max_frames = config.demo.max_frames;
    while max_frames == 0 || renderer.frame_index() < max_frames {
        renderer
            .frame()
            .with_context(|| format!("Frame {} failed", renderer.frame_index()))?;
    }
    renderer.flush().context("Failed to flush command queue")?;

    info!(
        frames = renderer.frame_index(),
        stalls = renderer.timeline().stall_count(),
        presents = gpu.present_count(),
        completed = gpu.completed_value().value(),
        "Headless run finished"
    );
    Ok(())
}

#[cfg(target_os = "windows")]
fn run_windowed(config: &Config) -> anyhow::Result<()> {
    use dx_learn::gfx::{Dx12Backend, GraphicsBackend};
    use winit::dpi::LogicalSize;
    use winit::event::{Event, WindowEvent};
    use winit::event_loop::{ControlFlow, EventLoop};
    use winit::window::WindowBuilder;

    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    let window = WindowBuilder::new()
        .with_title(config.window.title.as_str())
        .with_inner_size(LogicalSize::new(config.window.width, config.window.height))
        .build(&event_loop)
        .context("Failed to create window")?;

    let backend = Dx12Backend::new(&window, config).context("Failed to initialize DX12 backend")?;
    let size = window.inner_size();
    let mut settings = RendererSettings::from_config(config);
    settings.width = size.width.max(1);
    settings.height = size.height.max(1);

    let mut renderer = Renderer::new(backend, settings, config.demo.kind.stages())
        .context("Failed to initialize renderer")?;

    let title = format!(
        "{} [{} / {}]",
        config.window.title,
        renderer.backend().backend_name(),
        config.demo.kind.name()
    );
    window.set_title(&title);

    let max_frames = config.demo.max_frames;
    let mut failure: Option<anyhow::Error> = None;

    info!("Entering main loop...");
    event_loop
        .run(|event, elwt| match event {
            Event::WindowEvent { event, .. } => match event {
                WindowEvent::CloseRequested => {
                    info!("Close requested, shutting down...");
                    elwt.exit();
                }
                // 失去焦点时暂停，与最小化一样不再绘制
                WindowEvent::Focused(focused) => {
                    if focused {
                        renderer.resume();
                    } else {
                        renderer.pause();
                    }
                }
                WindowEvent::Resized(size) => {
                    if let Err(e) = renderer.resize(size.width, size.height) {
                        failure = Some(anyhow::Error::new(e).context("Resize failed"));
                        elwt.exit();
                    }
                }
                WindowEvent::RedrawRequested => match renderer.redraw() {
                    Ok(None) => (),
                    Ok(Some(report)) => {
                        if let Some(stats) = report.stats {
                            window.set_title(&format!(
                                "{}    fps: {:.0}   mspf: {:.3}",
                                title, stats.fps, stats.mspf
                            ));
                        }
                        if max_frames != 0 && renderer.frame_index() >= max_frames {
                            elwt.exit();
                        }
                    }
                    Err(e) => {
                        failure = Some(anyhow::Error::new(e).context("Frame failed"));
                        elwt.exit();
                    }
                },
                _ => (),
            },
            Event::AboutToWait => {
                if renderer.is_paused() {
                    elwt.set_control_flow(ControlFlow::Wait);
                } else {
                    elwt.set_control_flow(ControlFlow::Poll);
                    window.request_redraw();
                }
            }
            _ => (),
        })
        .context("Event loop failed")?;

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(not(target_os = "windows"))]
fn run_windowed(_config: &Config) -> anyhow::Result<()> {
    anyhow::bail!("DX12 backend is only available on Windows; run with --software")
}
