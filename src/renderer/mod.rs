//! 渲染器模块
//!
//! 本模块把帧资源环、GPU 时间线、阶段流水线和图形后端串成每帧的驱动循环。
//! 应用程序只和 `Renderer` 打交道，具体的图形 API 由 `GraphicsBackend` 提供。
//!
//! # 每帧流程
//!
//! 1. 推进帧时钟
//! 2. 取得帧资源槽位（必要时等待 GPU）
//! 3. 运行阶段的更新钩子，写入本槽位的常量缓冲区
//! 4. 重置本槽位的分配器，录制并提交命令列表
//! 5. 推进时间线，把新的 fence 值记到槽位上
//! 6. 呈现
//!
//! CPU 最多领先 GPU `N` 帧（`N` 为帧资源数量）。

use tracing::{debug, error, info, trace};

use crate::core::config::Config;
use crate::core::error::{DxLearnError, Result};
use crate::core::timer::{FrameClock, FrameStats, FrameStatsSample};
use crate::gfx::backend::GraphicsBackend;

pub mod command;
pub mod demos;
pub mod dirty;
pub mod resource;
pub mod scene;
pub mod stage;
pub mod sync;

use command::{CommandList, FrameTarget, ScissorRect, Viewport};
use resource::{FrameConstants, FrameResource, FrameResourceLayout, FrameResourceRing};
use scene::Scene;
use stage::{FrameContext, PipelineTable, Stage, StagePipeline};
use sync::{FenceValue, GpuTimeline, WaitPolicy};

/// 渲染器设置
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RendererSettings {
    pub width: u32,
    pub height: u32,
    /// 帧资源数量 N
    pub frame_resources: usize,
    pub vsync: bool,
    pub clear_color: [f32; 4],
    pub wait_policy: WaitPolicy,
}

impl RendererSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            width: config.window.width,
            height: config.window.height,
            frame_resources: config.graphics.frame_resources,
            vsync: config.graphics.vsync,
            clear_color: config.graphics.clear_color,
            wait_policy: WaitPolicy::from_timeout_ms(config.graphics.fence_wait_timeout_ms),
        }
    }
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// 一帧的执行结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameReport {
    pub frame_index: u64,
    /// 使用的帧资源槽位
    pub slot: usize,
    /// 本帧提交后 signal 的 fence 值
    pub fence_value: FenceValue,
    /// 满一秒时的帧统计
    pub stats: Option<FrameStatsSample>,
}

/// 渲染器
pub struct Renderer<B: GraphicsBackend> {
    backend: B,
    timeline: GpuTimeline<B::Fence>,
    ring: FrameResourceRing<B::Allocator>,
    scene: Scene,
    stages: StagePipeline,
    pipelines: PipelineTable,
    clock: FrameClock,
    stats: FrameStats,
    frame_index: u64,
    settings: RendererSettings,
    /// 因窗口最小化而暂停
    minimized: bool,
}

impl<B: GraphicsBackend> Renderer<B> {
    /// 使用系统计数器创建渲染器
    pub fn new(backend: B, settings: RendererSettings, stages: Vec<Box<dyn Stage>>) -> Result<Self> {
        Self::with_clock(backend, settings, stages, FrameClock::new())
    }

    /// 使用指定时钟创建渲染器
    ///
    /// 运行所有构建钩子，为每个槽位创建分配器和常量缓冲区。
    /// 如果命令队列上有初始化阶段提交的工作，先刷新一次。
    pub fn with_clock(
        mut backend: B,
        settings: RendererSettings,
        stages: Vec<Box<dyn Stage>>,
        mut clock: FrameClock,
    ) -> Result<Self> {
        let fence = backend.create_fence()?;
        let mut timeline = GpuTimeline::new(fence, settings.wait_policy);

        let mut scene = Scene::new(settings.frame_resources);
        let mut stages = StagePipeline::new(stages);
        let mut pipelines = PipelineTable::new();
        stages.build(&mut scene, &mut pipelines)?;

        let layout = FrameResourceLayout {
            pass_count: stages.pass_count(),
            object_count: scene.items().len(),
            material_count: scene.materials().len(),
            dynamic_vertex_count: scene.dynamic_vertex_count(),
        };
        let ring = FrameResourceRing::build(settings.frame_resources, |index| {
            let allocator = backend.create_allocator()?;
            let constants = FrameConstants::new(&mut backend, layout)?;
            Ok(FrameResource::new(index, allocator, constants))
        })?;

        if backend.has_pending_work() {
            let value = timeline.flush()?;
            debug!(fence_value = value.value(), "Initialization work flushed");
        }

        clock.reset();

        info!(
            backend = backend.backend_name(),
            frame_resources = ring.len(),
            pass_count = layout.pass_count,
            object_count = layout.object_count,
            material_count = layout.material_count,
            dynamic_vertex_count = layout.dynamic_vertex_count,
            width = settings.width,
            height = settings.height,
            "Renderer initialized"
        );

        Ok(Self {
            backend,
            timeline,
            ring,
            scene,
            stages,
            pipelines,
            clock,
            stats: FrameStats::new(),
            frame_index: 0,
            settings,
            minimized: false,
        })
    }

    /// 执行一帧
    pub fn frame(&mut self) -> Result<FrameReport> {
        self.clock.tick();

        let stats = self.stats.record(self.clock.total_time());
        if let Some(sample) = stats {
            info!(fps = sample.fps, mspf = sample.mspf, "Frame stats");
        }

        let slot = self.update()?;
        let fence_value = self.draw(slot)?;

        trace!(
            frame_index = self.frame_index,
            slot,
            fence_value = fence_value.value(),
            completed = self.timeline.completed_value().value(),
            "Frame submitted"
        );

        let report = FrameReport {
            frame_index: self.frame_index,
            slot,
            fence_value,
            stats,
        };
        self.frame_index += 1;
        Ok(report)
    }

    /// 响应重绘请求：暂停时不更新也不绘制
    pub fn redraw(&mut self) -> Result<Option<FrameReport>> {
        if self.is_paused() {
            trace!(frame_index = self.frame_index, "Redraw skipped while paused");
            return Ok(None);
        }
        self.frame().map(Some)
    }

    /// 取得槽位并写入本帧的常量
    fn update(&mut self) -> Result<usize> {
        let frame = FrameContext {
            total_time: self.clock.total_time(),
            delta_time: self.clock.delta_time(),
            width: self.settings.width,
            height: self.settings.height,
            frame_index: self.frame_index,
        };

        let resource = self.ring.acquire(self.frame_index, &mut self.timeline)?;
        let slot = resource.index();
        self.stages.update(&frame, &mut self.scene, &mut resource.constants)?;
        Ok(slot)
    }

    /// 录制、提交、signal 并呈现
    fn draw(&mut self, slot: usize) -> Result<FenceValue> {
        let clear_color = self.stages.clear_color(self.settings.clear_color);
        let back_buffer = self.backend.current_back_buffer();
        let (width, height) = (self.settings.width, self.settings.height);

        let resource = self
            .ring
            .slot_mut(slot)
            .ok_or_else(|| DxLearnError::Runtime(format!("Frame resource slot {} out of range", slot)))?;

        let mut list = CommandList::begin(&mut resource.allocator, self.pipelines.initial())?;
        let target = FrameTarget {
            back_buffer,
            viewport: Viewport::full(width, height),
            scissor: ScissorRect::full(width, height),
            clear_color,
            pass_constants: resource.constants.pass.element_address(0)?,
        };

        let scene = &self.scene;
        let pipelines = &self.pipelines;
        let stages = &mut self.stages;
        let constants = &resource.constants;
        list.record_frame(&target, |list| stages.draw(scene, pipelines, constants, list))?;
        list.close()?;

        self.backend.submit(&mut resource.allocator, list)?;
        let fence_value = self.ring.advance(slot, &mut self.timeline)?;
        self.backend.present(self.settings.vsync)?;

        Ok(fence_value)
    }

    /// 窗口尺寸变化
    ///
    /// 先刷新命令队列再重建交换链。宽或高为 0 表示窗口最小化：
    /// 不重建，只暂停，直到下一次有效的尺寸变化。
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            debug!(width, height, "Ignoring resize to empty client area");
            if !self.minimized {
                self.minimized = true;
                self.pause();
            }
            return Ok(());
        }

        if self.minimized {
            self.minimized = false;
            self.resume();
        }

        self.flush()?;
        self.backend.resize(width, height)?;
        self.settings.width = width;
        self.settings.height = height;

        info!(width, height, "Renderer resized");
        Ok(())
    }

    /// 暂停：帧时钟停止，帧间隔为 0
    pub fn pause(&mut self) {
        if !self.clock.is_stopped() {
            self.clock.stop();
            debug!("Renderer paused");
        }
    }

    /// 恢复；最小化期间保持暂停
    pub fn resume(&mut self) {
        if self.minimized {
            return;
        }
        if self.clock.is_stopped() {
            self.clock.start();
            debug!("Renderer resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.clock.is_stopped()
    }

    /// 等待 GPU 完成所有已提交的工作
    pub fn flush(&mut self) -> Result<FenceValue> {
        self.timeline.flush()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn timeline(&self) -> &GpuTimeline<B::Fence> {
        &self.timeline
    }

    pub fn ring(&self) -> &FrameResourceRing<B::Allocator> {
        &self.ring
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut Scene {
        &mut self.scene
    }

    pub fn stages(&self) -> &StagePipeline {
        &self.stages
    }

    pub fn pipelines(&self) -> &PipelineTable {
        &self.pipelines
    }

    pub fn clock(&self) -> &FrameClock {
        &self.clock
    }

    pub fn settings(&self) -> &RendererSettings {
        &self.settings
    }

    /// 下一帧的帧号
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }
}

impl<B: GraphicsBackend> Drop for Renderer<B> {
    fn drop(&mut self) {
        if let Err(e) = self.timeline.flush() {
            error!("Failed to flush command queue on shutdown: {}", e);
        }
    }
}
