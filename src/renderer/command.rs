//! 命令录制与提交模块
//!
//! 每帧录制一个命令列表，顺序固定：
//!
//! 1. 后台缓冲从 Present 转换到 RenderTarget
//! 2. 视口、裁剪矩形、清屏、绑定渲染目标和 Pass 常量
//! 3. 按渲染层分组的绘制调用，每组一个管线状态
//! 4. 后台缓冲从 RenderTarget 转换回 Present
//!
//! 命令列表本身与图形 API 无关，由后端在提交时翻译成具体调用。
//! 所有演示只使用一个命令队列，每帧只有一个命令列表在途。

use crate::core::error::{GraphicsError, Result};

/// 命令分配器
///
/// 只有在 GPU 执行完引用它的全部命令列表之后才能重置。
pub trait CommandAllocator {
    /// 重置分配器，复用其内存
    fn reset(&mut self) -> Result<()>;
}

/// 管线状态标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PipelineId(pub u32);

/// 几何体标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GeometryId(pub u32);

/// 后台缓冲的资源状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    Present,
    RenderTarget,
}

/// 图元拓扑
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveTopology {
    TriangleList,
    PointList,
}

/// 视口
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    /// 覆盖整个渲染目标的视口
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

/// 裁剪矩形
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScissorRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl ScissorRect {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            left: 0,
            top: 0,
            right: width as i32,
            bottom: height as i32,
        }
    }
}

/// 一次索引绘制
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawCall {
    pub geometry: GeometryId,
    pub topology: PrimitiveTopology,
    pub index_count: u32,
    pub start_index: u32,
    pub base_vertex: i32,
    /// 物体常量在当前帧资源中的 GPU 地址
    pub object_constants: u64,
    /// 材质常量在当前帧资源中的 GPU 地址
    pub material_constants: Option<u64>,
    /// 动态顶点在当前帧资源中的 GPU 地址，静态几何体为 None
    pub vertex_buffer: Option<u64>,
}

/// 录制的命令
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Transition {
        back_buffer: usize,
        before: ResourceState,
        after: ResourceState,
    },
    SetViewport(Viewport),
    SetScissor(ScissorRect),
    ClearRenderTarget { back_buffer: usize, color: [f32; 4] },
    ClearDepthStencil { depth: f32, stencil: u8 },
    SetRenderTargets { back_buffer: usize },
    BindPassConstants { address: u64 },
    SetPipeline(PipelineId),
    SetStencilRef(u32),
    Draw(DrawCall),
}

/// 一帧的渲染目标参数
#[derive(Debug, Clone, Copy)]
pub struct FrameTarget {
    pub back_buffer: usize,
    pub viewport: Viewport,
    pub scissor: ScissorRect,
    pub clear_color: [f32; 4],
    /// Pass 常量的 GPU 地址
    pub pass_constants: u64,
}

/// 命令列表
///
/// 通过 `begin` 打开（同时重置分配器），`close` 之后才能提交。
#[derive(Debug)]
pub struct CommandList {
    commands: Vec<Command>,
    initial_pipeline: Option<PipelineId>,
    closed: bool,
}

impl CommandList {
    /// 重置分配器并打开一个新的命令列表
    ///
    /// 调用方必须保证分配器上一次使用已经在 GPU 上完成（由帧资源环的 fence 检查保证）。
    pub fn begin<A: CommandAllocator>(allocator: &mut A, initial_pipeline: Option<PipelineId>) -> Result<Self> {
        allocator.reset()?;
        Ok(Self {
            commands: Vec::with_capacity(64),
            initial_pipeline,
            closed: false,
        })
    }

    /// 追加一条命令
    pub fn push(&mut self, command: Command) -> Result<()> {
        if self.closed {
            return Err(GraphicsError::CommandExecution(
                "Recording into a closed command list".to_string(),
            ).into());
        }
        self.commands.push(command);
        Ok(())
    }

    /// 录制一整帧
    ///
    /// `draw` 负责录制按层分组的绘制调用。
    pub fn record_frame<F>(&mut self, target: &FrameTarget, draw: F) -> Result<()>
    where
        F: FnOnce(&mut CommandList) -> Result<()>,
    {
        self.push(Command::Transition {
            back_buffer: target.back_buffer,
            before: ResourceState::Present,
            after: ResourceState::RenderTarget,
        })?;
        self.push(Command::SetViewport(target.viewport))?;
        self.push(Command::SetScissor(target.scissor))?;
        self.push(Command::ClearRenderTarget {
            back_buffer: target.back_buffer,
            color: target.clear_color,
        })?;
        self.push(Command::ClearDepthStencil { depth: 1.0, stencil: 0 })?;
        self.push(Command::SetRenderTargets { back_buffer: target.back_buffer })?;
        self.push(Command::BindPassConstants { address: target.pass_constants })?;

        draw(self)?;

        self.push(Command::Transition {
            back_buffer: target.back_buffer,
            before: ResourceState::RenderTarget,
            after: ResourceState::Present,
        })
    }

    /// 录制一个绘制组：切换管线状态，然后依次绘制
    pub fn draw_group<I>(&mut self, pipeline: PipelineId, stencil_ref: Option<u32>, draws: I) -> Result<()>
    where
        I: IntoIterator<Item = DrawCall>,
    {
        self.push(Command::SetPipeline(pipeline))?;
        if let Some(reference) = stencil_ref {
            self.push(Command::SetStencilRef(reference))?;
        }
        for draw in draws {
            self.push(Command::Draw(draw))?;
        }
        Ok(())
    }

    /// 结束录制
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(GraphicsError::CommandExecution(
                "Command list closed twice".to_string(),
            ).into());
        }
        self.closed = true;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// 取出录制的命令，交给后端翻译
    pub fn into_commands(self) -> Vec<Command> {
        self.commands
    }

    pub fn initial_pipeline(&self) -> Option<PipelineId> {
        self.initial_pipeline
    }

    /// 绘制调用数量
    pub fn draw_count(&self) -> usize {
        self.commands.iter().filter(|c| matches!(c, Command::Draw(_))).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct CountingAllocator {
        resets: u32,
    }

    impl CommandAllocator for CountingAllocator {
        fn reset(&mut self) -> Result<()> {
            self.resets += 1;
            Ok(())
        }
    }

    fn target() -> FrameTarget {
        FrameTarget {
            back_buffer: 1,
            viewport: Viewport::full(800, 600),
            scissor: ScissorRect::full(800, 600),
            clear_color: [0.1, 0.2, 0.3, 1.0],
            pass_constants: 0x1000,
        }
    }

    fn draw(index_count: u32) -> DrawCall {
        DrawCall {
            geometry: GeometryId(0),
            topology: PrimitiveTopology::TriangleList,
            index_count,
            start_index: 0,
            base_vertex: 0,
            object_constants: 0,
            material_constants: None,
            vertex_buffer: None,
        }
    }

    #[test]
    fn test_begin_resets_allocator() {
        let mut allocator = CountingAllocator::default();
        let list = CommandList::begin(&mut allocator, Some(PipelineId(0))).unwrap();
        assert_eq!(allocator.resets, 1);
        assert_eq!(list.initial_pipeline(), Some(PipelineId(0)));
        assert!(list.commands().is_empty());
    }

    #[test]
    fn test_record_frame_order() {
        let mut allocator = CountingAllocator::default();
        let mut list = CommandList::begin(&mut allocator, None).unwrap();
        list.record_frame(&target(), |list| {
            list.draw_group(PipelineId(0), None, vec![draw(36), draw(6)])?;
            list.draw_group(PipelineId(1), Some(1), vec![draw(12)])
        })
        .unwrap();
        list.close().unwrap();

        let commands = list.commands();
        assert_eq!(
            commands.first(),
            Some(&Command::Transition {
                back_buffer: 1,
                before: ResourceState::Present,
                after: ResourceState::RenderTarget,
            })
        );
        assert_eq!(
            commands.last(),
            Some(&Command::Transition {
                back_buffer: 1,
                before: ResourceState::RenderTarget,
                after: ResourceState::Present,
            })
        );
        assert_eq!(list.draw_count(), 3);

        let pipelines: Vec<PipelineId> = commands
            .iter()
            .filter_map(|c| match c {
                Command::SetPipeline(id) => Some(*id),
                _ => None,
            })
            .collect();
        assert_eq!(pipelines, vec![PipelineId(0), PipelineId(1)]);
        assert!(commands.contains(&Command::SetStencilRef(1)));
        assert!(commands.contains(&Command::BindPassConstants { address: 0x1000 }));
    }

    #[test]
    fn test_closed_list_rejects_commands() {
        let mut allocator = CountingAllocator::default();
        let mut list = CommandList::begin(&mut allocator, None).unwrap();
        list.close().unwrap();
        assert!(list.push(Command::SetStencilRef(0)).is_err());
        assert!(list.close().is_err());
    }
}
