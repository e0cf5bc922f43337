//! 图形后端的统一抽象接口
//!
//! 本模块定义了所有图形后端（软件模拟、DirectX 12）必须实现的统一接口。
//! 上层的帧资源环、命令录制和同步逻辑只依赖这个 trait，不关心具体的图形 API。

use crate::core::error::Result;
use crate::renderer::command::{CommandAllocator, CommandList};
use crate::renderer::resource::UploadAllocator;
use crate::renderer::sync::GpuFence;

/// 图形后端的统一接口
///
/// 后端提供一个命令队列、一个 fence、若干命令分配器、上传堆内存和交换链。
/// 整个进程只使用一个命令队列。
pub trait GraphicsBackend: UploadAllocator {
    /// 后端的 fence 类型
    type Fence: GpuFence;
    /// 后端的命令分配器类型
    type Allocator: CommandAllocator;

    /// 获取后端的名称
    ///
    /// 用于日志输出和窗口标题（如 "Software"、"DirectX 12"）。
    fn backend_name(&self) -> &str;

    /// 创建绑定到命令队列的 fence，初始完成值为 0
    fn create_fence(&mut self) -> Result<Self::Fence>;

    /// 创建命令分配器
    fn create_allocator(&mut self) -> Result<Self::Allocator>;

    /// 把已关闭的命令列表排入命令队列
    ///
    /// 命令列表的内存属于 `allocator`，在 GPU 执行完之前不能重置它。
    fn submit(&mut self, allocator: &mut Self::Allocator, list: CommandList) -> Result<()>;

    /// 命令队列上是否还有尚未 signal 过的工作
    ///
    /// 初始化阶段录制的上传命令就属于这种情况。
    fn has_pending_work(&self) -> bool;

    /// 交换链后台缓冲数量
    fn back_buffer_count(&self) -> usize;

    /// 当前后台缓冲索引
    fn current_back_buffer(&self) -> usize;

    /// 呈现当前后台缓冲并轮转到下一个
    fn present(&mut self, vsync: bool) -> Result<()>;

    /// 重建交换链缓冲区
    ///
    /// 调用前必须刷新命令队列，之后后台缓冲索引回到 0。
    fn resize(&mut self, width: u32, height: u32) -> Result<()>;
}
