//! 软件模拟后端
//!
//! 不依赖任何图形 API 的无头后端。命令队列是一个 FIFO：
//! 提交的命令列表和 signal 按顺序排队，由模拟 GPU 依次"执行"。
//!
//! 何时执行由 `latency` 决定：
//!
//! - `Some(n)`：在途的 signal 超过 n 个时，GPU 自动向前执行
//! - `None`：GPU 只在 CPU 等待 fence 时才执行，适合在测试中精确控制时序
//!
//! 所有状态都放在共享的 `SoftwareGpu` 句柄里，测试可以通过它观察
//! 执行过的命令列表、fence 等待和分配器重置。

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, trace};

use crate::core::error::{GraphicsError, Result};
use crate::gfx::backend::GraphicsBackend;
use crate::renderer::command::{Command, CommandAllocator, CommandList, PipelineId};
use crate::renderer::resource::{HostStorage, UploadAllocator, UploadStorage};
use crate::renderer::sync::{FenceValue, GpuFence};

/// 资源放置对齐（64 KiB）
const RESOURCE_PLACEMENT_ALIGNMENT: u64 = 64 * 1024;

/// 模拟的上传堆起始地址
const UPLOAD_HEAP_BASE: u64 = 0x1000_0000;

/// GPU 执行完毕的命令列表
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedList {
    /// 所属分配器的编号
    pub allocator: usize,
    pub initial_pipeline: Option<PipelineId>,
    pub commands: Vec<Command>,
}

impl ExecutedList {
    pub fn draw_count(&self) -> usize {
        self.commands.iter().filter(|c| matches!(c, Command::Draw(_))).count()
    }
}

#[derive(Debug)]
enum QueueItem {
    Execute(ExecutedList),
    Signal(u64),
}

#[derive(Debug)]
struct GpuState {
    queue: VecDeque<QueueItem>,
    completed: u64,
    latency: Option<usize>,
    hung: bool,
    executed: Vec<ExecutedList>,
    fence_waits: Vec<FenceValue>,
    allocator_resets: Vec<usize>,
    presents: u64,
    next_allocator: usize,
    next_address: u64,
}

impl GpuState {
    fn retire_one(&mut self) -> bool {
        match self.queue.pop_front() {
            Some(QueueItem::Execute(list)) => {
                trace!(allocator = list.allocator, commands = list.commands.len(), "Command list executed");
                self.executed.push(list);
            }
            Some(QueueItem::Signal(value)) => self.completed = value,
            None => return false,
        }
        true
    }

    fn retire_through(&mut self, value: u64) -> bool {
        while self.completed < value {
            if !self.retire_one() {
                return false;
            }
        }
        true
    }

    fn pending_signals(&self) -> usize {
        self.queue.iter().filter(|item| matches!(item, QueueItem::Signal(_))).count()
    }

    fn apply_latency(&mut self) {
        if self.hung {
            return;
        }
        if let Some(latency) = self.latency {
            while self.pending_signals() > latency {
                self.retire_one();
            }
        }
    }

    fn references_allocator(&self, allocator: usize) -> bool {
        self.queue.iter().any(|item| match item {
            QueueItem::Execute(list) => list.allocator == allocator,
            QueueItem::Signal(_) => false,
        })
    }
}

/// 模拟 GPU 的共享句柄
#[derive(Debug, Clone)]
pub struct SoftwareGpu {
    state: Arc<Mutex<GpuState>>,
}

impl SoftwareGpu {
    /// 创建模拟 GPU
    ///
    /// `latency` 为允许在途的 signal 数量，`None` 表示只在等待时执行。
    pub fn new(latency: Option<usize>) -> Self {
        Self {
            state: Arc::new(Mutex::new(GpuState {
                queue: VecDeque::new(),
                completed: 0,
                latency,
                hung: false,
                executed: Vec::new(),
                fence_waits: Vec::new(),
                allocator_resets: Vec::new(),
                presents: 0,
                next_allocator: 0,
                next_address: UPLOAD_HEAP_BASE,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GpuState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 模拟 GPU 挂起：之后不再执行任何工作
    pub fn set_hung(&self, hung: bool) {
        self.lock().hung = hung;
    }

    /// 执行队列中的全部工作
    pub fn retire_all(&self) {
        let mut state = self.lock();
        while state.retire_one() {}
    }

    /// 执行到指定的 fence 值为止；该值从未 signal 过时返回 false
    pub fn retire_through(&self, value: FenceValue) -> bool {
        self.lock().retire_through(value.value())
    }

    pub fn completed_value(&self) -> FenceValue {
        FenceValue::new(self.lock().completed)
    }

    /// 队列中尚未执行的 signal 数量
    pub fn pending_signals(&self) -> usize {
        self.lock().pending_signals()
    }

    /// 执行过的命令列表
    pub fn executed_lists(&self) -> Vec<ExecutedList> {
        self.lock().executed.clone()
    }

    /// CPU 阻塞等待过的 fence 值
    pub fn fence_waits(&self) -> Vec<FenceValue> {
        self.lock().fence_waits.clone()
    }

    /// 每次重置的分配器编号
    pub fn allocator_resets(&self) -> Vec<usize> {
        self.lock().allocator_resets.clone()
    }

    pub fn present_count(&self) -> u64 {
        self.lock().presents
    }
}

/// 软件 fence
pub struct SoftwareFence {
    gpu: SoftwareGpu,
}

impl GpuFence for SoftwareFence {
    fn signal(&self, value: FenceValue) -> Result<()> {
        let mut state = self.gpu.lock();
        state.queue.push_back(QueueItem::Signal(value.value()));
        state.apply_latency();
        Ok(())
    }

    fn completed_value(&self) -> FenceValue {
        self.gpu.completed_value()
    }

    fn wait_for(&self, value: FenceValue, timeout: Option<Duration>) -> Result<bool> {
        let mut state = self.gpu.lock();
        state.fence_waits.push(value);

        if state.completed >= value.value() {
            return Ok(true);
        }
        if !state.hung && state.retire_through(value.value()) {
            return Ok(true);
        }

        match timeout {
            Some(_) => Ok(false),
            None => Err(GraphicsError::CommandExecution(format!(
                "Fence value {} can never complete (completed {})",
                value.value(),
                state.completed
            ))
            .into()),
        }
    }
}

/// 软件命令分配器
pub struct SoftwareAllocator {
    id: usize,
    gpu: SoftwareGpu,
}

impl SoftwareAllocator {
    pub fn id(&self) -> usize {
        self.id
    }
}

impl CommandAllocator for SoftwareAllocator {
    fn reset(&mut self) -> Result<()> {
        let mut state = self.gpu.lock();
        if state.references_allocator(self.id) {
            return Err(GraphicsError::CommandExecution(format!(
                "Command allocator {} reset while the GPU still executes its commands",
                self.id
            ))
            .into());
        }
        state.allocator_resets.push(self.id);
        Ok(())
    }
}

/// 软件后端
pub struct SoftwareBackend {
    gpu: SoftwareGpu,
    back_buffer_count: usize,
    current_back_buffer: usize,
    width: u32,
    height: u32,
}

impl SoftwareBackend {
    pub fn new(gpu: SoftwareGpu, back_buffer_count: usize, width: u32, height: u32) -> Self {
        debug!(back_buffer_count, width, height, "Software backend created");
        Self {
            gpu,
            back_buffer_count,
            current_back_buffer: 0,
            width,
            height,
        }
    }

    pub fn gpu(&self) -> &SoftwareGpu {
        &self.gpu
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl UploadAllocator for SoftwareBackend {
    fn allocate_upload(&mut self, byte_size: u64) -> Result<Box<dyn UploadStorage>> {
        let mut state = self.gpu.lock();
        let address = state.next_address;
        let placement = byte_size.max(1).div_ceil(RESOURCE_PLACEMENT_ALIGNMENT) * RESOURCE_PLACEMENT_ALIGNMENT;
        state.next_address += placement;
        Ok(Box::new(HostStorage::new(byte_size, address)))
    }
}

impl GraphicsBackend for SoftwareBackend {
    type Fence = SoftwareFence;
    type Allocator = SoftwareAllocator;

    fn backend_name(&self) -> &str {
        "Software"
    }

    fn create_fence(&mut self) -> Result<SoftwareFence> {
        Ok(SoftwareFence { gpu: self.gpu.clone() })
    }

    fn create_allocator(&mut self) -> Result<SoftwareAllocator> {
        let mut state = self.gpu.lock();
        let id = state.next_allocator;
        state.next_allocator += 1;
        Ok(SoftwareAllocator { id, gpu: self.gpu.clone() })
    }

    fn submit(&mut self, allocator: &mut SoftwareAllocator, list: CommandList) -> Result<()> {
        if !list.is_closed() {
            return Err(GraphicsError::CommandExecution(
                "Submitting a command list that is still open".to_string(),
            )
            .into());
        }

        let executed = ExecutedList {
            allocator: allocator.id,
            initial_pipeline: list.initial_pipeline(),
            commands: list.into_commands(),
        };
        self.gpu.lock().queue.push_back(QueueItem::Execute(executed));
        Ok(())
    }

    fn has_pending_work(&self) -> bool {
        matches!(self.gpu.lock().queue.back(), Some(QueueItem::Execute(_)))
    }

    fn back_buffer_count(&self) -> usize {
        self.back_buffer_count
    }

    fn current_back_buffer(&self) -> usize {
        self.current_back_buffer
    }

    fn present(&mut self, _vsync: bool) -> Result<()> {
        self.gpu.lock().presents += 1;
        self.current_back_buffer = (self.current_back_buffer + 1) % self.back_buffer_count;
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        if !self.gpu.lock().queue.is_empty() {
            return Err(GraphicsError::SwapchainError(
                "Swap chain buffers resized while the GPU still references them".to_string(),
            )
            .into());
        }

        self.width = width;
        self.height = height;
        self.current_back_buffer = 0;
        debug!(width, height, "Software swap chain resized");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn closed_list(allocator: &mut SoftwareAllocator) -> CommandList {
        let mut list = CommandList::begin(allocator, None).unwrap();
        list.push(Command::SetStencilRef(0)).unwrap();
        list.close().unwrap();
        list
    }

    #[test]
    fn test_latency_retires_old_signals() {
        let gpu = SoftwareGpu::new(Some(1));
        let mut backend = SoftwareBackend::new(gpu.clone(), 2, 64, 64);
        let fence = backend.create_fence().unwrap();

        fence.signal(FenceValue::new(1)).unwrap();
        assert_eq!(fence.completed_value(), FenceValue::ZERO);
        fence.signal(FenceValue::new(2)).unwrap();
        assert_eq!(fence.completed_value(), FenceValue::new(1));
        assert_eq!(gpu.pending_signals(), 1);
    }

    #[test]
    fn test_wait_executes_on_demand() {
        let gpu = SoftwareGpu::new(None);
        let mut backend = SoftwareBackend::new(gpu.clone(), 2, 64, 64);
        let fence = backend.create_fence().unwrap();
        let mut allocator = backend.create_allocator().unwrap();

        let list = closed_list(&mut allocator);
        backend.submit(&mut allocator, list).unwrap();
        fence.signal(FenceValue::new(1)).unwrap();
        assert!(gpu.executed_lists().is_empty());

        assert!(fence.wait_for(FenceValue::new(1), None).unwrap());
        assert_eq!(gpu.executed_lists().len(), 1);
        assert_eq!(gpu.fence_waits(), vec![FenceValue::new(1)]);
    }

    #[test]
    fn test_wait_for_unsignaled_value() {
        let gpu = SoftwareGpu::new(None);
        let mut backend = SoftwareBackend::new(gpu, 2, 64, 64);
        let fence = backend.create_fence().unwrap();

        assert!(!fence.wait_for(FenceValue::new(3), Some(Duration::from_millis(1))).unwrap());
        assert!(fence.wait_for(FenceValue::new(3), None).is_err());
    }

    #[test]
    fn test_hung_gpu_never_completes() {
        let gpu = SoftwareGpu::new(Some(0));
        gpu.set_hung(true);
        let mut backend = SoftwareBackend::new(gpu, 2, 64, 64);
        let fence = backend.create_fence().unwrap();

        fence.signal(FenceValue::new(1)).unwrap();
        assert_eq!(fence.completed_value(), FenceValue::ZERO);
        assert!(!fence.wait_for(FenceValue::new(1), Some(Duration::from_millis(1))).unwrap());
    }

    #[test]
    fn test_allocator_reset_refused_while_in_flight() {
        let gpu = SoftwareGpu::new(None);
        let mut backend = SoftwareBackend::new(gpu.clone(), 2, 64, 64);
        let fence = backend.create_fence().unwrap();
        let mut allocator = backend.create_allocator().unwrap();

        let list = closed_list(&mut allocator);
        backend.submit(&mut allocator, list).unwrap();
        fence.signal(FenceValue::new(1)).unwrap();
        assert!(allocator.reset().is_err());

        gpu.retire_all();
        assert!(allocator.reset().is_ok());
        assert_eq!(gpu.allocator_resets(), vec![allocator.id(), allocator.id()]);
    }

    #[test]
    fn test_submit_requires_closed_list() {
        let mut backend = SoftwareBackend::new(SoftwareGpu::new(Some(0)), 2, 64, 64);
        let mut allocator = backend.create_allocator().unwrap();
        let list = CommandList::begin(&mut allocator, None).unwrap();
        assert!(backend.submit(&mut allocator, list).is_err());
    }

    #[test]
    fn test_present_rotates_and_resize_resets() {
        let gpu = SoftwareGpu::new(Some(0));
        let mut backend = SoftwareBackend::new(gpu.clone(), 3, 64, 64);

        let indices: Vec<usize> = (0..4)
            .map(|_| {
                let index = backend.current_back_buffer();
                backend.present(true).unwrap();
                index
            })
            .collect();
        assert_eq!(indices, vec![0, 1, 2, 0]);
        assert_eq!(gpu.present_count(), 4);

        backend.resize(128, 96).unwrap();
        assert_eq!(backend.current_back_buffer(), 0);
        assert_eq!(backend.size(), (128, 96));
    }

    #[test]
    fn test_resize_refused_with_work_in_flight() {
        let gpu = SoftwareGpu::new(None);
        let mut backend = SoftwareBackend::new(gpu.clone(), 2, 64, 64);
        let fence = backend.create_fence().unwrap();
        fence.signal(FenceValue::new(1)).unwrap();

        assert!(backend.resize(32, 32).is_err());
        gpu.retire_all();
        assert!(backend.resize(32, 32).is_ok());
    }

    #[test]
    fn test_upload_allocations_do_not_overlap() {
        let mut backend = SoftwareBackend::new(SoftwareGpu::new(Some(0)), 2, 64, 64);
        let a = backend.allocate_upload(256).unwrap();
        let b = backend.allocate_upload(70_000).unwrap();
        let c = backend.allocate_upload(256).unwrap();

        assert_eq!(a.gpu_address(), UPLOAD_HEAP_BASE);
        assert_eq!(b.gpu_address(), UPLOAD_HEAP_BASE + RESOURCE_PLACEMENT_ALIGNMENT);
        assert_eq!(c.gpu_address(), UPLOAD_HEAP_BASE + 3 * RESOURCE_PLACEMENT_ALIGNMENT);
        assert_eq!(b.bytes().len(), 70_000);
    }
}
