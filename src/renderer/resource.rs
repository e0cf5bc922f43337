//! 帧资源模块
//!
//! 提供上传缓冲区、帧资源以及帧资源环。
//!
//! # 帧资源环
//!
//! 环中有固定数量 N（通常为 3）的槽位，在初始化时一次性创建，进程结束时销毁。
//! 每个槽位独占一个命令分配器、一组常量缓冲区和可选的动态顶点缓冲区，
//! 并记录最后一次提交时 signal 的 fence 值：
//!
//! - 帧 k 使用槽位 `k mod N`
//! - 复用槽位前，若其 fence 值尚未被 GPU 完成，CPU 阻塞等待
//! - 提交之后，递增 fence 计数器并把新值记为该槽位的 fence 值
//!
//! 这样 CPU 可以在 GPU 处理第 k 帧的同时准备第 k+1 帧。

use bytemuck::Pod;
use std::marker::PhantomData;
use tracing::debug;

use crate::core::error::{DxLearnError, GraphicsError, Result};
use super::command::CommandAllocator;
use super::scene::{MaterialConstants, ObjectConstants, PassConstants, Vertex};
use super::sync::{FenceValue, GpuFence, GpuTimeline};

/// 常量缓冲区元素的对齐要求（字节）
pub const CONSTANT_BUFFER_ALIGNMENT: u64 = 256;

/// 常量缓冲区大小向上对齐到 256 字节
pub fn align_constant_buffer_size(size: u64) -> u64 {
    (size + CONSTANT_BUFFER_ALIGNMENT - 1) & !(CONSTANT_BUFFER_ALIGNMENT - 1)
}

/// 缓冲区使用类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUsageType {
    /// 常量缓冲区，元素按 256 字节对齐
    Constant,
    /// 动态顶点缓冲区，元素紧密排列
    Vertex,
}

/// 上传堆上的一段 CPU 可写内存
///
/// 由后端分配：software 后端使用普通内存，DX12 后端使用常驻映射的上传堆资源。
pub trait UploadStorage {
    /// 映射后的内存
    fn bytes(&self) -> &[u8];

    /// 可写的映射内存
    fn bytes_mut(&mut self) -> &mut [u8];

    /// 起始 GPU 虚拟地址
    fn gpu_address(&self) -> u64;
}

/// 主机内存实现的上传存储
pub struct HostStorage {
    data: Vec<u8>,
    base_address: u64,
}

impl HostStorage {
    pub fn new(byte_size: u64, base_address: u64) -> Self {
        Self {
            data: vec![0; byte_size as usize],
            base_address,
        }
    }
}

impl UploadStorage for HostStorage {
    fn bytes(&self) -> &[u8] {
        &self.data
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    fn gpu_address(&self) -> u64 {
        self.base_address
    }
}

/// 上传缓冲区（CPU -> GPU）
///
/// # 类型参数
///
/// * `T` - 缓冲区中存储的数据类型，必须是 `Pod`
pub struct UploadBuffer<T> {
    storage: Box<dyn UploadStorage>,
    element_count: usize,
    element_size: u64,
    usage: BufferUsageType,
    writes: u64,
    _phantom: PhantomData<T>,
}

impl<T: Pod> UploadBuffer<T> {
    /// 单个元素占用的字节数（常量缓冲区已对齐）
    pub fn element_stride(usage: BufferUsageType) -> u64 {
        let size = std::mem::size_of::<T>() as u64;
        match usage {
            BufferUsageType::Constant => align_constant_buffer_size(size),
            BufferUsageType::Vertex => size,
        }
    }

    /// 容纳 `element_count` 个元素所需的字节数
    pub fn required_size(element_count: usize, usage: BufferUsageType) -> u64 {
        Self::element_stride(usage) * element_count as u64
    }

    /// 在后端分配好的存储上创建上传缓冲区
    pub fn new(storage: Box<dyn UploadStorage>, element_count: usize, usage: BufferUsageType) -> Result<Self> {
        let required = Self::required_size(element_count, usage);
        if (storage.bytes().len() as u64) < required {
            return Err(GraphicsError::ResourceCreation(format!(
                "Upload storage holds {} bytes, {} required",
                storage.bytes().len(),
                required
            ))
            .into());
        }

        Ok(Self {
            storage,
            element_count,
            element_size: Self::element_stride(usage),
            usage,
            writes: 0,
            _phantom: PhantomData,
        })
    }

    /// 写入第 `index` 个元素
    pub fn copy_data(&mut self, index: usize, data: &T) -> Result<()> {
        let offset = self.element_offset(index)? as usize;
        let bytes = bytemuck::bytes_of(data);
        self.storage.bytes_mut()[offset..offset + bytes.len()].copy_from_slice(bytes);
        self.writes += 1;
        Ok(())
    }

    /// 读回第 `index` 个元素
    pub fn read(&self, index: usize) -> Result<T> {
        let offset = self.element_offset(index)? as usize;
        let size = std::mem::size_of::<T>();
        Ok(bytemuck::pod_read_unaligned(&self.storage.bytes()[offset..offset + size]))
    }

    /// 元素在缓冲区中的偏移量
    pub fn element_offset(&self, index: usize) -> Result<u64> {
        if index >= self.element_count {
            return Err(DxLearnError::Runtime(format!(
                "Upload buffer index {} out of range ({} elements)",
                index, self.element_count
            )));
        }
        Ok(self.element_size * index as u64)
    }

    /// 元素的 GPU 虚拟地址
    pub fn element_address(&self, index: usize) -> Result<u64> {
        Ok(self.storage.gpu_address() + self.element_offset(index)?)
    }

    pub fn element_count(&self) -> usize {
        self.element_count
    }

    /// 每个元素的大小（对齐后）
    pub fn element_size(&self) -> u64 {
        self.element_size
    }

    pub fn usage(&self) -> BufferUsageType {
        self.usage
    }

    /// 累计写入次数
    pub fn write_count(&self) -> u64 {
        self.writes
    }
}

/// 每个槽位各缓冲区的元素数量
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameResourceLayout {
    pub pass_count: usize,
    pub object_count: usize,
    pub material_count: usize,
    /// 每帧重写的顶点数量，0 表示不创建动态顶点缓冲区
    pub dynamic_vertex_count: usize,
}

/// 为上传缓冲区分配存储的一方（通常是图形后端）
pub trait UploadAllocator {
    fn allocate_upload(&mut self, byte_size: u64) -> Result<Box<dyn UploadStorage>>;
}

/// 一个槽位的上传缓冲区
pub struct FrameConstants {
    pub pass: UploadBuffer<PassConstants>,
    pub objects: UploadBuffer<ObjectConstants>,
    pub materials: UploadBuffer<MaterialConstants>,
    /// 波浪等每帧整体重写的顶点
    pub dynamic_vertices: Option<UploadBuffer<Vertex>>,
}

impl FrameConstants {
    pub fn new(allocator: &mut dyn UploadAllocator, layout: FrameResourceLayout) -> Result<Self> {
        let dynamic_vertices = match layout.dynamic_vertex_count {
            0 => None,
            count => {
                let storage = allocator.allocate_upload(UploadBuffer::<Vertex>::required_size(count, BufferUsageType::Vertex))?;
                Some(UploadBuffer::new(storage, count, BufferUsageType::Vertex)?)
            }
        };

        Ok(Self {
            pass: Self::buffer(allocator, layout.pass_count)?,
            objects: Self::buffer(allocator, layout.object_count)?,
            materials: Self::buffer(allocator, layout.material_count)?,
            dynamic_vertices,
        })
    }

    fn buffer<T: Pod>(allocator: &mut dyn UploadAllocator, count: usize) -> Result<UploadBuffer<T>> {
        // 0 字节的资源无法创建，至少保留一个元素
        let count = count.max(1);
        let storage = allocator.allocate_upload(UploadBuffer::<T>::required_size(count, BufferUsageType::Constant))?;
        UploadBuffer::new(storage, count, BufferUsageType::Constant)
    }
}

/// 帧资源：环中的一个槽位
pub struct FrameResource<A> {
    index: usize,
    /// 独占的命令分配器
    pub allocator: A,
    /// 每帧更新的常量缓冲区
    pub constants: FrameConstants,
    fence: FenceValue,
}

impl<A> FrameResource<A> {
    pub fn new(index: usize, allocator: A, constants: FrameConstants) -> Self {
        Self {
            index,
            allocator,
            constants,
            fence: FenceValue::ZERO,
        }
    }

    /// 槽位编号
    pub fn index(&self) -> usize {
        self.index
    }

    /// 最后一次提交时 signal 的 fence 值，0 表示从未使用
    pub fn fence(&self) -> FenceValue {
        self.fence
    }
}

/// 帧资源环
pub struct FrameResourceRing<A> {
    slots: Vec<FrameResource<A>>,
}

impl<A: CommandAllocator> FrameResourceRing<A> {
    /// 用工厂函数创建 `count` 个槽位
    pub fn build<F>(count: usize, mut make: F) -> Result<Self>
    where
        F: FnMut(usize) -> Result<FrameResource<A>>,
    {
        if count == 0 {
            return Err(DxLearnError::Initialization(
                "At least one frame resource is required".to_string(),
            ));
        }

        let slots = (0..count).map(&mut make).collect::<Result<Vec<_>>>()?;
        debug!(count, "Frame resources created");
        Ok(Self { slots })
    }

    /// 槽位数量 N
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// 帧号对应的槽位：`frame_index mod N`
    pub fn slot_index(&self, frame_index: u64) -> usize {
        (frame_index % self.slots.len() as u64) as usize
    }

    /// 取得帧号对应的槽位
    ///
    /// 槽位的 fence 值尚未完成时阻塞，返回时其分配器和常量缓冲区可以安全复用。
    pub fn acquire<F: GpuFence>(
        &mut self,
        frame_index: u64,
        timeline: &mut GpuTimeline<F>,
    ) -> Result<&mut FrameResource<A>> {
        let index = self.slot_index(frame_index);
        let watermark = self.slots[index].fence;

        if !timeline.is_completed(watermark) {
            debug!(
                frame_index,
                slot = index,
                fence_value = watermark.value(),
                "Frame resource still in use by GPU"
            );
            timeline.wait_until(watermark)?;
        }

        Ok(&mut self.slots[index])
    }

    /// 提交完成后推进时间线，并把新的 fence 值记到槽位上
    pub fn advance<F: GpuFence>(&mut self, slot: usize, timeline: &mut GpuTimeline<F>) -> Result<FenceValue> {
        let len = self.slots.len();
        let resource = self.slots.get_mut(slot).ok_or_else(|| {
            DxLearnError::Runtime(format!("Frame resource slot {} out of range ({} slots)", slot, len))
        })?;
        let value = timeline.advance()?;
        resource.fence = value;
        Ok(value)
    }

    pub fn slot(&self, index: usize) -> Option<&FrameResource<A>> {
        self.slots.get(index)
    }

    pub fn slot_mut(&mut self, index: usize) -> Option<&mut FrameResource<A>> {
        self.slots.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FrameResource<A>> {
        self.slots.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::software::{SoftwareAllocator, SoftwareBackend, SoftwareGpu};
    use crate::gfx::GraphicsBackend;
    use crate::renderer::sync::WaitPolicy;

    const LAYOUT: FrameResourceLayout = FrameResourceLayout {
        pass_count: 1,
        object_count: 4,
        material_count: 2,
        dynamic_vertex_count: 0,
    };

    #[repr(C)]
    #[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
    struct TestData {
        value: f32,
    }

    fn ring(backend: &mut SoftwareBackend, count: usize) -> FrameResourceRing<SoftwareAllocator> {
        FrameResourceRing::build(count, |i| {
            let allocator = backend.create_allocator()?;
            let constants = FrameConstants::new(&mut *backend, LAYOUT)?;
            Ok(FrameResource::new(i, allocator, constants))
        })
        .unwrap()
    }

    #[test]
    fn test_constant_buffer_alignment() {
        assert_eq!(align_constant_buffer_size(100), 256);
        assert_eq!(align_constant_buffer_size(256), 256);
        assert_eq!(align_constant_buffer_size(300), 512);
    }

    #[test]
    fn test_upload_buffer_sizing() {
        assert_eq!(UploadBuffer::<TestData>::element_stride(BufferUsageType::Constant), 256);
        assert_eq!(UploadBuffer::<TestData>::required_size(10, BufferUsageType::Constant), 2560);
        assert_eq!(UploadBuffer::<TestData>::element_stride(BufferUsageType::Vertex), 4);
        assert_eq!(UploadBuffer::<TestData>::required_size(10, BufferUsageType::Vertex), 40);
    }

    #[test]
    fn test_upload_buffer_copy_and_address() {
        let storage = Box::new(HostStorage::new(512, 0x10000));
        let mut buffer = UploadBuffer::<TestData>::new(storage, 2, BufferUsageType::Constant).unwrap();

        buffer.copy_data(1, &TestData { value: 4.5 }).unwrap();
        assert_eq!(buffer.read(1).unwrap(), TestData { value: 4.5 });
        assert_eq!(buffer.read(0).unwrap(), TestData { value: 0.0 });
        assert_eq!(buffer.element_address(1).unwrap(), 0x10100);
        assert_eq!(buffer.write_count(), 1);
        assert!(buffer.copy_data(2, &TestData { value: 1.0 }).is_err());
    }

    #[test]
    fn test_upload_buffer_rejects_small_storage() {
        let storage = Box::new(HostStorage::new(100, 0));
        assert!(UploadBuffer::<TestData>::new(storage, 1, BufferUsageType::Constant).is_err());
    }

    #[test]
    fn test_dynamic_vertices_are_packed_per_slot() {
        let mut backend = SoftwareBackend::new(SoftwareGpu::new(Some(0)), 2, 800, 600);
        let layout = FrameResourceLayout { dynamic_vertex_count: 100, ..LAYOUT };
        let first = FrameConstants::new(&mut backend, layout).unwrap();
        let second = FrameConstants::new(&mut backend, layout).unwrap();

        let vertices = first.dynamic_vertices.as_ref().unwrap();
        assert_eq!(vertices.usage(), BufferUsageType::Vertex);
        assert_eq!(vertices.element_count(), 100);
        assert_eq!(vertices.element_size(), std::mem::size_of::<Vertex>() as u64);
        assert_ne!(
            vertices.element_address(0).unwrap(),
            second.dynamic_vertices.as_ref().unwrap().element_address(0).unwrap()
        );

        let without = FrameConstants::new(&mut backend, LAYOUT).unwrap();
        assert!(without.dynamic_vertices.is_none());
    }

    #[test]
    fn test_slot_selection_is_cyclic() {
        let mut backend = SoftwareBackend::new(SoftwareGpu::new(Some(0)), 2, 800, 600);
        let ring = ring(&mut backend, 3);

        let slots: Vec<usize> = (0..7).map(|i| ring.slot_index(i)).collect();
        assert_eq!(slots, vec![0, 1, 2, 0, 1, 2, 0]);

        let mut visited = [0; 3];
        for frame in 10..13 {
            visited[ring.slot_index(frame)] += 1;
        }
        assert_eq!(visited, [1, 1, 1]);
    }

    #[test]
    fn test_fourth_frame_waits_for_first() {
        let gpu = SoftwareGpu::new(None);
        let mut backend = SoftwareBackend::new(gpu.clone(), 2, 800, 600);
        let mut timeline = GpuTimeline::new(backend.create_fence().unwrap(), WaitPolicy::Infinite);
        let mut ring = ring(&mut backend, 3);

        for frame in 0..3u64 {
            let slot = ring.acquire(frame, &mut timeline).unwrap();
            assert!(slot.fence().is_zero());
            let index = slot.index();
            let value = ring.advance(index, &mut timeline).unwrap();
            assert_eq!(value.value(), frame + 1);
        }
        assert!(gpu.fence_waits().is_empty());

        let slot = ring.acquire(3, &mut timeline).unwrap();
        assert_eq!(slot.index(), 0);
        assert_eq!(gpu.fence_waits(), vec![FenceValue::new(1)]);
        assert!(timeline.completed_value() >= FenceValue::new(1));
    }

    #[test]
    fn test_advance_records_watermark() {
        let mut backend = SoftwareBackend::new(SoftwareGpu::new(Some(0)), 2, 800, 600);
        let mut timeline = GpuTimeline::new(backend.create_fence().unwrap(), WaitPolicy::Infinite);
        let mut ring = ring(&mut backend, 2);

        ring.advance(1, &mut timeline).unwrap();
        ring.advance(1, &mut timeline).unwrap();
        assert_eq!(ring.slot(0).unwrap().fence(), FenceValue::ZERO);
        assert_eq!(ring.slot(1).unwrap().fence(), FenceValue::new(2));
        assert!(ring.advance(5, &mut timeline).is_err());
    }
}
