//! DirectX 12 设备与交换链
//!
//! `Dx12Backend` 封装了设备、唯一的直接命令队列、交换链、RTV/DSV 描述符堆和深度模板缓冲，
//! 并把录制好的 `CommandList` 翻译成 ID3D12GraphicsCommandList 调用。
//!
//! # 初始化流程
//!
//! 1. 启用调试层（Debug 模式）
//! 2. 创建 DXGI 工厂和 D3D12 设备
//! 3. 创建命令队列和命令列表
//! 4. 创建交换链
//! 5. 创建描述符堆、渲染目标视图和深度模板缓冲

use std::mem::ManuallyDrop;
use tracing::{debug, info, trace, warn};
use windows::{
    core::Interface, Win32::Foundation::RECT, Win32::Graphics::Direct3D::*, Win32::Graphics::Direct3D12::*,
    Win32::Graphics::Dxgi::Common::*, Win32::Graphics::Dxgi::*,
};
use raw_window_handle::{HasWindowHandle, RawWindowHandle};
use winit::window::Window;

use super::fence::{Dx12Allocator, Dx12Fence};
use super::upload::MappedUpload;
use crate::core::error::{DxLearnError, GraphicsError, Result};
use crate::core::Config;
use crate::gfx::backend::GraphicsBackend;
use crate::renderer::command::{Command, CommandList, ResourceState};
use crate::renderer::resource::{UploadAllocator, UploadStorage};

const BACK_BUFFER_FORMAT: DXGI_FORMAT = DXGI_FORMAT_R8G8B8A8_UNORM;
const DEPTH_STENCIL_FORMAT: DXGI_FORMAT = DXGI_FORMAT_D24_UNORM_S8_UINT;

/// DirectX 12 图形后端
pub struct Dx12Backend {
    device: ID3D12Device,
    queue: ID3D12CommandQueue,
    swap_chain: IDXGISwapChain3,
    /// 所有帧共用的命令列表，每次提交时用槽位的分配器重置
    command_list: ID3D12GraphicsCommandList,
    /// 仅用于创建命令列表
    _init_allocator: ID3D12CommandAllocator,
    rtv_heap: ID3D12DescriptorHeap,
    rtv_descriptor_size: usize,
    dsv_heap: ID3D12DescriptorHeap,
    back_buffers: Vec<ID3D12Resource>,
    depth_stencil: Option<ID3D12Resource>,
    buffer_count: usize,
    back_buffer_index: usize,
    /// 自创建或上次 resize 以来是否提交过命令列表
    pending_work: bool,
    width: u32,
    height: u32,
}

impl Dx12Backend {
    /// 在窗口上创建设备和交换链
    pub fn new(window: &Window, config: &Config) -> Result<Self> {
        let size = window.inner_size();
        let (width, height) = (size.width.max(1), size.height.max(1));
        let buffer_count = config.graphics.swap_chain_buffers;

        let hwnd = match window
            .window_handle()
            .map_err(|e| DxLearnError::Initialization(format!("Failed to get window handle: {}", e)))?
            .as_raw()
        {
            RawWindowHandle::Win32(handle) => {
                windows::Win32::Foundation::HWND(handle.hwnd.get() as *mut std::ffi::c_void)
            }
            _ => {
                return Err(DxLearnError::Initialization(
                    "Expected Win32 window handle on Windows platform".to_string(),
                ))
            }
        };

        unsafe {
            #[cfg(debug_assertions)]
            {
                let mut debug: Option<ID3D12Debug> = None;
                match D3D12GetDebugInterface(&mut debug) {
                    Ok(()) => {
                        if let Some(debug) = debug {
                            debug.EnableDebugLayer();
                            debug!("DX12 debug layer enabled");
                        }
                    }
                    Err(e) => warn!("Failed to enable DX12 debug layer: {}", e),
                }
            }

            let factory_flags = if cfg!(debug_assertions) {
                DXGI_CREATE_FACTORY_DEBUG
            } else {
                DXGI_CREATE_FACTORY_FLAGS(0)
            };
            let factory: IDXGIFactory4 = dx_check!(CreateDXGIFactory2(factory_flags))?;

            let mut device: Option<ID3D12Device> = None;
            dx_check!(D3D12CreateDevice(None, D3D_FEATURE_LEVEL_11_0, &mut device))?;
            let device = device.ok_or_else(|| {
                GraphicsError::ResourceCreation("D3D12CreateDevice returned no device".to_string())
            })?;

            let queue_desc = D3D12_COMMAND_QUEUE_DESC {
                Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
                Flags: D3D12_COMMAND_QUEUE_FLAG_NONE,
                ..Default::default()
            };
            let queue: ID3D12CommandQueue = dx_check!(device.CreateCommandQueue(&queue_desc))?;

            let init_allocator: ID3D12CommandAllocator =
                dx_check!(device.CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT))?;
            let command_list: ID3D12GraphicsCommandList = dx_check!(device.CreateCommandList(
                0,
                D3D12_COMMAND_LIST_TYPE_DIRECT,
                &init_allocator,
                None::<&ID3D12PipelineState>,
            ))?;
            // 以关闭状态开始，第一次提交时再 Reset
            dx_check!(command_list.Close())?;

            let swap_chain_desc = DXGI_SWAP_CHAIN_DESC1 {
                Width: width,
                Height: height,
                Format: BACK_BUFFER_FORMAT,
                SampleDesc: DXGI_SAMPLE_DESC {
                    Count: 1,
                    ..Default::default()
                },
                BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
                BufferCount: buffer_count as u32,
                SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
                ..Default::default()
            };
            let swap_chain: IDXGISwapChain1 =
                dx_check!(factory.CreateSwapChainForHwnd(&queue, hwnd, &swap_chain_desc, None, None))?;
            let swap_chain: IDXGISwapChain3 = dx_check!(swap_chain.cast())?;

            let rtv_heap: ID3D12DescriptorHeap = dx_check!(device.CreateDescriptorHeap(&D3D12_DESCRIPTOR_HEAP_DESC {
                NumDescriptors: buffer_count as u32,
                Type: D3D12_DESCRIPTOR_HEAP_TYPE_RTV,
                Flags: D3D12_DESCRIPTOR_HEAP_FLAG_NONE,
                NodeMask: 0,
            }))?;
            let dsv_heap: ID3D12DescriptorHeap = dx_check!(device.CreateDescriptorHeap(&D3D12_DESCRIPTOR_HEAP_DESC {
                NumDescriptors: 1,
                Type: D3D12_DESCRIPTOR_HEAP_TYPE_DSV,
                Flags: D3D12_DESCRIPTOR_HEAP_FLAG_NONE,
                NodeMask: 0,
            }))?;
            let rtv_descriptor_size =
                device.GetDescriptorHandleIncrementSize(D3D12_DESCRIPTOR_HEAP_TYPE_RTV) as usize;

            let mut backend = Self {
                device,
                queue,
                swap_chain,
                command_list,
                _init_allocator: init_allocator,
                rtv_heap,
                rtv_descriptor_size,
                dsv_heap,
                back_buffers: Vec::with_capacity(buffer_count),
                depth_stencil: None,
                buffer_count,
                back_buffer_index: 0,
                pending_work: false,
                width,
                height,
            };
            backend.create_size_dependent_resources()?;

            info!(width, height, buffers = buffer_count, "DX12 backend initialized");
            Ok(backend)
        }
    }

    /// 创建后台缓冲的 RTV 和深度模板缓冲
    unsafe fn create_size_dependent_resources(&mut self) -> Result<()> {
        let rtv_start = self.rtv_heap.GetCPUDescriptorHandleForHeapStart();
        self.back_buffers.clear();
        for i in 0..self.buffer_count {
            let surface: ID3D12Resource = dx_check!(self.swap_chain.GetBuffer(i as u32))?;
            let handle = D3D12_CPU_DESCRIPTOR_HANDLE {
                ptr: rtv_start.ptr + i * self.rtv_descriptor_size,
            };
            self.device.CreateRenderTargetView(&surface, None, handle);
            self.back_buffers.push(surface);
        }

        let depth_heap_props = D3D12_HEAP_PROPERTIES {
            Type: D3D12_HEAP_TYPE_DEFAULT,
            ..Default::default()
        };
        let depth_desc = D3D12_RESOURCE_DESC {
            Dimension: D3D12_RESOURCE_DIMENSION_TEXTURE2D,
            Width: self.width as u64,
            Height: self.height,
            DepthOrArraySize: 1,
            MipLevels: 1,
            Format: DEPTH_STENCIL_FORMAT,
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            Layout: D3D12_TEXTURE_LAYOUT_UNKNOWN,
            Flags: D3D12_RESOURCE_FLAG_ALLOW_DEPTH_STENCIL,
            ..Default::default()
        };
        let clear_value = D3D12_CLEAR_VALUE {
            Format: DEPTH_STENCIL_FORMAT,
            Anonymous: D3D12_CLEAR_VALUE_0 {
                DepthStencil: D3D12_DEPTH_STENCIL_VALUE { Depth: 1.0, Stencil: 0 },
            },
        };

        let mut depth_stencil: Option<ID3D12Resource> = None;
        dx_check!(self.device.CreateCommittedResource(
            &depth_heap_props,
            D3D12_HEAP_FLAG_NONE,
            &depth_desc,
            D3D12_RESOURCE_STATE_DEPTH_WRITE,
            Some(&clear_value),
            &mut depth_stencil,
        ))?;
        let depth_stencil = depth_stencil.ok_or_else(|| {
            GraphicsError::ResourceCreation("Depth stencil buffer was not created".to_string())
        })?;
        self.device.CreateDepthStencilView(
            &depth_stencil,
            None,
            self.dsv_heap.GetCPUDescriptorHandleForHeapStart(),
        );
        self.depth_stencil = Some(depth_stencil);

        debug!(width = self.width, height = self.height, "Size dependent resources created");
        Ok(())
    }

    fn rtv_handle(&self, back_buffer: usize) -> D3D12_CPU_DESCRIPTOR_HANDLE {
        let start = unsafe { self.rtv_heap.GetCPUDescriptorHandleForHeapStart() };
        D3D12_CPU_DESCRIPTOR_HANDLE {
            ptr: start.ptr + back_buffer * self.rtv_descriptor_size,
        }
    }

    fn dsv_handle(&self) -> D3D12_CPU_DESCRIPTOR_HANDLE {
        unsafe { self.dsv_heap.GetCPUDescriptorHandleForHeapStart() }
    }

    fn back_buffer(&self, index: usize) -> Result<&ID3D12Resource> {
        self.back_buffers.get(index).ok_or_else(|| {
            GraphicsError::SwapchainError(format!("Back buffer {} out of range", index)).into()
        })
    }

    /// 把一条录制的命令翻译成 D3D12 调用
    ///
    /// 返回 `false` 表示该命令需要根签名或管线状态对象，当前被跳过。
    unsafe fn translate(&self, command: &Command) -> Result<bool> {
        let list = &self.command_list;
        match command {
            Command::Transition { back_buffer, before, after } => {
                let barrier = transition_barrier(self.back_buffer(*back_buffer)?, *before, *after);
                list.ResourceBarrier(&[barrier]);
            }
            Command::SetViewport(viewport) => {
                list.RSSetViewports(&[D3D12_VIEWPORT {
                    TopLeftX: viewport.x,
                    TopLeftY: viewport.y,
                    Width: viewport.width,
                    Height: viewport.height,
                    MinDepth: viewport.min_depth,
                    MaxDepth: viewport.max_depth,
                }]);
            }
            Command::SetScissor(rect) => {
                list.RSSetScissorRects(&[RECT {
                    left: rect.left,
                    top: rect.top,
                    right: rect.right,
                    bottom: rect.bottom,
                }]);
            }
            Command::ClearRenderTarget { back_buffer, color } => {
                list.ClearRenderTargetView(self.rtv_handle(*back_buffer), color, None);
            }
            Command::ClearDepthStencil { depth, stencil } => {
                list.ClearDepthStencilView(
                    self.dsv_handle(),
                    D3D12_CLEAR_FLAG_DEPTH | D3D12_CLEAR_FLAG_STENCIL,
                    *depth,
                    *stencil,
                    None,
                );
            }
            Command::SetRenderTargets { back_buffer } => {
                let rtv = self.rtv_handle(*back_buffer);
                let dsv = self.dsv_handle();
                list.OMSetRenderTargets(1, Some(&rtv), true, Some(&dsv));
            }
            Command::SetStencilRef(reference) => {
                list.OMSetStencilRef(*reference);
            }
            Command::BindPassConstants { .. } | Command::SetPipeline(_) | Command::Draw(_) => {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// 后台缓冲的状态转换屏障
///
/// 屏障不持有资源的引用计数，调用方保证资源在命令列表执行期间存活。
fn transition_barrier(resource: &ID3D12Resource, before: ResourceState, after: ResourceState) -> D3D12_RESOURCE_BARRIER {
    D3D12_RESOURCE_BARRIER {
        Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
        Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
        Anonymous: D3D12_RESOURCE_BARRIER_0 {
            Transition: ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                pResource: unsafe { std::mem::transmute_copy(resource) },
                Subresource: D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
                StateBefore: resource_state(before),
                StateAfter: resource_state(after),
            }),
        },
    }
}

fn resource_state(state: ResourceState) -> D3D12_RESOURCE_STATES {
    match state {
        ResourceState::Present => D3D12_RESOURCE_STATE_PRESENT,
        ResourceState::RenderTarget => D3D12_RESOURCE_STATE_RENDER_TARGET,
    }
}

impl UploadAllocator for Dx12Backend {
    fn allocate_upload(&mut self, byte_size: u64) -> Result<Box<dyn UploadStorage>> {
        Ok(Box::new(MappedUpload::new(&self.device, byte_size)?))
    }
}

impl GraphicsBackend for Dx12Backend {
    type Fence = Dx12Fence;
    type Allocator = Dx12Allocator;

    fn backend_name(&self) -> &str {
        "DirectX 12"
    }

    fn create_fence(&mut self) -> Result<Dx12Fence> {
        Dx12Fence::new(&self.device, &self.queue)
    }

    fn create_allocator(&mut self) -> Result<Dx12Allocator> {
        Dx12Allocator::new(&self.device)
    }

    fn submit(&mut self, allocator: &mut Dx12Allocator, list: CommandList) -> Result<()> {
        if !list.is_closed() {
            return Err(GraphicsError::CommandExecution(
                "Submitting a command list that is still recording".to_string(),
            )
            .into());
        }

        unsafe {
            dx_check!(self.command_list.Reset(allocator.raw(), None::<&ID3D12PipelineState>))?;

            let mut skipped = 0usize;
            for command in list.commands() {
                if !self.translate(command)? {
                    skipped += 1;
                }
            }
            dx_check!(self.command_list.Close())?;

            let native: ID3D12CommandList = dx_check!(self.command_list.cast())?;
            self.queue.ExecuteCommandLists(&[Some(native)]);

            trace!(
                commands = list.commands().len(),
                skipped,
                "Command list executed"
            );
        }

        self.pending_work = true;
        Ok(())
    }

    fn has_pending_work(&self) -> bool {
        self.pending_work
    }

    fn back_buffer_count(&self) -> usize {
        self.buffer_count
    }

    fn current_back_buffer(&self) -> usize {
        self.back_buffer_index
    }

    fn present(&mut self, vsync: bool) -> Result<()> {
        unsafe {
            dx_check!(self.swap_chain.Present(u32::from(vsync), DXGI_PRESENT(0)).ok())?;
            self.back_buffer_index = self.swap_chain.GetCurrentBackBufferIndex() as usize;
        }
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.width = width;
        self.height = height;

        unsafe {
            // 交换链缓冲的所有引用都必须在 ResizeBuffers 之前释放
            self.back_buffers.clear();
            self.depth_stencil = None;

            dx_check!(self.swap_chain.ResizeBuffers(
                self.buffer_count as u32,
                width,
                height,
                BACK_BUFFER_FORMAT,
                DXGI_SWAP_CHAIN_FLAG(0),
            ))?;
            self.create_size_dependent_resources()?;
        }

        self.back_buffer_index = 0;
        self.pending_work = false;
        debug!(width, height, "Swap chain resized");
        Ok(())
    }
}
