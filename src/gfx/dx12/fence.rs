//! DirectX 12 fence 与命令分配器

use std::time::Duration;
use tracing::trace;
use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0, WAIT_TIMEOUT};
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::System::Threading::{CreateEventA, WaitForSingleObject, INFINITE};

use crate::core::error::{GraphicsError, Result};
use crate::renderer::command::CommandAllocator;
use crate::renderer::sync::{FenceValue, GpuFence};

/// 绑定到命令队列的 fence
///
/// 等待通过 `SetEventOnCompletion` + `WaitForSingleObject` 实现。
pub struct Dx12Fence {
    fence: ID3D12Fence,
    queue: ID3D12CommandQueue,
    event: HANDLE,
}

impl Dx12Fence {
    pub(super) fn new(device: &ID3D12Device, queue: &ID3D12CommandQueue) -> Result<Self> {
        unsafe {
            let fence: ID3D12Fence = dx_check!(device.CreateFence(0, D3D12_FENCE_FLAG_NONE))?;
            let event = dx_check!(CreateEventA(None, false, false, None))?;

            Ok(Self {
                fence,
                queue: queue.clone(),
                event,
            })
        }
    }
}

impl GpuFence for Dx12Fence {
    fn signal(&self, value: FenceValue) -> Result<()> {
        unsafe { dx_check!(self.queue.Signal(&self.fence, value.value())) }
    }

    fn completed_value(&self) -> FenceValue {
        FenceValue::new(unsafe { self.fence.GetCompletedValue() })
    }

    fn wait_for(&self, value: FenceValue, timeout: Option<Duration>) -> Result<bool> {
        if self.completed_value() >= value {
            return Ok(true);
        }

        // INFINITE 本身是 u32::MAX，有限的等待上限不能取到它
        let millis = match timeout {
            Some(timeout) => u32::try_from(timeout.as_millis()).unwrap_or(INFINITE - 1),
            None => INFINITE,
        };

        unsafe {
            dx_check!(self.fence.SetEventOnCompletion(value.value(), self.event))?;
            let result = WaitForSingleObject(self.event, millis);

            if result == WAIT_OBJECT_0 {
                Ok(true)
            } else if result == WAIT_TIMEOUT {
                trace!(fence_value = value.value(), millis, "Fence wait timed out");
                Ok(false)
            } else {
                Err(GraphicsError::api_call("WaitForSingleObject", result.0 as i32, file!(), line!()).into())
            }
        }
    }
}

impl Drop for Dx12Fence {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.event);
        }
    }
}

/// 命令分配器
///
/// 一个帧资源槽位持有一个；只有在槽位的 fence 值完成后才会被重置。
pub struct Dx12Allocator {
    allocator: ID3D12CommandAllocator,
}

impl Dx12Allocator {
    pub(super) fn new(device: &ID3D12Device) -> Result<Self> {
        let allocator: ID3D12CommandAllocator =
            unsafe { dx_check!(device.CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT))? };
        Ok(Self { allocator })
    }

    pub fn raw(&self) -> &ID3D12CommandAllocator {
        &self.allocator
    }
}

impl CommandAllocator for Dx12Allocator {
    fn reset(&mut self) -> Result<()> {
        unsafe { dx_check!(self.allocator.Reset()) }
    }
}
