//! 上传堆缓冲区
//!
//! 资源在创建后立即映射，直到销毁才解除映射。
//! CPU 通过映射指针写入，GPU 通过虚拟地址读取。

use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;

use crate::core::error::{GraphicsError, Result};
use crate::renderer::resource::UploadStorage;

/// 持久映射的上传堆资源
pub struct MappedUpload {
    resource: ID3D12Resource,
    data: *mut u8,
    len: usize,
    address: u64,
}

impl MappedUpload {
    pub(super) fn new(device: &ID3D12Device, byte_size: u64) -> Result<Self> {
        let heap_props = D3D12_HEAP_PROPERTIES {
            Type: D3D12_HEAP_TYPE_UPLOAD,
            ..Default::default()
        };
        let resource_desc = D3D12_RESOURCE_DESC {
            Dimension: D3D12_RESOURCE_DIMENSION_BUFFER,
            Width: byte_size,
            Height: 1,
            DepthOrArraySize: 1,
            MipLevels: 1,
            Format: DXGI_FORMAT_UNKNOWN,
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            Layout: D3D12_TEXTURE_LAYOUT_ROW_MAJOR,
            ..Default::default()
        };

        unsafe {
            let mut resource: Option<ID3D12Resource> = None;
            dx_check!(device.CreateCommittedResource(
                &heap_props,
                D3D12_HEAP_FLAG_NONE,
                &resource_desc,
                D3D12_RESOURCE_STATE_GENERIC_READ,
                None,
                &mut resource,
            ))?;
            let resource = resource.ok_or_else(|| {
                GraphicsError::ResourceCreation(format!("Upload buffer of {} bytes was not created", byte_size))
            })?;

            let mut data = std::ptr::null_mut();
            dx_check!(resource.Map(0, None, Some(&mut data)))?;
            let address = resource.GetGPUVirtualAddress();

            Ok(Self {
                resource,
                data: data as *mut u8,
                len: byte_size as usize,
                address,
            })
        }
    }
}

impl UploadStorage for MappedUpload {
    fn bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.data, self.len) }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.data, self.len) }
    }

    fn gpu_address(&self) -> u64 {
        self.address
    }
}

impl Drop for MappedUpload {
    fn drop(&mut self) {
        unsafe {
            self.resource.Unmap(0, None);
        }
    }
}
