//! DirectX 12 图形后端
//!
//! 本模块包含了所有 DirectX 12 相关的代码：
//! - `context`：设备、命令队列、交换链、描述符堆和深度缓冲
//! - `fence`：ID3D12Fence 与命令分配器
//! - `upload`：持久映射的上传堆缓冲区
//!
//! 所有返回 HRESULT 的调用都经过 `dx_check!`，失败时携带调用表达式、结果码、文件与行号。

/// 把 `windows::core::Result` 转换成带调用位置的 `GraphicsError::ApiCall`
macro_rules! dx_check {
    ($call:expr) => {
        $call.map_err(|e: windows::core::Error| {
            $crate::core::error::DxLearnError::from($crate::core::error::GraphicsError::api_call(
                stringify!($call),
                e.code().0,
                file!(),
                line!(),
            ))
        })
    };
}

pub mod context;
pub mod fence;
pub mod upload;

// 重新导出常用类型
pub use context::Dx12Backend;
pub use fence::{Dx12Allocator, Dx12Fence};
pub use upload::MappedUpload;
