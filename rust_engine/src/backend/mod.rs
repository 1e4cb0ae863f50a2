//! 渲染后端接口
//!
//! 控制器只分配两个缓冲区：控制点位置（N × 3 个 f32）与权重（M × N 个 f32），
//! 按名称绑定后交给顶点着色器 / 计算着色器使用。

mod memory;

pub use memory::{MemoryBackend, MemoryBuffer};

use crate::Result;

/// 后端缓冲区句柄
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub u64);

/// 渲染 / 计算后端
pub trait RenderBackend {
    /// 分配 `element_count` 个、每个 `element_size` 字节的缓冲区
    fn allocate_buffer(&mut self, element_count: usize, element_size: usize) -> Result<BufferHandle>;

    /// 上传平铺的 f32 数据（长度必须与缓冲区字节数一致）
    fn upload_data(&mut self, handle: BufferHandle, data: &[f32]) -> Result<()>;

    /// 将缓冲区绑定到着色器变量
    fn bind_buffer(&mut self, name: &str, handle: BufferHandle) -> Result<()>;

    /// 释放缓冲区
    fn release_buffer(&mut self, handle: BufferHandle) -> Result<()>;
}

impl<B: RenderBackend + ?Sized> RenderBackend for &mut B {
    fn allocate_buffer(&mut self, element_count: usize, element_size: usize) -> Result<BufferHandle> {
        (**self).allocate_buffer(element_count, element_size)
    }

    fn upload_data(&mut self, handle: BufferHandle, data: &[f32]) -> Result<()> {
        (**self).upload_data(handle, data)
    }

    fn bind_buffer(&mut self, name: &str, handle: BufferHandle) -> Result<()> {
        (**self).bind_buffer(name, handle)
    }

    fn release_buffer(&mut self, handle: BufferHandle) -> Result<()> {
        (**self).release_buffer(handle)
    }
}
