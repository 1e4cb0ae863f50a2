//! 内存后端
//!
//! 不依赖 GPU，缓冲区直接存放在内存中。用于无头运行与测试，
//! 同时记录上传次数和绑定关系。

use std::collections::HashMap;

use crate::{DeformError, Result};
use super::{BufferHandle, RenderBackend};

/// 内存缓冲区
#[derive(Clone, Debug, PartialEq)]
pub struct MemoryBuffer {
    pub element_count: usize,
    pub element_size: usize,
    pub data: Vec<f32>,
    pub upload_count: usize,
}

impl MemoryBuffer {
    /// 缓冲区总字节数
    pub fn byte_len(&self) -> usize {
        self.element_count * self.element_size
    }
}

/// 内存后端
#[derive(Debug, Default)]
pub struct MemoryBackend {
    buffers: HashMap<BufferHandle, MemoryBuffer>,
    bindings: HashMap<String, BufferHandle>,
    next_id: u64,
    released: Vec<BufferHandle>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取存活缓冲区
    pub fn buffer(&self, handle: BufferHandle) -> Option<&MemoryBuffer> {
        self.buffers.get(&handle)
    }

    /// 通过绑定名查找缓冲区
    pub fn bound(&self, name: &str) -> Option<&MemoryBuffer> {
        self.bindings.get(name).and_then(|h| self.buffers.get(h))
    }

    /// 存活缓冲区数量
    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// 已释放的句柄（按释放顺序）
    pub fn released(&self) -> &[BufferHandle] {
        &self.released
    }
}

impl RenderBackend for MemoryBackend {
    fn allocate_buffer(&mut self, element_count: usize, element_size: usize) -> Result<BufferHandle> {
        if element_count == 0 || element_size == 0 {
            return Err(DeformError::Backend(format!(
                "cannot allocate empty buffer ({} x {} bytes)",
                element_count, element_size
            )));
        }
        if element_size % std::mem::size_of::<f32>() != 0 {
            return Err(DeformError::Backend(format!(
                "element size {} is not a multiple of f32",
                element_size
            )));
        }

        self.next_id += 1;
        let handle = BufferHandle(self.next_id);
        let float_count = element_count * element_size / std::mem::size_of::<f32>();
        self.buffers.insert(
            handle,
            MemoryBuffer {
                element_count,
                element_size,
                data: vec![0.0; float_count],
                upload_count: 0,
            },
        );
        Ok(handle)
    }

    fn upload_data(&mut self, handle: BufferHandle, data: &[f32]) -> Result<()> {
        let buffer = self
            .buffers
            .get_mut(&handle)
            .ok_or_else(|| DeformError::Backend(format!("unknown buffer {:?}", handle)))?;

        if buffer.data.len() != data.len() {
            return Err(DeformError::Backend(format!(
                "upload size mismatch for {:?}: buffer holds {} floats, got {}",
                handle,
                buffer.data.len(),
                data.len()
            )));
        }

        buffer.data.copy_from_slice(data);
        buffer.upload_count += 1;
        Ok(())
    }

    fn bind_buffer(&mut self, name: &str, handle: BufferHandle) -> Result<()> {
        if !self.buffers.contains_key(&handle) {
            return Err(DeformError::Backend(format!(
                "cannot bind unknown buffer {:?} to '{}'",
                handle, name
            )));
        }
        self.bindings.insert(name.to_string(), handle);
        Ok(())
    }

    fn release_buffer(&mut self, handle: BufferHandle) -> Result<()> {
        if self.buffers.remove(&handle).is_none() {
            return Err(DeformError::Backend(format!(
                "buffer {:?} already released",
                handle
            )));
        }
        self.bindings.retain(|_, bound| *bound != handle);
        self.released.push(handle);
        Ok(())
    }
}
