//! 权重矩阵

use glam::Vec3;

/// M×N 行主序权重表
///
/// `data[v * cage_count + j]` 为控制点 j 对顶点 v 的影响。
/// 每行之和为 1，构建后不再修改。
#[derive(Clone, Debug, PartialEq)]
pub struct WeightMatrix {
    vertex_count: usize,
    cage_count: usize,
    data: Vec<f32>,
}

impl WeightMatrix {
    pub(crate) fn from_raw(vertex_count: usize, cage_count: usize, data: Vec<f32>) -> Self {
        debug_assert_eq!(data.len(), vertex_count * cage_count);
        Self {
            vertex_count,
            cage_count,
            data,
        }
    }

    /// 获取顶点数量
    pub fn vertex_count(&self) -> usize {
        self.vertex_count
    }

    /// 获取控制点数量
    pub fn cage_count(&self) -> usize {
        self.cage_count
    }

    /// 获取单个权重
    pub fn get(&self, vertex: usize, cage_point: usize) -> Option<f32> {
        if vertex >= self.vertex_count || cage_point >= self.cage_count {
            return None;
        }
        self.data.get(vertex * self.cage_count + cage_point).copied()
    }

    /// 获取顶点的整行权重
    ///
    /// # Panics
    ///
    /// `vertex >= vertex_count()` 时 panic，需要检查边界请用 [`get`](Self::get)。
    pub fn row(&self, vertex: usize) -> &[f32] {
        let start = vertex * self.cage_count;
        &self.data[start..start + self.cage_count]
    }

    /// 按行迭代
    pub fn rows(&self) -> std::slice::ChunksExact<'_, f32> {
        self.data.chunks_exact(self.cage_count)
    }

    /// 平铺数据（上传到渲染后端）
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// 用当前控制点位置重建单个顶点
    ///
    /// `cage_positions` 长度必须等于 `cage_count()`。
    pub fn evaluate(&self, vertex: usize, cage_positions: &[Vec3]) -> Vec3 {
        debug_assert_eq!(cage_positions.len(), self.cage_count);
        self.row(vertex)
            .iter()
            .zip(cage_positions)
            .fold(Vec3::ZERO, |acc, (&w, &p)| acc + p * w)
    }
}
