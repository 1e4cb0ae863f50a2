//! 控制笼与网格数据源

mod polygon;
mod transform;

pub use polygon::{centroid, signed_area};
pub use transform::{Transform, TransformHandle};

use glam::{Mat4, Vec3};
use std::sync::Arc;

/// 控制点位置来源（例如物理系统驱动的变换）
pub trait CagePointSource: Send + Sync {
    /// 当前世界空间位置
    fn world_position(&self) -> Vec3;
}

/// 网格所在的本地坐标系
pub trait LocalFrame: Send + Sync {
    /// 世界空间 → 本地空间矩阵
    fn world_to_local(&self) -> Mat4;

    fn inverse_transform_point(&self, world: Vec3) -> Vec3 {
        self.world_to_local().transform_point3(world)
    }
}

/// 网格顶点来源（本地空间，只读）
pub trait MeshSource {
    fn vertices(&self) -> &[Vec3];
}

/// 控制笼：按顺序排列的控制点引用
///
/// 顺序决定多边形的环绕方向，必须是简单多边形且方向一致。
/// 控制笼不拥有控制点，只持有共享引用。
#[derive(Clone)]
pub struct Cage {
    points: Vec<Arc<dyn CagePointSource>>,
}

impl Cage {
    pub fn new(points: Vec<Arc<dyn CagePointSource>>) -> Self {
        Self { points }
    }

    /// 由变换句柄构建
    pub fn from_handles(handles: &[TransformHandle]) -> Self {
        Self::new(
            handles
                .iter()
                .map(|h| Arc::new(h.clone()) as Arc<dyn CagePointSource>)
                .collect(),
        )
    }

    /// 获取控制点数量
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// 将所有控制点转换到本地空间并写入 `out`（原地覆盖，不分配）
    pub fn sample_local(&self, frame: &dyn LocalFrame, out: &mut [Vec3]) {
        let world_to_local = frame.world_to_local();
        for (slot, point) in out.iter_mut().zip(&self.points) {
            *slot = world_to_local.transform_point3(point.world_position());
        }
    }
}

impl std::fmt::Debug for Cage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cage")
            .field("point_count", &self.points.len())
            .finish()
    }
}

/// 静态网格
#[derive(Clone, Debug, Default)]
pub struct Mesh {
    pub vertices: Vec<Vec3>,
}

impl Mesh {
    pub fn new(vertices: Vec<Vec3>) -> Self {
        Self { vertices }
    }

    /// 获取顶点数量
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }
}

impl MeshSource for Mesh {
    fn vertices(&self) -> &[Vec3] {
        &self.vertices
    }
}

impl MeshSource for Vec<Vec3> {
    fn vertices(&self) -> &[Vec3] {
        self
    }
}

impl MeshSource for [Vec3] {
    fn vertices(&self) -> &[Vec3] {
        self
    }
}
