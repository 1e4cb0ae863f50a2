//! CPU 端变形计算
//!
//! 与顶点着色器相同的加权求和：`p_v = Σ_j w[v, j] · cage[j]`。

use glam::Vec3;
use rayon::prelude::*;

use crate::weights::WeightMatrix;
use crate::{DeformError, Result};

/// 变形输入数据
pub struct DeformInput<'a> {
    /// 预计算的权重
    pub weights: &'a WeightMatrix,
    /// 当前控制点位置（本地空间）
    pub cage_positions: &'a [Vec3],
}

/// 变形输出数据
pub struct DeformOutput {
    /// 变形后的顶点位置
    pub positions: Vec<Vec3>,
    /// 平铺缓冲区（每个顶点 3 个 f32）
    pub positions_raw: Vec<f32>,
}

/// 计算所有顶点的变形位置 - 使用 rayon 并行加速
///
/// 控制点数量必须与权重矩阵的列数一致。
pub fn compute_deformation(input: &DeformInput) -> Result<DeformOutput> {
    if input.cage_positions.len() != input.weights.cage_count() {
        return Err(DeformError::Configuration(format!(
            "cage position count {} does not match weight columns {}",
            input.cage_positions.len(),
            input.weights.cage_count()
        )));
    }

    let vertex_count = input.weights.vertex_count();
    let mut positions = vec![Vec3::ZERO; vertex_count];
    let mut positions_raw = vec![0.0f32; vertex_count * 3];

    positions
        .par_iter_mut()
        .zip(positions_raw.par_chunks_mut(3))
        .enumerate()
        .for_each(|(i, (pos_out, chunk))| {
            let pos = input.weights.evaluate(i, input.cage_positions);
            *pos_out = pos;
            chunk[0] = pos.x;
            chunk[1] = pos.y;
            chunk[2] = pos.z;
        });

    Ok(DeformOutput {
        positions,
        positions_raw,
    })
}
