//! 均值坐标求解
//!
//! 对闭合二维多边形计算 Floater 均值坐标（x/y 平面，忽略 z）：
//!
//! ```text
//! w_j = (tan(α_j / 2) + tan(α_{j-1} / 2)) / |c_j - v|
//! ```
//!
//! 其中 α_j 为三角形 (v, c_j, c_{j+1}) 在 v 处的有向夹角，下标按 N 取模。
//! 夹角大小由 arccos 求得，符号取叉积方向。带符号的夹角让凹多边形与
//! 控制笼外部的顶点同样满足线性精度；控制笼须为简单多边形，环绕方向任意。

use glam::{DVec2, Vec3};
use rayon::prelude::*;
use std::f64::consts::PI;

use crate::config::SolverConfig;
use crate::{DeformError, Result};

use super::WeightMatrix;

/// 未归一化权重和的下限，低于此值无法归一化
const MIN_WEIGHT_SUM: f64 = 1e-12;

/// 单行求解结果类型
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RowKind {
    /// 常规均值坐标
    MeanValue,
    /// 顶点与控制点重合
    Coincident,
    /// 顶点位于控制笼边上
    OnEdge,
}

/// 每个 rayon 任务复用的临时数组
#[derive(Default)]
struct Scratch {
    directions: Vec<DVec2>,
    distances: Vec<f64>,
    tan_half: Vec<f64>,
    raw: Vec<f64>,
}

/// 计算网格顶点相对控制笼的权重矩阵
///
/// `cage_local` 必须与 `mesh_vertices` 处于同一本地坐标系。
pub fn compute_weights(
    mesh_vertices: &[Vec3],
    cage_local: &[Vec3],
    config: &SolverConfig,
) -> Result<WeightMatrix> {
    config.validate()?;

    let cage_count = cage_local.len();
    if cage_count < 3 {
        return Err(DeformError::Configuration(format!(
            "cage needs at least 3 points, got {}",
            cage_count
        )));
    }
    if mesh_vertices.is_empty() {
        return Err(DeformError::Configuration("mesh has no vertices".into()));
    }
    if let Some(i) = cage_local.iter().position(|p| !p.is_finite()) {
        return Err(DeformError::Configuration(format!(
            "cage point {} is not finite",
            i
        )));
    }
    if let Some(i) = mesh_vertices.iter().position(|p| !p.is_finite()) {
        return Err(DeformError::Configuration(format!(
            "mesh vertex {} is not finite",
            i
        )));
    }

    let cage: Vec<DVec2> = cage_local.iter().map(|p| p.truncate().as_dvec2()).collect();
    let mut data = vec![0.0f32; mesh_vertices.len() * cage_count];

    let kinds = data
        .par_chunks_mut(cage_count)
        .zip(mesh_vertices.par_iter())
        .enumerate()
        .map_init(Scratch::default, |scratch, (index, (row, vertex))| {
            solve_row(index, vertex.truncate().as_dvec2(), &cage, config, scratch, row)
        })
        .collect::<Result<Vec<RowKind>>>()?;

    let coincident = kinds.iter().filter(|k| **k == RowKind::Coincident).count();
    let on_edge = kinds.iter().filter(|k| **k == RowKind::OnEdge).count();
    if coincident > 0 || on_edge > 0 {
        log::debug!(
            "均值坐标特殊处理: {} 个顶点与控制点重合, {} 个顶点位于边上",
            coincident,
            on_edge
        );
    }

    Ok(WeightMatrix::from_raw(mesh_vertices.len(), cage_count, data))
}

/// 计算单个顶点的一行权重
fn solve_row(
    index: usize,
    vertex: DVec2,
    cage: &[DVec2],
    config: &SolverConfig,
    scratch: &mut Scratch,
    row: &mut [f32],
) -> Result<RowKind> {
    let n = cage.len();
    row.fill(0.0);

    scratch.directions.clear();
    scratch.distances.clear();
    scratch.tan_half.clear();

    for &c in cage {
        let offset = c - vertex;
        scratch.distances.push(offset.length());
        scratch.directions.push(offset);
    }

    // 与控制点重合：直接取最近的控制点
    let (nearest, nearest_distance) = scratch
        .distances
        .iter()
        .copied()
        .enumerate()
        .fold((0, f64::INFINITY), |best, (j, d)| if d < best.1 { (j, d) } else { best });
    if nearest_distance < config.coincident_epsilon {
        row[nearest] = 1.0;
        return Ok(RowKind::Coincident);
    }

    for (dir, &dist) in scratch.directions.iter_mut().zip(&scratch.distances) {
        *dir /= dist;
    }

    // Step 1: 每条边 (c_j, c_{j+1}) 在顶点处的有向夹角
    for j in 0..n {
        let next = (j + 1) % n;
        let a = scratch.directions[j];
        let b = scratch.directions[next];
        let angle = a.dot(b).clamp(-1.0, 1.0).acos().copysign(a.perp_dot(b));

        // 顶点在边上：tan(±π/2) 发散，改为沿边线性插值
        if PI - angle.abs() < config.collinear_epsilon {
            let r0 = scratch.distances[j];
            let r1 = scratch.distances[next];
            let total = r0 + r1;
            row[j] = (r1 / total) as f32;
            row[next] = (r0 / total) as f32;
            return Ok(RowKind::OnEdge);
        }

        scratch.tan_half.push((angle * 0.5).tan());
    }

    // Step 2: 未归一化权重
    scratch.raw.clear();
    for j in 0..n {
        let prev = (j + n - 1) % n;
        scratch
            .raw
            .push((scratch.tan_half[j] + scratch.tan_half[prev]) / scratch.distances[j]);
    }

    // 顺时针控制笼的权重与和同为负，比值不变
    let sum: f64 = scratch.raw.iter().sum();
    if !sum.is_finite() || sum.abs() < MIN_WEIGHT_SUM {
        return Err(DeformError::DegenerateGeometry {
            vertex: index,
            reason: format!("weight sum is {}", sum),
        });
    }

    // Step 3: 归一化
    for (out, &w) in row.iter_mut().zip(&scratch.raw) {
        *out = (w / sum) as f32;
    }

    Ok(RowKind::MeanValue)
}
