//! 控制笼变形控制器

use glam::Vec3;
use std::sync::Arc;

use crate::backend::{BufferHandle, RenderBackend};
use crate::cage::{centroid, signed_area, Cage, LocalFrame, MeshSource};
use crate::config::DeformConfig;
use crate::deform::{compute_deformation, DeformInput};
use crate::weights::{compute_weights, WeightMatrix};
use crate::{DeformError, Result};

use super::{ControllerState, Stability};

/// 控制点缓冲区单元大小（x, y, z）
const CAGE_ELEMENT_SIZE: usize = std::mem::size_of::<f32>() * 3;
/// 权重缓冲区单元大小
const WEIGHT_ELEMENT_SIZE: usize = std::mem::size_of::<f32>();

/// 变形控制器
///
/// 独占权重矩阵与控制点位置缓冲区，渲染后端只获得只读数据。
pub struct DeformationController<B: RenderBackend> {
    config: DeformConfig,
    backend: B,
    state: ControllerState,

    // 外部数据源
    cage: Option<Cage>,
    frame: Option<Arc<dyn LocalFrame>>,

    // 运行时数据
    cage_positions: Vec<Vec3>,
    /// 上传用平铺缓冲区（每个控制点 3 个 f32）
    cage_positions_raw: Vec<f32>,
    weights: Option<Arc<WeightMatrix>>,
    /// 静止姿态下各控制点到控制笼中心的距离
    rest_spread: Vec<f32>,

    // 后端缓冲区
    cage_buffer: Option<BufferHandle>,
    weight_buffer: Option<BufferHandle>,
}

impl<B: RenderBackend> DeformationController<B> {
    pub fn new(backend: B, config: DeformConfig) -> Self {
        Self {
            config,
            backend,
            state: ControllerState::Uninitialized,
            cage: None,
            frame: None,
            cage_positions: Vec::new(),
            cage_positions_raw: Vec::new(),
            weights: None,
            rest_spread: Vec::new(),
            cage_buffer: None,
            weight_buffer: None,
        }
    }

    /// 初始化：采样控制笼、求解权重、分配并上传缓冲区
    ///
    /// `frame` 为网格所在的本地坐标系，控制点位置每帧都通过它转换到本地空间。
    pub fn initialize(
        &mut self,
        cage: Cage,
        frame: Arc<dyn LocalFrame>,
        mesh: &dyn MeshSource,
    ) -> Result<()> {
        self.expect_state(ControllerState::Uninitialized, "initialize")?;
        self.config.validate()?;

        let cage_count = cage.len();
        if cage_count < 3 {
            return Err(DeformError::Configuration(format!(
                "cage needs at least 3 points, got {}",
                cage_count
            )));
        }
        let vertices = mesh.vertices();
        if vertices.is_empty() {
            return Err(DeformError::Configuration("mesh has no vertices".into()));
        }

        // 控制点的原始位置（本地空间）
        let mut positions = vec![Vec3::ZERO; cage_count];
        cage.sample_local(&*frame, &mut positions);

        let area = signed_area(&positions);
        if !area.is_finite() || area.abs() <= self.config.min_cage_area {
            return Err(DeformError::Configuration(format!(
                "cage polygon is degenerate (area {})",
                area
            )));
        }

        // 预计算均值坐标权重
        let weights = compute_weights(vertices, &positions, &self.config.solver)?;

        let mut raw = vec![0.0f32; cage_count * 3];
        flatten_into(&positions, &mut raw);

        let (cage_buffer, weight_buffer) = self.publish(&raw, &weights)?;

        let center = centroid(&positions);
        self.rest_spread = positions.iter().map(|p| p.distance(center)).collect();

        log::info!(
            "变形控制器初始化完成: {} 个控制点, {} 个顶点, 控制笼面积 {:.4}{}",
            cage_count,
            weights.vertex_count(),
            area.abs(),
            if area < 0.0 { " (顺时针)" } else { "" }
        );

        self.cage = Some(cage);
        self.frame = Some(frame);
        self.cage_positions = positions;
        self.cage_positions_raw = raw;
        self.weights = Some(Arc::new(weights));
        self.cage_buffer = Some(cage_buffer);
        self.weight_buffer = Some(weight_buffer);
        self.state = ControllerState::Ready;
        Ok(())
    }

    /// 每帧刷新控制点位置并重新上传（权重缓冲区不变）
    pub fn refresh(&mut self) -> Result<()> {
        self.expect_state(ControllerState::Ready, "refresh")?;

        let (Some(cage), Some(frame), Some(handle)) =
            (self.cage.as_ref(), self.frame.as_ref(), self.cage_buffer)
        else {
            return Err(DeformError::InvalidState {
                operation: "refresh",
                state: self.state,
            });
        };

        cage.sample_local(&**frame, &mut self.cage_positions);
        flatten_into(&self.cage_positions, &mut self.cage_positions_raw);
        self.backend.upload_data(handle, &self.cage_positions_raw)
    }

    /// 释放后端缓冲区，可重复调用
    pub fn dispose(&mut self) {
        if self.state == ControllerState::Disposed {
            return;
        }

        let buffers = [self.cage_buffer.take(), self.weight_buffer.take()];
        let mut released = 0;
        for handle in buffers.into_iter().flatten() {
            match self.backend.release_buffer(handle) {
                Ok(()) => released += 1,
                Err(e) => log::warn!("释放缓冲区 {:?} 失败（忽略）: {}", handle, e),
            }
        }

        log::debug!("变形控制器已销毁, 释放 {} 个缓冲区", released);

        self.cage = None;
        self.frame = None;
        self.state = ControllerState::Disposed;
    }

    /// 检查控制笼是否被拉伸过度（非阻塞，每帧由外部调度器调用）
    ///
    /// 使用最近一次 `refresh` 的控制点位置。
    pub fn check_stability(&self) -> Result<Stability> {
        self.expect_state(ControllerState::Ready, "check_stability")?;

        let center = centroid(&self.cage_positions);
        let mut worst: Option<(usize, f32)> = None;

        for (i, (p, &rest)) in self.cage_positions.iter().zip(&self.rest_spread).enumerate() {
            if rest <= f32::EPSILON {
                continue;
            }
            let ratio = p.distance(center) / rest;
            if ratio > self.config.max_stretch_ratio && worst.map_or(true, |(_, r)| ratio > r) {
                worst = Some((i, ratio));
            }
        }

        Ok(match worst {
            Some((point, ratio)) => {
                log::warn!("控制点 {} 拉伸比 {:.2} 超过阈值 {:.2}", point, ratio, self.config.max_stretch_ratio);
                Stability::Overstretched { point, ratio }
            }
            None => Stability::Stable,
        })
    }

    /// CPU 端计算当前变形后的顶点（与着色器结果一致）
    pub fn compute_deformed_vertices(&self) -> Result<Vec<Vec3>> {
        self.expect_state(ControllerState::Ready, "compute_deformed_vertices")?;

        let weights = self.weights.as_deref().ok_or(DeformError::InvalidState {
            operation: "compute_deformed_vertices",
            state: self.state,
        })?;

        let output = compute_deformation(&DeformInput {
            weights,
            cage_positions: &self.cage_positions,
        })?;
        Ok(output.positions)
    }

    /// 获取当前状态
    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// 获取控制点位置（本地空间）
    pub fn cage_positions(&self) -> &[Vec3] {
        &self.cage_positions
    }

    /// 获取控制点位置平铺数据
    pub fn cage_positions_raw(&self) -> &[f32] {
        &self.cage_positions_raw
    }

    /// 获取权重矩阵（只读共享）
    pub fn weights(&self) -> Option<Arc<WeightMatrix>> {
        self.weights.clone()
    }

    pub fn config(&self) -> &DeformConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn expect_state(&self, expected: ControllerState, operation: &'static str) -> Result<()> {
        if self.state != expected {
            return Err(DeformError::InvalidState {
                operation,
                state: self.state,
            });
        }
        Ok(())
    }

    /// 分配、绑定并上传两个缓冲区，失败时释放已分配的部分
    fn publish(&mut self, cage_raw: &[f32], weights: &WeightMatrix) -> Result<(BufferHandle, BufferHandle)> {
        let cage_buffer = self
            .backend
            .allocate_buffer(cage_raw.len() / 3, CAGE_ELEMENT_SIZE)?;

        let weight_buffer = match self
            .backend
            .allocate_buffer(weights.as_slice().len(), WEIGHT_ELEMENT_SIZE)
        {
            Ok(handle) => handle,
            Err(e) => {
                self.release_quietly(cage_buffer);
                return Err(e);
            }
        };

        let bound = self.bind_and_upload(cage_buffer, weight_buffer, cage_raw, weights);
        if let Err(e) = bound {
            self.release_quietly(cage_buffer);
            self.release_quietly(weight_buffer);
            return Err(e);
        }

        Ok((cage_buffer, weight_buffer))
    }

    fn bind_and_upload(
        &mut self,
        cage_buffer: BufferHandle,
        weight_buffer: BufferHandle,
        cage_raw: &[f32],
        weights: &WeightMatrix,
    ) -> Result<()> {
        self.backend.bind_buffer(&self.config.cage_slot, cage_buffer)?;
        self.backend.bind_buffer(&self.config.weight_slot, weight_buffer)?;
        self.backend.upload_data(cage_buffer, cage_raw)?;
        self.backend.upload_data(weight_buffer, weights.as_slice())
    }

    fn release_quietly(&mut self, handle: BufferHandle) {
        if let Err(e) = self.backend.release_buffer(handle) {
            log::warn!("释放缓冲区 {:?} 失败（忽略）: {}", handle, e);
        }
    }
}

impl<B: RenderBackend> Drop for DeformationController<B> {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Vec3 → 平铺 f32（避免内存对齐导致错位）
fn flatten_into(positions: &[Vec3], raw: &mut [f32]) {
    for (chunk, p) in raw.chunks_exact_mut(3).zip(positions) {
        chunk[0] = p.x;
        chunk[1] = p.y;
        chunk[2] = p.z;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::cage::{Mesh, Transform, TransformHandle};

    struct Fixture {
        points: Vec<TransformHandle>,
        frame: TransformHandle,
        mesh: Mesh,
    }

    /// 以 (10, 5) 为原点的 2×2 正方形控制笼
    fn fixture() -> Fixture {
        let origin = Vec3::new(10.0, 5.0, 0.0);
        let corners = [
            Vec3::new(-1.0, -1.0, 0.0),
            Vec3::new(1.0, -1.0, 0.0),
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::new(-1.0, 1.0, 0.0),
        ];
        Fixture {
            points: corners.iter().map(|c| TransformHandle::at(origin + *c)).collect(),
            frame: TransformHandle::at(origin),
            mesh: Mesh::new(vec![
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(0.5, 0.25, 0.0),
                Vec3::new(-0.75, 0.5, 0.0),
            ]),
        }
    }

    fn ready(fx: &Fixture) -> DeformationController<MemoryBackend> {
        let mut controller = DeformationController::new(MemoryBackend::new(), DeformConfig::default());
        controller
            .initialize(Cage::from_handles(&fx.points), Arc::new(fx.frame.clone()), &fx.mesh)
            .unwrap();
        controller
    }

    fn bits(data: &[f32]) -> Vec<u32> {
        data.iter().map(|f| f.to_bits()).collect()
    }

    #[test]
    fn test_initialize_publishes_both_buffers() {
        let fx = fixture();
        let controller = ready(&fx);
        assert_eq!(controller.state(), ControllerState::Ready);

        let backend = controller.backend();
        assert_eq!(backend.live_buffer_count(), 2);

        let cage_buf = backend.bound("cagePoints").unwrap();
        assert_eq!(cage_buf.element_count, 4);
        assert_eq!(cage_buf.element_size, 12);
        assert_eq!(cage_buf.upload_count, 1);
        let expected = [-1.0, -1.0, 0.0, 1.0, -1.0, 0.0, 1.0, 1.0, 0.0, -1.0, 1.0, 0.0];
        for (a, b) in cage_buf.data.iter().zip(expected) {
            assert!((a - b).abs() < 1e-6);
        }

        let weight_buf = backend.bound("weights").unwrap();
        assert_eq!(weight_buf.element_count, 12);
        assert_eq!(weight_buf.element_size, 4);
        assert_eq!(weight_buf.upload_count, 1);

        let weights = controller.weights().unwrap();
        assert_eq!(weight_buf.data, weights.as_slice());
        for row in weights.rows() {
            let sum: f32 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_refresh_before_initialize_fails() {
        let mut controller = DeformationController::new(MemoryBackend::new(), DeformConfig::default());
        assert!(matches!(
            controller.refresh(),
            Err(DeformError::InvalidState {
                state: ControllerState::Uninitialized,
                ..
            })
        ));
    }

    #[test]
    fn test_initialize_twice_fails() {
        let fx = fixture();
        let mut controller = ready(&fx);
        let err = controller.initialize(
            Cage::from_handles(&fx.points),
            Arc::new(fx.frame.clone()),
            &fx.mesh,
        );
        assert!(matches!(err, Err(DeformError::InvalidState { operation: "initialize", .. })));
        assert_eq!(controller.backend().live_buffer_count(), 2);
    }

    #[test]
    fn test_refresh_after_dispose_fails() {
        let fx = fixture();
        let mut controller = ready(&fx);
        controller.dispose();
        assert!(matches!(
            controller.refresh(),
            Err(DeformError::InvalidState {
                state: ControllerState::Disposed,
                ..
            })
        ));
        assert!(controller.check_stability().is_err());
    }

    #[test]
    fn test_refresh_is_idempotent() {
        let fx = fixture();
        let mut controller = ready(&fx);

        controller.refresh().unwrap();
        let first = bits(controller.cage_positions_raw());
        controller.refresh().unwrap();
        let second = bits(controller.cage_positions_raw());

        assert_eq!(first, second);
        assert_eq!(bits(&controller.backend().bound("cagePoints").unwrap().data), second);
    }

    #[test]
    fn test_displacement_only_touches_moved_point() {
        let fx = fixture();
        let mut controller = ready(&fx);
        let before = controller.cage_positions().to_vec();
        let weights_before = bits(&controller.backend().bound("weights").unwrap().data);

        let delta = Vec3::new(0.3, -0.2, 0.0);
        fx.points[2].translate(delta);
        controller.refresh().unwrap();

        let after = controller.cage_positions();
        for i in 0..4 {
            if i == 2 {
                assert!((after[i] - (before[i] + delta)).length() < 1e-5);
            } else {
                assert_eq!(after[i], before[i]);
            }
        }

        let backend = controller.backend();
        let cage_buf = backend.bound("cagePoints").unwrap();
        assert_eq!(cage_buf.upload_count, 2);
        assert!((cage_buf.data[6] - (1.0 + delta.x)).abs() < 1e-5);

        let weight_buf = backend.bound("weights").unwrap();
        assert_eq!(weight_buf.upload_count, 1);
        assert_eq!(bits(&weight_buf.data), weights_before);
    }

    #[test]
    fn test_refresh_follows_frame() {
        let fx = fixture();
        let mut controller = ready(&fx);
        let before = controller.cage_positions().to_vec();

        // 父物体移动而控制点不动：本地坐标反向偏移
        fx.frame.translate(Vec3::new(1.0, 0.0, 0.0));
        controller.refresh().unwrap();
        for (a, b) in controller.cage_positions().iter().zip(&before) {
            assert!((*a - (*b - Vec3::X)).length() < 1e-5);
        }

        fx.frame.set(Transform {
            scale: Vec3::splat(2.0),
            ..Transform::from_translation(Vec3::new(10.0, 5.0, 0.0))
        });
        controller.refresh().unwrap();
        for (a, b) in controller.cage_positions().iter().zip(&before) {
            assert!((*a - *b * 0.5).length() < 1e-5);
        }
    }

    #[test]
    fn test_dispose_releases_once() {
        let fx = fixture();
        let mut backend = MemoryBackend::new();
        {
            let mut controller = DeformationController::new(&mut backend, DeformConfig::default());
            controller
                .initialize(Cage::from_handles(&fx.points), Arc::new(fx.frame.clone()), &fx.mesh)
                .unwrap();
            controller.dispose();
            controller.dispose();
            assert_eq!(controller.state(), ControllerState::Disposed);
        }
        assert_eq!(backend.released().len(), 2);
        assert_eq!(backend.live_buffer_count(), 0);
    }

    #[test]
    fn test_drop_releases_buffers() {
        let fx = fixture();
        let mut backend = MemoryBackend::new();
        {
            let mut controller = DeformationController::new(&mut backend, DeformConfig::default());
            controller
                .initialize(Cage::from_handles(&fx.points), Arc::new(fx.frame.clone()), &fx.mesh)
                .unwrap();
        }
        assert_eq!(backend.released().len(), 2);
    }

    #[test]
    fn test_dispose_without_initialize_is_noop() {
        let mut controller = DeformationController::new(MemoryBackend::new(), DeformConfig::default());
        controller.dispose();
        controller.dispose();
        assert_eq!(controller.state(), ControllerState::Disposed);
        assert!(controller.backend().released().is_empty());

        let fx = fixture();
        let err = controller.initialize(
            Cage::from_handles(&fx.points),
            Arc::new(fx.frame.clone()),
            &fx.mesh,
        );
        assert!(matches!(err, Err(DeformError::InvalidState { .. })));
    }

    #[test]
    fn test_invalid_inputs_are_configuration_errors() {
        let fx = fixture();
        let frame: Arc<dyn LocalFrame> = Arc::new(fx.frame.clone());

        let mut controller = DeformationController::new(MemoryBackend::new(), DeformConfig::default());
        let err = controller.initialize(Cage::from_handles(&fx.points[..2]), frame.clone(), &fx.mesh);
        assert!(matches!(err, Err(DeformError::Configuration(_))));

        let err = controller.initialize(Cage::from_handles(&fx.points), frame.clone(), &Mesh::default());
        assert!(matches!(err, Err(DeformError::Configuration(_))));

        let line = [
            TransformHandle::at(Vec3::ZERO),
            TransformHandle::at(Vec3::X),
            TransformHandle::at(Vec3::X * 2.0),
        ];
        let err = controller.initialize(Cage::from_handles(&line), frame, &fx.mesh);
        assert!(matches!(err, Err(DeformError::Configuration(_))));

        assert_eq!(controller.state(), ControllerState::Uninitialized);
        assert_eq!(controller.backend().live_buffer_count(), 0);

        // 修正输入后可以重新初始化
        let frame: Arc<dyn LocalFrame> = Arc::new(fx.frame.clone());
        controller
            .initialize(Cage::from_handles(&fx.points), frame, &fx.mesh)
            .unwrap();
        assert_eq!(controller.state(), ControllerState::Ready);
    }

    /// 绑定时失败的后端
    struct FailOnBind(MemoryBackend);

    impl RenderBackend for FailOnBind {
        fn allocate_buffer(&mut self, element_count: usize, element_size: usize) -> Result<BufferHandle> {
            self.0.allocate_buffer(element_count, element_size)
        }

        fn upload_data(&mut self, handle: BufferHandle, data: &[f32]) -> Result<()> {
            self.0.upload_data(handle, data)
        }

        fn bind_buffer(&mut self, _name: &str, _handle: BufferHandle) -> Result<()> {
            Err(DeformError::Backend("bind rejected".into()))
        }

        fn release_buffer(&mut self, handle: BufferHandle) -> Result<()> {
            self.0.release_buffer(handle)
        }
    }

    #[test]
    fn test_backend_failure_releases_partial_buffers() {
        let fx = fixture();
        let mut controller = DeformationController::new(FailOnBind(MemoryBackend::new()), DeformConfig::default());
        let err = controller.initialize(Cage::from_handles(&fx.points), Arc::new(fx.frame.clone()), &fx.mesh);

        assert!(matches!(err, Err(DeformError::Backend(_))));
        assert_eq!(controller.state(), ControllerState::Uninitialized);
        assert_eq!(controller.backend().0.live_buffer_count(), 0);
        assert_eq!(controller.backend().0.released().len(), 2);
    }

    /// 第一次释放失败的后端，记录释放调用次数
    struct FailFirstRelease {
        inner: MemoryBackend,
        release_calls: usize,
    }

    impl RenderBackend for FailFirstRelease {
        fn allocate_buffer(&mut self, element_count: usize, element_size: usize) -> Result<BufferHandle> {
            self.inner.allocate_buffer(element_count, element_size)
        }

        fn upload_data(&mut self, handle: BufferHandle, data: &[f32]) -> Result<()> {
            self.inner.upload_data(handle, data)
        }

        fn bind_buffer(&mut self, name: &str, handle: BufferHandle) -> Result<()> {
            self.inner.bind_buffer(name, handle)
        }

        fn release_buffer(&mut self, handle: BufferHandle) -> Result<()> {
            self.release_calls += 1;
            if self.release_calls == 1 {
                return Err(DeformError::Backend("release rejected".into()));
            }
            self.inner.release_buffer(handle)
        }
    }

    #[test]
    fn test_dispose_continues_after_release_failure() {
        let fx = fixture();
        let backend = FailFirstRelease {
            inner: MemoryBackend::new(),
            release_calls: 0,
        };
        let mut controller = DeformationController::new(backend, DeformConfig::default());
        controller
            .initialize(Cage::from_handles(&fx.points), Arc::new(fx.frame.clone()), &fx.mesh)
            .unwrap();

        controller.dispose();
        assert_eq!(controller.state(), ControllerState::Disposed);
        assert_eq!(controller.backend().release_calls, 2);
        assert_eq!(controller.backend().inner.released().len(), 1);
        assert_eq!(controller.backend().inner.live_buffer_count(), 1);

        controller.dispose();
        assert_eq!(controller.backend().release_calls, 2);
    }

    #[test]
    fn test_stability_detects_overstretch() {
        let fx = fixture();
        let mut controller = ready(&fx);
        assert!(controller.check_stability().unwrap().is_stable());

        fx.points[0].translate(Vec3::new(-19.0, -19.0, 0.0));
        controller.refresh().unwrap();

        let stability = controller.check_stability().unwrap();
        assert!(!stability.is_stable());
        match stability {
            Stability::Overstretched { point, ratio } => {
                assert_eq!(point, 0);
                assert!(ratio > 5.0);
            }
            Stability::Stable => panic!("expected overstretch"),
        }
    }

    #[test]
    fn test_deformed_vertices_follow_cage() {
        let fx = fixture();
        let mut controller = ready(&fx);

        let rest = controller.compute_deformed_vertices().unwrap();
        for (p, v) in rest.iter().zip(&fx.mesh.vertices) {
            assert!((*p - *v).length() < 1e-5);
        }

        let delta = Vec3::new(0.5, 1.5, 0.0);
        for point in &fx.points {
            point.translate(delta);
        }
        controller.refresh().unwrap();

        let moved = controller.compute_deformed_vertices().unwrap();
        for (p, v) in moved.iter().zip(&fx.mesh.vertices) {
            assert!((*p - (*v + delta)).length() < 1e-4);
        }
    }
}
