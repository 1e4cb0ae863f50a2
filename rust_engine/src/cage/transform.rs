//! 共享变换句柄

use glam::{Mat4, Quat, Vec3};
use std::sync::{Arc, PoisonError, RwLock};

use super::{CagePointSource, LocalFrame};

/// 平移 / 旋转 / 缩放
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Transform {
    pub const IDENTITY: Self = Self {
        translation: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    pub fn from_translation(translation: Vec3) -> Self {
        Self {
            translation,
            ..Self::IDENTITY
        }
    }

    /// 本地 → 世界矩阵
    pub fn local_to_world(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }

    /// 世界 → 本地矩阵
    pub fn world_to_local(&self) -> Mat4 {
        self.local_to_world().inverse()
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// 可在多个系统间共享的变换
///
/// 物理系统写入，变形控制器每帧读取。
#[derive(Clone, Debug, Default)]
pub struct TransformHandle {
    inner: Arc<RwLock<Transform>>,
}

impl TransformHandle {
    pub fn new(transform: Transform) -> Self {
        Self {
            inner: Arc::new(RwLock::new(transform)),
        }
    }

    /// 以平移创建
    pub fn at(translation: Vec3) -> Self {
        Self::new(Transform::from_translation(translation))
    }

    /// 获取当前变换
    pub fn get(&self) -> Transform {
        *self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// 设置变换
    pub fn set(&self, transform: Transform) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = transform;
    }

    /// 设置平移
    pub fn set_translation(&self, translation: Vec3) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .translation = translation;
    }

    /// 平移一个偏移量
    pub fn translate(&self, delta: Vec3) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .translation += delta;
    }
}

impl CagePointSource for TransformHandle {
    fn world_position(&self) -> Vec3 {
        self.get().translation
    }
}

impl LocalFrame for TransformHandle {
    fn world_to_local(&self) -> Mat4 {
        self.get().world_to_local()
    }
}

impl LocalFrame for Transform {
    fn world_to_local(&self) -> Mat4 {
        Transform::world_to_local(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inverse_transform_point() {
        let frame = Transform {
            translation: Vec3::new(2.0, 0.0, 0.0),
            rotation: Quat::from_rotation_z(std::f32::consts::FRAC_PI_2),
            scale: Vec3::splat(2.0),
        };
        let world = frame.local_to_world().transform_point3(Vec3::new(1.0, 0.5, 0.0));
        let local = frame.inverse_transform_point(world);
        assert!((local.x - 1.0).abs() < 1e-5);
        assert!((local.y - 0.5).abs() < 1e-5);
        assert!(local.z.abs() < 1e-5);
    }

    #[test]
    fn test_handle_is_shared() {
        let a = TransformHandle::at(Vec3::ZERO);
        let b = a.clone();
        a.translate(Vec3::new(0.0, 3.0, 0.0));
        assert_eq!(b.world_position(), Vec3::new(0.0, 3.0, 0.0));
    }
}
