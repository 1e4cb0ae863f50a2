//! 变形控制器
//!
//! 生命周期：`Uninitialized → Ready → Disposed`。
//! 初始化时求解一次权重，之后每帧只刷新控制点位置缓冲区。

mod deformer;

pub use deformer::DeformationController;

/// 控制器状态
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControllerState {
    Uninitialized,
    Ready,
    Disposed,
}

/// 控制笼稳定性
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Stability {
    Stable,
    /// 控制点相对中心被拉伸超过阈值
    Overstretched { point: usize, ratio: f32 },
}

impl Stability {
    pub fn is_stable(&self) -> bool {
        matches!(self, Stability::Stable)
    }
}
