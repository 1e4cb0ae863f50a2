//! Cage Engine - 基于控制笼 (cage) 的网格自由变形引擎
//!
//! 提供：
//! - 均值坐标 (Mean-Value Coordinates) 权重预计算
//! - 控制笼点位置的每帧刷新与上传
//! - 渲染后端缓冲区生命周期管理
//! - CPU 端变形结果计算（与着色器一致的加权求和）

pub mod backend;
pub mod cage;
pub mod config;
pub mod controller;
pub mod deform;
pub mod weights;

pub use backend::{BufferHandle, MemoryBackend, RenderBackend};
pub use cage::{Cage, CagePointSource, LocalFrame, Mesh, MeshSource, Transform, TransformHandle};
pub use config::{DeformConfig, SolverConfig};
pub use controller::{ControllerState, DeformationController, Stability};
pub use deform::{compute_deformation, DeformInput, DeformOutput};
pub use weights::{compute_weights, WeightMatrix};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeformError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid state: {operation} is not allowed while {state:?}")]
    InvalidState {
        operation: &'static str,
        state: ControllerState,
    },

    #[error("Degenerate geometry at vertex {vertex}: {reason}")]
    DegenerateGeometry { vertex: usize, reason: String },

    #[error("Backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, DeformError>;
