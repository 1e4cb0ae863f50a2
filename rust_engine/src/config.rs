//! 变形配置
//!
//! 所有参数作为显式值传入控制器，不使用全局静态配置。

use crate::{DeformError, Result};

/// 权重求解参数
#[derive(Debug, Clone, PartialEq)]
pub struct SolverConfig {
    /// 顶点与控制点重合判定距离，默认 1e-6
    pub coincident_epsilon: f64,
    /// 顶点位于控制笼边上的判定角度容差（弧度），默认 1e-6
    pub collinear_epsilon: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            // 小于此距离视为顶点与控制点重合
            // 重合时直接给该控制点权重 1，避免除零
            coincident_epsilon: 1e-6,

            // 夹角与 π 的差小于此值视为顶点在边上
            // 此时 tan(θ/2) 发散，改为沿边线性插值
            collinear_epsilon: 1e-6,
        }
    }
}

impl SolverConfig {
    /// 校验参数
    pub fn validate(&self) -> Result<()> {
        if !(self.coincident_epsilon.is_finite() && self.coincident_epsilon > 0.0) {
            return Err(DeformError::Configuration(format!(
                "coincident_epsilon must be positive, got {}",
                self.coincident_epsilon
            )));
        }
        if !(self.collinear_epsilon.is_finite() && self.collinear_epsilon > 0.0) {
            return Err(DeformError::Configuration(format!(
                "collinear_epsilon must be positive, got {}",
                self.collinear_epsilon
            )));
        }
        Ok(())
    }
}

/// 变形控制器配置
#[derive(Debug, Clone, PartialEq)]
pub struct DeformConfig {
    // ========== 权重求解 ==========
    pub solver: SolverConfig,

    // ========== 缓冲区绑定 ==========
    /// 控制点位置缓冲区的绑定名，默认 "cagePoints"
    pub cage_slot: String,
    /// 权重缓冲区的绑定名，默认 "weights"
    pub weight_slot: String,

    // ========== 控制笼校验 ==========
    /// 控制笼多边形最小面积（绝对值），默认 1e-8
    pub min_cage_area: f32,

    // ========== 稳定性检测 ==========
    /// 控制点到中心距离相对静止姿态的最大拉伸比，默认 5.0
    pub max_stretch_ratio: f32,
}

impl Default for DeformConfig {
    fn default() -> Self {
        Self {
            solver: SolverConfig::default(),

            // 与顶点着色器中的缓冲区变量名一致
            cage_slot: String::from("cagePoints"),
            weight_slot: String::from("weights"),

            // 所有控制点共线时面积为 0，均值坐标无意义
            min_cage_area: 1e-8,

            // 超过此比例认为软体被拉坏
            max_stretch_ratio: 5.0,
        }
    }
}

impl DeformConfig {
    /// 校验全部参数
    pub fn validate(&self) -> Result<()> {
        self.solver.validate()?;

        if self.cage_slot.is_empty() || self.weight_slot.is_empty() {
            return Err(DeformError::Configuration(
                "buffer slot names must not be empty".into(),
            ));
        }
        if self.cage_slot == self.weight_slot {
            return Err(DeformError::Configuration(format!(
                "cage and weight buffers share the slot name '{}'",
                self.cage_slot
            )));
        }
        if !(self.min_cage_area.is_finite() && self.min_cage_area >= 0.0) {
            return Err(DeformError::Configuration(format!(
                "min_cage_area must be non-negative, got {}",
                self.min_cage_area
            )));
        }
        if !(self.max_stretch_ratio.is_finite() && self.max_stretch_ratio > 1.0) {
            return Err(DeformError::Configuration(format!(
                "max_stretch_ratio must be greater than 1, got {}",
                self.max_stretch_ratio
            )));
        }
        Ok(())
    }
}
