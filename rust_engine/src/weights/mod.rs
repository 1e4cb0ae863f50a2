//! 均值坐标权重

mod matrix;
mod solver;

pub use matrix::WeightMatrix;
pub use solver::compute_weights;
