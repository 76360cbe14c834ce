//! Linear algebra aliases for the position smoother
//!
//! Compile-time dimensions keep the 4-state filter's matrix products checked.

use nalgebra::{SMatrix, SVector};

// ===== State Dimensions =====
pub const STATE_DIM_POS: usize = 4; // (lat, lon, vel_lat, vel_lon)

// ===== Measurement Dimensions =====
pub const MEASURE_DIM_FIX: usize = 2; // (lat, lon)

pub type StateVec4 = SVector<f64, STATE_DIM_POS>;
pub type StateMat4 = SMatrix<f64, STATE_DIM_POS, STATE_DIM_POS>;

pub type FixVec = SVector<f64, MEASURE_DIM_FIX>;
pub type FixNoise = SMatrix<f64, MEASURE_DIM_FIX, MEASURE_DIM_FIX>;

pub type KalmanGainFix = SMatrix<f64, STATE_DIM_POS, MEASURE_DIM_FIX>; // 4×2
pub type JacobianFix = SMatrix<f64, MEASURE_DIM_FIX, STATE_DIM_POS>; // 2×4
