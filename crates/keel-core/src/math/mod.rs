//! # Math Module
//!
//! Deterministic fixed-point arithmetic. No floating point anywhere in this
//! tree: WAD integers, basis points, and a 256-bit mul-div primitive.

pub mod big_int;
pub mod fixed_point;
pub mod long_math;
pub mod safe_math;
pub mod tick_math;

pub use big_int::{mul_div, mul_div_i128, Rounding, U256};
