//! # Safe Math Operations
//!
//! Overflow-checked arithmetic helpers. All failures surface as typed
//! errors, never as silent wraparound.

use crate::errors::{CoreResult, KeelCoreError};

/// Macro to generate safe arithmetic functions
macro_rules! safe_arith {
    // Division operations with zero check
    (div, $fn_name:ident, $type:ty) => {
        /// Safe division with zero check
        pub fn $fn_name(a: $type, b: $type) -> CoreResult<$type> {
            if b == 0 {
                return Err(KeelCoreError::DivisionByZero);
            }
            Ok(a / b)
        }
    };

    // Type conversion operations
    (cast, $fn_name:ident, $from_type:ty, $to_type:ty) => {
        /// Safe narrowing cast, typed error when the value does not fit
        pub fn $fn_name(value: $from_type) -> CoreResult<$to_type> {
            <$to_type>::try_from(value).map_err(|_| KeelCoreError::ConversionError)
        }
    };

    // Binary operations with checked methods
    ($fn_name:ident, $type:ty, $checked_method:ident, $error:expr) => {
        /// Checked arithmetic, typed error on overflow/underflow
        pub fn $fn_name(a: $type, b: $type) -> CoreResult<$type> {
            a.$checked_method(b).ok_or($error)
        }
    };
}

// Generate basic arithmetic functions
safe_arith!(safe_add_u64, u64, checked_add, KeelCoreError::MathOverflow);
safe_arith!(safe_sub_u64, u64, checked_sub, KeelCoreError::MathUnderflow);
safe_arith!(safe_mul_u64, u64, checked_mul, KeelCoreError::MathOverflow);
safe_arith!(div, safe_div_u64, u64);

safe_arith!(safe_add_u128, u128, checked_add, KeelCoreError::MathOverflow);
safe_arith!(safe_sub_u128, u128, checked_sub, KeelCoreError::MathUnderflow);
safe_arith!(safe_mul_u128, u128, checked_mul, KeelCoreError::MathOverflow);
safe_arith!(div, safe_div_u128, u128);

safe_arith!(safe_add_i128, i128, checked_add, KeelCoreError::MathOverflow);
safe_arith!(safe_sub_i128, i128, checked_sub, KeelCoreError::MathUnderflow);
safe_arith!(safe_mul_i128, i128, checked_mul, KeelCoreError::MathOverflow);
safe_arith!(div, safe_div_i128, i128);

// Generate type conversion functions
safe_arith!(cast, safe_cast_u128_to_u64, u128, u64);
safe_arith!(cast, safe_cast_u128_to_i128, u128, i128);
safe_arith!(cast, safe_cast_i128_to_u128, i128, u128);

/// Calculate a basis-point share of a value
pub fn safe_calculate_bps(value: u128, bps: u16) -> CoreResult<u128> {
    let result = safe_mul_u128(value, bps as u128)?;
    safe_div_u128(result, crate::constants::BPS_DENOMINATOR)
}
