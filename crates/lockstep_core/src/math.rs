//! Fixed-point math for deterministic troop arithmetic.
//!
//! Fractional quantities in the simulation (troop growth per tick) use
//! fixed-point arithmetic so that every client computes bit-identical
//! results regardless of CPU or compiler flags.

use fixed::types::I32F32;

/// Fixed-point number type for all simulation math.
///
/// 32 integer bits and 32 fractional bits.
pub type Fixed = I32F32;

/// Serde support for fixed-point numbers.
///
/// Serializes as the raw bit representation (i64) to preserve exact
/// precision across snapshots.
pub mod fixed_serde {
    use super::Fixed;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a fixed-point number as its raw bits.
    pub fn serialize<S>(value: &Fixed, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        value.to_bits().serialize(serializer)
    }

    /// Deserialize a fixed-point number from its raw bits.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Fixed, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bits = i64::deserialize(deserializer)?;
        Ok(Fixed::from_bits(bits))
    }
}

/// Split a non-negative amount into whole units and the fractional rest.
///
/// Negative inputs yield `(0, value)`.
#[must_use]
pub fn split_whole(value: Fixed) -> (u32, Fixed) {
    if value <= Fixed::ZERO {
        return (0, value);
    }
    let whole = value.to_num::<i64>().clamp(0, i64::from(u32::MAX));
    let whole_fixed = Fixed::saturating_from_num(whole);
    (u32::try_from(whole).unwrap_or(u32::MAX), value - whole_fixed)
}

/// `numerator / denominator` as a fixed-point ratio. A zero denominator yields zero.
#[must_use]
pub fn ratio(numerator: u32, denominator: u32) -> Fixed {
    if denominator == 0 {
        return Fixed::ZERO;
    }
    Fixed::from_num(numerator) / Fixed::from_num(denominator)
}
