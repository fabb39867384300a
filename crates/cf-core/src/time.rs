//! Sample counts and time conversion

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

use crate::{CfError, CfResult};

/// Absolute sample index or sample length
///
/// Signed 64-bit. There is no `From<f64>`: turning seconds into
/// samples always goes through a rate-aware conversion.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SampleCount(pub i64);

impl SampleCount {
    pub const ZERO: Self = Self(0);

    /// Convert a time (relative to whatever origin the caller uses) to samples,
    /// rounding with `floor(x + 0.5)`.
    #[inline]
    pub fn from_time(seconds: f64, rate: f64) -> Self {
        Self((seconds * rate + 0.5).floor() as i64)
    }

    #[inline]
    pub fn as_f64(self) -> f64 {
        self.0 as f64
    }

    #[inline]
    pub fn as_i64(self) -> i64 {
        self.0
    }

    /// Checked conversion to a buffer length or index
    pub fn to_usize(self) -> CfResult<usize> {
        usize::try_from(self.0)
            .map_err(|_| CfError::inconsistency(format!("sample count {} out of range", self.0)))
    }

    #[inline]
    pub fn max(self, other: Self) -> Self {
        Self(self.0.max(other.0))
    }

    #[inline]
    pub fn min(self, other: Self) -> Self {
        Self(self.0.min(other.0))
    }
}

impl From<usize> for SampleCount {
    fn from(n: usize) -> Self {
        Self(n as i64)
    }
}

impl From<i64> for SampleCount {
    fn from(n: i64) -> Self {
        Self(n)
    }
}

impl Add for SampleCount {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for SampleCount {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl AddAssign for SampleCount {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl SubAssign for SampleCount {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl Neg for SampleCount {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Self(-self.0)
    }
}

impl fmt::Display for SampleCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Size a buffer for the remaining samples: `min(buffer_size, max(0, limit))`
#[inline]
pub fn limit_sample_buffer_size(buffer_size: usize, limit: SampleCount) -> usize {
    if limit.0 <= 0 {
        0
    } else {
        buffer_size.min(usize::try_from(limit.0).unwrap_or(usize::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_time_rounds_half_up() {
        assert_eq!(SampleCount::from_time(0.5, 1.0), SampleCount(1));
        assert_eq!(SampleCount::from_time(1.49, 1.0), SampleCount(1));
        // floor(x + 0.5) is not round-half-to-even
        assert_eq!(SampleCount::from_time(2.5, 1.0), SampleCount(3));
        assert_eq!(SampleCount::from_time(-0.5, 1.0), SampleCount(0));
        assert_eq!(SampleCount::from_time(-0.51, 1.0), SampleCount(-1));
    }

    #[test]
    fn test_to_usize_rejects_negative() {
        assert!(SampleCount(-1).to_usize().is_err());
        assert_eq!(SampleCount(42).to_usize().unwrap(), 42);
    }

    #[test]
    fn test_limit_buffer_size() {
        assert_eq!(limit_sample_buffer_size(65536, SampleCount(100)), 100);
        assert_eq!(limit_sample_buffer_size(65536, SampleCount(1 << 40)), 65536);
        assert_eq!(limit_sample_buffer_size(65536, SampleCount(-5)), 0);
    }
}
