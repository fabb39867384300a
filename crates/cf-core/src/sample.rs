//! Sample formats and conversion between them

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{CfError, CfResult};

/// Type alias for interchange samples (what callers read and write)
pub type Sample = f32;

const INT16_SCALE: f32 = 32768.0;
const INT24_SCALE: f32 = 8_388_608.0;

/// Storage format of a sequence's samples
///
/// Ordered from narrowest to widest, so converting to a "greater" format
/// never loses precision.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum SampleFormat {
    Int16,
    /// 24-bit samples stored in 4 bytes
    Int24,
    #[default]
    Float32,
}

impl SampleFormat {
    #[inline]
    pub const fn bytes_per_sample(self) -> usize {
        match self {
            Self::Int16 => 2,
            Self::Int24 | Self::Float32 => 4,
        }
    }

    /// Name used in persisted project files
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Int16 => "int16",
            Self::Int24 => "int24",
            Self::Float32 => "float",
        }
    }

    /// Round a sample to the nearest value representable in this format
    #[inline]
    pub fn quantize(self, sample: Sample) -> Sample {
        match self {
            Self::Int16 => to_int16(sample) as f32 / INT16_SCALE,
            Self::Int24 => to_int24(sample) as f32 / INT24_SCALE,
            Self::Float32 => sample,
        }
    }

    /// Encode samples as little-endian bytes in this format
    pub fn encode(self, samples: &[Sample]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(samples.len() * self.bytes_per_sample());
        match self {
            Self::Int16 => {
                for &s in samples {
                    bytes.extend_from_slice(&to_int16(s).to_le_bytes());
                }
            }
            Self::Int24 => {
                for &s in samples {
                    bytes.extend_from_slice(&to_int24(s).to_le_bytes());
                }
            }
            Self::Float32 => {
                for &s in samples {
                    bytes.extend_from_slice(&s.to_le_bytes());
                }
            }
        }
        bytes
    }

    /// Decode little-endian bytes in this format into samples
    ///
    /// A trailing partial sample is ignored.
    pub fn decode(self, bytes: &[u8]) -> Vec<Sample> {
        match self {
            Self::Int16 => bytes
                .chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / INT16_SCALE)
                .collect(),
            Self::Int24 => bytes
                .chunks_exact(4)
                .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f32 / INT24_SCALE)
                .collect(),
            Self::Float32 => bytes
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SampleFormat {
    type Err = CfError;

    fn from_str(s: &str) -> CfResult<Self> {
        match s {
            "int16" => Ok(Self::Int16),
            "int24" => Ok(Self::Int24),
            "float" => Ok(Self::Float32),
            other => Err(CfError::Parse(format!("unknown sample format '{other}'"))),
        }
    }
}

#[inline]
fn to_int16(sample: Sample) -> i16 {
    (sample * INT16_SCALE).round().clamp(-32768.0, 32767.0) as i16
}

#[inline]
fn to_int24(sample: Sample) -> i32 {
    (sample * INT24_SCALE)
        .round()
        .clamp(-8_388_608.0, 8_388_607.0) as i32
}
