//! cf-engine: Sample-domain storage for ClipForge
//!
//! Immutable shared sample blocks, the block store, sequences built from
//! blocks, and streaming resampling.

mod block;
mod resample;
mod sequence;
mod store;

pub use block::*;
pub use resample::*;
pub use sequence::*;
pub use store::*;

pub use cf_core::{CfError, CfResult, Sample, SampleCount, SampleFormat};
