//! cf-state: Clip and track editing for ClipForge
//!
//! Gain envelopes, clips with cut lines, and multi-clip tracks built on the
//! block sequences of `cf-engine`.

mod envelope;
mod listener;
mod wave_clip;
mod wave_track;

pub use envelope::*;
pub use listener::*;
pub use wave_clip::*;
pub use wave_track::*;
