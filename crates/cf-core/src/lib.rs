//! cf-core: Shared types and utilities for ClipForge
//!
//! Sample counts and formats, the error type, engine configuration,
//! progress reporting and the tagged-tree reader/writer used for projects.

mod config;
mod error;
mod progress;
mod sample;
mod time;
mod xml;

pub use config::*;
pub use error::*;
pub use progress::*;
pub use sample::*;
pub use time::*;
pub use xml::*;
