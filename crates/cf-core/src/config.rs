//! Engine configuration
//!
//! Tunables for block storage, resampling and clip editing tolerances.
//! Persisted as JSON; missing fields fall back to defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::{CfError, CfResult, SampleFormat};

/// Engine-wide configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on the encoded size of one storage block (bytes)
    pub max_block_bytes: usize,
    /// Samples per summary tile inside a block (min/max/RMS cache granularity)
    pub summary_tile_samples: usize,
    /// Samples fed to the resampler per chunk; progress is polled once per chunk
    pub resample_chunk_samples: usize,
    /// Rate for newly created tracks (Hz)
    pub default_rate: u32,
    /// Sample format for newly created tracks
    pub default_format: SampleFormat,
    /// Overlap (seconds) nudged away when inserting a clip, and the shortest
    /// silence a disjoin splits out
    pub merge_tolerance: f64,
    /// Distance (seconds) within which a position matches a cut line
    pub cut_line_tolerance: f64,
    /// Deepest cut-line nesting accepted from a project file
    pub max_cut_line_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_block_bytes: 1024 * 1024,
            summary_tile_samples: 256,
            resample_chunk_samples: 65536,
            default_rate: 44100,
            default_format: SampleFormat::Float32,
            merge_tolerance: 0.01,
            cut_line_tolerance: 0.0001,
            max_cut_line_depth: 64,
        }
    }
}

impl EngineConfig {
    /// Parse from a JSON string and validate
    pub fn from_json(content: &str) -> CfResult<Self> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> CfResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let config = Self::from_json(&content)?;
        log::info!("[Config] Loaded engine config from {:?}", path);
        Ok(config)
    }

    /// Save configuration as pretty JSON, creating parent directories
    pub fn save<P: AsRef<Path>>(&self, path: P) -> CfResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        log::debug!("[Config] Saved engine config to {:?}", path);
        Ok(())
    }

    pub fn validate(&self) -> CfResult<()> {
        // Smallest format is 2 bytes; a block must hold at least two samples
        if self.max_block_bytes < 4 {
            return Err(CfError::InvalidParam(format!(
                "max_block_bytes too small: {}",
                self.max_block_bytes
            )));
        }
        if self.summary_tile_samples == 0 {
            return Err(CfError::InvalidParam("summary_tile_samples is zero".into()));
        }
        if self.resample_chunk_samples == 0 {
            return Err(CfError::InvalidParam("resample_chunk_samples is zero".into()));
        }
        if self.default_rate == 0 {
            return Err(CfError::InvalidParam("default_rate is zero".into()));
        }
        let tolerances = [self.merge_tolerance, self.cut_line_tolerance];
        if tolerances.iter().any(|t| t.is_nan() || *t < 0.0) {
            return Err(CfError::InvalidParam("tolerances must be non-negative".into()));
        }
        Ok(())
    }

    /// Largest block, in samples, for the given format
    #[inline]
    pub fn max_block_samples(&self, format: SampleFormat) -> usize {
        (self.max_block_bytes / format.bytes_per_sample()).max(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.max_block_samples(SampleFormat::Float32), 262144);
        assert_eq!(config.max_block_samples(SampleFormat::Int16), 524288);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = EngineConfig::from_json(r#"{ "default_rate": 48000 }"#).unwrap();
        assert_eq!(config.default_rate, 48000);
        assert_eq!(config.resample_chunk_samples, 65536);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = EngineConfig::from_json(r#"{ "resample_chunk_samples": 0 }"#).unwrap_err();
        assert!(matches!(err, CfError::InvalidParam(_)));

        let err = EngineConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, CfError::Serialization(_)));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("engine.json");

        let config = EngineConfig {
            max_block_bytes: 4096,
            default_format: SampleFormat::Int16,
            ..Default::default()
        };
        config.save(&path).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = EngineConfig::load(dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, CfError::Io(_)));
    }
}
