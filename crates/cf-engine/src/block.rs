//! Immutable sample blocks with cached summaries
//!
//! A block is written once and never modified. Sequences share blocks by
//! cloning the `Arc`; an edit always produces new blocks.

use cf_core::{Sample, SampleFormat};

/// Identifier assigned by the store that created a block
pub type BlockId = u64;

// ═══════════════════════════════════════════════════════════════════════════
// SUMMARY
// ═══════════════════════════════════════════════════════════════════════════

/// Min, max and sum of squares over a run of samples
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    pub min: f32,
    pub max: f32,
    pub sum_squares: f64,
    pub count: usize,
}

impl Default for Summary {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl Summary {
    /// Identity for `merge`
    pub const EMPTY: Self = Self {
        min: f32::MAX,
        max: f32::MIN,
        sum_squares: 0.0,
        count: 0,
    };

    pub fn of(samples: &[Sample]) -> Self {
        let mut summary = Self::EMPTY;
        for &s in samples {
            summary.min = summary.min.min(s);
            summary.max = summary.max.max(s);
            summary.sum_squares += (s as f64) * (s as f64);
        }
        summary.count = samples.len();
        summary
    }

    pub fn merge(&mut self, other: &Summary) {
        if other.count == 0 {
            return;
        }
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.sum_squares += other.sum_squares;
        self.count += other.count;
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// (min, max), or zeros when nothing was summarized
    pub fn min_max(&self) -> (f32, f32) {
        if self.is_empty() {
            (0.0, 0.0)
        } else {
            (self.min, self.max)
        }
    }

    pub fn rms(&self) -> f32 {
        if self.is_empty() {
            0.0
        } else {
            (self.sum_squares / self.count as f64).sqrt() as f32
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SAMPLE BLOCK
// ═══════════════════════════════════════════════════════════════════════════

/// One stored block of samples
#[derive(Debug)]
pub struct SampleBlock {
    id: BlockId,
    format: SampleFormat,
    len: usize,
    /// Little-endian encoded samples
    data: Vec<u8>,
    summary: Summary,
    tile_samples: usize,
    tiles: Vec<Summary>,
}

impl SampleBlock {
    /// Encode `samples` and compute summaries over the stored (quantized) values
    pub fn build(id: BlockId, samples: &[Sample], format: SampleFormat, tile_samples: usize) -> Self {
        let data = format.encode(samples);
        let stored = format.decode(&data);
        Self::from_stored(id, format, data, &stored, tile_samples)
    }

    /// Block of `len` zero samples
    pub fn silent(id: BlockId, len: usize, format: SampleFormat, tile_samples: usize) -> Self {
        // Zero encodes to all-zero bytes in every format
        let data = vec![0u8; len * format.bytes_per_sample()];
        let tile_samples = tile_samples.max(1);
        let zero_tile = |n: usize| Summary {
            min: 0.0,
            max: 0.0,
            sum_squares: 0.0,
            count: n,
        };
        let tiles = (0..len.div_ceil(tile_samples))
            .map(|t| zero_tile(tile_samples.min(len - t * tile_samples)))
            .collect();
        Self {
            id,
            format,
            len,
            data,
            summary: zero_tile(len),
            tile_samples,
            tiles,
        }
    }

    fn from_stored(
        id: BlockId,
        format: SampleFormat,
        data: Vec<u8>,
        stored: &[Sample],
        tile_samples: usize,
    ) -> Self {
        let tile_samples = tile_samples.max(1);
        let tiles: Vec<Summary> = stored.chunks(tile_samples).map(Summary::of).collect();
        let mut summary = Summary::EMPTY;
        for tile in &tiles {
            summary.merge(tile);
        }
        Self {
            id,
            format,
            len: stored.len(),
            data,
            summary,
            tile_samples,
            tiles,
        }
    }

    #[inline]
    pub fn id(&self) -> BlockId {
        self.id
    }

    #[inline]
    pub fn format(&self) -> SampleFormat {
        self.format
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Encoded size in bytes
    #[inline]
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Summary of the whole block
    #[inline]
    pub fn summary(&self) -> &Summary {
        &self.summary
    }

    /// All samples, decoded
    pub fn samples(&self) -> Vec<Sample> {
        self.format.decode(&self.data)
    }

    /// Decode `buffer.len()` samples starting at `start` into `buffer`
    ///
    /// Callers guarantee the range lies inside the block.
    pub fn read_into(&self, start: usize, buffer: &mut [Sample]) {
        let bps = self.format.bytes_per_sample();
        let end = (start + buffer.len()).min(self.len);
        if start >= end {
            return;
        }
        let decoded = self.format.decode(&self.data[start * bps..end * bps]);
        buffer[..decoded.len()].copy_from_slice(&decoded);
    }

    pub fn read(&self, start: usize, len: usize) -> Vec<Sample> {
        let mut out = vec![0.0; len.min(self.len.saturating_sub(start))];
        self.read_into(start, &mut out);
        out
    }

    /// Summary of `[start, start + len)`, using cached tiles where a tile is
    /// fully covered and decoding only the partial edges
    pub fn summary_range(&self, start: usize, len: usize) -> Summary {
        let end = (start + len).min(self.len);
        if start >= end {
            return Summary::EMPTY;
        }
        if start == 0 && end == self.len {
            return self.summary;
        }

        let mut summary = Summary::EMPTY;
        let mut pos = start;
        while pos < end {
            let tile = pos / self.tile_samples;
            let tile_start = tile * self.tile_samples;
            let tile_end = (tile_start + self.tile_samples).min(self.len);
            let chunk_end = tile_end.min(end);
            if pos == tile_start && chunk_end == tile_end {
                summary.merge(&self.tiles[tile]);
            } else {
                summary.merge(&Summary::of(&self.read(pos, chunk_end - pos)));
            }
            pos = chunk_end;
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ramp(n: usize) -> Vec<f32> {
        (0..n).map(|i| i as f32 / n as f32 - 0.5).collect()
    }

    #[test]
    fn test_build_summaries() {
        let samples = ramp(1000);
        let block = SampleBlock::build(1, &samples, SampleFormat::Float32, 256);
        assert_eq!(block.len(), 1000);
        assert_eq!(block.byte_len(), 4000);
        assert_eq!(block.summary().min, -0.5);
        assert_eq!(block.summary().max, samples[999]);
        assert_eq!(block.samples(), samples);
    }

    #[test]
    fn test_summary_range_matches_direct_scan() {
        let samples: Vec<f32> = (0..1000).map(|i| ((i * 37) % 101) as f32 / 50.0 - 1.0).collect();
        let block = SampleBlock::build(1, &samples, SampleFormat::Float32, 64);
        for &(start, len) in &[(0, 1000), (10, 500), (64, 128), (63, 2), (999, 1)] {
            let tiled = block.summary_range(start, len);
            let direct = Summary::of(&samples[start..start + len]);
            assert_eq!(tiled.min_max(), direct.min_max());
            assert_relative_eq!(tiled.rms(), direct.rms(), epsilon = 1e-6);
            assert_eq!(tiled.count, len);
        }
    }

    #[test]
    fn test_int16_summary_uses_stored_values() {
        let block = SampleBlock::build(7, &[0.300_001, -2.0], SampleFormat::Int16, 256);
        let stored = block.samples();
        assert_eq!(block.summary().max, stored[0]);
        assert_eq!(block.summary().min, -1.0);
    }

    #[test]
    fn test_silent_block() {
        let block = SampleBlock::silent(3, 300, SampleFormat::Int24, 128);
        assert_eq!(block.len(), 300);
        assert!(block.samples().iter().all(|&s| s == 0.0));
        assert_eq!(block.summary_range(100, 150).min_max(), (0.0, 0.0));
        assert_eq!(block.summary_range(100, 150).count, 150);
        assert_eq!(block.summary().rms(), 0.0);
    }

    #[test]
    fn test_empty_summary() {
        assert_eq!(Summary::EMPTY.min_max(), (0.0, 0.0));
        assert_eq!(Summary::of(&[]).rms(), 0.0);
    }
}
