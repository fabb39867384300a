//! Constant-factor streaming resampling

use cf_core::{CfError, CfResult, Sample};

/// Streaming resampler
///
/// Called repeatedly with consecutive input chunks; `last` marks the final
/// chunk. After that, keep calling with empty input until nothing more is
/// produced.
pub trait Resampler {
    /// Returns `(consumed, produced)`
    fn process(
        &mut self,
        factor: f64,
        input: &[Sample],
        last: bool,
        output: &mut [Sample],
    ) -> CfResult<(usize, usize)>;
}

/// Number of samples a complete stream of `input_len` samples resamples to
#[inline]
pub fn resampled_len(input_len: u64, factor: f64) -> u64 {
    (input_len as f64 * factor).round() as u64
}

/// Linear-interpolation resampler
///
/// Consumes every input sample it is given; output sample `k` sits at
/// input position `k / factor`.
#[derive(Debug, Default)]
pub struct LinearResampler {
    history: Vec<Sample>,
    /// Absolute input index of `history[0]`
    history_start: u64,
    total_in: u64,
    produced: u64,
    finished: bool,
    factor: Option<f64>,
}

impl LinearResampler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    #[inline]
    fn sample_at(&self, index: u64) -> Sample {
        self.history[(index - self.history_start) as usize]
    }
}

impl Resampler for LinearResampler {
    fn process(
        &mut self,
        factor: f64,
        input: &[Sample],
        last: bool,
        output: &mut [Sample],
    ) -> CfResult<(usize, usize)> {
        if !factor.is_finite() || factor <= 0.0 {
            return Err(CfError::InvalidParam(format!("bad resample factor {factor}")));
        }
        match self.factor {
            Some(f) if f != factor => {
                return Err(CfError::InvalidParam(
                    "resample factor changed mid-stream".into(),
                ));
            }
            _ => self.factor = Some(factor),
        }
        if self.finished && !input.is_empty() {
            return Err(CfError::inconsistency("input after the last chunk"));
        }

        self.history.extend_from_slice(input);
        self.total_in += input.len() as u64;
        self.finished |= last;

        let target = self.finished.then(|| resampled_len(self.total_in, factor));
        let mut n = 0;
        while n < output.len() && self.total_in > 0 {
            let k = self.produced;
            if target.is_some_and(|t| k >= t) {
                break;
            }
            let pos = k as f64 / factor;
            let i0 = pos.floor() as u64;
            // Until the stream ends, wait for the right-hand neighbour
            if !self.finished && i0 + 1 >= self.total_in {
                break;
            }
            let last_index = self.total_in - 1;
            let a = self.sample_at(i0.min(last_index));
            let b = self.sample_at((i0 + 1).min(last_index));
            let frac = (pos - i0 as f64) as f32;
            output[n] = a + (b - a) * frac;
            n += 1;
            self.produced += 1;
        }

        // Drop input that no future output sample can reach
        let needed = (self.produced as f64 / factor).floor() as u64;
        let keep_from = needed.min(self.total_in.saturating_sub(1));
        if keep_from > self.history_start {
            self.history.drain(..(keep_from - self.history_start) as usize);
            self.history_start = keep_from;
        }

        Ok((input.len(), n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(factor: f64, input: &[f32], chunk: usize, out_cap: usize) -> Vec<f32> {
        let mut resampler = LinearResampler::new();
        let mut out = Vec::new();
        let mut buffer = vec![0.0; out_cap];
        let mut pos = 0;
        loop {
            let end = (pos + chunk).min(input.len());
            let last = end == input.len();
            let (consumed, produced) = resampler
                .process(factor, &input[pos..end], last, &mut buffer)
                .unwrap();
            pos += consumed;
            out.extend_from_slice(&buffer[..produced]);
            if last && produced == 0 {
                break;
            }
        }
        out
    }

    #[test]
    fn test_identity_factor() {
        let input: Vec<f32> = (0..100).map(|i| (i as f32).sin()).collect();
        assert_eq!(run(1.0, &input, 30, 64), input);
    }

    #[test]
    fn test_upsample_interpolates() {
        let out = run(2.0, &[0.0, 1.0, 2.0, 3.0], 4, 16);
        assert_eq!(out, vec![0.0, 0.5, 1.0, 1.5, 2.0, 2.5, 3.0, 3.0]);
    }

    #[test]
    fn test_output_length_matches_factor() {
        let input = vec![0.25; 44100];
        let factor = 48000.0 / 44100.0;
        let out = run(factor, &input, 4096, 8192);
        assert_eq!(out.len() as u64, resampled_len(44100, factor));
        assert_eq!(out.len(), 48000);
        assert!(out.iter().all(|&s| (s - 0.25).abs() < 1e-6));
    }

    #[test]
    fn test_chunking_does_not_change_output() {
        let input: Vec<f32> = (0..1000).map(|i| ((i * 7) % 13) as f32 / 13.0).collect();
        let whole = run(0.75, &input, 1000, 2000);
        let chunked = run(0.75, &input, 17, 5);
        assert_eq!(whole, chunked);
    }

    #[test]
    fn test_bad_factor_rejected() {
        let mut resampler = LinearResampler::new();
        let mut out = [0.0; 4];
        assert!(resampler.process(0.0, &[1.0], true, &mut out).is_err());
        assert!(resampler.process(f64::NAN, &[1.0], true, &mut out).is_err());

        let mut resampler = LinearResampler::new();
        resampler.process(2.0, &[1.0], false, &mut out).unwrap();
        assert!(resampler.process(3.0, &[1.0], true, &mut out).is_err());
    }

    #[test]
    fn test_empty_stream() {
        assert!(run(2.0, &[], 10, 10).is_empty());
    }
}
