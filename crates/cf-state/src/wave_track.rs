//! WaveTrack - the clips of one audio channel
//!
//! A track is an unordered set of non-overlapping clips sharing one rate
//! and sample format. Multi-clip edits build every replacement clip first
//! and only then change the clip list, so a failed edit leaves the track
//! as it was.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use cf_core::{
    CfError, CfResult, EngineConfig, ProgressReporter, Sample, SampleCount, SampleFormat,
    XmlElement, XmlWriter, parse_f64_attr, parse_i64_attr,
};
use cf_engine::{LinearResampler, SampleBlockStore};

use crate::wave_clip::WaveClip;

const GAIN_DIGITS: usize = 8;

fn same_store(a: &Arc<dyn SampleBlockStore>, b: &Arc<dyn SampleBlockStore>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

// ═══════════════════════════════════════════════════════════════════════════════
// CHANNEL GROUP
// ═══════════════════════════════════════════════════════════════════════════════

/// Mixer settings shared by the channels of one group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelGroup {
    pub gain: f32,
    /// -1.0 (left) to 1.0 (right)
    pub pan: f32,
}

impl Default for ChannelGroup {
    fn default() -> Self {
        Self { gain: 1.0, pan: 0.0 }
    }
}

impl ChannelGroup {
    /// Gain for `channel` (even = left, odd = right) after panning
    pub fn channel_gain(&self, channel: usize) -> f32 {
        let mut left = 1.0;
        let mut right = 1.0;
        if self.pan < 0.0 {
            right = self.pan + 1.0;
        } else if self.pan > 0.0 {
            left = 1.0 - self.pan;
        }
        if channel % 2 == 0 {
            left * self.gain
        } else {
            right * self.gain
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// WAVE TRACK
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug)]
pub struct WaveTrack {
    clips: Vec<WaveClip>,
    format: SampleFormat,
    rate: u32,
    colour_index: i32,
    /// Copied on write when shared with another channel
    group: Arc<ChannelGroup>,
    store: Arc<dyn SampleBlockStore>,
    config: Arc<EngineConfig>,
}

impl WaveTrack {
    pub fn new(
        store: Arc<dyn SampleBlockStore>,
        format: SampleFormat,
        rate: u32,
        config: Arc<EngineConfig>,
    ) -> CfResult<Self> {
        if rate == 0 {
            return Err(CfError::InvalidParam("sample rate must be non-zero".into()));
        }
        Ok(Self {
            clips: Vec::new(),
            format,
            rate,
            colour_index: 0,
            group: Arc::new(ChannelGroup::default()),
            store,
            config,
        })
    }

    /// Track with the configured default rate and format
    pub fn with_defaults(store: Arc<dyn SampleBlockStore>, config: Arc<EngineConfig>) -> CfResult<Self> {
        let (format, rate) = (config.default_format, config.default_rate);
        Self::new(store, format, rate, config)
    }

    /// Same settings and group, no clips
    pub fn empty_copy(&self) -> Self {
        Self {
            clips: Vec::new(),
            format: self.format,
            rate: self.rate,
            colour_index: self.colour_index,
            group: Arc::clone(&self.group),
            store: Arc::clone(&self.store),
            config: Arc::clone(&self.config),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // ACCESSORS
    // ═══════════════════════════════════════════════════════════════════════

    #[inline]
    pub fn rate(&self) -> u32 {
        self.rate
    }

    /// Relabel every clip with `rate` without resampling
    pub fn set_rate(&mut self, rate: u32) -> CfResult<()> {
        if rate == 0 {
            return Err(CfError::InvalidParam("sample rate must be non-zero".into()));
        }
        self.rate = rate;
        for clip in &mut self.clips {
            clip.set_rate(rate);
        }
        Ok(())
    }

    #[inline]
    pub fn format(&self) -> SampleFormat {
        self.format
    }

    pub fn store(&self) -> &Arc<dyn SampleBlockStore> {
        &self.store
    }

    pub fn colour_index(&self) -> i32 {
        self.colour_index
    }

    pub fn set_colour_index(&mut self, colour_index: i32) {
        self.colour_index = colour_index;
        for clip in &mut self.clips {
            clip.set_colour_index(colour_index);
        }
    }

    pub fn group(&self) -> &Arc<ChannelGroup> {
        &self.group
    }

    /// Share `group` with other channels
    pub fn set_group(&mut self, group: Arc<ChannelGroup>) {
        self.group = group;
    }

    pub fn shares_group_with(&self, other: &WaveTrack) -> bool {
        Arc::ptr_eq(&self.group, &other.group)
    }

    pub fn gain(&self) -> f32 {
        self.group.gain
    }

    pub fn set_gain(&mut self, gain: f32) {
        Arc::make_mut(&mut self.group).gain = gain;
    }

    pub fn pan(&self) -> f32 {
        self.group.pan
    }

    pub fn set_pan(&mut self, pan: f32) {
        Arc::make_mut(&mut self.group).pan = pan.clamp(-1.0, 1.0);
    }

    pub fn channel_gain(&self, channel: usize) -> f32 {
        self.group.channel_gain(channel)
    }

    pub fn error_opening(&self) -> bool {
        self.clips.iter().any(WaveClip::error_opening)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // CLIPS
    // ═══════════════════════════════════════════════════════════════════════

    /// Clips in creation order
    pub fn clips(&self) -> &[WaveClip] {
        &self.clips
    }

    pub fn clip(&self, index: usize) -> Option<&WaveClip> {
        self.clips.get(index)
    }

    pub fn clip_mut(&mut self, index: usize) -> Option<&mut WaveClip> {
        self.clips.get_mut(index)
    }

    pub fn num_clips(&self) -> usize {
        self.clips.len()
    }

    fn new_clip(&self) -> WaveClip {
        WaveClip::new(
            Arc::clone(&self.store),
            self.format,
            self.rate,
            self.colour_index,
            Arc::clone(&self.config),
        )
    }

    pub fn create_clip(&mut self) -> &mut WaveClip {
        let clip = self.new_clip();
        let index = self.clips.len();
        self.clips.push(clip);
        &mut self.clips[index]
    }

    /// Most recently added clip, creating one at 0 if there is none
    pub fn newest_or_new_clip(&mut self) -> &mut WaveClip {
        if self.clips.is_empty() {
            return self.create_clip();
        }
        let last = self.clips.len() - 1;
        &mut self.clips[last]
    }

    fn rightmost_index(&self) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (i, clip) in self.clips.iter().enumerate() {
            match best {
                Some(b) if self.clips[b].offset() >= clip.offset() => {}
                _ => best = Some(i),
            }
        }
        best
    }

    /// Clip with the largest offset, creating one at 0 if there is none
    pub fn rightmost_or_new_clip(&mut self) -> &mut WaveClip {
        match self.rightmost_index() {
            Some(i) => &mut self.clips[i],
            None => self.create_clip(),
        }
    }

    /// Take ownership of `clip`; it must use this track's block store
    pub fn add_clip(&mut self, clip: WaveClip) -> CfResult<()> {
        if !same_store(clip.sequence().store(), &self.store) {
            return Err(CfError::inconsistency("clip belongs to another block store"));
        }
        self.clips.push(clip);
        Ok(())
    }

    pub fn remove_and_return_clip(&mut self, index: usize) -> Option<WaveClip> {
        (index < self.clips.len()).then(|| self.clips.remove(index))
    }

    /// Indices ordered by start time
    pub fn sorted_clip_indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..self.clips.len()).collect();
        indices.sort_by(|&a, &b| {
            self.clips[a]
                .start_time()
                .total_cmp(&self.clips[b].start_time())
        });
        indices
    }

    /// Latest-starting clip whose span includes `t`
    pub fn clip_index_at_time(&self, t: f64) -> Option<usize> {
        self.sorted_clip_indices().into_iter().rev().find(|&i| {
            let clip = &self.clips[i];
            t >= clip.start_time() && t <= clip.end_time()
        })
    }

    /// Clip holding track sample `sample`
    pub fn clip_index_at_sample(&self, sample: SampleCount) -> Option<usize> {
        self.clips
            .iter()
            .position(|clip| sample >= clip.start_sample() && sample < clip.end_sample())
    }

    /// Every clip and, after each, its cut lines (depth first)
    pub fn all_clips(&self) -> Vec<&WaveClip> {
        fn visit<'a>(clips: &'a [WaveClip], out: &mut Vec<&'a WaveClip>) {
            for clip in clips {
                out.push(clip);
                visit(clip.cut_lines(), out);
            }
        }
        let mut out = Vec::new();
        visit(&self.clips, &mut out);
        out
    }

    // ═══════════════════════════════════════════════════════════════════════
    // TIME
    // ═══════════════════════════════════════════════════════════════════════

    pub fn time_to_long_samples(&self, t: f64) -> SampleCount {
        SampleCount::from_time(t, self.rate as f64)
    }

    pub fn long_samples_to_time(&self, s: SampleCount) -> f64 {
        s.as_f64() / self.rate as f64
    }

    /// Earliest clip start; 0 for an empty track
    pub fn start_time(&self) -> f64 {
        self.clips
            .iter()
            .map(WaveClip::start_time)
            .reduce(f64::min)
            .unwrap_or(0.0)
    }

    /// Latest clip end; 0 for an empty track
    pub fn end_time(&self) -> f64 {
        self.clips
            .iter()
            .map(WaveClip::end_time)
            .reduce(f64::max)
            .unwrap_or(0.0)
    }

    /// True when no clip has samples in `[t0, t1]`
    pub fn is_empty(&self, t0: f64, t1: f64) -> bool {
        if t0 > t1 {
            return true;
        }
        !self
            .clips
            .iter()
            .any(|clip| !clip.before_clip(t1) && !clip.after_clip(t0))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // SAMPLE ACCESS
    // ═══════════════════════════════════════════════════════════════════════

    /// Overlap of a clip with the track range `[start, end)`, as
    /// `(clip-relative start, range-relative start, len)`
    fn overlap(clip: &WaveClip, start: SampleCount, end: SampleCount) -> Option<(SampleCount, usize, usize)> {
        let cs = clip.start_sample();
        let ce = clip.end_sample();
        if ce <= start || cs >= end {
            return None;
        }
        let lo = start.max(cs);
        let hi = end.min(ce);
        Some((lo - cs, (lo - start).as_i64() as usize, (hi - lo).as_i64() as usize))
    }

    pub fn append(&mut self, samples: &[Sample]) -> CfResult<()> {
        self.rightmost_or_new_clip().append(samples)
    }

    pub fn flush(&mut self) -> CfResult<()> {
        match self.rightmost_index() {
            Some(i) => self.clips[i].flush(),
            None => Ok(()),
        }
    }

    /// Read samples at track sample `start`; gaps between clips read as zero
    pub fn get(&self, start: SampleCount, buffer: &mut [Sample]) -> CfResult<()> {
        buffer.fill(0.0);
        let end = start + SampleCount::from(buffer.len());
        for clip in &self.clips {
            if let Some((clip_start, at, len)) = Self::overlap(clip, start, end) {
                clip.read_samples(clip_start, &mut buffer[at..at + len])?;
            }
        }
        Ok(())
    }

    /// Overwrite samples at track sample `start`; samples over gaps are dropped
    pub fn set(&mut self, start: SampleCount, samples: &[Sample]) -> CfResult<()> {
        let end = start + SampleCount::from(samples.len());
        for clip in &mut self.clips {
            if let Some((clip_start, at, len)) = Self::overlap(clip, start, end) {
                clip.set_samples(clip_start, &samples[at..at + len])?;
            }
        }
        Ok(())
    }

    /// Zero the samples between `t0` and `t1`
    pub fn silence(&mut self, t0: f64, t1: f64) -> CfResult<()> {
        if t1 < t0 {
            return Err(CfError::inconsistency(format!("silence range {t0}..{t1} is reversed")));
        }
        let start = self.time_to_long_samples(t0);
        let end = self.time_to_long_samples(t1);
        for clip in &mut self.clips {
            if let Some((clip_start, _, len)) = Self::overlap(clip, start, end) {
                clip.set_samples(clip_start, &vec![0.0; len])?;
            }
        }
        Ok(())
    }

    /// Gain envelope values for consecutive samples from `t0`; 1.0 outside clips
    pub fn get_envelope_values(&self, buffer: &mut [f64], t0: f64) {
        buffer.fill(1.0);
        let dt = 1.0 / self.rate as f64;
        let start = self.time_to_long_samples(t0);
        let end = start + SampleCount::from(buffer.len());
        for clip in &self.clips {
            if let Some((_, at, len)) = Self::overlap(clip, start, end) {
                clip.envelope()
                    .values(&mut buffer[at..at + len], t0 + at as f64 * dt, dt);
            }
        }
    }

    pub fn get_min_max(&self, t0: f64, t1: f64) -> CfResult<(f32, f32)> {
        if t0 > t1 {
            return Err(CfError::inconsistency(format!("range {t0}..{t1} is reversed")));
        }
        if t0 == t1 {
            return Ok((0.0, 0.0));
        }
        let mut result: Option<(f32, f32)> = None;
        for clip in &self.clips {
            if t1 >= clip.start_time() && t0 <= clip.end_time() {
                let (lo, hi) = clip.get_min_max(t0, t1)?;
                result = Some(match result {
                    Some((min, max)) => (min.min(lo), max.max(hi)),
                    None => (lo, hi),
                });
            }
        }
        Ok(result.unwrap_or((0.0, 0.0)))
    }

    pub fn get_rms(&self, t0: f64, t1: f64) -> CfResult<f32> {
        if t0 > t1 {
            return Err(CfError::inconsistency(format!("range {t0}..{t1} is reversed")));
        }
        if t0 == t1 {
            return Ok(0.0);
        }
        let mut sum_squares = 0.0f64;
        let mut length = 0i64;
        for clip in &self.clips {
            if t1 >= clip.start_time() && t0 <= clip.end_time() {
                let rms = clip.get_rms(t0, t1)? as f64;
                let s0 = clip.time_to_samples_clip(t0.max(clip.start_time()));
                let s1 = clip.time_to_samples_clip(t1.min(clip.end_time()));
                let n = (s1 - s0).as_i64();
                sum_squares += rms * rms * n as f64;
                length += n;
            }
        }
        Ok(if length > 0 {
            (sum_squares / length as f64).sqrt() as f32
        } else {
            0.0
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // EDITING
    // ═══════════════════════════════════════════════════════════════════════

    /// Delete `[t0, t1)`; clips after the range move left
    pub fn clear(&mut self, t0: f64, t1: f64) -> CfResult<()> {
        self.handle_clear(t0, t1, false, false)
    }

    /// Delete `[t0, t1)` without moving later clips
    pub fn split_delete(&mut self, t0: f64, t1: f64) -> CfResult<()> {
        self.handle_clear(t0, t1, false, true)
    }

    /// Like `clear`, keeping the deleted audio as a cut line when the range
    /// lies inside a single clip
    pub fn clear_and_add_cut_line(&mut self, t0: f64, t1: f64) -> CfResult<()> {
        self.handle_clear(t0, t1, true, false)
    }

    fn handle_clear(&mut self, t0: f64, t1: f64, add_cut_lines: bool, split: bool) -> CfResult<()> {
        if t1 < t0 {
            return Err(CfError::inconsistency(format!("clear range {t0}..{t1} is reversed")));
        }
        // Cut lines only for deletions strictly inside one clip
        let add_cut_lines = add_cut_lines
            && !self.clips.iter().any(|clip| {
                !clip.before_clip(t1)
                    && !clip.after_clip(t0)
                    && (clip.before_clip(t0) || clip.after_clip(t1))
            });

        let mut to_delete = Vec::new();
        let mut to_add = Vec::new();
        for (i, clip) in self.clips.iter().enumerate() {
            if clip.before_clip(t0) && clip.after_clip(t1) {
                to_delete.push(i);
                continue;
            }
            if clip.before_clip(t1) || clip.after_clip(t0) {
                continue;
            }
            to_delete.push(i);
            let (start, end) = (clip.start_time(), clip.end_time());
            if add_cut_lines {
                let mut edited = clip.duplicate(true);
                edited.clear_and_add_cut_line(t0, t1)?;
                to_add.push(edited);
            } else if !split {
                let mut edited = clip.duplicate(true);
                edited.clear(t0, t1)?;
                to_add.push(edited);
            } else if clip.before_clip(t0) {
                let mut edited = clip.duplicate(true);
                edited.clear(start, t1)?;
                edited.offset_by(t1 - start);
                to_add.push(edited);
            } else if clip.after_clip(t1) {
                let mut edited = clip.duplicate(true);
                edited.clear(t0, end)?;
                to_add.push(edited);
            } else {
                let mut left = clip.duplicate(false);
                left.clear(t0, end)?;
                let mut right = clip.duplicate(false);
                right.clear(start, t1)?;
                right.offset_by(t1 - start);
                to_add.push(left);
                to_add.push(right);
            }
        }

        for i in to_delete.into_iter().rev() {
            self.clips.remove(i);
        }
        if !split {
            for clip in &mut self.clips {
                if clip.before_clip(t1) {
                    clip.offset_by(-(t1 - t0));
                }
            }
        }
        self.clips.extend(to_add);
        Ok(())
    }

    /// Split the clip containing `t` into two at the sample nearest `t`
    pub fn split_at(&mut self, t: f64) -> CfResult<()> {
        let Some(i) = self.clips.iter().position(|clip| clip.within_clip(t)) else {
            return Ok(());
        };
        let t = self.long_samples_to_time(self.time_to_long_samples(t));
        let clip = &self.clips[i];
        let (start, end) = (clip.start_time(), clip.end_time());

        let mut right = clip.duplicate(true);
        right.clear(start, t)?;
        let here = SampleCount::from_time(t - start, self.rate as f64);
        right.offset_by(here.as_f64() / self.rate as f64);

        self.clips[i].clear(t, end)?;
        self.clips.push(right);
        log::debug!("[WaveTrack] Split clip {i} at {t:.6}s");
        Ok(())
    }

    pub fn split(&mut self, t0: f64, t1: f64) -> CfResult<()> {
        self.split_at(t0)?;
        if t0 != t1 {
            self.split_at(t1)?;
        }
        Ok(())
    }

    /// New track holding `[t0, t1)` shifted to start at 0
    ///
    /// For the clipboard, cut lines are left out and trailing empty space is
    /// kept as a placeholder clip so the copy spans the whole range.
    pub fn copy(&self, t0: f64, t1: f64, for_clipboard: bool) -> CfResult<WaveTrack> {
        if t1 < t0 {
            return Err(CfError::inconsistency(format!("copy range {t0}..{t1} is reversed")));
        }
        let mut copy = self.empty_copy();
        for clip in &self.clips {
            if t0 <= clip.start_time() && t1 >= clip.end_time() {
                let mut whole = clip.duplicate(!for_clipboard);
                whole.set_is_placeholder(false);
                whole.offset_by(-t0);
                copy.clips.push(whole);
            } else if t1 > clip.start_time() && t0 < clip.end_time() {
                let clip_t0 = t0.max(clip.start_time());
                let clip_t1 = t1.min(clip.end_time());
                let mut part = clip.copy_range(clip_t0, clip_t1, !for_clipboard)?;
                part.offset_by(-t0);
                if part.offset() < 0.0 {
                    part.set_offset(0.0);
                }
                copy.clips.push(part);
            }
        }

        let end = copy.end_time();
        if for_clipboard && end + 1.0 / (copy.rate as f64) < t1 - t0 {
            let mut placeholder = copy.new_clip();
            placeholder.set_is_placeholder(true);
            placeholder.insert_silence(0.0, (t1 - t0) - end, None)?;
            placeholder.offset_by(end);
            copy.clips.push(placeholder);
        }
        Ok(copy)
    }

    /// `copy` for the clipboard, then `clear`
    pub fn cut(&mut self, t0: f64, t1: f64) -> CfResult<WaveTrack> {
        let removed = self.copy(t0, t1, true)?;
        self.clear(t0, t1)?;
        Ok(removed)
    }

    /// A copy of `clip` that lives in this track's store, rate and format
    fn adopt_clip(&self, clip: &WaveClip) -> CfResult<WaveClip> {
        if same_store(clip.sequence().store(), &self.store)
            && clip.rate() == self.rate
            && clip.format() == self.format
        {
            return Ok(clip.duplicate(true));
        }
        let mut adopted = self.new_clip();
        adopted.paste(0.0, clip)?;
        adopted.set_offset(clip.offset());
        adopted.set_colour_index(clip.colour_index());
        Ok(adopted)
    }

    fn shift_clips_from(&mut self, t0: f64, by: f64, skip: Option<usize>) {
        let limit = t0 - 1.0 / self.rate as f64;
        for (i, clip) in self.clips.iter_mut().enumerate() {
            if Some(i) != skip && clip.start_time() > limit {
                clip.offset_by(by);
            }
        }
    }

    /// Insert the contents of `src` at `t0`, moving later clips right
    ///
    /// A single clip starting at 0 is spliced into the clip under `t0`, if
    /// any; otherwise `src`'s clips are added as new clips. Placeholder
    /// clips are not pasted.
    pub fn paste(&mut self, t0: f64, src: &WaveTrack) -> CfResult<()> {
        let insert_duration = src.end_time();
        if insert_duration != 0.0 && insert_duration < 1.0 / self.rate as f64 {
            return Ok(());
        }
        let single = src.clips.len() == 1 && src.start_time() == 0.0;

        if single {
            if let Some(i) = self.clips.iter().position(|clip| clip.within_clip(t0)) {
                self.clips[i].paste(t0, &src.clips[0])?;
                self.shift_clips_from(t0, insert_duration, Some(i));
                return Ok(());
            }
        }

        let incoming = src
            .clips
            .iter()
            .filter(|clip| !clip.is_placeholder())
            .map(|clip| self.adopt_clip(clip))
            .collect::<CfResult<Vec<_>>>()?;

        if !single && !self.is_empty(t0, self.end_time()) {
            self.split_at(t0)?;
        }
        self.shift_clips_from(t0, insert_duration, None);
        for mut clip in incoming {
            clip.offset_by(t0);
            clip.mark_changed();
            self.clips.push(clip);
        }
        Ok(())
    }

    /// Insert `len` seconds of silence at `t`, moving later clips right
    pub fn insert_silence(&mut self, t: f64, len: f64) -> CfResult<()> {
        if !(len > 0.0) {
            return Err(CfError::inconsistency(format!("silence length {len} is not positive")));
        }
        if self.clips.is_empty() {
            let mut clip = self.new_clip();
            clip.insert_silence(0.0, len, None)?;
            self.clips.push(clip);
            return Ok(());
        }
        if let Some(i) = self.clips.iter().position(|clip| clip.within_clip(t)) {
            self.clips[i].insert_silence(t, len, None)?;
        }
        for clip in &mut self.clips {
            if clip.before_clip(t) {
                clip.offset_by(len);
            }
        }
        Ok(())
    }

    /// Keep only `[t0, t1)`; later clips do not move
    pub fn trim(&mut self, t0: f64, t1: f64) -> CfResult<()> {
        let mut inside0 = false;
        let mut inside1 = false;
        for clip in &mut self.clips {
            if t1 > clip.start_time() && t1 < clip.end_time() {
                let end = clip.end_time();
                clip.clear(t1, end)?;
                inside1 = true;
            }
            if t0 > clip.start_time() && t0 < clip.end_time() {
                let start = clip.start_time();
                clip.clear(start, t0)?;
                clip.set_offset(t0);
                inside0 = true;
            }
        }
        if !inside1 && t1 < self.end_time() {
            self.split_delete(t1, self.end_time())?;
        }
        if !inside0 && t0 > self.start_time() {
            self.split_delete(self.start_time(), t0)?;
        }
        Ok(())
    }

    /// Run an edit made of several steps; the clips are put back if any
    /// step fails. Restored clips carry no listeners.
    fn transact(&mut self, edit: impl FnOnce(&mut Self) -> CfResult<()>) -> CfResult<()> {
        let backup: Vec<WaveClip> = self.clips.iter().map(|clip| clip.duplicate(true)).collect();
        let result = edit(self);
        if result.is_err() {
            self.clips = backup;
        }
        result
    }

    /// Merge the clip ending within `tolerance` of `t` into the clip that
    /// starts where it ends, if both exist
    fn merge_at(&mut self, t: f64, tolerance: f64) -> CfResult<()> {
        let pair = self.clips.iter().enumerate().find_map(|(first, left)| {
            if (left.end_time() - t).abs() >= tolerance {
                return None;
            }
            self.clips
                .iter()
                .enumerate()
                .find(|&(second, right)| second != first && left.shares_boundary_with_next_clip(right))
                .map(|(second, _)| (first, second))
        });
        match pair {
            Some((first, second)) => self.merge_clips(first, second),
            None => Ok(()),
        }
    }

    /// Replace `[t0, t1)` with the contents of `src`
    ///
    /// With `preserve`, clip boundaries and cut lines inside the range are
    /// put back afterwards, their positions scaled to the pasted length.
    /// With `merge`, pasted audio that lands against a neighbouring clip at
    /// a former clip boundary is joined to it. The track is unchanged on
    /// failure.
    pub fn clear_and_paste(
        &mut self,
        t0: f64,
        t1: f64,
        src: &WaveTrack,
        preserve: bool,
        merge: bool,
    ) -> CfResult<()> {
        if t1 < t0 {
            return Err(CfError::inconsistency(format!("replace range {t0}..{t1} is reversed")));
        }
        if t0 == t1 {
            return self.paste(t0, src);
        }
        if src.clips.is_empty() {
            return self.clear(t0, t1);
        }
        self.transact(|track| track.replace_range(t0, t1, src, preserve, merge))
    }

    fn replace_range(&mut self, t0: f64, t1: f64, src: &WaveTrack, preserve: bool, merge: bool) -> CfResult<()> {
        let rate = self.rate as f64;
        let snap = |t: f64| SampleCount::from_time(t, rate).as_f64() / rate;
        let (t0, t1) = (snap(t0), snap(t1));

        let mut splits: Vec<f64> = Vec::new();
        let mut cuts = Vec::new();
        for clip in &mut self.clips {
            for edge in [snap(clip.start_time()), snap(clip.end_time())] {
                if edge >= t0 && edge <= t1 && !splits.contains(&edge) {
                    splits.push(edge);
                }
            }
            cuts.extend(clip.take_cut_lines(t0, t1));
        }

        self.clear(t0, t1)?;
        self.paste(t0, src)?;

        let pasted_len = src.end_time();
        if merge && !splits.is_empty() {
            let tolerance = 2.0 / rate;
            self.merge_at(t0 + pasted_len, tolerance)?;
            self.merge_at(t0, tolerance)?;
        }

        if preserve {
            let warp = |t: f64| t0 + (t - t0) * pasted_len / (t1 - t0);
            for &split in &splits {
                self.split_at(warp(split))?;
            }
            for mut cut in cuts {
                let pos = warp(cut.offset());
                let home = self
                    .clips
                    .iter_mut()
                    .find(|clip| pos >= clip.start_time() && pos <= clip.end_time());
                if let Some(clip) = home {
                    cut.set_offset(pos);
                    clip.add_cut_line(cut);
                }
            }
        }
        log::debug!(
            "[WaveTrack] Replaced {t0:.6}s..{t1:.6}s with {pasted_len:.6}s ({} boundaries kept)",
            if preserve { splits.len() } else { 0 }
        );
        Ok(())
    }

    /// Merge the clips overlapping `[t0, t1]` into one, filling the gaps
    /// between them with silence
    pub fn join(&mut self, t0: f64, t1: f64) -> CfResult<()> {
        let sample = 1.0 / self.rate as f64;
        let chosen: Vec<usize> = self
            .sorted_clip_indices()
            .into_iter()
            .filter(|&i| {
                let clip = &self.clips[i];
                clip.start_time() < t1 - sample && clip.end_time() - sample > t0
            })
            .collect();
        let Some((&first, rest)) = chosen.split_first() else {
            return Ok(());
        };
        if rest.is_empty() {
            return Ok(());
        }

        let mut joined = self.clips[first].duplicate(true);
        for &i in rest {
            let clip = &self.clips[i];
            let t = joined.end_time();
            let gap = clip.offset() - t;
            if gap > sample {
                joined.insert_silence(t, gap, None)?;
            }
            joined.paste(joined.end_time(), clip)?;
        }

        let mut removed = chosen.clone();
        removed.sort_unstable();
        for &i in removed.iter().rev() {
            self.clips.remove(i);
        }
        log::info!(
            "[WaveTrack] Joined {} clips into one of {} samples",
            chosen.len(),
            joined.num_samples()
        );
        self.clips.push(joined);
        Ok(())
    }

    /// Split out every run of silence inside `[t0, t1]` that lasts at
    /// least the merge tolerance, leaving the audio around it in place
    pub fn disjoin(&mut self, t0: f64, t1: f64) -> CfResult<()> {
        const SCAN_CHUNK: usize = 1 << 20;
        let rate = self.rate as f64;
        let min_run = self.time_to_long_samples(self.config.merge_tolerance).as_i64().max(1);

        let mut regions = Vec::new();
        for clip in &self.clips {
            if clip.start_time() >= t1 || clip.end_time() <= t0 {
                continue;
            }
            let start = clip.time_to_samples_clip(t0.max(clip.start_time())).as_i64();
            let end = clip.time_to_samples_clip(t1.min(clip.end_time())).as_i64();
            let to_time = |s: i64| clip.start_time() + s as f64 / rate;

            let mut run_start: Option<i64> = None;
            let mut pos = start;
            while pos < end {
                let len = ((end - pos) as usize).min(SCAN_CHUNK);
                let buffer = clip.get_samples(SampleCount(pos), len)?;
                for (i, &value) in buffer.iter().enumerate() {
                    let at = pos + i as i64;
                    if value == 0.0 {
                        if run_start.is_none() {
                            run_start = Some(at);
                        }
                    } else if let Some(s) = run_start.take() {
                        if at - s >= min_run {
                            regions.push((to_time(s), to_time(at)));
                        }
                    }
                }
                pos += len as i64;
            }
            if let Some(s) = run_start {
                if end - s >= min_run {
                    regions.push((to_time(s), to_time(end)));
                }
            }
        }

        if regions.is_empty() {
            return Ok(());
        }
        log::debug!("[WaveTrack] Disjoining {} silent runs", regions.len());
        self.transact(|track| {
            for &(r0, r1) in &regions {
                track.split_delete(r0, r1)?;
            }
            Ok(())
        })
    }

    /// Follow a change of a linked selection's end from `old_t1` to
    /// `new_t1`
    ///
    /// Growth moves everything after `old_t1` right, inserting silence
    /// when `old_t1` falls inside a clip; shrinking deletes
    /// `[new_t1, old_t1)`.
    pub fn sync_lock_adjust(&mut self, old_t1: f64, new_t1: f64) -> CfResult<()> {
        if new_t1 > old_t1 {
            if old_t1 >= self.end_time() {
                return Ok(());
            }
            if self.is_empty(old_t1, old_t1) {
                let tail_end = self.end_time() + 1.0 / self.rate as f64;
                return self.transact(|track| {
                    let tail = track.cut(old_t1, tail_end)?;
                    track.paste(new_t1, &tail)
                });
            }
            let mut space = self.empty_copy();
            space.insert_silence(0.0, new_t1 - old_t1)?;
            self.paste(old_t1, &space)
        } else if new_t1 < old_t1 {
            self.clear(new_t1, old_t1)
        } else {
            Ok(())
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // CLIP PLACEMENT
    // ═══════════════════════════════════════════════════════════════════════

    fn overlaps_others(&self, index: usize, amount: f64) -> bool {
        let clip = &self.clips[index];
        self.clips.iter().enumerate().any(|(i, other)| {
            i != index
                && other.start_time() < clip.end_time() + amount
                && other.end_time() > clip.start_time() + amount
        })
    }

    /// Whether clip `index` may move by `amount`, and how far it may move
    ///
    /// When the move would overlap a neighbour the allowed amount stops at
    /// that neighbour's edge.
    pub fn can_offset_clip(&self, index: usize, amount: f64) -> CfResult<(bool, f64)> {
        let Some(clip) = self.clips.get(index) else {
            return Err(CfError::inconsistency(format!("no clip {index}")));
        };
        let mut allowed = amount;
        for (i, other) in self.clips.iter().enumerate() {
            if i == index
                || !(other.start_time() < clip.end_time() + amount
                    && other.end_time() > clip.start_time() + amount)
            {
                continue;
            }
            if amount > 0.0 {
                allowed = allowed.min(other.start_time() - clip.end_time()).max(0.0);
            } else {
                allowed = allowed.max(other.end_time() - clip.start_time()).min(0.0);
            }
        }
        if allowed == amount {
            return Ok((true, amount));
        }
        if self.overlaps_others(index, allowed) {
            return Ok((false, 0.0));
        }
        Ok((true, allowed))
    }

    /// Whether `clip` moved by `slide_by` fits between this track's clips,
    /// nudging it past overlaps smaller than the configured merge tolerance
    pub fn can_insert_clip(&self, clip: &WaveClip, slide_by: &mut f64) -> bool {
        let mut tolerance = self.config.merge_tolerance;
        self.can_insert_clip_within(clip, slide_by, &mut tolerance)
    }

    /// `can_insert_clip` with an explicit starting tolerance
    ///
    /// Overlaps smaller than `tolerance` are fixed by nudging `slide_by`;
    /// each nudge shrinks `tolerance` a thousandfold.
    pub fn can_insert_clip_within(&self, clip: &WaveClip, slide_by: &mut f64, tolerance: &mut f64) -> bool {
        for other in &self.clips {
            let d1 = other.start_time() - (clip.end_time() + *slide_by);
            let d2 = (clip.start_time() + *slide_by) - other.end_time();
            if d1 < 0.0 && d2 < 0.0 {
                if -d1 < *tolerance {
                    *slide_by += d1;
                    *tolerance /= 1000.0;
                } else if -d2 < *tolerance {
                    *slide_by -= d2;
                    *tolerance /= 1000.0;
                } else {
                    return false;
                }
            }
        }
        true
    }

    /// Append clip `second` to clip `first` and remove `second`
    ///
    /// The clips must share a boundary.
    pub fn merge_clips(&mut self, first: usize, second: usize) -> CfResult<()> {
        let len = self.clips.len();
        if first == second || first >= len || second >= len {
            return Err(CfError::inconsistency(format!("cannot merge clip {second} into {first}")));
        }
        if !self.clips[first].shares_boundary_with_next_clip(&self.clips[second]) {
            return Err(CfError::inconsistency(format!(
                "clips {first} and {second} are not adjacent"
            )));
        }

        let removed = self.clips.remove(second);
        let target = if second < first { first - 1 } else { first };
        let end = self.clips[target].end_time();
        if let Err(e) = self.clips[target].paste(end, &removed) {
            self.clips.insert(second, removed);
            return Err(e);
        }
        log::info!(
            "[WaveTrack] Merged clip {second} ({} samples) into clip {first}",
            removed.num_samples()
        );
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // CUT LINES
    // ═══════════════════════════════════════════════════════════════════════

    /// Restore the cut line at `pos`; clips to the right move over to make
    /// room. Returns the restored span.
    pub fn expand_cut_line(&mut self, pos: f64) -> CfResult<Option<(f64, f64)>> {
        let found = self
            .clips
            .iter()
            .enumerate()
            .find_map(|(i, clip)| clip.find_cut_line(pos).map(|span| (i, span)));
        let Some((index, (start, end))) = found else {
            return Ok(None);
        };

        self.clips[index].expand_cut_line(pos)?;
        let clip_start = self.clips[index].start_time();
        for (i, clip) in self.clips.iter_mut().enumerate() {
            if i != index && clip.start_time() > clip_start {
                clip.offset_by(end - start);
            }
        }
        Ok(Some((start, end)))
    }

    pub fn remove_cut_line(&mut self, pos: f64) -> bool {
        self.clips.iter_mut().any(|clip| clip.remove_cut_line(pos))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // RATE, FORMAT & LOCKING
    // ═══════════════════════════════════════════════════════════════════════

    /// Resample every clip to `rate`; on error no clip changes
    pub fn resample(&mut self, rate: u32, progress: &mut dyn ProgressReporter) -> CfResult<()> {
        if rate == 0 {
            return Err(CfError::InvalidParam("sample rate must be non-zero".into()));
        }
        let mut resampled = Vec::with_capacity(self.clips.len());
        for clip in &self.clips {
            resampled.push(clip.resampled_sequence(rate, &mut LinearResampler::new(), progress)?);
        }
        for (clip, sequence) in self.clips.iter_mut().zip(resampled) {
            if let Some(sequence) = sequence {
                clip.install_resampled(sequence, rate);
            }
        }
        log::info!("[WaveTrack] Resampled {} clips to {} Hz", self.clips.len(), rate);
        self.rate = rate;
        Ok(())
    }

    pub fn convert_to_sample_format(&mut self, format: SampleFormat) -> CfResult<()> {
        for clip in &mut self.clips {
            clip.convert_to_sample_format(format)?;
        }
        self.format = format;
        Ok(())
    }

    pub fn lock(&mut self) {
        for clip in &mut self.clips {
            clip.lock();
        }
    }

    pub fn unlock(&mut self) {
        for clip in &mut self.clips {
            clip.unlock();
        }
    }

    pub fn close_lock(&mut self) {
        for clip in &mut self.clips {
            clip.close_lock();
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // PERSISTENCE
    // ═══════════════════════════════════════════════════════════════════════

    /// Write `<wavetrack>`; placeholder clips are skipped
    pub fn write_xml(&self, w: &mut XmlWriter) -> CfResult<()> {
        w.start_tag("wavetrack");
        w.write_attr_i64("rate", self.rate as i64)?;
        w.write_attr("sampleformat", self.format.as_str())?;
        w.write_attr_f64("gain", self.group.gain as f64, GAIN_DIGITS)?;
        w.write_attr_f64("pan", self.group.pan as f64, GAIN_DIGITS)?;
        w.write_attr_i64("colorindex", self.colour_index as i64)?;
        for clip in self.clips.iter().filter(|clip| !clip.is_placeholder()) {
            clip.write_xml(w)?;
        }
        w.end_tag("wavetrack")
    }

    pub fn from_xml(
        element: &XmlElement,
        store: Arc<dyn SampleBlockStore>,
        config: Arc<EngineConfig>,
    ) -> CfResult<Self> {
        if element.name != "wavetrack" {
            return Err(CfError::Parse(format!(
                "expected <wavetrack>, found <{}>",
                element.name
            )));
        }

        let mut rate = config.default_rate;
        let mut format = config.default_format;
        let mut group = ChannelGroup::default();
        let mut colour_index = 0;
        for (name, value) in &element.attributes {
            match name.as_str() {
                "rate" => {
                    let r = parse_i64_attr(name, value)?;
                    rate = u32::try_from(r)
                        .ok()
                        .filter(|&r| r > 0)
                        .ok_or_else(|| CfError::Parse(format!("bad rate {r}")))?;
                }
                "sampleformat" => format = value.parse()?,
                "gain" => group.gain = parse_f64_attr(name, value)? as f32,
                "pan" => group.pan = (parse_f64_attr(name, value)? as f32).clamp(-1.0, 1.0),
                "colorindex" => {
                    let index = parse_i64_attr(name, value)?;
                    colour_index = i32::try_from(index)
                        .map_err(|_| CfError::Parse(format!("colorindex {index} out of range")))?;
                }
                _ => {}
            }
        }

        let mut track = WaveTrack::new(Arc::clone(&store), format, rate, Arc::clone(&config))?;
        track.group = Arc::new(group);
        track.colour_index = colour_index;
        for child in element.children_named("waveclip") {
            let clip = WaveClip::from_xml(child, Arc::clone(&store), rate, Arc::clone(&config))?;
            track.clips.push(clip);
        }
        if track.error_opening() {
            log::warn!("[WaveTrack] Some sample blocks were missing and were replaced by silence");
        }
        Ok(track)
    }
}
