//! WaveClip - one positioned run of audio on a track
//!
//! A clip pairs a `Sequence` (sample domain) with a gain `Envelope` and an
//! offset on the track timeline, and owns the cut lines left behind by
//! earlier deletions. All public positions are in seconds on the track
//! timeline unless a name says otherwise.
//!
//! ## Failure behaviour
//! - `append`/`flush`: a prefix may be committed; committed data is never lost
//! - `set_samples`, `paste`, `insert_silence`, `clear`, `expand_cut_line`,
//!   `resample`: the clip is unchanged on error
//! - `clear_and_add_cut_line`: cut lines inside the range may be lost on error

use std::fmt;
use std::sync::Arc;

use cf_core::{
    CfError, CfResult, EngineConfig, NoProgress, ProgressReporter, ProgressResult, Sample,
    SampleCount, SampleFormat, XmlElement, XmlWriter, limit_sample_buffer_size, parse_f64_attr,
    parse_i64_attr,
};
use cf_engine::{LinearResampler, Resampler, SampleBlockStore, Sequence};

use crate::envelope::Envelope;
use crate::listener::WaveClipListener;

/// Significant digits for `offset` in project files
const OFFSET_DIGITS: usize = 8;

/// Gain envelope every new clip starts with
fn clip_envelope() -> Envelope {
    Envelope::new(true, 1e-7, 2.0, 1.0)
}

// ═══════════════════════════════════════════════════════════════════════════════
// WAVE CLIP
// ═══════════════════════════════════════════════════════════════════════════════

pub struct WaveClip {
    offset: f64,
    rate: u32,
    sequence: Sequence,
    envelope: Envelope,
    /// Samples appended but not yet written to the sequence
    append_buffer: Vec<Sample>,
    /// Offsets are relative to this clip's offset
    cut_lines: Vec<WaveClip>,
    colour_index: i32,
    is_placeholder: bool,
    listeners: Vec<Arc<dyn WaveClipListener>>,
    config: Arc<EngineConfig>,
}

impl fmt::Debug for WaveClip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaveClip")
            .field("offset", &self.offset)
            .field("rate", &self.rate)
            .field("num_samples", &self.sequence.num_samples())
            .field("pending", &self.append_buffer.len())
            .field("format", &self.sequence.format())
            .field("cut_lines", &self.cut_lines)
            .field("colour_index", &self.colour_index)
            .field("is_placeholder", &self.is_placeholder)
            .finish()
    }
}

impl WaveClip {
    /// Empty clip at offset 0; `rate` must be non-zero
    pub fn new(
        store: Arc<dyn SampleBlockStore>,
        format: SampleFormat,
        rate: u32,
        colour_index: i32,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            offset: 0.0,
            rate,
            sequence: Sequence::new(store, format, &config),
            envelope: clip_envelope(),
            append_buffer: Vec::new(),
            cut_lines: Vec::new(),
            colour_index,
            is_placeholder: false,
            listeners: Vec::new(),
            config,
        }
    }

    /// Independent copy sharing immutable sample blocks
    ///
    /// Listeners are not copied.
    pub fn duplicate(&self, copy_cut_lines: bool) -> Self {
        Self {
            offset: self.offset,
            rate: self.rate,
            sequence: self.sequence.clone(),
            envelope: self.envelope.clone(),
            append_buffer: self.append_buffer.clone(),
            cut_lines: if copy_cut_lines {
                self.cut_lines.iter().map(|c| c.duplicate(true)).collect()
            } else {
                Vec::new()
            },
            colour_index: self.colour_index,
            is_placeholder: self.is_placeholder,
            listeners: Vec::new(),
            config: Arc::clone(&self.config),
        }
    }

    /// `duplicate` with the samples of the copy and of its cut lines
    /// living in `store`
    pub fn duplicate_into(
        &self,
        store: &Arc<dyn SampleBlockStore>,
        copy_cut_lines: bool,
    ) -> CfResult<Self> {
        let mut copy = self.duplicate(false);
        copy.sequence = self.sequence.copy_to_store(store)?;
        if copy_cut_lines {
            copy.cut_lines = self
                .cut_lines
                .iter()
                .map(|cut| cut.duplicate_into(store, true))
                .collect::<CfResult<_>>()?;
        }
        Ok(copy)
    }

    /// Copy of the part of this clip between `t0` and `t1`
    ///
    /// The copy starts at the time of its first sample. Cut lines inside
    /// `[t0, t1]` come along when `copy_cut_lines` is set.
    pub fn copy_range(&self, t0: f64, t1: f64, copy_cut_lines: bool) -> CfResult<Self> {
        let s0 = self.time_to_samples_clip(t0);
        let s1 = self.time_to_samples_clip(t1);
        let sequence = self.sequence.copy(s0, s1)?;

        let rate = self.rate_f64();
        let start = self.offset + s0.as_f64() / rate;
        let end = self.offset + s1.max(s0).as_f64() / rate;
        let mut envelope = Envelope::from_range(&self.envelope, start, end);
        envelope.set_offset(start);

        let mut cut_lines = Vec::new();
        if copy_cut_lines {
            for cut in &self.cut_lines {
                let pos = self.offset + cut.offset;
                if pos >= t0 && pos <= t1 {
                    let mut copy = cut.duplicate(true);
                    copy.set_offset(pos - start);
                    cut_lines.push(copy);
                }
            }
        }

        Ok(Self {
            offset: start,
            rate: self.rate,
            sequence,
            envelope,
            append_buffer: Vec::new(),
            cut_lines,
            colour_index: self.colour_index,
            is_placeholder: false,
            listeners: Vec::new(),
            config: Arc::clone(&self.config),
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // ACCESSORS
    // ═══════════════════════════════════════════════════════════════════════

    #[inline]
    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn set_offset(&mut self, offset: f64) {
        self.offset = offset;
        self.envelope.set_offset(offset);
    }

    pub fn offset_by(&mut self, delta: f64) {
        self.set_offset(self.offset + delta);
    }

    #[inline]
    pub fn rate(&self) -> u32 {
        self.rate
    }

    #[inline]
    fn rate_f64(&self) -> f64 {
        self.rate as f64
    }

    pub fn format(&self) -> SampleFormat {
        self.sequence.format()
    }

    pub fn sequence(&self) -> &Sequence {
        &self.sequence
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub fn envelope_mut(&mut self) -> &mut Envelope {
        &mut self.envelope
    }

    /// Flushed samples only
    #[inline]
    pub fn num_samples(&self) -> SampleCount {
        self.sequence.num_samples()
    }

    pub fn pending_len(&self) -> usize {
        self.append_buffer.len()
    }

    pub fn cut_lines(&self) -> &[WaveClip] {
        &self.cut_lines
    }

    pub fn colour_index(&self) -> i32 {
        self.colour_index
    }

    pub fn set_colour_index(&mut self, colour_index: i32) {
        self.colour_index = colour_index;
    }

    pub fn is_placeholder(&self) -> bool {
        self.is_placeholder
    }

    pub fn set_is_placeholder(&mut self, placeholder: bool) {
        self.is_placeholder = placeholder;
    }

    pub fn config(&self) -> &Arc<EngineConfig> {
        &self.config
    }

    /// True when loading found missing blocks here or in a cut line
    pub fn error_opening(&self) -> bool {
        self.sequence.error_opening() || self.cut_lines.iter().any(WaveClip::error_opening)
    }

    pub fn add_listener(&mut self, listener: Arc<dyn WaveClipListener>) {
        self.listeners.push(listener);
    }

    /// Tell listeners the samples or envelope changed
    pub fn mark_changed(&self) {
        for listener in &self.listeners {
            listener.mark_changed();
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // TIME / SAMPLE CONVERSION
    // ═══════════════════════════════════════════════════════════════════════

    #[inline]
    pub fn start_time(&self) -> f64 {
        self.offset
    }

    /// Includes samples still waiting in the append buffer
    pub fn end_time(&self) -> f64 {
        let total = self.num_samples().as_f64() + self.append_buffer.len() as f64;
        self.offset + total / self.rate_f64()
    }

    pub fn start_sample(&self) -> SampleCount {
        SampleCount::from_time(self.offset, self.rate_f64())
    }

    pub fn end_sample(&self) -> SampleCount {
        self.start_sample() + self.num_samples()
    }

    /// Clip-relative sample index of time `t`, clamped to `[0, num_samples]`
    pub fn time_to_samples_clip(&self, t: f64) -> SampleCount {
        let n = self.num_samples();
        if t < self.offset {
            SampleCount::ZERO
        } else if t > self.offset + n.as_f64() / self.rate_f64() {
            n
        } else {
            SampleCount::from_time(t - self.offset, self.rate_f64())
        }
    }

    #[inline]
    fn track_sample(&self, t: f64) -> SampleCount {
        SampleCount::from_time(t, self.rate_f64())
    }

    fn end_sample_with_pending(&self) -> SampleCount {
        self.end_sample() + SampleCount::from(self.append_buffer.len())
    }

    /// Strictly inside; the boundary samples are excluded
    pub fn within_clip(&self, t: f64) -> bool {
        let ts = self.track_sample(t);
        ts > self.start_sample() && ts < self.end_sample_with_pending()
    }

    pub fn before_clip(&self, t: f64) -> bool {
        self.track_sample(t) <= self.start_sample()
    }

    pub fn after_clip(&self, t: f64) -> bool {
        self.track_sample(t) >= self.end_sample_with_pending()
    }

    /// True when `next` starts within half a sample of this clip's end
    pub fn shares_boundary_with_next_clip(&self, next: &WaveClip) -> bool {
        let end = self.rate_f64() * self.offset + self.num_samples().as_f64();
        let next_start = next.rate_f64() * next.offset;
        (next_start - end).abs() < 0.5
    }

    // ═══════════════════════════════════════════════════════════════════════
    // SAMPLE ACCESS
    // ═══════════════════════════════════════════════════════════════════════

    /// Read flushed samples at clip-relative sample `start`
    pub fn get_samples(&self, start: SampleCount, len: usize) -> CfResult<Vec<Sample>> {
        self.sequence.get(start, len)
    }

    pub fn read_samples(&self, start: SampleCount, buffer: &mut [Sample]) -> CfResult<()> {
        self.sequence.read(start, buffer)
    }

    pub fn set_samples(&mut self, start: SampleCount, samples: &[Sample]) -> CfResult<()> {
        self.sequence.set_samples(start, samples)?;
        self.mark_changed();
        Ok(())
    }

    fn sample_range(&self, t0: f64, t1: f64) -> CfResult<Option<(SampleCount, usize)>> {
        if t0 > t1 {
            return Err(CfError::inconsistency(format!("range {t0}..{t1} is reversed")));
        }
        if t0 == t1 {
            return Ok(None);
        }
        let s0 = self.time_to_samples_clip(t0);
        let s1 = self.time_to_samples_clip(t1);
        Ok(Some((s0, (s1 - s0).to_usize()?)))
    }

    pub fn get_min_max(&self, t0: f64, t1: f64) -> CfResult<(f32, f32)> {
        match self.sample_range(t0, t1)? {
            Some((start, len)) => self.sequence.get_min_max(start, len),
            None => Ok((0.0, 0.0)),
        }
    }

    pub fn get_rms(&self, t0: f64, t1: f64) -> CfResult<f32> {
        match self.sample_range(t0, t1)? {
            Some((start, len)) => self.sequence.get_rms(start, len),
            None => Ok(0.0),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // APPEND
    // ═══════════════════════════════════════════════════════════════════════

    /// Stage `samples` and write out every full block
    ///
    /// On error the blocks already written stay in the clip and the unwritten
    /// rest stays pending.
    pub fn append(&mut self, samples: &[Sample]) -> CfResult<()> {
        let result = self.append_blocks(samples);
        self.update_envelope_track_len();
        self.mark_changed();
        if let Err(e) = &result {
            log::warn!(
                "[WaveClip] Append stopped after committing {} samples: {}",
                self.num_samples(),
                e
            );
        }
        result
    }

    fn append_blocks(&mut self, samples: &[Sample]) -> CfResult<()> {
        let format = self.sequence.format();
        let max_block = self.sequence.max_block_size();
        let mut block_size = self.sequence.ideal_append_len();
        let mut rest = samples;
        loop {
            if self.append_buffer.len() >= block_size {
                self.sequence.append(&self.append_buffer[..block_size])?;
                self.append_buffer.drain(..block_size);
                block_size = self.sequence.ideal_append_len();
            }
            if rest.is_empty() {
                return Ok(());
            }
            let room = max_block.saturating_sub(self.append_buffer.len());
            let (now, later) = rest.split_at(rest.len().min(room));
            self.append_buffer.extend(now.iter().map(|&s| format.quantize(s)));
            rest = later;
        }
    }

    /// Write out whatever is pending; the buffer is empty afterwards
    pub fn flush(&mut self) -> CfResult<()> {
        if self.append_buffer.is_empty() {
            return Ok(());
        }
        let result = self.sequence.append(&self.append_buffer);
        if let Err(e) = &result {
            log::warn!(
                "[WaveClip] Flush dropped {} pending samples: {}",
                self.append_buffer.len(),
                e
            );
        }
        self.append_buffer.clear();
        self.update_envelope_track_len();
        self.mark_changed();
        result
    }

    pub fn update_envelope_track_len(&mut self) {
        let rate = self.rate_f64();
        self.envelope
            .set_track_len(self.num_samples().as_f64() / rate, 1.0 / rate);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // EDITING
    // ═══════════════════════════════════════════════════════════════════════

    /// Splice all of `other` in at time `t0`
    ///
    /// `other` is converted to this clip's rate and format first when they
    /// differ; it is never modified.
    pub fn paste(&mut self, t0: f64, other: &WaveClip) -> CfResult<()> {
        let needs_resample = other.rate != self.rate;
        let needs_format = other.format() != self.format();

        let converted;
        let pasted = if needs_resample || needs_format {
            let mut copy = other.duplicate(true);
            if needs_resample {
                copy.resample(self.rate, &mut NoProgress)?;
            }
            if needs_format {
                copy.convert_to_sample_format(self.format())?;
            }
            converted = copy;
            &converted
        } else {
            other
        };

        let store = Arc::clone(self.sequence.store());
        let mut new_cut_lines = Vec::with_capacity(pasted.cut_lines.len());
        for cut in &pasted.cut_lines {
            let mut cut = cut.duplicate_into(&store, true)?;
            cut.offset_by(t0 - self.offset);
            new_cut_lines.push(cut);
        }

        let s0 = self.time_to_samples_clip(t0);
        self.sequence.paste(s0, &pasted.sequence)?;

        self.mark_changed();
        let rate = self.rate_f64();
        self.envelope
            .paste_envelope(s0.as_f64() / rate + self.offset, &pasted.envelope, 1.0 / rate);
        self.offset_cut_lines(t0, pasted.end_time() - pasted.start_time());
        self.cut_lines.append(&mut new_cut_lines);
        self.update_envelope_track_len();
        Ok(())
    }

    /// Insert `len` seconds of silence at `t`
    ///
    /// With `envelope_value` the envelope ramps across the new span to that
    /// value (used when extending a clip at its end); otherwise the curve
    /// is held flat across it.
    pub fn insert_silence(&mut self, t: f64, len: f64, envelope_value: Option<f64>) -> CfResult<()> {
        if !(len.is_finite() && len >= 0.0) {
            return Err(CfError::InvalidParam(format!("bad silence length {len}")));
        }
        let rate = self.rate_f64();
        let s0 = self.time_to_samples_clip(t);
        let slen = SampleCount::from_time(len, rate).to_usize()?;
        self.sequence.insert_silence(s0, slen)?;

        self.offset_cut_lines(t, len);
        let sample_dur = 1.0 / rate;
        match envelope_value {
            Some(value) => {
                let new_len = self.envelope.track_len() + len;
                self.envelope.cap(sample_dur);
                self.envelope.set_track_len(new_len, sample_dur);
                let end = self.envelope.offset() + new_len;
                self.envelope.insert_or_replace(end, value);
            }
            None => self.envelope.insert_space(t, len),
        }
        self.mark_changed();
        Ok(())
    }

    /// Extend the clip's end by `len` seconds of silence
    pub fn append_silence(&mut self, len: f64, envelope_value: f64) -> CfResult<()> {
        self.insert_silence(self.end_time(), len, Some(envelope_value))
    }

    /// Remove cut lines inside `[t0, t1]`; shift later ones left by the
    /// removed span
    fn clear_cut_lines(&mut self, t0: f64, t1: f64, shift: f64) {
        let offset = self.offset;
        self.cut_lines.retain_mut(|cut| {
            let pos = offset + cut.offset;
            if pos >= t0 && pos <= t1 {
                return false;
            }
            if pos >= t1 {
                cut.offset_by(shift);
            }
            true
        });
    }

    /// Delete `[t0, t1)` and close the gap
    pub fn clear(&mut self, t0: f64, t1: f64) -> CfResult<()> {
        if t0 > t1 {
            return Err(CfError::inconsistency(format!("clear range {t0}..{t1} is reversed")));
        }
        let clip_t0 = t0.max(self.start_time());
        let clip_t1 = t1.min(self.end_time());
        let s0 = self.time_to_samples_clip(t0);
        let s1 = self.time_to_samples_clip(t1);
        self.sequence.delete(s0, (s1 - s0).to_usize()?)?;

        self.clear_cut_lines(t0, t1, clip_t0 - clip_t1);
        self.envelope.collapse_region(t0, t1, 1.0 / self.rate_f64());
        if t0 < self.start_time() {
            self.offset_by(t0 - self.start_time());
        }
        self.mark_changed();
        Ok(())
    }

    /// Delete `[t0, t1)` and keep it as a cut line at `t0`
    pub fn clear_and_add_cut_line(&mut self, t0: f64, t1: f64) -> CfResult<()> {
        if t0 > t1 {
            return Err(CfError::inconsistency(format!("clear range {t0}..{t1} is reversed")));
        }
        if t0 > self.end_time() || t1 < self.start_time() {
            return Ok(());
        }
        let clip_t0 = t0.max(self.start_time());
        let clip_t1 = t1.min(self.end_time());

        let mut cut = self.copy_range(clip_t0, clip_t1, true)?;
        cut.set_offset(clip_t0 - self.offset);

        // From here on, cut lines inside the range are gone even if the
        // delete below fails
        self.clear_cut_lines(t0, t1, clip_t0 - clip_t1);

        let s0 = self.time_to_samples_clip(t0);
        let s1 = self.time_to_samples_clip(t1);
        self.sequence.delete(s0, (s1 - s0).to_usize()?)?;

        self.envelope.collapse_region(t0, t1, 1.0 / self.rate_f64());
        if t0 < self.start_time() {
            self.offset_by(t0 - self.start_time());
        }
        self.mark_changed();

        log::debug!(
            "[WaveClip] Added cut line of {} samples at {:.6}s",
            cut.num_samples(),
            clip_t0
        );
        self.cut_lines.push(cut);
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // CUT LINES
    // ═══════════════════════════════════════════════════════════════════════

    fn cut_line_index(&self, pos: f64) -> Option<usize> {
        let tolerance = self.config.cut_line_tolerance;
        self.cut_lines
            .iter()
            .position(|cut| (self.offset + cut.offset - pos).abs() < tolerance)
    }

    /// Absolute start and end of the cut line at `pos`
    pub fn find_cut_line(&self, pos: f64) -> Option<(f64, f64)> {
        self.cut_line_index(pos).map(|i| {
            let cut = &self.cut_lines[i];
            (self.offset + cut.start_time(), self.offset + cut.end_time())
        })
    }

    /// Paste the cut line at `pos` back in and drop it
    ///
    /// Returns `Ok(false)` when no cut line sits at `pos`.
    pub fn expand_cut_line(&mut self, pos: f64) -> CfResult<bool> {
        let Some(index) = self.cut_line_index(pos) else {
            return Ok(false);
        };
        let cut = self.cut_lines.remove(index);
        let at = self.offset + cut.offset;
        match self.paste(at, &cut) {
            Ok(()) => {
                log::debug!(
                    "[WaveClip] Expanded cut line of {} samples at {:.6}s",
                    cut.num_samples(),
                    at
                );
                Ok(true)
            }
            Err(e) => {
                self.cut_lines.insert(index, cut);
                Err(e)
            }
        }
    }

    /// Discard the cut line at `pos`; returns whether one was found
    pub fn remove_cut_line(&mut self, pos: f64) -> bool {
        match self.cut_line_index(pos) {
            Some(index) => {
                self.cut_lines.remove(index);
                true
            }
            None => false,
        }
    }

    /// Shift cut lines at or after `t0` by `len` seconds
    pub fn offset_cut_lines(&mut self, t0: f64, len: f64) {
        let offset = self.offset;
        for cut in &mut self.cut_lines {
            if offset + cut.offset >= t0 {
                cut.offset_by(len);
            }
        }
    }

    /// Detach the cut lines positioned inside `[t0, t1]`
    ///
    /// The returned clips carry absolute offsets.
    pub fn take_cut_lines(&mut self, t0: f64, t1: f64) -> Vec<WaveClip> {
        let offset = self.offset;
        let (mut taken, kept): (Vec<WaveClip>, Vec<WaveClip>) = std::mem::take(&mut self.cut_lines)
            .into_iter()
            .partition(|cut| {
                let pos = offset + cut.offset;
                pos >= t0 && pos <= t1
            });
        self.cut_lines = kept;
        for cut in &mut taken {
            cut.offset_by(offset);
        }
        taken
    }

    /// Attach `cut`, positioned by its absolute offset, as a cut line
    ///
    /// `cut` must use this clip's block store.
    pub fn add_cut_line(&mut self, mut cut: WaveClip) {
        cut.offset_by(-self.offset);
        self.cut_lines.push(cut);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // LOCKING
    // ═══════════════════════════════════════════════════════════════════════

    pub fn lock(&mut self) {
        self.sequence.lock();
        for cut in &mut self.cut_lines {
            cut.lock();
        }
    }

    pub fn unlock(&mut self) {
        self.sequence.unlock();
        for cut in &mut self.cut_lines {
            cut.unlock();
        }
    }

    /// Lock for good; used before the clip is closed
    pub fn close_lock(&mut self) {
        self.sequence.close_lock();
        for cut in &mut self.cut_lines {
            cut.close_lock();
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // RATE & FORMAT
    // ═══════════════════════════════════════════════════════════════════════

    /// Relabel the samples with a new rate without resampling
    pub fn set_rate(&mut self, rate: u32) {
        self.rate = rate;
        let new_len = self.num_samples().as_f64() / self.rate_f64();
        self.envelope.rescale_times(new_len);
        self.mark_changed();
    }

    /// Resample to `rate` with the linear resampler
    pub fn resample(&mut self, rate: u32, progress: &mut dyn ProgressReporter) -> CfResult<()> {
        self.resample_with(rate, &mut LinearResampler::new(), progress)
    }

    /// Resample to `rate`, replacing the sequence only when every chunk
    /// succeeded
    pub fn resample_with(
        &mut self,
        rate: u32,
        resampler: &mut dyn Resampler,
        progress: &mut dyn ProgressReporter,
    ) -> CfResult<()> {
        if let Some(sequence) = self.resampled_sequence(rate, resampler, progress)? {
            self.install_resampled(sequence, rate);
        }
        Ok(())
    }

    /// Build this clip's samples at `rate` without touching the clip
    ///
    /// `None` when the clip is already at `rate`.
    pub(crate) fn resampled_sequence(
        &self,
        rate: u32,
        resampler: &mut dyn Resampler,
        progress: &mut dyn ProgressReporter,
    ) -> CfResult<Option<Sequence>> {
        if rate == self.rate {
            return Ok(None);
        }
        if rate == 0 {
            return Err(CfError::InvalidParam("sample rate must be non-zero".into()));
        }
        if self.sequence.is_locked() {
            return Err(CfError::Locked);
        }
        if !self.append_buffer.is_empty() {
            return Err(CfError::inconsistency("resample with unflushed samples"));
        }

        let factor = rate as f64 / self.rate_f64();
        let chunk = self.config.resample_chunk_samples.max(1);
        let mut in_buf = vec![0.0; chunk];
        let mut out_buf = vec![0.0; (chunk as f64 * factor).ceil() as usize + 2];
        let total = self.num_samples();
        let mut new_sequence = self.sequence.empty_like();

        log::info!(
            "[WaveClip] Resampling {} samples from {} Hz to {} Hz",
            total,
            self.rate,
            rate
        );

        let failed = |reason: &dyn fmt::Display| {
            log::warn!("[WaveClip] Resampling failed: {reason}");
            CfError::UserVisible("Resampling failed.".into())
        };

        let mut pos = SampleCount::ZERO;
        let mut produced = 0;
        while pos < total || produced > 0 {
            let in_len = limit_sample_buffer_size(chunk, total - pos);
            let last = pos + SampleCount::from(in_len) == total;
            self.sequence.read(pos, &mut in_buf[..in_len])?;

            let (consumed, out_len) = resampler
                .process(factor, &in_buf[..in_len], last, &mut out_buf)
                .map_err(|e| failed(&e))?;
            if consumed == 0 && out_len == 0 && !last {
                return Err(failed(&"resampler made no progress"));
            }
            pos += SampleCount::from(consumed);
            produced = out_len;
            new_sequence.append(&out_buf[..out_len])?;

            match progress.update(pos.as_i64() as u64, total.as_i64() as u64) {
                ProgressResult::Success => {}
                ProgressResult::Cancelled | ProgressResult::Stopped => {
                    log::info!("[WaveClip] Resample cancelled");
                    return Err(CfError::Cancelled);
                }
                ProgressResult::Failed => return Err(failed(&"progress reported failure")),
            }
        }
        Ok(Some(new_sequence))
    }

    /// Swap in a sequence from `resampled_sequence`
    pub(crate) fn install_resampled(&mut self, sequence: Sequence, rate: u32) {
        self.sequence = sequence;
        self.rate = rate;
        self.update_envelope_track_len();
        for listener in &self.listeners {
            listener.invalidate();
        }
        log::info!(
            "[WaveClip] Resampled to {} samples at {} Hz",
            self.num_samples(),
            rate
        );
    }

    /// Rewrite samples (including pending ones) in `format`
    pub fn convert_to_sample_format(&mut self, format: SampleFormat) -> CfResult<()> {
        if self.sequence.convert_to_sample_format(format)? {
            for sample in &mut self.append_buffer {
                *sample = format.quantize(*sample);
            }
            self.mark_changed();
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // PERSISTENCE
    // ═══════════════════════════════════════════════════════════════════════

    /// Write `<waveclip>` with its sequence, envelope and cut lines
    ///
    /// Pending samples are not written; flush first.
    pub fn write_xml(&self, w: &mut XmlWriter) -> CfResult<()> {
        w.start_tag("waveclip");
        w.write_attr_f64("offset", self.offset, OFFSET_DIGITS)?;
        w.write_attr_i64("colorindex", self.colour_index as i64)?;
        self.sequence.write_xml(w)?;
        self.envelope.write_xml(w)?;
        for cut in &self.cut_lines {
            cut.write_xml(w)?;
        }
        w.end_tag("waveclip")
    }

    /// Rebuild a clip from `<waveclip>`
    ///
    /// Nested `<waveclip>` elements become cut lines, up to
    /// `config.max_cut_line_depth` levels.
    pub fn from_xml(
        element: &XmlElement,
        store: Arc<dyn SampleBlockStore>,
        rate: u32,
        config: Arc<EngineConfig>,
    ) -> CfResult<Self> {
        Self::from_xml_at_depth(element, &store, rate, &config, 0)
    }

    fn from_xml_at_depth(
        element: &XmlElement,
        store: &Arc<dyn SampleBlockStore>,
        rate: u32,
        config: &Arc<EngineConfig>,
        depth: usize,
    ) -> CfResult<Self> {
        if element.name != "waveclip" {
            return Err(CfError::Parse(format!(
                "expected <waveclip>, found <{}>",
                element.name
            )));
        }
        if depth > config.max_cut_line_depth {
            return Err(CfError::Parse(format!(
                "cut lines nested deeper than {}",
                config.max_cut_line_depth
            )));
        }

        let mut clip = WaveClip::new(
            Arc::clone(store),
            config.default_format,
            rate,
            0,
            Arc::clone(config),
        );
        for (name, value) in &element.attributes {
            match name.as_str() {
                "offset" => clip.set_offset(parse_f64_attr(name, value)?),
                "colorindex" => {
                    let index = parse_i64_attr(name, value)?;
                    clip.colour_index = i32::try_from(index)
                        .map_err(|_| CfError::Parse(format!("colorindex {index} out of range")))?;
                }
                _ => {}
            }
        }

        for child in &element.children {
            match child.name.as_str() {
                "sequence" => {
                    clip.sequence = Sequence::from_xml(child, Arc::clone(store), config)?;
                }
                "envelope" => clip.envelope.read_xml(child)?,
                "waveclip" => {
                    let cut = Self::from_xml_at_depth(child, store, rate, config, depth + 1)?;
                    clip.cut_lines.push(cut);
                }
                _ => {}
            }
        }

        clip.envelope.set_offset(clip.offset);
        clip.update_envelope_track_len();
        Ok(clip)
    }
}
