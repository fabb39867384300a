//! Sequence - contiguous block-structured sample storage for one clip
//!
//! A sequence is an ordered list of blocks covering `[0, num_samples)`
//! without gaps. Blocks are immutable and shared between sequences, so
//! copy and paste move `Arc`s where block boundaries allow it.
//!
//! Every mutation builds the new block list first and commits it with a
//! single assignment: if the store fails part way, the sequence is left
//! exactly as it was.

use std::sync::Arc;

use cf_core::{
    CfError, CfResult, EngineConfig, Sample, SampleCount, SampleFormat, XmlElement, XmlWriter,
    parse_i64_attr,
};

use crate::block::{SampleBlock, Summary};
use crate::store::SampleBlockStore;

/// A block placed at a position in a sequence
#[derive(Debug, Clone)]
pub struct SeqBlock {
    pub block: Arc<SampleBlock>,
    pub start: SampleCount,
}

impl SeqBlock {
    #[inline]
    pub fn end(&self) -> i64 {
        self.start.0 + self.block.len() as i64
    }

    fn shifted(&self, by: i64) -> Self {
        Self {
            block: Arc::clone(&self.block),
            start: SampleCount(self.start.0 + by),
        }
    }
}

fn shifted_all(blocks: &[SeqBlock], by: i64) -> impl Iterator<Item = SeqBlock> + '_ {
    blocks.iter().map(move |b| b.shifted(by))
}

fn block_limits(max_block_bytes: usize, format: SampleFormat) -> (usize, usize) {
    let max = (max_block_bytes / format.bytes_per_sample()).max(2);
    (max, max / 2)
}

/// Block-structured sample storage
#[derive(Debug)]
pub struct Sequence {
    store: Arc<dyn SampleBlockStore>,
    format: SampleFormat,
    blocks: Vec<SeqBlock>,
    num_samples: SampleCount,
    max_block_bytes: usize,
    max_samples: usize,
    min_samples: usize,
    lock_count: usize,
    close_locked: bool,
    error_opening: bool,
}

impl Clone for Sequence {
    /// Shares every block; lock state is not copied
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            format: self.format,
            blocks: self.blocks.clone(),
            num_samples: self.num_samples,
            max_block_bytes: self.max_block_bytes,
            max_samples: self.max_samples,
            min_samples: self.min_samples,
            lock_count: 0,
            close_locked: false,
            error_opening: self.error_opening,
        }
    }
}

impl Sequence {
    pub fn new(store: Arc<dyn SampleBlockStore>, format: SampleFormat, config: &EngineConfig) -> Self {
        let (max_samples, min_samples) = block_limits(config.max_block_bytes, format);
        Self {
            store,
            format,
            blocks: Vec::new(),
            num_samples: SampleCount::ZERO,
            max_block_bytes: config.max_block_bytes,
            max_samples,
            min_samples,
            lock_count: 0,
            close_locked: false,
            error_opening: false,
        }
    }

    /// Empty sequence with the same store, format and block limits
    pub fn empty_like(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            format: self.format,
            blocks: Vec::new(),
            num_samples: SampleCount::ZERO,
            max_block_bytes: self.max_block_bytes,
            max_samples: self.max_samples,
            min_samples: self.min_samples,
            lock_count: 0,
            close_locked: false,
            error_opening: false,
        }
    }

    /// Copy whose blocks live in `store`
    ///
    /// Blocks are shared when `store` is already this sequence's store and
    /// rewritten into `store` otherwise.
    pub fn copy_to_store(&self, store: &Arc<dyn SampleBlockStore>) -> CfResult<Self> {
        if std::ptr::addr_eq(Arc::as_ptr(&self.store), Arc::as_ptr(store)) {
            return Ok(self.clone());
        }
        let mut dest = self.empty_like();
        dest.store = Arc::clone(store);
        dest.paste(SampleCount::ZERO, self)?;
        dest.error_opening = self.error_opening;
        Ok(dest)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // ACCESSORS
    // ═══════════════════════════════════════════════════════════════════════

    #[inline]
    pub fn store(&self) -> &Arc<dyn SampleBlockStore> {
        &self.store
    }

    #[inline]
    pub fn format(&self) -> SampleFormat {
        self.format
    }

    #[inline]
    pub fn num_samples(&self) -> SampleCount {
        self.num_samples
    }

    #[inline]
    pub fn max_block_size(&self) -> usize {
        self.max_samples
    }

    #[inline]
    pub fn min_block_size(&self) -> usize {
        self.min_samples
    }

    #[inline]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn blocks(&self) -> &[SeqBlock] {
        &self.blocks
    }

    /// True when loading found missing or inconsistent blocks
    pub fn error_opening(&self) -> bool {
        self.error_opening
    }

    /// Samples to hand to the next `append` so the tail block fills exactly
    pub fn ideal_append_len(&self) -> usize {
        match self.blocks.last() {
            Some(last) if last.block.len() < self.max_samples => {
                self.max_samples - last.block.len()
            }
            _ => self.max_samples,
        }
    }

    /// Start of the block containing sample `s`
    pub fn block_start(&self, s: SampleCount) -> CfResult<SampleCount> {
        if s.0 < 0 || s >= self.num_samples {
            return Err(CfError::inconsistency(format!(
                "sample {s} outside sequence of {}",
                self.num_samples
            )));
        }
        Ok(self.blocks[self.find_block(s.0)].start)
    }

    /// Largest read starting at `start` that stays within few blocks
    pub fn best_block_size(&self, start: SampleCount) -> usize {
        if start.0 < 0 || start >= self.num_samples {
            return self.max_samples;
        }
        let mut b = self.find_block(start.0);
        let mut result = (self.blocks[b].end() - start.0) as usize;
        while result < self.min_samples
            && b + 1 < self.blocks.len()
            && result + self.blocks[b + 1].block.len() <= self.max_samples
        {
            b += 1;
            result += self.blocks[b].block.len();
        }
        result
    }

    // ═══════════════════════════════════════════════════════════════════════
    // LOCKING
    // ═══════════════════════════════════════════════════════════════════════

    pub fn lock(&mut self) {
        self.lock_count += 1;
    }

    pub fn unlock(&mut self) {
        self.lock_count = self.lock_count.saturating_sub(1);
    }

    /// Lock for good; used when the owning project is closing
    pub fn close_lock(&mut self) {
        self.close_locked = true;
    }

    pub fn is_locked(&self) -> bool {
        self.lock_count > 0 || self.close_locked
    }

    fn check_unlocked(&self) -> CfResult<()> {
        if self.is_locked() {
            Err(CfError::Locked)
        } else {
            Ok(())
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // READ
    // ═══════════════════════════════════════════════════════════════════════

    /// Index of the block containing `pos`; `pos` must be in range
    fn find_block(&self, pos: i64) -> usize {
        self.blocks
            .partition_point(|b| b.start.0 <= pos)
            .saturating_sub(1)
    }

    fn check_range(&self, start: SampleCount, len: usize) -> CfResult<()> {
        if start.0 < 0 || start.0 + len as i64 > self.num_samples.0 {
            return Err(CfError::inconsistency(format!(
                "range {start}+{len} outside sequence of {}",
                self.num_samples
            )));
        }
        Ok(())
    }

    /// Fill `buffer` with samples starting at `start`
    pub fn read(&self, start: SampleCount, buffer: &mut [Sample]) -> CfResult<()> {
        self.check_range(start, buffer.len())?;
        if buffer.is_empty() {
            return Ok(());
        }
        let mut pos = start.0;
        let mut filled = 0;
        let mut b = self.find_block(pos);
        while filled < buffer.len() {
            let blk = &self.blocks[b];
            let local = (pos - blk.start.0) as usize;
            let n = (blk.block.len() - local).min(buffer.len() - filled);
            blk.block.read_into(local, &mut buffer[filled..filled + n]);
            filled += n;
            pos += n as i64;
            b += 1;
        }
        Ok(())
    }

    pub fn get(&self, start: SampleCount, len: usize) -> CfResult<Vec<Sample>> {
        let mut out = vec![0.0; len];
        self.read(start, &mut out)?;
        Ok(out)
    }

    /// Summary of `[start, start + len)` from cached block and tile summaries
    pub fn summarize(&self, start: SampleCount, len: usize) -> CfResult<Summary> {
        self.check_range(start, len)?;
        let mut summary = Summary::EMPTY;
        if len == 0 {
            return Ok(summary);
        }
        let end = start.0 + len as i64;
        let mut b = self.find_block(start.0);
        while b < self.blocks.len() && self.blocks[b].start.0 < end {
            let blk = &self.blocks[b];
            let lo = start.0.max(blk.start.0);
            let hi = end.min(blk.end());
            summary.merge(
                &blk.block
                    .summary_range((lo - blk.start.0) as usize, (hi - lo) as usize),
            );
            b += 1;
        }
        Ok(summary)
    }

    pub fn get_min_max(&self, start: SampleCount, len: usize) -> CfResult<(f32, f32)> {
        Ok(self.summarize(start, len)?.min_max())
    }

    pub fn get_rms(&self, start: SampleCount, len: usize) -> CfResult<f32> {
        Ok(self.summarize(start, len)?.rms())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // BLOCK BUILDING
    // ═══════════════════════════════════════════════════════════════════════

    /// Split `samples` into evenly sized new blocks starting at `start`
    fn blockify(&self, samples: &[Sample], start: i64) -> CfResult<Vec<SeqBlock>> {
        if samples.is_empty() {
            return Ok(Vec::new());
        }
        let count = samples.len().div_ceil(self.max_samples);
        let mut out = Vec::with_capacity(count);
        let mut offset = 0;
        for i in 0..count {
            let end = samples.len() * (i + 1) / count;
            let block = self.store.create_block(&samples[offset..end], self.format)?;
            out.push(SeqBlock {
                block,
                start: SampleCount(start + offset as i64),
            });
            offset = end;
        }
        Ok(out)
    }

    fn silent_blocks(&self, len: usize, start: i64) -> CfResult<Vec<SeqBlock>> {
        let mut out = Vec::with_capacity(len.div_ceil(self.max_samples));
        let mut pos = 0;
        while pos < len {
            let n = self.max_samples.min(len - pos);
            let block = self.store.create_silent(n, self.format)?;
            out.push(SeqBlock {
                block,
                start: SampleCount(start + pos as i64),
            });
            pos += n;
        }
        Ok(out)
    }

    fn same_store(&self, other: &Sequence) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.store), Arc::as_ptr(&other.store))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // MUTATION
    // ═══════════════════════════════════════════════════════════════════════

    /// Append samples at the end
    ///
    /// A short tail block is rewritten to absorb the first samples; the
    /// rest goes into full-size blocks.
    pub fn append(&mut self, samples: &[Sample]) -> CfResult<()> {
        self.check_unlocked()?;
        if samples.is_empty() {
            return Ok(());
        }

        let mut new_last = None;
        let mut consumed = 0;
        if let Some(last) = self.blocks.last() {
            if last.block.len() < self.min_samples {
                let take = (self.max_samples - last.block.len()).min(samples.len());
                let mut merged = last.block.samples();
                merged.extend_from_slice(&samples[..take]);
                let block = self.store.create_block(&merged, self.format)?;
                new_last = Some(SeqBlock {
                    block,
                    start: last.start,
                });
                consumed = take;
            }
        }

        let mut tail = Vec::new();
        let mut start = self.num_samples.0 + consumed as i64;
        while consumed < samples.len() {
            let n = self.max_samples.min(samples.len() - consumed);
            let block = self
                .store
                .create_block(&samples[consumed..consumed + n], self.format)?;
            tail.push(SeqBlock {
                block,
                start: SampleCount(start),
            });
            start += n as i64;
            consumed += n;
        }

        if let (Some(replacement), Some(last)) = (new_last, self.blocks.last_mut()) {
            *last = replacement;
        }
        self.blocks.extend(tail);
        self.num_samples += SampleCount::from(samples.len());
        Ok(())
    }

    /// Overwrite samples in place; the length is unchanged
    pub fn set_samples(&mut self, start: SampleCount, samples: &[Sample]) -> CfResult<()> {
        self.check_unlocked()?;
        self.check_range(start, samples.len())?;
        if samples.is_empty() {
            return Ok(());
        }

        let end = start.0 + samples.len() as i64;
        let mut replacements = Vec::new();
        let mut b = self.find_block(start.0);
        while b < self.blocks.len() && self.blocks[b].start.0 < end {
            let blk = &self.blocks[b];
            let lo = start.0.max(blk.start.0);
            let hi = end.min(blk.end());
            let src = &samples[(lo - start.0) as usize..(hi - start.0) as usize];
            let data = if lo == blk.start.0 && hi == blk.end() {
                src.to_vec()
            } else {
                let mut data = blk.block.samples();
                data[(lo - blk.start.0) as usize..(hi - blk.start.0) as usize]
                    .copy_from_slice(src);
                data
            };
            let block = self.store.create_block(&data, self.format)?;
            replacements.push((
                b,
                SeqBlock {
                    block,
                    start: blk.start,
                },
            ));
            b += 1;
        }

        for (index, replacement) in replacements {
            self.blocks[index] = replacement;
        }
        Ok(())
    }

    /// Remove `len` samples starting at `start`
    pub fn delete(&mut self, start: SampleCount, len: usize) -> CfResult<()> {
        self.check_unlocked()?;
        if len == 0 {
            return Ok(());
        }
        self.check_range(start, len)?;

        let end = start.0 + len as i64;
        let b0 = self.find_block(start.0);
        let b1 = self.find_block(end - 1);
        let left = &self.blocks[b0];
        let right = &self.blocks[b1];

        let mut new_blocks: Vec<SeqBlock> = self.blocks[..b0].to_vec();

        // What survives of the two edge blocks becomes new blocks
        let mut remnant = Vec::new();
        if start.0 > left.start.0 {
            remnant.extend(left.block.read(0, (start.0 - left.start.0) as usize));
        }
        if end < right.end() {
            let local = (end - right.start.0) as usize;
            remnant.extend(right.block.read(local, right.block.len() - local));
        }

        // Fold a short remnant into the previous block when it fits
        if !remnant.is_empty() && remnant.len() < self.min_samples {
            if let Some(prev) = new_blocks.last() {
                if prev.block.len() + remnant.len() <= self.max_samples {
                    let mut merged = prev.block.samples();
                    merged.extend_from_slice(&remnant);
                    remnant = merged;
                    new_blocks.pop();
                }
            }
        }

        let remnant_start = new_blocks.last().map_or(0, SeqBlock::end);
        new_blocks.extend(self.blockify(&remnant, remnant_start)?);
        new_blocks.extend(shifted_all(&self.blocks[b1 + 1..], -(len as i64)));

        self.blocks = new_blocks;
        self.num_samples -= SampleCount::from(len);
        Ok(())
    }

    /// Copy `[s0, s1)` into a new sequence, sharing fully covered blocks
    ///
    /// The range is clipped to the sequence; an empty range yields an
    /// empty sequence.
    pub fn copy(&self, s0: SampleCount, s1: SampleCount) -> CfResult<Sequence> {
        let mut dest = self.empty_like();
        let s0 = s0.max(SampleCount::ZERO);
        let s1 = s1.min(self.num_samples);
        if s0 >= s1 {
            return Ok(dest);
        }

        let b0 = self.find_block(s0.0);
        let b1 = self.find_block(s1.0 - 1);
        for blk in &self.blocks[b0..=b1] {
            let lo = s0.0.max(blk.start.0);
            let hi = s1.0.min(blk.end());
            let block = if lo == blk.start.0 && hi == blk.end() {
                Arc::clone(&blk.block)
            } else {
                let part = blk.block.read((lo - blk.start.0) as usize, (hi - lo) as usize);
                self.store.create_block(&part, self.format)?
            };
            dest.blocks.push(SeqBlock {
                block,
                start: SampleCount(lo - s0.0),
            });
        }
        dest.num_samples = s1 - s0;
        Ok(dest)
    }

    /// Splice all of `src` in at sample `s`
    ///
    /// Formats must match. Blocks of `src` are shared when both sequences
    /// use the same store; only the block split at `s` is rewritten.
    pub fn paste(&mut self, s: SampleCount, src: &Sequence) -> CfResult<()> {
        self.check_unlocked()?;
        if s.0 < 0 || s > self.num_samples {
            return Err(CfError::inconsistency(format!(
                "paste position {s} outside sequence of {}",
                self.num_samples
            )));
        }
        if src.format != self.format {
            return Err(CfError::inconsistency(format!(
                "cannot paste {} samples into a {} sequence",
                src.format, self.format
            )));
        }
        if src.num_samples.0 == 0 {
            return Ok(());
        }

        let src_blocks: Vec<SeqBlock> = if self.same_store(src) {
            src.blocks.clone()
        } else {
            let mut copied = Vec::with_capacity(src.blocks.len());
            for blk in &src.blocks {
                copied.push(SeqBlock {
                    block: self.store.create_block(&blk.block.samples(), self.format)?,
                    start: blk.start,
                });
            }
            copied
        };
        let added = src.num_samples.0;

        let mut new_blocks = Vec::with_capacity(self.blocks.len() + src_blocks.len() + 2);
        if s == self.num_samples {
            new_blocks.extend_from_slice(&self.blocks);
            new_blocks.extend(shifted_all(&src_blocks, s.0));
        } else {
            let b = self.find_block(s.0);
            let blk = &self.blocks[b];
            new_blocks.extend_from_slice(&self.blocks[..b]);
            if s == blk.start {
                new_blocks.extend(shifted_all(&src_blocks, s.0));
                new_blocks.push(blk.shifted(added));
            } else {
                let split = (s.0 - blk.start.0) as usize;
                let data = blk.block.samples();
                if blk.block.len() + added as usize <= self.max_samples {
                    let mut merged = data[..split].to_vec();
                    merged.extend(src.get(SampleCount::ZERO, added as usize)?);
                    merged.extend_from_slice(&data[split..]);
                    new_blocks.extend(self.blockify(&merged, blk.start.0)?);
                } else {
                    new_blocks.extend(self.blockify(&data[..split], blk.start.0)?);
                    new_blocks.extend(shifted_all(&src_blocks, s.0));
                    new_blocks.extend(self.blockify(&data[split..], s.0 + added)?);
                }
            }
            new_blocks.extend(shifted_all(&self.blocks[b + 1..], added));
        }

        self.blocks = new_blocks;
        self.num_samples += SampleCount(added);
        Ok(())
    }

    /// Insert `len` zero samples at `s`
    pub fn insert_silence(&mut self, s: SampleCount, len: usize) -> CfResult<()> {
        self.check_unlocked()?;
        if len == 0 {
            return Ok(());
        }
        let mut silence = self.empty_like();
        silence.blocks = self.silent_blocks(len, 0)?;
        silence.num_samples = SampleCount::from(len);
        self.paste(s, &silence)
    }

    /// Rewrite every block in `format`; returns whether anything changed
    pub fn convert_to_sample_format(&mut self, format: SampleFormat) -> CfResult<bool> {
        if format == self.format {
            return Ok(false);
        }
        self.check_unlocked()?;

        let (max_samples, min_samples) = block_limits(self.max_block_bytes, format);
        let mut new_blocks = Vec::new();
        let mut pending: Vec<Sample> = Vec::with_capacity(max_samples);
        let mut start = 0i64;
        for blk in &self.blocks {
            pending.extend(blk.block.samples());
            while pending.len() >= max_samples {
                let block = self.store.create_block(&pending[..max_samples], format)?;
                new_blocks.push(SeqBlock {
                    block,
                    start: SampleCount(start),
                });
                start += max_samples as i64;
                pending.drain(..max_samples);
            }
        }
        if !pending.is_empty() {
            let block = self.store.create_block(&pending, format)?;
            new_blocks.push(SeqBlock {
                block,
                start: SampleCount(start),
            });
        }

        log::info!(
            "[Sequence] Converted {} samples from {} to {}",
            self.num_samples,
            self.format,
            format
        );
        self.format = format;
        self.max_samples = max_samples;
        self.min_samples = min_samples;
        self.blocks = new_blocks;
        Ok(true)
    }

    /// Verify blocks are contiguous, non-empty, bounded and in one format
    pub fn check_consistency(&self) -> CfResult<()> {
        let mut pos = 0i64;
        for (i, blk) in self.blocks.iter().enumerate() {
            if blk.start.0 != pos {
                return Err(CfError::inconsistency(format!(
                    "block {i} starts at {} instead of {pos}",
                    blk.start
                )));
            }
            if blk.block.is_empty() || blk.block.len() > self.max_samples {
                return Err(CfError::inconsistency(format!(
                    "block {i} has bad length {}",
                    blk.block.len()
                )));
            }
            if blk.block.format() != self.format {
                return Err(CfError::inconsistency(format!("block {i} has format {}", blk.block.format())));
            }
            pos = blk.end();
        }
        if pos != self.num_samples.0 {
            return Err(CfError::inconsistency(format!(
                "blocks cover {pos} samples, expected {}",
                self.num_samples
            )));
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // PERSISTENCE
    // ═══════════════════════════════════════════════════════════════════════

    pub fn write_xml(&self, w: &mut XmlWriter) -> CfResult<()> {
        w.start_tag("sequence");
        w.write_attr_i64("maxsamples", self.max_samples as i64)?;
        w.write_attr("sampleformat", self.format.as_str())?;
        w.write_attr_i64("numsamples", self.num_samples.0)?;
        for blk in &self.blocks {
            w.start_tag("waveblock");
            w.write_attr_i64("start", blk.start.0)?;
            w.write_attr_i64("id", blk.block.id() as i64)?;
            w.write_attr_i64("len", blk.block.len() as i64)?;
            w.end_tag("waveblock")?;
        }
        w.end_tag("sequence")
    }

    /// Rebuild a sequence from `<sequence>`, resolving block ids in `store`
    ///
    /// Unknown ids become silence of the recorded length and the sequence
    /// is flagged with `error_opening`.
    pub fn from_xml(
        element: &XmlElement,
        store: Arc<dyn SampleBlockStore>,
        config: &EngineConfig,
    ) -> CfResult<Self> {
        if element.name != "sequence" {
            return Err(CfError::Parse(format!(
                "expected <sequence>, found <{}>",
                element.name
            )));
        }
        let format: SampleFormat = element.required_attr("sampleformat")?.parse()?;
        let declared = parse_i64_attr("numsamples", element.required_attr("numsamples")?)?;

        let mut seq = Sequence::new(store, format, config);
        let mut pos = 0i64;
        for child in element.children_named("waveblock") {
            let len = parse_i64_attr("len", child.required_attr("len")?)?;
            let id = parse_i64_attr("id", child.required_attr("id")?)?;
            if len <= 0 || id < 0 {
                return Err(CfError::Parse(format!("bad waveblock id {id} len {len}")));
            }
            if let Some(start) = child.attr("start") {
                if parse_i64_attr("start", start)? != pos {
                    log::warn!("[Sequence] Block {id} start {start} does not match {pos}");
                    seq.error_opening = true;
                }
            }

            let placed = match seq.store.find_block(id as u64) {
                Some(block) => {
                    if block.len() as i64 != len {
                        log::warn!(
                            "[Sequence] Block {id} holds {} samples, file says {len}",
                            block.len()
                        );
                        seq.error_opening = true;
                    }
                    if block.format() != format || block.len() > seq.max_samples {
                        seq.blockify(&block.samples(), pos)?
                    } else {
                        vec![SeqBlock {
                            block,
                            start: SampleCount(pos),
                        }]
                    }
                }
                None => {
                    log::warn!("[Sequence] Missing block {id}; substituting {len} samples of silence");
                    seq.error_opening = true;
                    seq.silent_blocks(len as usize, pos)?
                }
            };
            pos = placed.last().map_or(pos, SeqBlock::end);
            seq.blocks.extend(placed);
        }

        seq.num_samples = SampleCount(pos);
        if declared != pos {
            log::warn!("[Sequence] numsamples {declared} does not match blocks ({pos})");
            seq.error_opening = true;
        }
        Ok(seq)
    }
}
