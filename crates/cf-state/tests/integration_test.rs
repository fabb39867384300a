//! End-to-End Clip Editing Integration Tests
//!
//! Exercises the public API across all three crates:
//! - Append/flush chunking
//! - Time/sample conversion at clip boundaries
//! - Cut-line round trips, nesting and offset tracking
//! - Edits at offsets that fall between samples
//! - Clip adjacency
//! - Resampling and paste across rate/format changes
//! - Store failures during track edits
//! - Clipboard copies with trailing space

use std::sync::Arc;

use cf_core::{EngineConfig, NoProgress, ProgressResult, SampleCount, SampleFormat};
use cf_engine::{MemoryBlockStore, SampleBlockStore};
use cf_state::{WaveClip, WaveTrack};

// ═══════════════════════════════════════════════════════════════════════════════
// HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Small blocks so short test signals span many of them
fn config() -> Arc<EngineConfig> {
    Arc::new(EngineConfig {
        max_block_bytes: 64,
        resample_chunk_samples: 100,
        ..Default::default()
    })
}

fn store() -> Arc<MemoryBlockStore> {
    Arc::new(MemoryBlockStore::new(&config()))
}

fn clip(store: &Arc<MemoryBlockStore>, format: SampleFormat, rate: u32) -> WaveClip {
    WaveClip::new(store.clone(), format, rate, 0, config())
}

fn signal(n: usize) -> Vec<f32> {
    (0..n).map(|i| ((i * 37) % 101) as f32 / 101.0 - 0.5).collect()
}

fn contents(clip: &WaveClip) -> Vec<f32> {
    let len = clip.num_samples().to_usize().unwrap();
    clip.get_samples(SampleCount::ZERO, len).unwrap()
}

fn filled(store: &Arc<MemoryBlockStore>, samples: &[f32], rate: u32) -> WaveClip {
    let mut clip = clip(store, SampleFormat::Float32, rate);
    clip.append(samples).unwrap();
    clip.flush().unwrap();
    clip
}

// ═══════════════════════════════════════════════════════════════════════════════
// APPEND
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_chunked_append_matches_single_append() {
    let store = store();
    let samples = signal(1000);

    let whole = filled(&store, &samples, 44100);

    for chunk in [1, 3, 7, 16, 33] {
        let mut chunked = clip(&store, SampleFormat::Float32, 44100);
        for part in samples.chunks(chunk) {
            chunked.append(part).unwrap();
        }
        chunked.flush().unwrap();

        assert_eq!(chunked.num_samples(), whole.num_samples());
        assert_eq!(contents(&chunked), contents(&whole));
        assert_eq!(chunked.pending_len(), 0);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TIME CONVERSION
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_clip_edges_map_to_first_and_last_sample() {
    let store = store();
    for rate in [1, 7, 8000, 44100, 48000, 96000] {
        for offset in [0.0, 0.37, 12.5, 1234.567] {
            for len in [1, 10, 1001] {
                let mut clip = filled(&store, &signal(len), rate);
                clip.set_offset(offset);

                assert_eq!(clip.time_to_samples_clip(clip.start_time()), SampleCount::ZERO);
                assert_eq!(clip.time_to_samples_clip(clip.end_time()), clip.num_samples());
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CUT LINES
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_cut_line_expand_restores_content() {
    let store = store();
    let original = signal(100);

    for (t0, t1) in [(0.0, 1.0), (2.3, 5.0), (4.0, 4.1), (9.0, 10.0), (0.0, 10.0)] {
        let mut clip = filled(&store, &original, 10);
        clip.set_offset(3.0);

        clip.clear_and_add_cut_line(3.0 + t0, 3.0 + t1).unwrap();
        assert_eq!(clip.cut_lines().len(), 1);
        let pos = clip.offset() + clip.cut_lines()[0].offset();

        assert!(clip.expand_cut_line(pos).unwrap());
        assert!(clip.cut_lines().is_empty());
        assert_eq!(contents(&clip), original, "range {t0}..{t1}");
    }
}

#[test]
fn test_cut_line_moves_left_after_clear() {
    let store = store();
    let mut clip = filled(&store, &signal(100), 10);

    clip.clear_and_add_cut_line(6.0, 7.0).unwrap();
    assert!(clip.find_cut_line(6.0).is_some());

    clip.clear(2.0, 3.0).unwrap();

    assert!(clip.find_cut_line(6.0).is_none());
    let (start, end) = clip.find_cut_line(5.0).unwrap();
    assert!((start - 5.0).abs() < 1e-9);
    assert!((end - 6.0).abs() < 1e-9);
}

#[test]
fn test_cut_line_before_cleared_range_stays() {
    let store = store();
    let mut clip = filled(&store, &signal(100), 10);

    clip.clear_and_add_cut_line(2.0, 3.0).unwrap();
    clip.clear(5.0, 6.0).unwrap();

    assert!(clip.find_cut_line(2.0).is_some());
}

#[test]
fn test_nested_cut_lines_expand_in_order() {
    let store = store();
    let original = signal(100);

    // The inner cut line sits at 4.0. Positions match inclusively, so a
    // second cut starting or ending exactly there still carries it along.
    for (t0, t1) in [(3.0, 5.0), (4.0, 5.0), (3.0, 4.0)] {
        let mut clip = filled(&store, &original, 10);
        clip.clear_and_add_cut_line(4.0, 6.0).unwrap();
        clip.clear_and_add_cut_line(t0, t1).unwrap();

        assert_eq!(clip.cut_lines().len(), 1, "range {t0}..{t1}");
        assert_eq!(clip.cut_lines()[0].cut_lines().len(), 1);
        assert_eq!(clip.num_samples(), SampleCount(80 - ((t1 - t0) * 10.0) as i64));
        if t0 != 4.0 {
            assert!(clip.find_cut_line(4.0).is_none());
        }

        assert!(clip.expand_cut_line(t0).unwrap());
        let (start, end) = clip.find_cut_line(4.0).unwrap();
        assert!((start - 4.0).abs() < 1e-9);
        assert!((end - 6.0).abs() < 1e-9);
        assert_eq!(clip.num_samples(), SampleCount(80));

        assert!(clip.expand_cut_line(4.0).unwrap());
        assert!(clip.cut_lines().is_empty());
        assert_eq!(contents(&clip), original, "range {t0}..{t1}");
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// UNALIGNED OFFSETS
// ═══════════════════════════════════════════════════════════════════════════════

const ODD_OFFSET: f64 = 0.123456;

#[test]
fn test_clear_at_unaligned_offset_rounds_to_nearest_sample() {
    let store = store();
    let original = signal(2000);
    let mut clip = filled(&store, &original, 44100);
    clip.set_offset(ODD_OFFSET);

    // 5444.41 samples in: the clip starts on sample 5444
    assert_eq!(clip.start_sample(), SampleCount(5444));

    // 0.004 s and 0.0101 s into the clip are 176.4 and 445.41 samples;
    // both round down, so samples 176..445 go and sample 445 lands on 176
    let (t0, t1) = (ODD_OFFSET + 0.004, ODD_OFFSET + 0.0101);
    assert_eq!(clip.time_to_samples_clip(t0), SampleCount(176));
    assert_eq!(clip.time_to_samples_clip(t1), SampleCount(445));

    let removed = clip.copy_range(t0, t1, true).unwrap();
    assert_eq!(removed.num_samples(), SampleCount(269));
    clip.clear(t0, t1).unwrap();

    let expected = [&original[..176], &original[445..]].concat();
    assert_eq!(contents(&clip), expected);
    assert!((clip.offset() - ODD_OFFSET).abs() < 1e-12);

    clip.paste(t0, &removed).unwrap();
    assert_eq!(contents(&clip), original);
}

#[test]
fn test_track_cut_and_paste_at_unaligned_offset() {
    let store: Arc<dyn SampleBlockStore> = store();
    let mut track = WaveTrack::new(store, SampleFormat::Float32, 44100, config()).unwrap();
    let original = signal(2000);
    let clip = track.create_clip();
    clip.set_offset(ODD_OFFSET);
    clip.append(&original).unwrap();
    clip.flush().unwrap();

    let (t0, t1) = (ODD_OFFSET + 0.004, ODD_OFFSET + 0.0101);
    let clipboard = track.cut(t0, t1).unwrap();

    // The clipboard starts on its first sample, not at the unaligned t0
    assert_eq!(clipboard.num_clips(), 1);
    assert_eq!(clipboard.clips()[0].offset(), 0.0);
    assert_eq!(clipboard.clips()[0].num_samples(), SampleCount(269));

    let mut shortened = vec![0.0; 2000 - 269];
    track.get(SampleCount(5444), &mut shortened).unwrap();
    assert_eq!(shortened, [&original[..176], &original[445..]].concat());

    track.paste(t0, &clipboard).unwrap();
    assert_eq!(track.num_clips(), 1);
    let mut restored = vec![0.0; 2000];
    track.get(SampleCount(5444), &mut restored).unwrap();
    assert_eq!(restored, original);
}

// ═══════════════════════════════════════════════════════════════════════════════
// ADJACENCY
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_shared_boundary_within_half_a_sample() {
    let store = store();
    let rate = 44100;
    let first = filled(&store, &signal(1000), rate);

    for (shift, adjacent) in [(0.0, true), (0.3, true), (-0.4, true), (0.6, false), (-0.7, false)] {
        let mut next = filled(&store, &signal(10), rate);
        next.set_offset((1000.0 + shift) / rate as f64);
        assert_eq!(
            first.shares_boundary_with_next_clip(&next),
            adjacent,
            "shift {shift}"
        );
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RESAMPLING
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_cancelled_resample_leaves_clip_unchanged() {
    let store = store();
    let mut clip = clip(&store, SampleFormat::Int16, 44100);
    clip.append(&signal(1000)).unwrap();
    clip.flush().unwrap();
    let before = contents(&clip);
    let blocks_before = clip.sequence().block_count();

    let mut calls = 0;
    let mut cancel_midway = |_: u64, _: u64| {
        calls += 1;
        if calls == 3 {
            ProgressResult::Cancelled
        } else {
            ProgressResult::Success
        }
    };
    let err = clip.resample(48000, &mut cancel_midway).unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(clip.rate(), 44100);
    assert_eq!(clip.num_samples(), SampleCount(1000));
    assert_eq!(clip.sequence().block_count(), blocks_before);
    assert_eq!(contents(&clip), before);
}

#[test]
fn test_resample_progress_outcomes() {
    let store = store();
    let mut clip = filled(&store, &signal(500), 100);

    let mut stop = |_: u64, _: u64| ProgressResult::Stopped;
    assert!(clip.resample(200, &mut stop).unwrap_err().is_cancelled());

    let mut fail = |_: u64, _: u64| ProgressResult::Failed;
    let err = clip.resample(200, &mut fail).unwrap_err();
    assert!(err.is_user_visible());
    assert_eq!(err.to_string(), "Resampling failed.");
    assert_eq!(clip.rate(), 100);

    clip.resample(200, &mut NoProgress).unwrap();
    assert_eq!(clip.rate(), 200);
    assert_eq!(clip.num_samples(), SampleCount(1000));
}

#[test]
fn test_paste_across_rate_and_format() {
    let store = store();
    let src_len = 4410;
    let mut src = clip(&store, SampleFormat::Int16, 44100);
    src.append(&signal(src_len)).unwrap();
    src.flush().unwrap();
    let src_before = contents(&src);

    let mut dst = filled(&store, &[0.25; 100], 48000);
    dst.paste(dst.end_time(), &src).unwrap();

    let expected = (src_len as f64 * 48000.0 / 44100.0).round() as i64;
    let added = dst.num_samples().as_i64() - 100;
    assert!((added - expected).abs() <= 1, "added {added}, expected {expected}");
    assert_eq!(dst.rate(), 48000);
    assert_eq!(dst.format(), SampleFormat::Float32);

    assert_eq!(src.rate(), 44100);
    assert_eq!(src.format(), SampleFormat::Int16);
    assert_eq!(src.num_samples(), SampleCount(src_len as i64));
    assert_eq!(contents(&src), src_before);
}

// ═══════════════════════════════════════════════════════════════════════════════
// TRACKS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_failed_track_clear_changes_nothing() {
    let store = store();
    let dyn_store: Arc<dyn SampleBlockStore> = store.clone();
    let mut track = WaveTrack::new(dyn_store, SampleFormat::Float32, 10, config()).unwrap();
    track.append(&signal(40)).unwrap();
    track.flush().unwrap();
    let mut before = vec![0.0; 40];
    track.get(SampleCount::ZERO, &mut before).unwrap();

    store.fail_after(0);
    assert!(track.clear(0.5, 1.0).is_err());

    let mut after = vec![0.0; 40];
    track.get(SampleCount::ZERO, &mut after).unwrap();
    assert_eq!(after, before);
    assert_eq!(track.num_clips(), 1);
    assert!((track.end_time() - 4.0).abs() < 1e-9);

    store.clear_failure();
    track.clear(0.5, 1.0).unwrap();
    assert!((track.end_time() - 3.5).abs() < 1e-9);
}

#[test]
fn test_track_cut_and_paste_round_trip() {
    let store: Arc<dyn SampleBlockStore> = store();
    let mut track = WaveTrack::new(store, SampleFormat::Float32, 10, config()).unwrap();
    let original = signal(50);
    track.append(&original).unwrap();
    track.flush().unwrap();

    let clipboard = track.cut(1.0, 2.0).unwrap();
    assert!((track.end_time() - 4.0).abs() < 1e-9);

    track.paste(1.0, &clipboard).unwrap();
    let mut restored = vec![0.0; 50];
    track.get(SampleCount::ZERO, &mut restored).unwrap();
    assert_eq!(restored, original);
    assert_eq!(track.num_clips(), 1);
}

#[test]
fn test_clipboard_copy_spans_whole_range() {
    let store: Arc<dyn SampleBlockStore> = store();
    let mut track = WaveTrack::new(store, SampleFormat::Float32, 10, config()).unwrap();
    track.append(&signal(30)).unwrap();
    track.flush().unwrap();
    let clip = track.create_clip();
    clip.set_offset(4.0);
    clip.append(&signal(10)).unwrap();
    clip.flush().unwrap();

    // [0, 2) with a cut line at 1.4, then [3, 4)
    track.clear_and_add_cut_line(1.4, 2.4).unwrap();
    assert!((track.end_time() - 4.0).abs() < 1e-9);

    // Audio in the copy ends at 3.0; a placeholder pads it to t1 - t0
    let clipboard = track.copy(1.0, 6.0, true).unwrap();
    assert_eq!(clipboard.num_clips(), 3);
    assert!(clipboard.clips()[2].is_placeholder());
    assert!((clipboard.clips()[2].start_time() - 3.0).abs() < 1e-9);
    assert!((clipboard.end_time() - 5.0).abs() < 1e-9);
    assert!(clipboard.clips().iter().all(|clip| clip.cut_lines().is_empty()));

    // Within a sample of the audio end no placeholder is added
    let tight = track.copy(1.0, 4.05, true).unwrap();
    assert_eq!(tight.num_clips(), 2);
    assert!((tight.end_time() - 3.0).abs() < 1e-9);

    let plain = track.copy(1.0, 6.0, false).unwrap();
    assert_eq!(plain.num_clips(), 2);
    assert!(plain.clips().iter().any(|clip| clip.find_cut_line(0.4).is_some()));

    // The placeholder is never pasted
    track.paste(track.end_time(), &clipboard).unwrap();
    assert_eq!(track.num_clips(), 4);
    assert!(track.clips().iter().all(|clip| !clip.is_placeholder()));
    assert!((track.end_time() - 7.0).abs() < 1e-9);
}
