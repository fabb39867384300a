//! Envelope - piecewise control curve aligned to a clip's timeline
//!
//! Point times are relative to `offset`. Times never decrease; two points
//! may share a time to form a discontinuity (left limit first, then right
//! limit), never three.

use serde::{Deserialize, Serialize};

use cf_core::{CfError, CfResult, XmlElement, XmlWriter, parse_f64_attr, parse_i64_attr};

/// Values closer than this are treated as equal when pruning points
const VALUE_TOLERANCE: f64 = 0.001;

/// Significant digits for persisted times and values
const XML_DIGITS: usize = 12;

/// One control point
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnvPoint {
    /// Time relative to the envelope offset (seconds)
    pub t: f64,
    pub val: f64,
}

/// Gain automation curve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    points: Vec<EnvPoint>,
    offset: f64,
    track_len: f64,
    /// Interpolate in the log domain
    exponential: bool,
    min_value: f64,
    max_value: f64,
    default_value: f64,
}

impl Envelope {
    pub fn new(exponential: bool, min_value: f64, max_value: f64, default_value: f64) -> Self {
        Self {
            points: Vec::new(),
            offset: 0.0,
            track_len: 0.0,
            exponential,
            min_value,
            max_value,
            default_value: default_value.clamp(min_value, max_value),
        }
    }

    /// Copy of the part of `orig` between absolute times `t0` and `t1`
    ///
    /// Values at the cut edges are preserved by adding interpolated points.
    pub fn from_range(orig: &Envelope, t0: f64, t1: f64) -> Self {
        let mut env = Self::new(
            orig.exponential,
            orig.min_value,
            orig.max_value,
            orig.default_value,
        );
        env.offset = t0.max(orig.offset);
        env.track_len = (t1.min(orig.offset + orig.track_len) - env.offset).max(0.0);

        let begin = orig.equal_range(t0 - orig.offset, 0.0).0;
        let end = orig.equal_range(t1 - orig.offset, 0.0).1.max(begin);

        if begin > 0 {
            env.add_point_at_end(0.0, orig.value_at(env.offset));
        }
        for point in &orig.points[begin..end] {
            env.add_point_at_end(point.t + (orig.offset - env.offset), point.val);
        }
        if env.track_len > 0.0 && end < orig.points.len() {
            env.add_point_at_end(env.track_len, orig.value_at(env.offset + env.track_len));
        }
        env
    }

    // ═══════════════════════════════════════════════════════════════════════
    // ACCESSORS
    // ═══════════════════════════════════════════════════════════════════════

    pub fn points(&self) -> &[EnvPoint] {
        &self.points
    }

    #[inline]
    pub fn num_points(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn set_offset(&mut self, offset: f64) {
        self.offset = offset;
    }

    #[inline]
    pub fn track_len(&self) -> f64 {
        self.track_len
    }

    #[inline]
    pub fn default_value(&self) -> f64 {
        self.default_value
    }

    pub fn is_exponential(&self) -> bool {
        self.exponential
    }

    #[inline]
    fn clamp_value(&self, value: f64) -> f64 {
        value.clamp(self.min_value, self.max_value)
    }

    /// Remove all points and make the curve constant
    pub fn flatten(&mut self, value: f64) {
        self.points.clear();
        self.default_value = self.clamp_value(value);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // EVALUATION
    // ═══════════════════════════════════════════════════════════════════════

    /// Value at absolute time `t` (right-side limit at a discontinuity)
    pub fn value_at(&self, t: f64) -> f64 {
        self.value_relative(t - self.offset, false)
    }

    /// Fill `buffer` with values at `t0`, `t0 + dt`, ...
    pub fn values(&self, buffer: &mut [f64], t0: f64, dt: f64) {
        for (i, value) in buffer.iter_mut().enumerate() {
            *value = self.value_at(t0 + i as f64 * dt);
        }
    }

    fn value_relative(&self, t: f64, left_limit: bool) -> f64 {
        let pts = &self.points;
        if pts.is_empty() {
            return self.default_value;
        }
        let hi = if left_limit {
            pts.partition_point(|p| p.t < t)
        } else {
            pts.partition_point(|p| p.t <= t)
        };
        if hi == 0 {
            return pts[0].val;
        }
        if hi == pts.len() {
            return pts[hi - 1].val;
        }

        let (p0, p1) = (pts[hi - 1], pts[hi]);
        let frac = (t - p0.t) / (p1.t - p0.t);
        if self.exponential {
            let l0 = p0.val.max(self.min_value).ln();
            let l1 = p1.val.max(self.min_value).ln();
            (l0 + (l1 - l0) * frac).exp()
        } else {
            p0.val + (p1.val - p0.val) * frac
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // POINT EDITING
    // ═══════════════════════════════════════════════════════════════════════

    /// Indices `[first, after)` of points within `sample_dur / 2` of `when`
    fn equal_range(&self, when: f64, sample_dur: f64) -> (usize, usize) {
        let tolerance = sample_dur / 2.0;
        let first = self.points.partition_point(|p| p.t < when - tolerance);
        let mut after = first;
        while after < self.points.len() && self.points[after].t <= when + tolerance {
            after += 1;
        }
        (first, after)
    }

    fn insert_point(&mut self, index: usize, t: f64, val: f64) {
        let val = self.clamp_value(val);
        self.points.insert(index, EnvPoint { t, val });
    }

    /// Append a point; of three or more at one time only the outer two stay
    fn add_point_at_end(&mut self, t: f64, val: f64) {
        let val = self.clamp_value(val);
        self.points.push(EnvPoint { t, val });
        let mut n = self.points.len() - 1;
        while n >= 2 && self.points[n - 2].t == t {
            self.points.remove(n - 1);
            n -= 1;
        }
    }

    /// Set the value at absolute time `when`, adding a point if none is there
    ///
    /// At a discontinuity only the left limit changes. Returns the index.
    pub fn insert_or_replace(&mut self, when: f64, value: f64) -> usize {
        self.insert_or_replace_relative(when - self.offset, value)
    }

    fn insert_or_replace_relative(&mut self, when: f64, value: f64) -> usize {
        let when = when.min(self.track_len).max(0.0);
        let (first, after) = self.equal_range(when, 0.0);
        if first < after {
            self.points[first].val = self.clamp_value(value);
        } else {
            self.insert_point(first, when, value);
        }
        first
    }

    pub fn delete_point(&mut self, index: usize) -> Option<EnvPoint> {
        (index < self.points.len()).then(|| self.points.remove(index))
    }

    fn is_discontinuity(&self, index: usize) -> bool {
        let (a, b) = (&self.points[index], &self.points[index + 1]);
        a.t == b.t && (a.val - b.val).abs() > VALUE_TOLERANCE
    }

    /// Remove the point at `index` if the curve does not need it
    fn try_remove(&mut self, index: usize, left_limit: bool) -> bool {
        let point = self.points.remove(index);
        let without = self.value_relative(point.t, left_limit);
        if (point.val - without).abs() > VALUE_TOLERANCE {
            self.points.insert(index, point);
            false
        } else {
            true
        }
    }

    /// Prune a redundant point near an edit boundary
    ///
    /// `rightward` marks a point on the right side of the boundary. When the
    /// point itself must stay, its outer neighbour is tested instead.
    fn remove_unneeded_points(&mut self, index: usize, rightward: bool, test_neighbors: bool) {
        let len = self.points.len();
        if index >= len {
            return;
        }
        let when = self.points[index].t;
        let left_limit = !rightward && index + 1 < len && self.is_discontinuity(index);
        if self.try_remove(index, left_limit) || !test_neighbors {
            return;
        }

        if rightward {
            let mut next = index + 1;
            while next < len && self.points[next].t == when {
                next += 1;
            }
            if next < len && !(next + 1 < len && self.is_discontinuity(next)) {
                self.remove_unneeded_points(next, true, false);
            }
        } else if index > 0 {
            let mut prev = index - 1;
            while prev > 0 && self.points[prev].t == when {
                prev -= 1;
            }
            if self.points[prev].t != when && !(prev > 0 && self.is_discontinuity(prev - 1)) {
                self.remove_unneeded_points(prev, false, false);
            }
        }
    }

    /// Make sure a point sits at the end of the curve
    pub fn cap(&mut self, sample_dur: f64) {
        let (first, after) = self.equal_range(self.track_len, sample_dur);
        if first == after {
            let value = self.value_relative(self.track_len, false);
            self.insert_or_replace_relative(self.track_len, value);
        }
    }

    /// Change the length, keeping the left-side limit at the new end
    pub fn set_track_len(&mut self, track_len: f64, sample_dur: f64) {
        let (first, after) = self.equal_range(track_len, sample_dur);
        let need_point = first == after && track_len < self.track_len;
        let value = if need_point {
            self.value_relative(track_len, false)
        } else {
            0.0
        };

        self.track_len = track_len;
        // Of several points at the end keep only the first
        let new_len = (first + 1).min(after).min(self.points.len());
        self.points.truncate(new_len);

        if need_point {
            self.add_point_at_end(track_len, value);
        }
    }

    /// Stretch point times so the curve spans `new_length`
    pub fn rescale_times(&mut self, new_length: f64) {
        if self.track_len == 0.0 {
            for point in &mut self.points {
                point.t = 0.0;
            }
        } else {
            let ratio = new_length / self.track_len;
            for point in &mut self.points {
                point.t *= ratio;
            }
        }
        self.track_len = new_length;
    }

    // ═══════════════════════════════════════════════════════════════════════
    // REGION EDITS
    // ═══════════════════════════════════════════════════════════════════════

    /// Open a gap of `tlen` at relative time `t0`, holding the curve flat
    /// across it unless edge values are given
    ///
    /// Returns the index range of the inner limit points.
    fn expand_region(
        &mut self,
        t0: f64,
        tlen: f64,
        left_val: Option<f64>,
        right_val: Option<f64>,
    ) -> (usize, usize) {
        let val = self.value_relative(t0, false);
        let (first, after) = self.equal_range(t0, 0.0);

        // Left-side limit
        let mut index = first + 1;
        if index > after {
            self.insert_point(first, t0, val);
        }

        for point in &mut self.points[index..] {
            point.t += tlen;
        }
        self.track_len += tlen;

        // Right-side limit
        if index >= after {
            self.insert_point(index, t0 + tlen, val);
        }

        if let Some(left) = left_val {
            self.insert_point(index, t0, left);
            index += 1;
        }
        if let Some(right) = right_val {
            self.insert_point(index, t0 + tlen, right);
            index += 1;
        }
        (first + 1, index)
    }

    /// Insert `tlen` seconds of flat curve at absolute time `t0`
    pub fn insert_space(&mut self, t0: f64, tlen: f64) {
        let (first, after) = self.expand_region(t0 - self.offset, tlen, None, None);
        self.remove_unneeded_points(after, true, true);
        if first > 0 {
            self.remove_unneeded_points(first - 1, false, true);
        }
    }

    /// Remove absolute `[t0, t1)` and close the gap
    ///
    /// The left-side limit at `t0` and the right-side limit at `t1` are
    /// preserved, so a step may appear where the ends meet.
    pub fn collapse_region(&mut self, t0: f64, t1: f64, sample_dur: f64) {
        if t1 <= t0 {
            return;
        }
        let epsilon = sample_dur / 2.0;
        let t0 = (t0 - self.offset).min(self.track_len).max(0.0);
        let t1 = (t1 - self.offset).min(self.track_len).max(0.0);
        let mut left_point = true;
        let mut right_point = true;

        let (first0, after0) = self.equal_range(t0, 0.0);
        let mut begin = first0;
        if first0 == after0 {
            if t0 > epsilon {
                let value = self.value_relative(t0, false);
                self.insert_or_replace_relative(t0, value);
                begin += 1;
            } else {
                left_point = false;
            }
        } else {
            begin += 1;
        }

        let (first1, after1) = self.equal_range(t1, 0.0);
        let mut end = after1;
        if first1 == after1 {
            if self.track_len - t1 > epsilon {
                let value = self.value_relative(t1, false);
                self.insert_or_replace_relative(t1, value);
            } else {
                right_point = false;
            }
        } else {
            end -= 1;
        }

        if begin < end {
            self.points.drain(begin..end);
        }

        let removed = t1 - t0;
        for (i, point) in self.points.iter_mut().enumerate().skip(begin) {
            if right_point && i == begin {
                // Exactly equal times make a real discontinuity
                point.t = t0;
            } else {
                point.t -= removed;
            }
        }

        if right_point {
            self.remove_unneeded_points(begin, true, true);
        }
        if left_point && begin > 0 {
            self.remove_unneeded_points(begin - 1, false, true);
        }
        self.track_len -= removed;
    }

    /// Splice `other` in at absolute time `t0`, lengthening this curve by
    /// `other.track_len()`
    ///
    /// `other` is read on its own relative timeline; its offset is ignored.
    pub fn paste_envelope(&mut self, t0: f64, other: &Envelope, sample_dur: f64) {
        let other_dur = other.track_len;
        if other.points.is_empty() && self.points.is_empty() && other.default_value == self.default_value
        {
            self.track_len += other_dur;
            return;
        }

        let mut t0 = (t0 - self.offset).max(0.0).min(self.track_len);

        // Snap onto a discontinuity the insertion point rounds to
        let (first, after) = self.equal_range(t0, sample_dur);
        if first + 2 == after && self.points[first].t == self.points[first + 1].t {
            t0 = self.points[first].t;
        }

        let left_val = other.value_relative(0.0, false);
        let right_val = other.value_relative(other_dur, true);
        let (range_first, _) = self.expand_region(t0, other_dur, Some(left_val), Some(right_val));
        let insert_at = range_first + 1;

        // Edge points of `other` duplicate the limits just made
        let mut src = &other.points[..];
        if let Some(last) = src.last() {
            if last.t == other_dur {
                src = &src[..src.len() - 1];
            }
        }
        if let Some(first) = src.first() {
            if first.t == 0.0 {
                src = &src[1..];
            }
        }
        let count = src.len();
        let moved: Vec<EnvPoint> = src
            .iter()
            .map(|p| EnvPoint {
                t: p.t + t0,
                val: self.clamp_value(p.val),
            })
            .collect();
        self.points.splice(insert_at..insert_at, moved);

        self.remove_unneeded_points(insert_at + count + 1, true, true);
        self.remove_unneeded_points(insert_at + count, false, false);
        self.remove_unneeded_points(range_first, true, false);
        if range_first > 0 {
            self.remove_unneeded_points(range_first - 1, false, true);
        }
        self.consistency_check();
    }

    /// Repair ordering and triple coincidences; returns whether anything changed
    pub fn consistency_check(&mut self) -> bool {
        let mut changed = false;
        if self.points.windows(2).any(|w| w[1].t < w[0].t) {
            self.points.sort_by(|a, b| a.t.total_cmp(&b.t));
            changed = true;
        }
        let mut i = 2;
        while i < self.points.len() {
            if self.points[i].t == self.points[i - 2].t {
                self.points.remove(i - 1);
                changed = true;
            } else {
                i += 1;
            }
        }
        changed
    }

    // ═══════════════════════════════════════════════════════════════════════
    // PERSISTENCE
    // ═══════════════════════════════════════════════════════════════════════

    pub fn write_xml(&self, w: &mut XmlWriter) -> CfResult<()> {
        w.start_tag("envelope");
        w.write_attr_i64("numpoints", self.points.len() as i64)?;
        for point in &self.points {
            w.start_tag("controlpoint");
            w.write_attr_f64("t", point.t, XML_DIGITS)?;
            w.write_attr_f64("val", point.val, XML_DIGITS)?;
            w.end_tag("controlpoint")?;
        }
        w.end_tag("envelope")
    }

    /// Replace the points with those in `<envelope>`
    ///
    /// The track length is left alone; the owner sets it once its samples
    /// are known.
    pub fn read_xml(&mut self, element: &XmlElement) -> CfResult<()> {
        if element.name != "envelope" {
            return Err(CfError::Parse(format!(
                "expected <envelope>, found <{}>",
                element.name
            )));
        }
        if let Some(n) = element.attr("numpoints") {
            let n = parse_i64_attr("numpoints", n)?;
            if n < 0 {
                return Err(CfError::Parse(format!("negative numpoints {n}")));
            }
        }
        let mut points = Vec::new();
        for child in element.children_named("controlpoint") {
            let t = parse_f64_attr("t", child.required_attr("t")?)?;
            let val = parse_f64_attr("val", child.required_attr("val")?)?;
            points.push(EnvPoint {
                t,
                val: self.clamp_value(val),
            });
        }
        self.points = points;
        self.consistency_check();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn linear() -> Envelope {
        let mut env = Envelope::new(false, 0.0, 2.0, 1.0);
        env.track_len = 10.0;
        env
    }

    fn with_points(points: &[(f64, f64)]) -> Envelope {
        let mut env = linear();
        for &(t, v) in points {
            env.add_point_at_end(t, v);
        }
        env
    }

    #[test]
    fn test_empty_envelope_uses_default() {
        let env = Envelope::new(true, 1e-7, 2.0, 1.0);
        assert_eq!(env.value_at(3.0), 1.0);
        assert_eq!(env.num_points(), 0);
    }

    #[test]
    fn test_linear_interpolation_and_clamp() {
        let env = with_points(&[(2.0, 0.0), (4.0, 2.0)]);
        assert_eq!(env.value_at(0.0), 0.0);
        assert_eq!(env.value_at(3.0), 1.0);
        assert_eq!(env.value_at(9.0), 2.0);

        let mut env = linear();
        env.insert_or_replace(1.0, 5.0);
        assert_eq!(env.points()[0].val, 2.0);
    }

    #[test]
    fn test_exponential_interpolation() {
        let mut env = Envelope::new(true, 1e-7, 2.0, 1.0);
        env.track_len = 2.0;
        env.add_point_at_end(0.0, 0.25);
        env.add_point_at_end(2.0, 1.0);
        // Geometric mean halfway
        assert_relative_eq!(env.value_at(1.0), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_discontinuity_limits() {
        let env = with_points(&[(0.0, 0.5), (5.0, 0.5), (5.0, 1.5), (10.0, 1.5)]);
        assert_eq!(env.value_relative(5.0, true), 0.5);
        assert_eq!(env.value_relative(5.0, false), 1.5);
        assert_eq!(env.value_at(5.0), 1.5);
    }

    #[test]
    fn test_at_most_two_coincident_points() {
        let env = with_points(&[(1.0, 0.2), (1.0, 0.4), (1.0, 0.6)]);
        assert_eq!(env.num_points(), 2);
        assert_eq!(env.points()[0].val, 0.2);
        assert_eq!(env.points()[1].val, 0.6);
    }

    #[test]
    fn test_insert_or_replace() {
        let mut env = linear();
        env.set_offset(5.0);
        let idx = env.insert_or_replace(7.0, 0.5);
        assert_eq!(idx, 0);
        assert_eq!(env.points()[0].t, 2.0);
        env.insert_or_replace(7.0, 0.75);
        assert_eq!(env.num_points(), 1);
        assert_eq!(env.points()[0].val, 0.75);
        // Clamped to the track length
        env.insert_or_replace(100.0, 1.0);
        assert_eq!(env.points()[1].t, 10.0);
    }

    #[test]
    fn test_collapse_region_keeps_edge_values() {
        let mut env = with_points(&[(0.0, 0.0), (10.0, 2.0)]);
        env.collapse_region(2.0, 6.0, 0.001);
        assert_relative_eq!(env.track_len(), 6.0);
        // Left limit at the seam is the old value at 2, right limit the old value at 6
        assert_relative_eq!(env.value_relative(2.0, true), 0.4, epsilon = 1e-12);
        assert_relative_eq!(env.value_relative(2.0, false), 1.2, epsilon = 1e-12);
        assert_relative_eq!(env.value_at(6.0), 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_collapse_flat_region_prunes_points() {
        let mut env = with_points(&[(0.0, 0.5), (10.0, 0.5)]);
        env.collapse_region(3.0, 4.0, 0.001);
        assert_relative_eq!(env.track_len(), 9.0);
        assert!(env.num_points() <= 2);
        assert!(env.points().windows(2).all(|w| w[0].t <= w[1].t));
        assert_eq!(env.value_at(3.0), 0.5);
    }

    #[test]
    fn test_insert_space_shifts_points() {
        let mut env = with_points(&[(0.0, 0.0), (2.0, 1.0), (4.0, 0.0)]);
        env.insert_space(2.0, 3.0);
        assert_relative_eq!(env.track_len(), 13.0);
        // The peak is held flat across the gap
        assert_relative_eq!(env.value_at(2.0), 1.0);
        assert_relative_eq!(env.value_at(4.0), 1.0);
        assert_relative_eq!(env.value_at(5.0), 1.0);
        assert_relative_eq!(env.value_at(7.0), 0.0);
    }

    #[test]
    fn test_set_track_len_preserves_value_at_end() {
        let mut env = with_points(&[(0.0, 0.0), (10.0, 2.0)]);
        env.set_track_len(5.0, 0.001);
        assert_eq!(env.track_len(), 5.0);
        assert_eq!(env.num_points(), 2);
        assert_relative_eq!(env.points()[1].val, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_cap_adds_end_point() {
        let mut env = with_points(&[(0.0, 0.0), (4.0, 1.0)]);
        env.cap(0.001);
        assert_eq!(env.points().last().map(|p| p.t), Some(10.0));
        env.cap(0.001);
        assert_eq!(env.num_points(), 3);
    }

    #[test]
    fn test_rescale_times() {
        let mut env = with_points(&[(0.0, 0.0), (5.0, 1.0)]);
        env.rescale_times(20.0);
        assert_eq!(env.points()[1].t, 10.0);
        assert_eq!(env.track_len(), 20.0);
    }

    #[test]
    fn test_from_range_copies_edges() {
        let mut env = with_points(&[(0.0, 0.0), (10.0, 2.0)]);
        env.set_offset(1.0);
        let copy = Envelope::from_range(&env, 3.0, 7.0);
        assert_eq!(copy.offset(), 3.0);
        assert_eq!(copy.track_len(), 4.0);
        assert_relative_eq!(copy.value_at(3.0), 0.4, epsilon = 1e-12);
        assert_relative_eq!(copy.value_at(7.0), 1.2, epsilon = 1e-12);
    }

    #[test]
    fn test_paste_into_flat_envelope_only_lengthens() {
        let mut env = linear();
        let other = Envelope {
            track_len: 4.0,
            ..linear()
        };
        env.paste_envelope(3.0, &other, 0.001);
        assert_eq!(env.track_len(), 14.0);
        assert_eq!(env.num_points(), 0);
    }

    #[test]
    fn test_paste_envelope_inserts_shape() {
        let mut env = with_points(&[(0.0, 1.0), (10.0, 1.0)]);
        let mut other = Envelope::new(false, 0.0, 2.0, 1.0);
        other.track_len = 2.0;
        other.add_point_at_end(0.0, 0.0);
        other.add_point_at_end(2.0, 2.0);

        env.paste_envelope(4.0, &other, 0.001);
        assert_relative_eq!(env.track_len(), 12.0);
        assert_relative_eq!(env.value_at(2.0), 1.0, epsilon = 1e-9);
        assert_relative_eq!(env.value_at(5.0), 1.0, epsilon = 1e-9);
        assert_relative_eq!(env.value_relative(4.0, false), 0.0, epsilon = 1e-9);
        assert_relative_eq!(env.value_relative(6.0, true), 2.0, epsilon = 1e-9);
        assert_relative_eq!(env.value_at(8.0), 1.0, epsilon = 1e-9);
        assert!(env.points().windows(2).all(|w| w[0].t <= w[1].t));
    }

    #[test]
    fn test_xml_round_trip() {
        let mut env = with_points(&[(0.0, 0.25), (1.0 / 3.0, 1.5)]);
        let mut w = XmlWriter::new();
        env.write_xml(&mut w).unwrap();
        let root = cf_core::parse_document(&w.into_string().unwrap()).unwrap();

        let points = env.points().to_vec();
        env.flatten(1.0);
        env.read_xml(&root).unwrap();
        assert_eq!(env.num_points(), 2);
        assert_relative_eq!(env.points()[1].t, points[1].t, epsilon = 1e-11);
        assert_eq!(env.points()[0].val, 0.25);
    }

    #[test]
    fn test_xml_rejects_bad_values() {
        let root = cf_core::parse_document(
            r#"<envelope numpoints="1"><controlpoint t="abc" val="1"/></envelope>"#,
        )
        .unwrap();
        assert!(linear().read_xml(&root).is_err());
    }
}
