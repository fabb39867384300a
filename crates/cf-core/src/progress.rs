//! Progress reporting and cooperative cancellation
//!
//! Long-running operations (resampling) poll a reporter once per chunk.
//! The reporter's answer decides whether the operation continues.

/// Answer from a progress reporter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProgressResult {
    /// Keep going
    #[default]
    Success,
    /// User cancelled; roll back without reporting an error
    Cancelled,
    /// Something went wrong outside the engine; roll back and report
    Failed,
    /// User asked to stop early; treated like cancellation by the engine
    Stopped,
}

impl ProgressResult {
    #[inline]
    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

/// Progress/cancellation port
pub trait ProgressReporter {
    /// Called with `current` out of `total` units done
    fn update(&mut self, current: u64, total: u64) -> ProgressResult;
}

impl<F> ProgressReporter for F
where
    F: FnMut(u64, u64) -> ProgressResult,
{
    fn update(&mut self, current: u64, total: u64) -> ProgressResult {
        self(current, total)
    }
}

/// Reporter that never cancels
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn update(&mut self, _current: u64, _total: u64) -> ProgressResult {
        ProgressResult::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_reporter() {
        let mut calls = 0;
        let mut reporter = |current: u64, total: u64| {
            calls += 1;
            if current * 2 >= total {
                ProgressResult::Cancelled
            } else {
                ProgressResult::Success
            }
        };
        assert!(reporter.update(1, 10).is_success());
        assert_eq!(reporter.update(5, 10), ProgressResult::Cancelled);
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_no_progress_always_succeeds() {
        assert!(NoProgress.update(u64::MAX, 1).is_success());
    }
}
