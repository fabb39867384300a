//! Change notifications from clips to attached caches

/// Receives notifications from a `WaveClip`
///
/// Implementations must not call back into the clip.
pub trait WaveClipListener: Send + Sync {
    /// The clip's samples or envelope changed
    fn mark_changed(&self);

    /// The clip was resampled; anything keyed by sample position is stale
    fn invalidate(&self);
}

#[cfg(test)]
pub(crate) mod testing {
    use super::WaveClipListener;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Listener that counts notifications
    #[derive(Debug, Default)]
    pub struct CountingListener {
        changed: AtomicUsize,
        invalidated: AtomicUsize,
    }

    impl CountingListener {
        pub fn changed(&self) -> usize {
            self.changed.load(Ordering::Relaxed)
        }

        pub fn invalidated(&self) -> usize {
            self.invalidated.load(Ordering::Relaxed)
        }
    }

    impl WaveClipListener for CountingListener {
        fn mark_changed(&self) {
            self.changed.fetch_add(1, Ordering::Relaxed);
        }

        fn invalidate(&self) {
            self.invalidated.fetch_add(1, Ordering::Relaxed);
        }
    }
}
