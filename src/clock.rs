use std::sync::atomic::{AtomicU64, Ordering};

use crate::utils::time::SampleTime;

// -------------------------------------------------------------------------------------------------

/// The authoritative absolute sample counter, shared between control rate scheduling and the
/// real-time audio callback.
///
/// There is exactly one writer: the output reader, which advances the clock once per callback
/// by the callback's frame count. Any thread may read a snapshot via [`DspClock::now`].
#[derive(Debug, Default)]
pub struct DspClock {
    current_sample: AtomicU64,
}

impl DspClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a clock which starts counting at the given sample time.
    pub fn starting_at(sample_time: SampleTime) -> Self {
        Self {
            current_sample: AtomicU64::new(sample_time),
        }
    }

    /// Current absolute sample time. The value may change concurrently right after reading.
    #[inline]
    pub fn now(&self) -> SampleTime {
        self.current_sample.load(Ordering::Acquire)
    }

    /// Advance the clock by the given number of frames. Must only be called by the audio
    /// callback side, after all voices got read for the callback.
    #[inline]
    pub(crate) fn advance(&self, frames: usize) {
        // single writer: a plain load/store pair is enough and never blocks
        let current = self.current_sample.load(Ordering::Relaxed);
        self.current_sample
            .store(current + frames as u64, Ordering::Release);
    }
}

// -------------------------------------------------------------------------------------------------
