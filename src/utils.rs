//! Small shared helpers: sample time conversions, ids, gain and vector math.

use std::sync::atomic::{AtomicUsize, Ordering};

pub mod time;
pub mod vector;

// -------------------------------------------------------------------------------------------------

const MINUS_INF_IN_DB: f32 = -200.0f32;

// -------------------------------------------------------------------------------------------------

/// Generates a unique usize number, by simply counting atomically upwards from 1.
pub(crate) fn unique_usize_id() -> usize {
    static ID_COUNTER: AtomicUsize = AtomicUsize::new(1);
    ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

// -------------------------------------------------------------------------------------------------

/// Convert a decibel value to a linear gain.
pub fn db_to_linear(value: f32) -> f32 {
    if value == 0.0f32 {
        return 1.0f32; // avoid rounding errors at exactly 0 dB
    } else if value > MINUS_INF_IN_DB {
        return 10.0f32.powf(value / 20.0);
    }
    0.0f32
}

// -------------------------------------------------------------------------------------------------
