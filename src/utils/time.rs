// -------------------------------------------------------------------------------------------------

/// Absolute time in sample frames, as counted by the [`DspClock`](crate::DspClock).
pub type SampleTime = u64;

// -------------------------------------------------------------------------------------------------

/// Convert a duration in milliseconds to a (possibly negative or zero) number of sample frames.
///
/// Non finite durations convert to 0.
pub fn ms_to_samples(ms: f32, sample_rate: u32) -> i64 {
    debug_assert!(sample_rate > 0, "Invalid sample rate");
    if !ms.is_finite() {
        return 0;
    }
    (ms as f64 * sample_rate as f64 / 1000.0).round() as i64
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions() {
        assert_eq!(ms_to_samples(20.0, 44100), 882);
        assert_eq!(ms_to_samples(0.0, 44100), 0);
        assert_eq!(ms_to_samples(-10.0, 44100), -441);
        assert_eq!(ms_to_samples(f32::NAN, 44100), 0);
        assert_eq!(ms_to_samples(5.0, 44100), 221);
    }
}
