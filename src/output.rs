#[cfg(feature = "cpal-output")]
pub mod cpal;
#[cfg(feature = "wav-output")]
pub mod wav;

// -------------------------------------------------------------------------------------------------

/// Real-time audio producer, pulled by output devices.
pub trait OutputSink: Send + 'static {
    /// Channel layout of the produced interleaved samples.
    fn channel_count(&self) -> usize;

    /// Fill the given interleaved buffer with the next samples. Returns the number of written
    /// samples, which is always the whole buffer: missing samples are silent.
    ///
    /// Called from real-time threads: implementations must not block or allocate.
    fn read(&mut self, output: &mut [f32]) -> usize;
}

// -------------------------------------------------------------------------------------------------

/// Controls a running audio output device, which pulls its audio from an [`OutputSink`].
pub trait OutputDevice {
    /// Actual device's output sample buffer channel count.
    fn channel_count(&self) -> usize;
    /// Actual device's output sample rate.
    fn sample_rate(&self) -> u32;
    /// Actual device's output playhead position in **frames**.
    fn frame_position(&self) -> u64;

    /// Get actual output volume.
    fn volume(&self) -> f32;
    /// Set a new output volume.
    fn set_volume(&mut self, volume: f32);

    /// Pause playback. Paused devices do not pull from their sink, so the sink's clock stops.
    fn pause(&mut self);
    /// Resume from paused playback.
    fn resume(&mut self);

    /// Release audio device.
    fn close(&mut self);
}
