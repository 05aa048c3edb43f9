//! Per-voice ring buffer mixing: the only state shared between the control thread and the
//! real-time audio callback.

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use crate::{
    clock::DspClock, emitter::EmitterId, grain::GrainRender, output::OutputSink,
    utils::time::SampleTime, Error,
};

// -------------------------------------------------------------------------------------------------

pub(crate) mod ring;

use ring::{RingWrite, VoiceRingBuffer};

// -------------------------------------------------------------------------------------------------

/// A snapshot of the mixer's diagnostic counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MixerStats {
    /// Grains which got written into a voice ring, including truncated ones.
    pub scheduled_grains: u64,
    /// Grains which got dropped because they started before the voice's read cursor.
    pub late_grains: u64,
    /// Grains which ran past the ring buffer capacity and got cut.
    pub truncated_grains: u64,
    /// Output frames which got read past the last scheduled sample of all voices.
    pub underrun_frames: u64,
}

#[derive(Debug, Default)]
struct MixerCounters {
    scheduled_grains: AtomicU64,
    late_grains: AtomicU64,
    truncated_grains: AtomicU64,
    underrun_frames: AtomicU64,
}

impl MixerCounters {
    fn snapshot(&self) -> MixerStats {
        MixerStats {
            scheduled_grains: self.scheduled_grains.load(Ordering::Relaxed),
            late_grains: self.late_grains.load(Ordering::Relaxed),
            truncated_grains: self.truncated_grains.load(Ordering::Relaxed),
            underrun_frames: self.underrun_frames.load(Ordering::Relaxed),
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Control side of the mixer: schedules rendered grains into the voice ring buffers.
///
/// Created together with its real-time counterpart, the [`MixerOutput`], via [`Mixer::new`].
pub struct Mixer {
    rings: Arc<[VoiceRingBuffer]>,
    counters: Arc<MixerCounters>,
    clock: Arc<DspClock>,
}

impl Mixer {
    /// Create a new mixer with `voice_count` rings of `capacity` samples each, and the output
    /// reader which drains them into `channel_count` interleaved channels and drives the clock.
    pub fn new(
        clock: Arc<DspClock>,
        voice_count: usize,
        capacity: usize,
        channel_count: usize,
    ) -> Result<(Self, MixerOutput), Error> {
        if voice_count == 0 {
            return Err(Error::ParameterError(
                "Mixer needs at least one voice".to_string(),
            ));
        }
        if capacity == 0 {
            return Err(Error::ParameterError(
                "Mixer ring buffer capacity must be > 0".to_string(),
            ));
        }
        if channel_count == 0 {
            return Err(Error::ParameterError(
                "Mixer channel count must be > 0".to_string(),
            ));
        }
        let now = clock.now();
        let rings: Arc<[VoiceRingBuffer]> = (0..voice_count)
            .map(|voice_index| VoiceRingBuffer::new(voice_index, capacity, now))
            .collect();
        let counters = Arc::new(MixerCounters::default());
        let output = MixerOutput {
            rings: Arc::clone(&rings),
            counters: Arc::clone(&counters),
            clock: Arc::clone(&clock),
            channel_count,
            mix_buffer: vec![0.0; MixerOutput::MAX_MIX_BUFFER_FRAMES],
        };
        let mixer = Self {
            rings,
            counters,
            clock,
        };
        Ok((mixer, output))
    }

    pub fn voice_count(&self) -> usize {
        self.rings.len()
    }

    /// Ring buffer capacity of each voice in samples.
    pub fn capacity(&self) -> usize {
        self.rings.first().map(|ring| ring.capacity()).unwrap_or(0)
    }

    pub fn clock(&self) -> &Arc<DspClock> {
        &self.clock
    }

    /// Absolute sample time up to which the given voice got read.
    pub fn read_position(&self, voice_index: usize) -> Result<SampleTime, Error> {
        self.ring(voice_index).map(|ring| ring.read_position())
    }

    /// Absolute sample time right after the last sample that got written into the given voice.
    pub fn write_position(&self, voice_index: usize) -> Result<SampleTime, Error> {
        self.ring(voice_index).map(|ring| ring.write_position())
    }

    pub fn stats(&self) -> MixerStats {
        self.counters.snapshot()
    }

    /// Overlap-add samples into a voice at the given absolute start sample.
    ///
    /// Late writes are rejected with `Error::LateGrain`. Writes which run too far ahead of the
    /// reader get truncated. Both cases are logged and counted in the [`MixerStats`].
    pub fn schedule(
        &self,
        voice_index: usize,
        start_sample: SampleTime,
        samples: &[f32],
    ) -> Result<(), Error> {
        self.write(voice_index, start_sample, samples, None)
    }

    /// Schedule a rendered grain into its target voice.
    pub fn schedule_grain(&self, render: &GrainRender) -> Result<(), Error> {
        debug_assert!(render.grain.is_populated(), "Scheduling an unrendered grain");
        self.write(
            render.grain.target_voice,
            render.grain.start_sample,
            &render.buffer,
            Some(render.grain.emitter_id),
        )
    }

    fn ring(&self, voice_index: usize) -> Result<&VoiceRingBuffer, Error> {
        self.rings
            .get(voice_index)
            .ok_or(Error::VoiceNotFound(voice_index))
    }

    fn write(
        &self,
        voice_index: usize,
        start_sample: SampleTime,
        samples: &[f32],
        emitter_id: Option<EmitterId>,
    ) -> Result<(), Error> {
        let ring = self.ring(voice_index)?;
        let emitter = GrainOrigin(emitter_id);
        match ring.add(start_sample, samples) {
            Ok(RingWrite::Complete) => {
                self.counters.scheduled_grains.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Ok(RingWrite::Truncated { written, dropped }) => {
                log::warn!(
                    "Grain{emitter} at sample {start_sample} got truncated in voice #{voice_index}: \
                     wrote {written}, dropped {dropped} samples"
                );
                self.counters.scheduled_grains.fetch_add(1, Ordering::Relaxed);
                self.counters.truncated_grains.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(err) => {
                if let Error::LateGrain { read_position, .. } = err {
                    log::warn!(
                        "Late grain{emitter} dropped in voice #{voice_index}: starts at sample \
                         {start_sample}, voice got read up to sample {read_position}"
                    );
                    self.counters.late_grains.fetch_add(1, Ordering::Relaxed);
                }
                Err(err)
            }
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Formats the optional emitter of a grain in log messages.
struct GrainOrigin(Option<EmitterId>);

impl fmt::Display for GrainOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(emitter_id) => write!(f, " from emitter #{emitter_id}"),
            None => Ok(()),
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Real-time side of the mixer: drains all voice rings and advances the [`DspClock`].
///
/// As an [`OutputSink`], voices get mixed into all channels of an interleaved buffer with equal
/// gain. Hosts which place voices as individual speakers read them separately with
/// [`MixerOutput::read_voices`]. Reading never blocks and never allocates.
pub struct MixerOutput {
    rings: Arc<[VoiceRingBuffer]>,
    counters: Arc<MixerCounters>,
    clock: Arc<DspClock>,
    channel_count: usize,
    mix_buffer: Vec<f32>,
}

impl MixerOutput {
    /// Max frames we're mixing in one batch.
    pub const MAX_MIX_BUFFER_FRAMES: usize = 1024;

    pub fn clock(&self) -> &Arc<DspClock> {
        &self.clock
    }

    /// Read the next frames of each voice into its own mono buffer: `outputs[i]` receives voice
    /// `i`. Voices without a buffer get consumed silently and surplus buffers are zeroed. The
    /// shortest buffer sets the frame count, remaining samples of longer buffers are zeroed.
    ///
    /// Like [`OutputSink::read`], this consumes all voices and advances the clock once.
    /// Returns the number of read frames.
    pub fn read_voices(&mut self, outputs: &mut [&mut [f32]]) -> usize {
        Self::assert_no_alloc(|| self.split(outputs))
    }

    fn split(&mut self, outputs: &mut [&mut [f32]]) -> usize {
        let frame_count = outputs.iter().map(|output| output.len()).min().unwrap_or(0);
        let read_start = self.clock.now();
        let last_written = self.last_written();

        for (voice_index, ring) in self.rings.iter().enumerate() {
            if let Some(output) = outputs.get_mut(voice_index) {
                let (frames, rest) = output.split_at_mut(frame_count);
                ring.read(frames);
                rest.fill(0.0);
            } else {
                let mut remaining = frame_count;
                while remaining > 0 {
                    let frames = remaining.min(Self::MAX_MIX_BUFFER_FRAMES);
                    ring.read(&mut self.mix_buffer[..frames]);
                    remaining -= frames;
                }
            }
        }
        for output in outputs.iter_mut().skip(self.rings.len()) {
            output.fill(0.0);
        }

        self.finish(read_start, frame_count, last_written);
        frame_count
    }

    fn mix(&mut self, output: &mut [f32]) -> usize {
        let frame_count = output.len() / self.channel_count;
        let read_start = self.clock.now();
        let last_written = self.last_written();

        let (frames, rest) = output.split_at_mut(frame_count * self.channel_count);
        rest.fill(0.0);

        for chunk in frames.chunks_mut(Self::MAX_MIX_BUFFER_FRAMES * self.channel_count) {
            let mix_buffer = &mut self.mix_buffer[..chunk.len() / self.channel_count];
            mix_buffer.fill(0.0);
            for ring in self.rings.iter() {
                ring.read_add(mix_buffer);
            }
            for (frame, value) in chunk
                .chunks_exact_mut(self.channel_count)
                .zip(mix_buffer.iter())
            {
                frame.fill(*value);
            }
        }

        self.finish(read_start, frame_count, last_written);
        output.len()
    }

    fn last_written(&self) -> SampleTime {
        self.rings
            .iter()
            .map(|ring| ring.write_position())
            .max()
            .unwrap_or(0)
    }

    fn finish(&self, read_start: SampleTime, frame_count: usize, last_written: SampleTime) {
        let read_end = read_start + frame_count as u64;
        let underrun = read_end.saturating_sub(last_written.max(read_start));
        if underrun > 0 {
            self.counters
                .underrun_frames
                .fetch_add(underrun, Ordering::Relaxed);
        }
        self.clock.advance(frame_count);
    }

    fn assert_no_alloc<T, F: FnOnce() -> T>(func: F) -> T {
        #[cfg(feature = "assert-allocs")]
        return assert_no_alloc::assert_no_alloc::<T, F>(func);

        #[cfg(not(feature = "assert-allocs"))]
        return func();
    }
}

impl OutputSink for MixerOutput {
    fn channel_count(&self) -> usize {
        self.channel_count
    }

    fn read(&mut self, output: &mut [f32]) -> usize {
        Self::assert_no_alloc(|| self.mix(output))
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn mixer(voice_count: usize, capacity: usize, channel_count: usize) -> (Mixer, MixerOutput) {
        Mixer::new(Arc::new(DspClock::new()), voice_count, capacity, channel_count).unwrap()
    }

    #[test]
    fn invalid_setups() {
        let clock = Arc::new(DspClock::new());
        assert!(Mixer::new(Arc::clone(&clock), 0, 1024, 2).is_err());
        assert!(Mixer::new(Arc::clone(&clock), 2, 0, 2).is_err());
        assert!(Mixer::new(Arc::clone(&clock), 2, 1024, 0).is_err());
    }

    #[test]
    fn overlapping_grains_sum_up() {
        let (mixer, mut output) = mixer(1, 4096, 1);
        mixer.schedule(0, 100, &[1.0; 64]).unwrap();
        mixer.schedule(0, 100, &[1.0; 64]).unwrap();

        let mut buffer = vec![0.0; 256];
        assert_eq!(output.read(&mut buffer), 256);
        assert!(buffer[..100].iter().all(|s| *s == 0.0));
        assert!(buffer[100..164].iter().all(|s| *s == 2.0));
        assert!(buffer[164..].iter().all(|s| *s == 0.0));
        assert_eq!(mixer.stats().scheduled_grains, 2);
    }

    #[test]
    fn voices_get_mixed_into_all_channels() {
        let (mixer, mut output) = mixer(2, 4096, 2);
        mixer.schedule(0, 0, &[0.25; 4]).unwrap();
        mixer.schedule(1, 2, &[0.5; 4]).unwrap();

        let mut buffer = vec![0.0; 12];
        output.read(&mut buffer);
        assert_eq!(
            buffer,
            [0.25, 0.25, 0.25, 0.25, 0.75, 0.75, 0.75, 0.75, 0.5, 0.5, 0.5, 0.5]
        );
    }

    #[test]
    fn reading_advances_the_clock_once() {
        let (mixer, mut output) = mixer(4, 4096, 2);
        let clock = Arc::clone(mixer.clock());
        let mut buffer = vec![0.0; 2 * 3000];
        output.read(&mut buffer);
        assert_eq!(clock.now(), 3000);
        for voice in 0..4 {
            assert_eq!(mixer.read_position(voice).unwrap(), 3000);
        }
        // odd buffer sizes: the partial frame is silent and not counted
        let mut buffer = vec![1.0; 5];
        output.read(&mut buffer);
        assert_eq!(clock.now(), 3002);
        assert_eq!(buffer[4], 0.0);
    }

    #[test]
    fn voices_can_be_read_separately() {
        let (mixer, mut output) = mixer(3, 4096, 2);
        mixer.schedule(0, 0, &[0.25; 4]).unwrap();
        mixer.schedule(1, 2, &[0.5; 4]).unwrap();
        mixer.schedule(2, 0, &[1.0; 8]).unwrap();

        let (mut first, mut second) = ([9.0; 6], [9.0; 8]);
        let read = output.read_voices(&mut [&mut first[..], &mut second[..]]);
        assert_eq!(read, 6);
        assert_eq!(first, [0.25, 0.25, 0.25, 0.25, 0.0, 0.0]);
        assert_eq!(second, [0.0, 0.0, 0.5, 0.5, 0.5, 0.5, 0.0, 0.0]);
        // all voices got consumed, the clock advanced once
        assert_eq!(mixer.clock().now(), 6);
        for voice in 0..3 {
            assert_eq!(mixer.read_position(voice).unwrap(), 6);
        }

        let (mut a, mut b, mut c, mut d) = ([9.0; 4], [9.0; 4], [9.0; 4], [9.0; 4]);
        output.read_voices(&mut [&mut a[..], &mut b[..], &mut c[..], &mut d[..]]);
        assert_eq!(a, [0.0; 4]);
        assert_eq!(c, [1.0, 1.0, 0.0, 0.0]);
        assert_eq!(d, [0.0; 4]);
        assert_eq!(mixer.clock().now(), 10);
        assert_eq!(mixer.stats().underrun_frames, 2);
    }

    #[test]
    fn late_grains_are_dropped_and_counted() {
        let (mixer, mut output) = mixer(1, 4096, 1);
        let mut buffer = vec![0.0; 512];
        output.read(&mut buffer);

        let result = mixer.schedule(0, 256, &[1.0; 64]);
        assert!(matches!(result, Err(Error::LateGrain { .. })));
        assert_eq!(mixer.stats().late_grains, 1);
        assert_eq!(mixer.stats().scheduled_grains, 0);

        output.read(&mut buffer);
        assert!(buffer.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn truncated_grains_are_counted() {
        let (mixer, mut output) = mixer(1, 128, 1);
        mixer.schedule(0, 100, &[1.0; 64]).unwrap();
        assert_eq!(mixer.stats().truncated_grains, 1);
        let mut buffer = vec![0.0; 256];
        output.read(&mut buffer);
        assert!(buffer[100..128].iter().all(|s| *s == 1.0));
        assert!(buffer[128..].iter().all(|s| *s == 0.0));
    }

    #[test]
    fn underruns_are_counted() {
        let (mixer, mut output) = mixer(2, 4096, 1);
        mixer.schedule(1, 0, &[1.0; 100]).unwrap();
        let mut buffer = vec![0.0; 256];
        output.read(&mut buffer);
        assert_eq!(mixer.stats().underrun_frames, 156);
    }

    #[test]
    fn invalid_voices() {
        let (mixer, _output) = mixer(2, 4096, 1);
        assert!(matches!(
            mixer.schedule(2, 0, &[1.0]),
            Err(Error::VoiceNotFound(2))
        ));
        assert!(mixer.read_position(5).is_err());
    }

    #[test]
    fn large_callbacks_are_mixed_in_batches() {
        let (mixer, mut output) = mixer(1, 8192, 2);
        let frames = MixerOutput::MAX_MIX_BUFFER_FRAMES * 2 + 17;
        mixer.schedule(0, 0, &vec![0.5; frames]).unwrap();
        let mut buffer = vec![0.0; frames * 2];
        output.read(&mut buffer);
        assert!(buffer.iter().all(|s| *s == 0.5));
        assert_eq!(mixer.clock().now(), frames as u64);
    }
}
