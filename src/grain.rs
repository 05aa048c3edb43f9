//! Grains: the atomic unit of playback, their envelopes and the pool of render buffers.

use std::sync::LazyLock;

use strum::EnumCount;

use crate::{
    emitter::EmitterId,
    filter::{apply_biquad, apply_bitcrush, biquad::BiquadCoefficients},
    source::GrainSampleSource,
    utils::time::SampleTime,
};

// -------------------------------------------------------------------------------------------------

/// Amplitude envelope applied to each grain. All shapes except `Rectangle` taper towards the
/// grain edges, so overlapping grains blend without clicks.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    strum::EnumString,
    strum::Display,
    strum::VariantNames,
    strum::EnumCount,
)]
#[repr(u8)]
pub enum GrainWindowMode {
    #[default]
    Hann = 0,
    Blackman = 1,
    Triangle = 2,
    Tukey = 3,
    Trapezoid = 4,
    Exponential = 5,
    /// No envelope at all: grains play back at full volume from start to end.
    Rectangle = 6,
}

// -------------------------------------------------------------------------------------------------

/// Envelope lookup tables for all [`GrainWindowMode`]s, shared by all grain renders.
pub(crate) struct GrainWindow<const N: usize> {
    luts: [[f32; N]; GrainWindowMode::COUNT],
}

impl<const N: usize> GrainWindow<N> {
    const _VERIFY_N: () = assert!(
        N.is_power_of_two(),
        "Grain window size must be a pow2 value"
    );
    const MASK: usize = N - 1;

    pub fn new() -> Self {
        let mut luts = [[0.0; N]; GrainWindowMode::COUNT];

        #[allow(clippy::needless_range_loop)]
        for i in 0..N {
            let phase = i as f32 / N as f32;

            luts[GrainWindowMode::Hann as usize][i] =
                0.5 * (1.0 - (2.0 * std::f32::consts::PI * phase).cos());

            let pi_phase = std::f32::consts::PI * phase;
            luts[GrainWindowMode::Blackman as usize][i] =
                0.42 - 0.5 * (2.0 * pi_phase).cos() + 0.08 * (4.0 * pi_phase).cos();

            luts[GrainWindowMode::Triangle as usize][i] = if phase < 0.5 {
                2.0 * phase
            } else {
                2.0 * (1.0 - phase)
            };

            // cosine tapers over the outer quarters
            let width = 0.25;
            luts[GrainWindowMode::Tukey as usize][i] = if phase < width {
                let u = phase / width;
                0.5 * (1.0 - (std::f32::consts::PI * u).cos())
            } else if phase > 1.0 - width {
                let u = (1.0 - phase) / width;
                0.5 * (1.0 - (std::f32::consts::PI * u).cos())
            } else {
                1.0
            };

            let ramp_width = 0.1;
            luts[GrainWindowMode::Trapezoid as usize][i] = if phase < ramp_width {
                phase / ramp_width
            } else if phase > 1.0 - ramp_width {
                (1.0 - phase) / ramp_width
            } else {
                1.0
            };

            let decay_rate = 6.0;
            let center_dist = (phase - 0.5).abs();
            luts[GrainWindowMode::Exponential as usize][i] = (-decay_rate * center_dist).exp();

            luts[GrainWindowMode::Rectangle as usize][i] = 1.0;
        }

        Self { luts }
    }

    /// Envelope gain at `phase` (0 at the grain's first sample, 1 at its last).
    #[inline]
    pub fn sample(&self, mode: GrainWindowMode, phase: f64) -> f32 {
        debug_assert!((0.0..=1.0).contains(&phase));

        let index_float = phase * (N - 1) as f64;
        let index = (index_float as usize) & Self::MASK;
        let fraction = index_float.fract() as f32;
        let next_index = (index + 1) & Self::MASK;

        let lut = &self.luts[mode as usize];
        if index < N - 1 {
            lut[index] * (1.0 - fraction) + lut[next_index] * fraction
        } else {
            lut[N - 1]
        }
    }
}

/// Static, shared lookup table for the envelope window modes
static GRAIN_WINDOW_LUT: LazyLock<GrainWindow<2048>> = LazyLock::new(GrainWindow::new);

// -------------------------------------------------------------------------------------------------

/// A finite-lifetime unit of audio, created by an [`Emitter`](crate::Emitter) the instant its
/// cadence fires.
///
/// All properties are fixed at creation. Only the populated flag changes, when the grain got
/// rendered into its buffer.
#[derive(Debug, Clone)]
pub struct Grain {
    /// Emitter which spawned the grain.
    pub emitter_id: EmitterId,
    /// Index of the source clip in the clip library.
    pub clip_index: usize,
    /// Absolute sample time at which the grain starts playing.
    pub start_sample: SampleTime,
    /// Length of the grain in output samples.
    pub duration_samples: usize,
    /// Playback speed through the source clip.
    pub pitch: f32,
    /// Linear gain applied to the whole grain.
    pub volume: f32,
    /// Optional biquad filter stage.
    pub filter: Option<BiquadCoefficients>,
    /// Zero-order-hold downsample factor. 0 or 1 disables the bitcrusher.
    pub bitcrush: usize,
    /// Envelope shape.
    pub window: GrainWindowMode,
    /// Normalized read position in the source clip.
    pub playback_position: f32,
    /// Voice the grain gets mixed into.
    pub target_voice: usize,
    populated: bool,
}

impl Grain {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        emitter_id: EmitterId,
        clip_index: usize,
        start_sample: SampleTime,
        duration_samples: usize,
        pitch: f32,
        volume: f32,
        playback_position: f32,
        target_voice: usize,
    ) -> Self {
        Self {
            emitter_id,
            clip_index,
            start_sample,
            duration_samples,
            pitch,
            volume,
            filter: None,
            bitcrush: 1,
            window: GrainWindowMode::default(),
            playback_position,
            target_voice,
            populated: false,
        }
    }

    pub fn with_filter(mut self, filter: Option<BiquadCoefficients>) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_bitcrush(mut self, downsample_factor: usize) -> Self {
        self.bitcrush = downsample_factor;
        self
    }

    pub fn with_window(mut self, window: GrainWindowMode) -> Self {
        self.window = window;
        self
    }

    /// Absolute sample time right after the grain's last sample.
    pub fn end_sample(&self) -> SampleTime {
        self.start_sample + self.duration_samples as SampleTime
    }

    /// true once the grain's samples got rendered.
    pub fn is_populated(&self) -> bool {
        self.populated
    }

    /// Render the grain into the given buffer: reads the source window, applies filter and
    /// bitcrusher, then the envelope and volume.
    ///
    /// The buffer gets resized to the grain's duration. Pass a buffer with enough capacity to
    /// avoid allocations.
    pub fn render(&mut self, source: &GrainSampleSource, buffer: &mut Vec<f32>) {
        buffer.clear();
        buffer.resize(self.duration_samples, 0.0);

        source.window(self.clip_index, self.playback_position, self.pitch, buffer);

        if let Some(filter) = &self.filter {
            apply_biquad(buffer, filter);
        }
        apply_bitcrush(buffer, self.bitcrush);

        if self.window == GrainWindowMode::Rectangle {
            if self.volume != 1.0 {
                for sample in buffer.iter_mut() {
                    *sample *= self.volume;
                }
            }
        } else {
            let grain_window = &*GRAIN_WINDOW_LUT;
            let phase_increment = 1.0 / self.duration_samples.max(1) as f64;
            for (index, sample) in buffer.iter_mut().enumerate() {
                let envelope = grain_window.sample(self.window, index as f64 * phase_increment);
                *sample *= envelope * self.volume;
            }
        }

        self.populated = true;
    }
}

// -------------------------------------------------------------------------------------------------

/// A rendered (or to be rendered) grain, together with its sample buffer.
#[derive(Debug)]
pub struct GrainRender {
    pub grain: Grain,
    pub buffer: Vec<f32>,
}

impl GrainRender {
    pub fn render(&mut self, source: &GrainSampleSource) {
        self.grain.render(source, &mut self.buffer);
    }

    /// Estimated processing cost of the render, used to balance work across render workers.
    pub fn weight(&self) -> usize {
        self.grain.duration_samples
    }
}

// -------------------------------------------------------------------------------------------------

/// A fixed-size pool of preallocated grain render buffers.
///
/// Buffers are taken from the pool when a grain gets created and returned as soon as the grain
/// got written into its voice's ring buffer. When the pool runs dry, new grains get dropped
/// instead of allocating new buffers.
pub struct GrainPool {
    buffers: Vec<Vec<f32>>,
    max_grain_samples: usize,
}

impl GrainPool {
    pub fn new(pool_size: usize, max_grain_samples: usize) -> Self {
        let buffers = (0..pool_size)
            .map(|_| Vec::with_capacity(max_grain_samples))
            .collect();
        Self {
            buffers,
            max_grain_samples,
        }
    }

    /// Max length of a grain in samples a buffer can hold without reallocating.
    pub fn max_grain_samples(&self) -> usize {
        self.max_grain_samples
    }

    /// Number of currently unused buffers.
    pub fn available(&self) -> usize {
        self.buffers.len()
    }

    /// Attach a pooled buffer to the grain. Returns None when the pool is exhausted.
    /// The grain's duration gets clamped to the pool's max grain size.
    pub fn acquire(&mut self, mut grain: Grain) -> Option<GrainRender> {
        let buffer = self.buffers.pop()?;
        grain.duration_samples = grain.duration_samples.min(self.max_grain_samples);
        Some(GrainRender { grain, buffer })
    }

    /// Return a render's buffer to the pool.
    pub fn release(&mut self, render: GrainRender) {
        let mut buffer = render.buffer;
        buffer.clear();
        self.buffers.push(buffer);
    }
}

// -------------------------------------------------------------------------------------------------
