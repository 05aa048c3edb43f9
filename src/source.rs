//! Read-only grain window access to decoded clips.

use std::sync::Arc;

use assume::assume;

use crate::clip::{AudioClip, ClipLibrary};

// -------------------------------------------------------------------------------------------------

/// Read-only accessor over a [`ClipLibrary`], which resamples grain windows from its clips.
///
/// Windows are read with 4 point cubic (Catmull-Rom) interpolation. Reads never panic: invalid
/// requests produce silence and log a warning, as this runs on a latency sensitive path.
/// The source holds no mutable state, so it can be shared and used from many threads at once.
#[derive(Debug, Clone)]
pub struct GrainSampleSource {
    library: Arc<ClipLibrary>,
    sample_rate: u32,
}

impl GrainSampleSource {
    /// Create a new source for the given clips, rendering windows at the given output rate.
    pub fn new(library: Arc<ClipLibrary>, sample_rate: u32) -> Self {
        debug_assert!(sample_rate > 0, "Invalid sample rate");
        Self {
            library,
            sample_rate,
        }
    }

    /// Access to the underlying clip library.
    pub fn library(&self) -> &ClipLibrary {
        &self.library
    }

    /// Output sample rate the windows are rendered at.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Allocating variant of [`Self::window`]: returns a new window with `length` samples.
    pub fn get_window(
        &self,
        clip_index: usize,
        start_norm: f32,
        length: usize,
        pitch: f32,
    ) -> Vec<f32> {
        let mut output = vec![0.0; length];
        self.window(clip_index, start_norm, pitch, &mut output);
        output
    }

    /// Fill `output` with a window of the given clip, starting at the normalized position
    /// `start_norm` (0.0 = clip start, 1.0 = clip end), stepping through the clip at `pitch`.
    ///
    /// Clips with a sample rate other than the output rate get stepped at their natural speed.
    /// Multichannel clips are downmixed to mono. Reads past the end of the clip are silent.
    ///
    /// When the clip index is invalid, `start_norm` is outside of [0, 1] or `pitch` isn't a
    /// positive number, the window is filled with zeros and a warning is logged.
    pub fn window(&self, clip_index: usize, start_norm: f32, pitch: f32, output: &mut [f32]) {
        output.fill(0.0);

        let Some(clip) = self.library.get(clip_index) else {
            log::warn!(
                "Grain window requested for invalid clip #{clip_index} ({} clips present)",
                self.library.len()
            );
            return;
        };
        if !(0.0..=1.0).contains(&start_norm) {
            log::warn!(
                "Grain window for clip #{clip_index} requested at invalid position {start_norm}"
            );
            return;
        }
        if !pitch.is_finite() || pitch <= 0.0 {
            log::warn!("Grain window for clip #{clip_index} requested with invalid pitch {pitch}");
            return;
        }
        if clip.is_empty() {
            return;
        }

        let frame_count = clip.frame_count();
        let start = start_norm as f64 * frame_count as f64;
        let step = pitch as f64 * clip.sample_rate() as f64 / self.sample_rate as f64;

        if clip.channel_count() == 1 {
            Self::read_mono(clip.samples(), start, step, output);
        } else {
            Self::read_frames(clip, start, step, output);
        }
    }

    fn read_mono(samples: &[f32], start: f64, step: f64, output: &mut [f32]) {
        let len = samples.len();
        assume!(unsafe: len > 0, "Empty clips are skipped by the caller");
        let frame = |index: isize| -> f32 {
            if index >= 0 && (index as usize) < len {
                samples[index as usize]
            } else {
                0.0
            }
        };
        for (i, out) in output.iter_mut().enumerate() {
            let position = start + i as f64 * step;
            let index = position as usize;
            if index >= len {
                break;
            }
            let fraction = (position - index as f64) as f32;
            let index = index as isize;
            *out = Self::interpolate(
                frame(index - 1),
                frame(index),
                frame(index + 1),
                frame(index + 2),
                fraction,
            );
        }
    }

    fn read_frames(clip: &AudioClip, start: f64, step: f64, output: &mut [f32]) {
        let frame_count = clip.frame_count();
        let frame = |index: isize| -> f32 {
            if index >= 0 {
                clip.mono_frame(index as usize)
            } else {
                0.0
            }
        };
        for (i, out) in output.iter_mut().enumerate() {
            let position = start + i as f64 * step;
            let index = position as usize;
            if index >= frame_count {
                break;
            }
            let fraction = (position - index as f64) as f32;
            let index = index as isize;
            *out = Self::interpolate(
                frame(index - 1),
                frame(index),
                frame(index + 1),
                frame(index + 2),
                fraction,
            );
        }
    }

    /// Cubic interpolation (Catmull-Rom) between y1 and y2.
    #[inline]
    fn interpolate(y0: f32, y1: f32, y2: f32, y3: f32, fraction: f32) -> f32 {
        let a = -0.5 * y0 + 1.5 * y1 - 1.5 * y2 + 0.5 * y3;
        let b = y0 - 2.5 * y1 + 2.0 * y2 - 0.5 * y3;
        let c = -0.5 * y0 + 0.5 * y2;
        let d = y1;

        a * fraction * fraction * fraction + b * fraction * fraction + c * fraction + d
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_source(sample_rate: u32) -> GrainSampleSource {
        let ramp = (0..100).map(|i| i as f32 / 100.0).collect::<Vec<_>>();
        let stereo = (0..50).flat_map(|_| [1.0, 0.0]).collect::<Vec<_>>();
        let library = ClipLibrary::new()
            .with_clip(AudioClip::mono(ramp, sample_rate).unwrap())
            .with_clip(AudioClip::new(stereo, sample_rate, 2).unwrap());
        GrainSampleSource::new(Arc::new(library), sample_rate)
    }

    #[test]
    fn unpitched_window_is_exact() {
        let source = ramp_source(44100);
        let window = source.get_window(0, 0.5, 10, 1.0);
        let expected = (50..60).map(|i| i as f32 / 100.0).collect::<Vec<_>>();
        assert_eq!(window, expected);
    }

    #[test]
    fn pitched_window() {
        let source = ramp_source(44100);
        // octave up: every second frame
        let window = source.get_window(0, 0.0, 10, 2.0);
        for (i, sample) in window.iter().enumerate() {
            assert!((sample - (2 * i) as f32 / 100.0).abs() < 1e-6);
        }
        // octave down: interpolated values in between
        let window = source.get_window(0, 0.2, 10, 0.5);
        for (i, sample) in window.iter().enumerate() {
            assert!((sample - (20.0 + i as f32 * 0.5) / 100.0).abs() < 1e-4);
        }
    }

    #[test]
    fn foreign_sample_rates_play_at_natural_speed() {
        let ramp = (0..100).map(|i| i as f32 / 100.0).collect::<Vec<_>>();
        let library = ClipLibrary::new().with_clip(AudioClip::mono(ramp, 88200).unwrap());
        let source = GrainSampleSource::new(Arc::new(library), 44100);
        let window = source.get_window(0, 0.0, 4, 1.0);
        assert!((window[3] - 0.06).abs() < 1e-6);
    }

    #[test]
    fn reads_past_clip_end_are_silent() {
        let library = ClipLibrary::new().with_clip(AudioClip::mono(vec![1.0; 8], 44100).unwrap());
        let source = GrainSampleSource::new(Arc::new(library), 44100);
        let window = source.get_window(0, 0.5, 10, 1.0);
        assert_eq!(window, [1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        let window = source.get_window(0, 1.0, 8, 1.0);
        assert!(window.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn multichannel_clips_get_downmixed() {
        let source = ramp_source(44100);
        let window = source.get_window(1, 0.0, 8, 1.0);
        assert_eq!(window, vec![0.5; 8]);
    }

    #[test]
    fn invalid_requests_produce_silence() {
        let source = ramp_source(44100);

        let window = source.get_window(0, 1.5, 32, 1.0);
        assert_eq!(window.len(), 32);
        assert!(window.iter().all(|s| *s == 0.0));

        let window = source.get_window(0, -0.1, 32, 1.0);
        assert!(window.iter().all(|s| *s == 0.0));

        let window = source.get_window(7, 0.5, 32, 1.0);
        assert_eq!(window.len(), 32);
        assert!(window.iter().all(|s| *s == 0.0));

        let window = source.get_window(0, 0.5, 32, 0.0);
        assert!(window.iter().all(|s| *s == 0.0));

        let window = source.get_window(0, f32::NAN, 32, 1.0);
        assert!(window.iter().all(|s| *s == 0.0));
    }
}
