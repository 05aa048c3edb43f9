use std::sync::Arc;

use crate::Error;

// -------------------------------------------------------------------------------------------------

/// A decoded, immutable audio clip.
///
/// Samples are stored interleaved with `channel_count` channels. Clips are shared read-only
/// between many grains and threads, and never change after they got created.
#[derive(Debug, Clone)]
pub struct AudioClip {
    samples: Arc<[f32]>,
    sample_rate: u32,
    channel_count: usize,
}

impl AudioClip {
    /// Create a new clip from decoded, interleaved sample data.
    pub fn new<S: Into<Arc<[f32]>>>(
        samples: S,
        sample_rate: u32,
        channel_count: usize,
    ) -> Result<Self, Error> {
        let samples = samples.into();
        if sample_rate == 0 {
            return Err(Error::ParameterError(
                "Clip sample rate must be > 0".to_string(),
            ));
        }
        if channel_count == 0 {
            return Err(Error::ParameterError(
                "Clip channel count must be > 0".to_string(),
            ));
        }
        if samples.len() % channel_count != 0 {
            return Err(Error::ParameterError(format!(
                "Clip sample count {} is not a multiple of its channel count {}",
                samples.len(),
                channel_count
            )));
        }
        Ok(Self {
            samples,
            sample_rate,
            channel_count,
        })
    }

    /// Create a new mono clip.
    pub fn mono<S: Into<Arc<[f32]>>>(samples: S, sample_rate: u32) -> Result<Self, Error> {
        Self::new(samples, sample_rate, 1)
    }

    /// Raw interleaved sample data.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    /// Number of sample frames in the clip.
    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.channel_count
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Mono (channel averaged) value of the given frame. Frames out of bounds are silent.
    #[inline]
    pub(crate) fn mono_frame(&self, frame: usize) -> f32 {
        match self.channel_count {
            1 => self.samples.get(frame).copied().unwrap_or(0.0),
            channel_count => {
                let start = frame * channel_count;
                match self.samples.get(start..start + channel_count) {
                    Some(frame) => frame.iter().sum::<f32>() / channel_count as f32,
                    None => 0.0,
                }
            }
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// A shared, read-only set of decoded audio clips, addressed by index.
///
/// The library is populated up front by a collaborator that decodes audio files. It's passed
/// to the engine as part of the [`EngineContext`](crate::EngineContext) and never mutated
/// afterwards.
#[derive(Debug, Clone, Default)]
pub struct ClipLibrary {
    clips: Vec<Arc<AudioClip>>,
}

impl ClipLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a new clip and return its index.
    pub fn add(&mut self, clip: AudioClip) -> usize {
        self.clips.push(Arc::new(clip));
        self.clips.len() - 1
    }

    /// Builder style variant of [`Self::add`].
    pub fn with_clip(mut self, clip: AudioClip) -> Self {
        self.add(clip);
        self
    }

    pub fn get(&self, clip_index: usize) -> Option<&Arc<AudioClip>> {
        self.clips.get(clip_index)
    }

    /// Like [`Self::get`], but returns an error for invalid indices.
    pub fn clip(&self, clip_index: usize) -> Result<&Arc<AudioClip>, Error> {
        self.get(clip_index).ok_or(Error::ClipNotFound(clip_index))
    }

    pub fn len(&self) -> usize {
        self.clips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }
}

impl FromIterator<AudioClip> for ClipLibrary {
    fn from_iter<T: IntoIterator<Item = AudioClip>>(iter: T) -> Self {
        Self {
            clips: iter.into_iter().map(Arc::new).collect(),
        }
    }
}

// -------------------------------------------------------------------------------------------------
