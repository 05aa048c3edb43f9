use std::sync::Arc;

use crate::{
    clip::ClipLibrary,
    clock::DspClock,
    config::{EngineConfig, RenderMode},
    engine::{ParallelEngine, RenderEngine, SequentialEngine},
    mixer::{Mixer, MixerOutput},
    source::GrainSampleSource,
    Error,
};

// -------------------------------------------------------------------------------------------------

/// Bundles the shared engine collaborators: the DSP clock, the clip sample source, the mixer and
/// the validated configuration.
///
/// A context gets created together with the real-time [`MixerOutput`], which must be handed
/// over to an output device or an offline renderer. The context itself gets moved into a
/// [`GrainScheduler`](crate::GrainScheduler).
pub struct EngineContext {
    config: EngineConfig,
    clock: Arc<DspClock>,
    source: GrainSampleSource,
    mixer: Mixer,
}

impl EngineContext {
    /// Validate the config and create a new context for the given clips.
    pub fn new(
        config: EngineConfig,
        library: Arc<ClipLibrary>,
    ) -> Result<(Self, MixerOutput), Error> {
        config.validate()?;
        if library.is_empty() {
            log::warn!("Creating a grain engine without any audio clips");
        }
        let clock = Arc::new(DspClock::new());
        let source = GrainSampleSource::new(library, config.sample_rate);
        let (mixer, output) = Mixer::new(
            Arc::clone(&clock),
            config.voice_count,
            config.ring_buffer_samples(),
            config.channel_count,
        )?;
        log::info!(
            "Created grain engine: {} voices, {} Hz, {} channels, {} ms lookahead",
            config.voice_count,
            config.sample_rate,
            config.channel_count,
            config.lookahead_ms
        );
        Ok((
            Self {
                config,
                clock,
                source,
                mixer,
            },
            output,
        ))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<DspClock> {
        &self.clock
    }

    pub fn source(&self) -> &GrainSampleSource {
        &self.source
    }

    pub fn clip_library(&self) -> &ClipLibrary {
        self.source.library()
    }

    pub fn mixer(&self) -> &Mixer {
        &self.mixer
    }

    /// Create the render engine the config asks for.
    pub fn create_render_engine(&self) -> Result<Box<dyn RenderEngine>, Error> {
        Ok(match self.config.render_mode {
            RenderMode::Sequential => Box::new(SequentialEngine::new(self.source.clone())),
            RenderMode::Parallel => Box::new(ParallelEngine::new(
                self.source.clone(),
                self.config.worker_threads,
            )?),
        })
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clip::AudioClip;

    fn library() -> Arc<ClipLibrary> {
        Arc::new(ClipLibrary::new().with_clip(AudioClip::mono(vec![0.5; 1000], 44100).unwrap()))
    }

    #[test]
    fn context_setup() {
        let config = EngineConfig::new().voice_count(3).sample_rate(48000);
        let (context, _output) = EngineContext::new(config, library()).unwrap();
        assert_eq!(context.mixer().voice_count(), 3);
        assert_eq!(context.mixer().capacity(), 48000);
        assert_eq!(context.source().sample_rate(), 48000);
        assert_eq!(context.clip_library().len(), 1);
        assert_eq!(context.clock().now(), 0);
    }

    #[test]
    fn invalid_configs_are_rejected() {
        let config = EngineConfig::new().voice_count(0);
        assert!(EngineContext::new(config, library()).is_err());
    }

    #[test]
    fn render_engines_by_mode() {
        let config = EngineConfig::new().render_mode(RenderMode::Sequential);
        let (context, _output) = EngineContext::new(config, library()).unwrap();
        assert_eq!(context.create_render_engine().unwrap().name(), "sequential");

        let config = EngineConfig::new()
            .render_mode(RenderMode::Parallel)
            .worker_threads(2);
        let (context, _output) = EngineContext::new(config, library()).unwrap();
        assert_eq!(context.create_render_engine().unwrap().name(), "parallel");
    }
}
