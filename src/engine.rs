//! Grain render engines.

use crate::{grain::GrainRender, source::GrainSampleSource};

// -------------------------------------------------------------------------------------------------

mod parallel;

pub use parallel::ParallelEngine;

// -------------------------------------------------------------------------------------------------

/// Renders a batch of grains into their buffers.
///
/// `render` is a blocking call: when it returns, all passed grains are populated. The order of
/// the renders in the vector is preserved.
pub trait RenderEngine: Send {
    /// Name of the engine, for display purposes.
    fn name(&self) -> &'static str;

    /// Render all given grains.
    fn render(&mut self, renders: &mut Vec<GrainRender>);
}

impl RenderEngine for Box<dyn RenderEngine> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn render(&mut self, renders: &mut Vec<GrainRender>) {
        (**self).render(renders)
    }
}

// -------------------------------------------------------------------------------------------------

/// Renders all grains one after another on the calling thread.
pub struct SequentialEngine {
    source: GrainSampleSource,
}

impl SequentialEngine {
    pub fn new(source: GrainSampleSource) -> Self {
        Self { source }
    }
}

impl RenderEngine for SequentialEngine {
    fn name(&self) -> &'static str {
        "sequential"
    }

    fn render(&mut self, renders: &mut Vec<GrainRender>) {
        for render in renders.iter_mut() {
            render.render(&self.source);
        }
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        clip::{AudioClip, ClipLibrary},
        grain::{Grain, GrainPool, GrainWindowMode},
    };

    pub(super) fn test_source() -> GrainSampleSource {
        let sine = (0..44100)
            .map(|i| (i as f32 * 440.0 * std::f32::consts::TAU / 44100.0).sin())
            .collect::<Vec<_>>();
        let library = ClipLibrary::new()
            .with_clip(AudioClip::mono(sine, 44100).unwrap())
            .with_clip(AudioClip::mono(vec![1.0; 4410], 44100).unwrap());
        GrainSampleSource::new(Arc::new(library), 44100)
    }

    pub(super) fn test_renders(pool: &mut GrainPool, count: usize) -> Vec<GrainRender> {
        (0..count)
            .map(|index| {
                let grain = Grain::new(
                    index,
                    index % 2,
                    index as u64 * 100,
                    64 + (index * 37) % 512,
                    1.0 + (index % 5) as f32 * 0.25,
                    0.5,
                    (index % 10) as f32 / 10.0,
                    index % 4,
                )
                .with_window(GrainWindowMode::Hann);
                pool.acquire(grain).unwrap()
            })
            .collect()
    }

    #[test]
    fn sequential_renders_all_grains() {
        let mut engine = SequentialEngine::new(test_source());
        let mut pool = GrainPool::new(32, 1024);
        let mut renders = test_renders(&mut pool, 32);
        engine.render(&mut renders);
        assert_eq!(renders.len(), 32);
        for (index, render) in renders.iter().enumerate() {
            assert!(render.grain.is_populated());
            assert_eq!(render.grain.emitter_id, index);
            assert_eq!(render.buffer.len(), render.grain.duration_samples);
        }
    }
}
