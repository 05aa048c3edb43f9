#![doc = include_str!("../README.md")]

// private mods (will be partly re-exported)
mod allocator;
mod clip;
mod clock;
mod config;
mod context;
mod emitter;
mod engine;
mod error;
mod filter;
mod grain;
mod mixer;
mod output;
mod scheduler;
mod source;
mod voice;

// public, flat re-exports
pub use error::Error;

pub use clip::{AudioClip, ClipLibrary};
pub use clock::DspClock;
pub use source::GrainSampleSource;

pub use grain::{Grain, GrainPool, GrainRender, GrainWindowMode};

pub use emitter::{EmissionProperties, Emitter, EmitterId, EmitterState, TickContext};
pub use voice::Voice;

pub use allocator::VoiceAllocator;

pub use mixer::{Mixer, MixerOutput, MixerStats};

pub use engine::{ParallelEngine, RenderEngine, SequentialEngine};

pub use config::{EngineConfig, RenderMode};
pub use context::EngineContext;
pub use scheduler::{EmitterHandle, EmitterMessage, GrainScheduler, UpdateSummary};

pub use output::{OutputDevice, OutputSink};
#[cfg(feature = "cpal-output")]
pub use output::cpal::CpalOutput;
#[cfg(feature = "wav-output")]
pub use output::wav::WavOutput;

// public mods
pub mod utils;

pub mod filters {
    //! Per grain DSP: biquad filtering and bitcrushing.

    pub use super::filter::{
        apply_biquad, apply_bitcrush,
        biquad::{BiquadCoefficients, BiquadFilter, BiquadFilterType},
    };
}
