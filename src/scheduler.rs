//! Control rate grain scheduling: ties emitters, voice allocation, rendering and mixing together.

use std::sync::{atomic::Ordering, Arc};

use crate::{
    allocator::VoiceAllocator,
    context::EngineContext,
    emitter::{EmissionProperties, Emitter, EmitterId, TickContext},
    engine::RenderEngine,
    grain::{Grain, GrainPool, GrainRender},
    utils::{time::SampleTime, vector::Vector3},
    voice::Voice,
    Error,
};

// -------------------------------------------------------------------------------------------------

mod handle;

pub use handle::{EmitterHandle, EmitterMessage};
use handle::EmitterSharedState;

// -------------------------------------------------------------------------------------------------

/// Summary of a single [`GrainScheduler::update`] call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UpdateSummary {
    /// Clock time the update got run at.
    pub sample_time: SampleTime,
    /// Number of emitters which are bound to a voice.
    pub active_emitters: usize,
    /// Grains the emitters asked for.
    pub emitted_grains: usize,
    /// Grains which got written into the mixer.
    pub scheduled_grains: usize,
    /// Grains which got dropped: no free render buffer, or too late for the mixer.
    pub dropped_grains: usize,
}

// -------------------------------------------------------------------------------------------------

/// Drives grain emission once per control update (e.g. once per frame of a game loop).
///
/// Each [`update`](Self::update) call:
/// 1. applies queued [`EmitterHandle`] automation messages,
/// 2. (re)binds emitters to voices based on their distance to the listener,
/// 3. lets all active emitters emit the grains which are due up to the clock plus lookahead,
/// 4. renders all grains with the render engine and waits for them,
/// 5. schedules the rendered grains into their voice's ring buffer in the mixer.
///
/// The scheduler never blocks the real-time audio thread: the mixer's ring buffers are the
/// only state both share.
pub struct GrainScheduler<E: RenderEngine = Box<dyn RenderEngine>> {
    context: EngineContext,
    engine: E,
    allocator: VoiceAllocator,
    voices: Vec<Voice>,
    emitters: Vec<Emitter>,
    emitter_states: Vec<Arc<EmitterSharedState>>,
    pool: GrainPool,
    grains: Vec<Grain>,
    renders: Vec<GrainRender>,
}

impl GrainScheduler {
    /// Create a new scheduler, using the render engine the context's config asks for.
    pub fn new(context: EngineContext) -> Result<Self, Error> {
        let engine = context.create_render_engine()?;
        Self::with_engine(context, engine)
    }
}

impl<E: RenderEngine> GrainScheduler<E> {
    /// Create a new scheduler with a custom render engine.
    pub fn with_engine(context: EngineContext, engine: E) -> Result<Self, Error> {
        let config = *context.config();
        let allocator = VoiceAllocator::new(config.activation_range, config.deactivation_range)?;
        let voices = (0..config.voice_count)
            .map(|index| Voice::new(index, Vector3::ZERO))
            .collect();
        let pool = GrainPool::new(config.grain_pool_size, config.max_grain_samples());
        log::info!(
            "Using '{}' render engine with a pool of {} grain buffers",
            engine.name(),
            config.grain_pool_size
        );
        Ok(Self {
            context,
            engine,
            allocator,
            voices,
            emitters: Vec::new(),
            emitter_states: Vec::new(),
            pool,
            grains: Vec::with_capacity(config.grain_pool_size),
            renders: Vec::with_capacity(config.grain_pool_size),
        })
    }

    pub fn context(&self) -> &EngineContext {
        &self.context
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn voices(&self) -> &[Voice] {
        &self.voices
    }

    pub fn voice(&self, voice_index: usize) -> Result<&Voice, Error> {
        self.voices
            .get(voice_index)
            .ok_or(Error::VoiceNotFound(voice_index))
    }

    /// Move a voice. Voices which are not bound also get relocated by the allocator.
    pub fn set_voice_position(&mut self, voice_index: usize, position: Vector3) -> Result<(), Error> {
        self.voice_mut(voice_index)?.set_position(position);
        Ok(())
    }

    /// Disable or enable a voice. Samples which are already scheduled still play out.
    pub fn set_voice_enabled(&mut self, voice_index: usize, enabled: bool) -> Result<(), Error> {
        self.voice_mut(voice_index)?.set_enabled(enabled);
        Ok(())
    }

    fn voice_mut(&mut self, voice_index: usize) -> Result<&mut Voice, Error> {
        self.voices
            .get_mut(voice_index)
            .ok_or(Error::VoiceNotFound(voice_index))
    }

    pub fn emitters(&self) -> &[Emitter] {
        &self.emitters
    }

    pub fn emitter(&self, emitter_id: EmitterId) -> Result<&Emitter, Error> {
        self.emitters
            .iter()
            .find(|emitter| emitter.id() == emitter_id)
            .ok_or(Error::EmitterNotFound(emitter_id))
    }

    fn emitter_index(&self, emitter_id: EmitterId) -> Result<usize, Error> {
        self.emitters
            .iter()
            .position(|emitter| emitter.id() == emitter_id)
            .ok_or(Error::EmitterNotFound(emitter_id))
    }

    /// Add a new, idle emitter. It gets bound to a voice in the next update, when in range.
    pub fn add_emitter(
        &mut self,
        position: Vector3,
        properties: EmissionProperties,
    ) -> Result<EmitterHandle, Error> {
        self.insert_emitter(Emitter::new(position, properties))
    }

    /// Add an emitter which was created with a custom id.
    pub fn insert_emitter(&mut self, emitter: Emitter) -> Result<EmitterHandle, Error> {
        if self.emitters.iter().any(|e| e.id() == emitter.id()) {
            return Err(Error::ParameterError(format!(
                "An emitter with id {} already exists",
                emitter.id()
            )));
        }
        if let Err(err) = emitter.properties().validate() {
            log::warn!(
                "Emitter #{} has invalid properties, which will be clamped: {err}",
                emitter.id()
            );
        }
        let state = Arc::new(EmitterSharedState::new(
            self.context.config().message_queue_size,
        ));
        let handle = EmitterHandle::new(emitter.id(), Arc::clone(&state));
        log::debug!("Added emitter #{}", emitter.id());
        self.emitters.push(emitter);
        self.emitter_states.push(state);
        Ok(handle)
    }

    /// Remove an emitter, releasing its voice. Grains it already scheduled still play out.
    pub fn remove_emitter(&mut self, emitter_id: EmitterId) -> Result<Emitter, Error> {
        let index = self.emitter_index(emitter_id)?;
        let mut emitter = self.emitters.remove(index);
        let state = self.emitter_states.remove(index);
        state.is_alive.store(false, Ordering::Relaxed);
        state.is_active.store(false, Ordering::Relaxed);
        if let Some(voice_index) = emitter.deactivate() {
            if let Some(voice) = self.voices.get_mut(voice_index) {
                voice.unbind();
            }
        }
        log::debug!("Removed emitter #{emitter_id}");
        Ok(emitter)
    }

    /// Move an emitter immediately, bypassing its message queue.
    pub fn set_emitter_position(
        &mut self,
        emitter_id: EmitterId,
        position: Vector3,
    ) -> Result<(), Error> {
        let index = self.emitter_index(emitter_id)?;
        self.emitters[index].set_position(position);
        Ok(())
    }

    /// Change an emitter's properties immediately, bypassing its message queue.
    pub fn set_emitter_properties(
        &mut self,
        emitter_id: EmitterId,
        properties: EmissionProperties,
    ) -> Result<(), Error> {
        let index = self.emitter_index(emitter_id)?;
        *self.emitters[index].properties_mut() = properties;
        Ok(())
    }

    /// Run one control update for the given listener position.
    pub fn update(&mut self, listener: Vector3) -> UpdateSummary {
        self.process_messages();

        let now = self.context.clock().now();
        self.allocator
            .update(listener, now, &mut self.voices, &mut self.emitters);

        let mut summary = UpdateSummary {
            sample_time: now,
            ..UpdateSummary::default()
        };

        // emit due grains
        let config = self.context.config();
        let tick_context = TickContext {
            sample_rate: config.sample_rate,
            lookahead: config.lookahead_samples(),
            max_grains: config.max_grains_per_tick,
            library: self.context.clip_library(),
        };
        self.grains.clear();
        for (emitter, state) in self.emitters.iter_mut().zip(&self.emitter_states) {
            let is_active = emitter.attached_voice().is_some();
            state.is_active.store(is_active, Ordering::Relaxed);
            if is_active {
                summary.active_emitters += 1;
                emitter.tick(now, &tick_context, &mut self.grains);
            }
        }
        summary.emitted_grains = self.grains.len();

        // attach render buffers
        let mut first_dropped = None;
        for grain in self.grains.drain(..) {
            let origin = (grain.emitter_id, grain.target_voice, grain.start_sample);
            if let Some(render) = self.pool.acquire(grain) {
                self.renders.push(render);
            } else {
                summary.dropped_grains += 1;
                first_dropped.get_or_insert(origin);
            }
        }
        if let Some((emitter_id, target_voice, start_sample)) = first_dropped {
            log::warn!(
                "Grain pool exhausted: dropped {} grains, starting with emitter #{emitter_id}'s \
                 grain for voice #{target_voice} at sample {start_sample}. Increase the grain \
                 pool size to prevent this from happening...",
                summary.dropped_grains
            );
        }

        // render and join
        self.engine.render(&mut self.renders);

        // schedule into the voice rings
        let mixer = self.context.mixer();
        for render in self.renders.drain(..) {
            match mixer.schedule_grain(&render) {
                Ok(()) => summary.scheduled_grains += 1,
                Err(_) => summary.dropped_grains += 1,
            }
            self.pool.release(render);
        }

        summary
    }

    fn process_messages(&mut self) {
        for (emitter, state) in self.emitters.iter_mut().zip(&self.emitter_states) {
            while let Some(message) = state.message_queue.pop() {
                Self::apply_message(emitter, message);
            }
        }
    }

    fn apply_message(emitter: &mut Emitter, message: EmitterMessage) {
        match message {
            EmitterMessage::SetPosition(position) => emitter.set_position(position),
            EmitterMessage::SetEnabled(enabled) => emitter.set_enabled(enabled),
            EmitterMessage::SetProperties(properties) => *emitter.properties_mut() = *properties,
            EmitterMessage::SetVolume(volume) => emitter.properties_mut().volume = volume,
            EmitterMessage::SetPitch(pitch) => emitter.properties_mut().pitch = pitch,
            EmitterMessage::SetCadence(cadence_ms) => {
                emitter.properties_mut().cadence_ms = cadence_ms
            }
            EmitterMessage::SetDuration(duration_ms) => {
                emitter.properties_mut().duration_ms = duration_ms
            }
            EmitterMessage::SetPlaybackPosition(position) => {
                emitter.properties_mut().playback_position = position
            }
            EmitterMessage::SetClip(clip_index) => emitter.properties_mut().clip_index = clip_index,
            EmitterMessage::SetFilter(filter) => emitter.properties_mut().filter = filter,
            EmitterMessage::SetBitcrush(factor) => emitter.properties_mut().bitcrush = factor,
            EmitterMessage::SetWindow(window) => emitter.properties_mut().window = window,
        }
    }
}

// -------------------------------------------------------------------------------------------------
