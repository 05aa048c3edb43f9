//! Emitters: logical, positioned sound sources which spawn grains on a fixed cadence.

use rand::{rngs::SmallRng, Rng, SeedableRng};

use crate::{
    clip::ClipLibrary,
    filter::biquad::BiquadCoefficients,
    grain::{Grain, GrainWindowMode},
    utils::{
        db_to_linear,
        time::{ms_to_samples, SampleTime},
        unique_usize_id,
        vector::Vector3,
    },
    Error,
};

// -------------------------------------------------------------------------------------------------

/// Unique id of an emitter.
pub type EmitterId = usize;

// -------------------------------------------------------------------------------------------------

/// Mutable grain parameters of an emitter.
///
/// Parameters can be changed at any control tick. Out of range values are clamped to safe bounds
/// when grains get created; use [`EmissionProperties::validate`] to check them up front.
#[derive(Debug, Clone)]
pub struct EmissionProperties {
    /// Time between two successive grains in milliseconds. By default 50 ms.
    pub cadence_ms: f32,
    /// Length of each grain in milliseconds. By default 100 ms.
    pub duration_ms: f32,
    /// Normalized position in the source clip where grains start reading (0.0 - 1.0).
    pub playback_position: f32,
    /// Playback speed of grains through the clip (> 0.0). By default 1.0.
    pub pitch: f32,
    /// Grain volume (0.0 - 1.0). By default 1.0.
    pub volume: f32,
    /// Source clip index in the clip library.
    pub clip_index: usize,
    /// When set, each grain's read position gets shifted by a random amount of clip frames in
    /// range `[0, random_offset_samples)`.
    pub random_offset_samples: Option<usize>,
    /// Random pitch variation (0.0 - 1.0): pitch gets scaled by `1 ± pitch_jitter`.
    pub pitch_jitter: f32,
    /// Random volume variation (0.0 - 1.0): volume gets scaled by `1 - volume_jitter * rand`.
    pub volume_jitter: f32,
    /// Optional biquad filter which is applied to each grain.
    pub filter: Option<BiquadCoefficients>,
    /// Zero-order-hold downsample factor. 1 disables the bitcrusher.
    pub bitcrush: usize,
    /// Grain envelope shape.
    pub window: GrainWindowMode,
}

impl Default for EmissionProperties {
    fn default() -> Self {
        Self {
            cadence_ms: 50.0,
            duration_ms: 100.0,
            playback_position: 0.0,
            pitch: 1.0,
            volume: 1.0,
            clip_index: 0,
            random_offset_samples: None,
            pitch_jitter: 0.0,
            volume_jitter: 0.0,
            filter: None,
            bitcrush: 1,
            window: GrainWindowMode::default(),
        }
    }
}

impl EmissionProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cadence_ms(mut self, cadence_ms: f32) -> Self {
        self.cadence_ms = cadence_ms;
        self
    }

    pub fn duration_ms(mut self, duration_ms: f32) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn playback_position(mut self, position: f32) -> Self {
        self.playback_position = position;
        self
    }

    pub fn pitch(mut self, pitch: f32) -> Self {
        self.pitch = pitch;
        self
    }

    pub fn volume(mut self, volume: f32) -> Self {
        self.volume = volume;
        self
    }

    /// Set the volume in decibels. Values above 0 dB get clamped when grains are created.
    pub fn volume_db(mut self, volume_db: f32) -> Self {
        self.volume = db_to_linear(volume_db);
        self
    }

    pub fn clip_index(mut self, clip_index: usize) -> Self {
        self.clip_index = clip_index;
        self
    }

    pub fn random_offset_samples(mut self, samples: usize) -> Self {
        self.random_offset_samples = Some(samples);
        self
    }

    pub fn pitch_jitter(mut self, jitter: f32) -> Self {
        self.pitch_jitter = jitter;
        self
    }

    pub fn volume_jitter(mut self, jitter: f32) -> Self {
        self.volume_jitter = jitter;
        self
    }

    pub fn filter(mut self, filter: BiquadCoefficients) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn bitcrush(mut self, downsample_factor: usize) -> Self {
        self.bitcrush = downsample_factor;
        self
    }

    pub fn window(mut self, window: GrainWindowMode) -> Self {
        self.window = window;
        self
    }

    /// Validate all parameters. Returns Error::ParameterError on errors.
    pub fn validate(&self) -> Result<(), Error> {
        if !self.cadence_ms.is_finite() || self.cadence_ms <= 0.0 {
            return Err(Error::ParameterError(format!(
                "emission 'cadence_ms' must be > 0, but is '{}'",
                self.cadence_ms
            )));
        }
        if !self.duration_ms.is_finite() || self.duration_ms <= 0.0 {
            return Err(Error::ParameterError(format!(
                "emission 'duration_ms' must be > 0, but is '{}'",
                self.duration_ms
            )));
        }
        if !(0.0..=1.0).contains(&self.playback_position) {
            return Err(Error::ParameterError(format!(
                "emission 'playback_position' must be in range [0, 1], but is '{}'",
                self.playback_position
            )));
        }
        if !self.pitch.is_finite() || self.pitch <= 0.0 {
            return Err(Error::ParameterError(format!(
                "emission 'pitch' must be > 0, but is '{}'",
                self.pitch
            )));
        }
        if !(0.0..=1.0).contains(&self.volume) {
            return Err(Error::ParameterError(format!(
                "emission 'volume' must be in range [0, 1], but is '{}'",
                self.volume
            )));
        }
        if !(0.0..=1.0).contains(&self.pitch_jitter) || !(0.0..=1.0).contains(&self.volume_jitter)
        {
            return Err(Error::ParameterError(
                "emission jitter values must be in range [0, 1]".to_string(),
            ));
        }
        if self.filter.is_some_and(|f| !f.is_finite()) {
            return Err(Error::ParameterError(
                "emission 'filter' coefficients must be finite".to_string(),
            ));
        }
        Ok(())
    }
}

// -------------------------------------------------------------------------------------------------

/// Scheduling state of an emitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum EmitterState {
    /// Not attached to a voice: emits nothing.
    Idle,
    /// Attached to a voice: emits grains on cadence.
    Active,
}

// -------------------------------------------------------------------------------------------------

/// Timing and resource context for [`Emitter::tick`].
#[derive(Debug, Clone, Copy)]
pub struct TickContext<'a> {
    /// Output sample rate.
    pub sample_rate: u32,
    /// How far ahead of the clock grains get scheduled, in samples.
    pub lookahead: SampleTime,
    /// Upper bound of grains a single tick may emit.
    pub max_grains: usize,
    /// Clips the emitter reads from.
    pub library: &'a ClipLibrary,
}

// -------------------------------------------------------------------------------------------------

/// A logical sound source at a world position, which requests new grains on cadence while it's
/// attached to a voice.
///
/// Voice binding is managed by the [`VoiceAllocator`](crate::VoiceAllocator).
#[derive(Debug, Clone)]
pub struct Emitter {
    id: EmitterId,
    position: Vector3,
    properties: EmissionProperties,
    last_grain_start: SampleTime,
    attached_voice: Option<usize>,
    in_range: bool,
    enabled: bool,
    warned_invalid_clip: bool,
    rng: SmallRng,
}

impl Emitter {
    /// Create a new, idle emitter with a unique id.
    pub fn new(position: Vector3, properties: EmissionProperties) -> Self {
        Self::with_id(unique_usize_id(), position, properties)
    }

    /// Create a new, idle emitter with the given id. Randomization is seeded from the id, so
    /// emitters with equal ids and properties produce equal grains.
    pub fn with_id(id: EmitterId, position: Vector3, properties: EmissionProperties) -> Self {
        Self {
            id,
            position,
            properties,
            last_grain_start: 0,
            attached_voice: None,
            in_range: false,
            enabled: true,
            warned_invalid_clip: false,
            rng: SmallRng::seed_from_u64(id as u64),
        }
    }

    pub fn id(&self) -> EmitterId {
        self.id
    }

    pub fn position(&self) -> Vector3 {
        self.position
    }
    pub fn set_position(&mut self, position: Vector3) {
        self.position = position;
    }

    pub fn properties(&self) -> &EmissionProperties {
        &self.properties
    }
    pub fn properties_mut(&mut self) -> &mut EmissionProperties {
        &mut self.properties
    }

    /// Start time of the most recently emitted grain.
    pub fn last_grain_start(&self) -> SampleTime {
        self.last_grain_start
    }

    /// Index of the voice this emitter currently is bound to.
    pub fn attached_voice(&self) -> Option<usize> {
        self.attached_voice
    }

    /// Result of the last range test against the listener.
    pub fn in_range(&self) -> bool {
        self.in_range
    }
    pub(crate) fn set_in_range(&mut self, in_range: bool) {
        self.in_range = in_range;
    }

    /// Disabled emitters emit no grains and release their voice in the next allocation pass.
    /// Grains they already scheduled still play out.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn state(&self) -> EmitterState {
        if self.attached_voice.is_some() {
            EmitterState::Active
        } else {
            EmitterState::Idle
        }
    }

    /// Idle -> Active: bind to the given voice. Grain scheduling continues from `now`, so the
    /// emitter does not catch up on the time it spent idle.
    pub(crate) fn activate(&mut self, voice_index: usize, now: SampleTime) {
        debug_assert!(self.attached_voice.is_none(), "Emitter is already active");
        self.attached_voice = Some(voice_index);
        self.last_grain_start = self.last_grain_start.max(now);
    }

    /// Active -> Idle: release the bound voice, if any.
    pub(crate) fn deactivate(&mut self) -> Option<usize> {
        self.attached_voice.take()
    }

    /// Current cadence in samples. May be zero or negative for misconfigured emitters.
    pub fn cadence_in_samples(&self, sample_rate: u32) -> i64 {
        ms_to_samples(self.properties.cadence_ms, sample_rate)
    }

    /// Emit all grains which are due up to `now + lookahead` into `output`. Returns the number
    /// of emitted grains.
    ///
    /// Grains are placed exactly one cadence apart, in strictly increasing start time order,
    /// also when ticks arrive at irregular intervals. When the cadence is not a positive number
    /// of samples, at most one grain is emitted per tick. In any case, a tick never emits more
    /// than `context.max_grains` grains: when the backlog is larger, the rest is skipped.
    pub fn tick(&mut self, now: SampleTime, context: &TickContext, output: &mut Vec<Grain>) -> usize {
        let Some(voice_index) = self.attached_voice else {
            return 0;
        };
        if !self.enabled {
            // paused time is skipped, not caught up on when enabled again
            self.last_grain_start = self.last_grain_start.max(now);
            return 0;
        }
        if context.max_grains == 0 {
            return 0;
        }

        let horizon = now + context.lookahead;
        let mut emitted = 0;

        let cadence = self.cadence_in_samples(context.sample_rate);
        if cadence <= 0 {
            let start = now.max(self.last_grain_start + 1);
            if start <= horizon {
                self.emit(start, voice_index, context, output);
                emitted += 1;
            }
            return emitted;
        }

        let mut cadence = cadence as SampleTime;
        while self.last_grain_start + cadence <= horizon {
            if emitted == context.max_grains {
                let skipped_until = horizon - cadence;
                log::debug!(
                    "Emitter #{} skips its grain backlog from sample {} to {}",
                    self.id,
                    self.last_grain_start,
                    skipped_until
                );
                self.last_grain_start = skipped_until;
                break;
            }
            let start = self.last_grain_start + cadence;
            self.emit(start, voice_index, context, output);
            emitted += 1;
            // cadence may get changed between grains by automation
            cadence = self.cadence_in_samples(context.sample_rate).max(1) as SampleTime;
        }
        emitted
    }

    fn emit(
        &mut self,
        start: SampleTime,
        voice_index: usize,
        context: &TickContext,
        output: &mut Vec<Grain>,
    ) {
        debug_assert!(start > self.last_grain_start || self.last_grain_start == 0);
        self.last_grain_start = start;

        let properties = &self.properties;

        let clip_index = if properties.clip_index < context.library.len() {
            properties.clip_index
        } else {
            if !self.warned_invalid_clip {
                self.warned_invalid_clip = true;
                log::warn!(
                    "Emitter #{} refers to invalid clip #{} ({} clips present)",
                    self.id,
                    properties.clip_index,
                    context.library.len()
                );
            }
            context.library.len().saturating_sub(1)
        };

        let duration_samples =
            ms_to_samples(properties.duration_ms, context.sample_rate).max(1) as usize;

        let mut playback_position = if properties.playback_position.is_finite() {
            properties.playback_position.clamp(0.0, 1.0)
        } else {
            0.0
        };
        if let Some(offset) = properties.random_offset_samples.filter(|o| *o > 0) {
            if let Some(clip) = context.library.get(clip_index) {
                let frame_count = clip.frame_count().max(1);
                let offset = self.rng.random_range(0..offset);
                playback_position = (playback_position + offset as f32 / frame_count as f32)
                    .rem_euclid(1.0);
            }
        }

        let mut pitch = if properties.pitch.is_finite() {
            properties.pitch.max(0.001)
        } else {
            1.0
        };
        let pitch_jitter = properties.pitch_jitter.clamp(0.0, 1.0);
        if pitch_jitter > 0.0 {
            pitch *= (1.0 + pitch_jitter * (self.rng.random::<f32>() * 2.0 - 1.0)).max(0.001);
        }

        let mut volume = if properties.volume.is_finite() {
            properties.volume.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let volume_jitter = properties.volume_jitter.clamp(0.0, 1.0);
        if volume_jitter > 0.0 {
            volume *= 1.0 - volume_jitter * self.rng.random::<f32>();
        }

        output.push(
            Grain::new(
                self.id,
                clip_index,
                start,
                duration_samples,
                pitch,
                volume,
                playback_position,
                voice_index,
            )
            .with_filter(properties.filter)
            .with_bitcrush(properties.bitcrush)
            .with_window(properties.window),
        );
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clip::AudioClip;

    fn library() -> ClipLibrary {
        ClipLibrary::new().with_clip(AudioClip::mono(vec![0.0; 44100], 44100).unwrap())
    }

    fn context(library: &ClipLibrary) -> TickContext<'_> {
        TickContext {
            sample_rate: 44100,
            lookahead: 0,
            max_grains: 1024,
            library,
        }
    }

    fn active_emitter(properties: EmissionProperties) -> Emitter {
        let mut emitter = Emitter::with_id(1, Vector3::ZERO, properties);
        emitter.activate(0, 0);
        emitter
    }

    #[test]
    fn idle_emitters_emit_nothing() {
        let library = library();
        let mut emitter = Emitter::with_id(1, Vector3::ZERO, EmissionProperties::default());
        let mut grains = Vec::new();
        assert_eq!(emitter.state(), EmitterState::Idle);
        assert_eq!(emitter.tick(44100, &context(&library), &mut grains), 0);
        assert!(grains.is_empty());
    }

    #[test]
    fn cadence_at_20ms_over_one_second() {
        let library = library();
        let context = context(&library);
        let mut emitter = active_emitter(EmissionProperties::new().cadence_ms(20.0));

        // irregular control ticks at roughly 60 Hz
        let mut grains = Vec::new();
        let mut now = 0;
        while now < 44100 {
            now = (now + 700 + (now % 3) * 50).min(44100);
            emitter.tick(now, &context, &mut grains);
        }

        assert!((49..=51).contains(&grains.len()), "got {} grains", grains.len());
        for pair in grains.windows(2) {
            assert!(pair[1].start_sample > pair[0].start_sample);
            assert_eq!(pair[1].start_sample - pair[0].start_sample, 882);
        }
    }

    #[test]
    fn catch_up_and_cadence_changes() {
        let library = library();
        let context = context(&library);
        let mut emitter = active_emitter(EmissionProperties::new().cadence_ms(10.0));

        let mut grains = Vec::new();
        // one late tick schedules the whole backlog
        emitter.tick(4410, &context, &mut grains);
        assert_eq!(grains.len(), 10);

        emitter.properties_mut().cadence_ms = 5.0;
        // 5 ms round to 221 samples: 9 more grains fit into the next 2205 samples
        emitter.tick(4410 + 2205, &context, &mut grains);
        assert_eq!(grains.len(), 19);
        assert_eq!(grains[10].start_sample - grains[9].start_sample, 221);
        for pair in grains.windows(2) {
            assert!(pair[1].start_sample > pair[0].start_sample);
        }
    }

    #[test]
    fn lookahead_schedules_ahead_of_now() {
        let library = library();
        let mut context = context(&library);
        context.lookahead = 4410;
        let mut emitter = active_emitter(EmissionProperties::new().cadence_ms(10.0));
        let mut grains = Vec::new();
        emitter.tick(0, &context, &mut grains);
        assert_eq!(grains.len(), 10);
        assert_eq!(grains.last().unwrap().start_sample, 4410);
        // nothing new is due until the clock moves on
        emitter.tick(0, &context, &mut grains);
        assert_eq!(grains.len(), 10);
    }

    #[test]
    fn non_positive_cadence_is_bounded() {
        let library = library();
        let context = context(&library);
        for cadence_ms in [0.0, -5.0, 0.00001, f32::NAN] {
            let mut emitter = active_emitter(EmissionProperties::new().cadence_ms(cadence_ms));
            let mut grains = Vec::new();
            for now in [100, 100, 200, 5000] {
                assert!(emitter.tick(now, &context, &mut grains) <= 1);
            }
            assert_eq!(grains.len(), 3, "cadence {cadence_ms}");
            for pair in grains.windows(2) {
                assert!(pair[1].start_sample > pair[0].start_sample);
            }
        }
    }

    #[test]
    fn max_grains_per_tick_skips_backlog() {
        let library = library();
        let mut context = context(&library);
        context.max_grains = 4;
        let mut emitter = active_emitter(EmissionProperties::new().cadence_ms(1.0));
        let mut grains = Vec::new();
        assert_eq!(emitter.tick(44100, &context, &mut grains), 4);
        assert_eq!(emitter.last_grain_start(), 44100 - 44);
        assert_eq!(emitter.tick(44100, &context, &mut grains), 1);
        assert_eq!(grains.last().unwrap().start_sample, 44100);
        for pair in grains.windows(2) {
            assert!(pair[1].start_sample > pair[0].start_sample);
        }
    }

    #[test]
    fn disabled_emitters_stop_emitting() {
        let library = library();
        let context = context(&library);
        let mut emitter = active_emitter(EmissionProperties::new().cadence_ms(10.0));
        emitter.set_enabled(false);
        let mut grains = Vec::new();
        assert_eq!(emitter.tick(44100, &context, &mut grains), 0);
        assert_eq!(emitter.last_grain_start(), 44100);

        // re-enabled emitters continue on cadence from the current time
        emitter.set_enabled(true);
        assert_eq!(emitter.tick(44100 + 441, &context, &mut grains), 1);
        assert_eq!(grains[0].start_sample, 44100 + 441);
    }

    #[test]
    fn grain_properties_are_clamped() {
        let library = library();
        let context = context(&library);
        let mut emitter = active_emitter(
            EmissionProperties::new()
                .cadence_ms(10.0)
                .duration_ms(-1.0)
                .volume(3.0)
                .pitch(-2.0)
                .playback_position(7.0)
                .clip_index(12),
        );
        assert!(emitter.properties().validate().is_err());
        let mut grains = Vec::new();
        emitter.tick(441, &context, &mut grains);
        let grain = &grains[0];
        assert_eq!(grain.clip_index, 0);
        assert_eq!(grain.duration_samples, 1);
        assert_eq!(grain.volume, 1.0);
        assert!(grain.pitch > 0.0);
        assert_eq!(grain.playback_position, 1.0);
        assert_eq!(grain.target_voice, 0);
        assert_eq!(grain.emitter_id, 1);
    }

    #[test]
    fn randomization_is_reproducible() {
        let library = library();
        let context = context(&library);
        let properties = EmissionProperties::new()
            .cadence_ms(10.0)
            .random_offset_samples(4410)
            .pitch_jitter(0.5)
            .volume_jitter(0.5);
        let mut a = active_emitter(properties.clone());
        let mut b = active_emitter(properties);
        let (mut grains_a, mut grains_b) = (Vec::new(), Vec::new());
        a.tick(44100, &context, &mut grains_a);
        b.tick(44100, &context, &mut grains_b);
        for (a, b) in grains_a.iter().zip(&grains_b) {
            assert_eq!(a.playback_position, b.playback_position);
            assert_eq!(a.pitch, b.pitch);
            assert_eq!(a.volume, b.volume);
            assert!((0.0..0.1).contains(&a.playback_position));
            assert!((0.5..=1.5).contains(&a.pitch));
            assert!((0.5..=1.0).contains(&a.volume));
        }
    }

    #[test]
    fn volume_in_decibels() {
        assert_eq!(EmissionProperties::new().volume_db(0.0).volume, 1.0);
        assert!((EmissionProperties::new().volume_db(-6.0).volume - 0.501).abs() < 0.001);
        assert_eq!(EmissionProperties::new().volume_db(-200.0).volume, 0.0);
    }
}
