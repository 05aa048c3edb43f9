use crate::{
    emitter::{Emitter, EmitterState},
    utils::{time::SampleTime, vector::Vector3},
    voice::Voice,
    Error,
};

// -------------------------------------------------------------------------------------------------

/// Binds emitters to the limited pool of voices, based on their distance to the listener.
///
/// Ranges apply with hysteresis: an out of range object gets in range within the activation
/// range, and an in range object only drops out beyond the deactivation range. By default both
/// ranges are equal.
#[derive(Debug, Clone, Copy)]
pub struct VoiceAllocator {
    activation_range: f32,
    deactivation_range: f32,
}

impl VoiceAllocator {
    pub fn new(activation_range: f32, deactivation_range: f32) -> Result<Self, Error> {
        if !activation_range.is_finite() || activation_range < 0.0 {
            return Err(Error::ParameterError(format!(
                "Invalid activation range: must be >= 0, but is {activation_range}"
            )));
        }
        if deactivation_range.is_nan() || deactivation_range < activation_range {
            return Err(Error::ParameterError(format!(
                "Invalid deactivation range: must be >= activation range ({activation_range}), \
                but is {deactivation_range}"
            )));
        }
        Ok(Self {
            activation_range,
            deactivation_range,
        })
    }

    pub fn activation_range(&self) -> f32 {
        self.activation_range
    }

    pub fn deactivation_range(&self) -> f32 {
        self.deactivation_range
    }

    fn is_in_range(&self, was_in_range: bool, distance: f32) -> bool {
        if was_in_range {
            distance <= self.deactivation_range
        } else {
            distance <= self.activation_range
        }
    }

    /// Run one allocation pass. `now` is the current clock time, which newly activated emitters
    /// continue scheduling grains from.
    pub fn update(
        &self,
        listener: Vector3,
        now: SampleTime,
        voices: &mut [Voice],
        emitters: &mut [Emitter],
    ) {
        // voices which left the range release their emitters
        for voice in voices.iter_mut() {
            let was_in_range = voice.in_range();
            let in_range = voice.is_enabled()
                && self.is_in_range(was_in_range, voice.position().distance(listener));
            voice.set_in_range(in_range);
            if !in_range {
                if let Some(emitter_id) = voice.unbind() {
                    if let Some(emitter) = emitters.iter_mut().find(|e| e.id() == emitter_id) {
                        emitter.deactivate();
                    }
                    log::debug!(
                        "Voice #{} left range: released emitter #{}",
                        voice.index(),
                        emitter_id
                    );
                }
            }
        }

        // emitters which left the range or got disabled release their voices
        for emitter in emitters.iter_mut() {
            let in_range =
                self.is_in_range(emitter.in_range(), emitter.position().distance(listener));
            emitter.set_in_range(in_range);
            if !in_range || !emitter.is_enabled() {
                if let Some(voice_index) = emitter.deactivate() {
                    if let Some(voice) = voices.get_mut(voice_index) {
                        voice.unbind();
                    }
                    log::debug!(
                        "Emitter #{} {}: released voice #{}",
                        emitter.id(),
                        if in_range { "got disabled" } else { "left range" },
                        voice_index
                    );
                }
            }
        }

        // idle, enabled emitters in range claim a voice
        for emitter in emitters.iter_mut() {
            if !emitter.in_range()
                || !emitter.is_enabled()
                || emitter.state() == EmitterState::Active
            {
                continue;
            }
            let position = emitter.position();
            let nearest_voice = voices
                .iter()
                .filter(|voice| voice.in_range() && !voice.is_bound())
                .fold(None::<(usize, f32)>, |nearest, voice| {
                    let distance = voice.position().distance(position);
                    match nearest {
                        Some((_, nearest_distance)) if nearest_distance <= distance => nearest,
                        _ => Some((voice.index(), distance)),
                    }
                })
                .map(|(index, _)| index);

            let voice = if let Some(index) = nearest_voice {
                voices.iter_mut().find(|voice| voice.index() == index)
            } else if let Some(voice) = voices
                .iter_mut()
                .find(|voice| voice.is_enabled() && voice.is_inactive())
            {
                voice.set_position(position);
                voice.set_in_range(true);
                log::debug!(
                    "Relocated voice #{} to emitter #{}",
                    voice.index(),
                    emitter.id()
                );
                Some(voice)
            } else {
                None
            };

            match voice {
                Some(voice) => {
                    voice.bind(emitter.id());
                    emitter.activate(voice.index(), now);
                    log::debug!("Bound emitter #{} to voice #{}", emitter.id(), voice.index());
                }
                None => {
                    log::debug!("No free voice for emitter #{}: staying idle", emitter.id());
                }
            }
        }

        debug_assert!(Self::bindings_are_consistent(voices, emitters));
    }

    fn bindings_are_consistent(voices: &[Voice], emitters: &[Emitter]) -> bool {
        voices.iter().all(|voice| match voice.connected_emitter() {
            Some(emitter_id) => {
                emitters
                    .iter()
                    .filter(|e| e.attached_voice() == Some(voice.index()))
                    .count()
                    == 1
                    && emitters
                        .iter()
                        .any(|e| e.id() == emitter_id && e.attached_voice() == Some(voice.index()))
            }
            None => emitters
                .iter()
                .all(|e| e.attached_voice() != Some(voice.index())),
        })
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::EmissionProperties;

    fn voices(positions: &[[f32; 3]]) -> Vec<Voice> {
        positions
            .iter()
            .enumerate()
            .map(|(index, position)| Voice::new(index, Vector3::from(*position)))
            .collect()
    }

    fn emitters(positions: &[[f32; 3]]) -> Vec<Emitter> {
        positions
            .iter()
            .enumerate()
            .map(|(index, position)| {
                Emitter::with_id(100 + index, Vector3::from(*position), EmissionProperties::new())
            })
            .collect()
    }

    #[test]
    fn invalid_ranges() {
        assert!(VoiceAllocator::new(-1.0, 10.0).is_err());
        assert!(VoiceAllocator::new(10.0, 5.0).is_err());
        assert!(VoiceAllocator::new(f32::NAN, 5.0).is_err());
        assert!(VoiceAllocator::new(5.0, 5.0).is_ok());
    }

    #[test]
    fn binds_nearest_free_voice() {
        let allocator = VoiceAllocator::new(10.0, 10.0).unwrap();
        let mut voices = voices(&[[5.0, 0.0, 0.0], [-2.0, 0.0, 0.0], [-1.0, 0.0, 0.0]]);
        let mut emitters = emitters(&[[-3.0, 0.0, 0.0], [-3.0, 0.0, 0.0]]);
        allocator.update(Vector3::ZERO, 100, &mut voices, &mut emitters);

        assert_eq!(emitters[0].attached_voice(), Some(1));
        assert_eq!(emitters[1].attached_voice(), Some(2));
        assert_eq!(emitters[0].last_grain_start(), 100);
        assert_eq!(voices[1].connected_emitter(), Some(100));
        assert_eq!(voices[2].connected_emitter(), Some(101));
        assert!(!voices[0].is_bound());
    }

    #[test]
    fn never_binds_a_voice_twice() {
        let allocator = VoiceAllocator::new(10.0, 10.0).unwrap();
        let mut voices = voices(&[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]]);
        let mut emitters = emitters(&[[0.0; 3], [0.0; 3], [0.0; 3], [0.0; 3]]);
        for now in 0..4 {
            allocator.update(Vector3::ZERO, now, &mut voices, &mut emitters);
            let active = emitters
                .iter()
                .filter(|e| e.state() == EmitterState::Active)
                .count();
            assert_eq!(active, 2);
            let mut bound = emitters
                .iter()
                .filter_map(|e| e.attached_voice())
                .collect::<Vec<_>>();
            bound.sort();
            assert_eq!(bound, vec![0, 1]);
        }
        // remaining emitters stay idle
        assert_eq!(emitters[2].state(), EmitterState::Idle);
        assert_eq!(emitters[3].state(), EmitterState::Idle);
    }

    #[test]
    fn relocates_inactive_voices() {
        let allocator = VoiceAllocator::new(10.0, 10.0).unwrap();
        let mut voices = voices(&[[100.0, 0.0, 0.0], [200.0, 0.0, 0.0]]);
        let mut emitters = emitters(&[[3.0, 4.0, 0.0]]);
        allocator.update(Vector3::ZERO, 0, &mut voices, &mut emitters);

        assert_eq!(emitters[0].attached_voice(), Some(0));
        assert_eq!(voices[0].position(), Vector3::new(3.0, 4.0, 0.0));
        assert!(voices[0].in_range());
        assert!(!voices[1].in_range());
    }

    #[test]
    fn emitters_out_of_range_release_their_voice() {
        let allocator = VoiceAllocator::new(10.0, 10.0).unwrap();
        let mut voices = voices(&[[0.0, 0.0, 0.0]]);
        let mut emitters = emitters(&[[1.0, 0.0, 0.0]]);
        allocator.update(Vector3::ZERO, 0, &mut voices, &mut emitters);
        assert_eq!(emitters[0].state(), EmitterState::Active);

        emitters[0].set_position(Vector3::new(50.0, 0.0, 0.0));
        allocator.update(Vector3::ZERO, 10, &mut voices, &mut emitters);
        assert_eq!(emitters[0].state(), EmitterState::Idle);
        assert!(!voices[0].is_bound());
        assert!(voices[0].in_range());

        // coming back reactivates at the current clock time
        emitters[0].set_position(Vector3::new(1.0, 0.0, 0.0));
        allocator.update(Vector3::ZERO, 5000, &mut voices, &mut emitters);
        assert_eq!(emitters[0].attached_voice(), Some(0));
        assert_eq!(emitters[0].last_grain_start(), 5000);
    }

    #[test]
    fn voices_out_of_range_release_their_emitter() {
        let allocator = VoiceAllocator::new(10.0, 10.0).unwrap();
        let mut voices = voices(&[[0.0, 0.0, 0.0]]);
        let mut emitters = emitters(&[[0.0, 0.0, 0.0]]);
        allocator.update(Vector3::ZERO, 0, &mut voices, &mut emitters);
        assert_eq!(emitters[0].state(), EmitterState::Active);

        // listener moves away from the voice, but stays close to a far away emitter
        voices[0].set_position(Vector3::new(-20.0, 0.0, 0.0));
        emitters[0].set_position(Vector3::new(20.0, 0.0, 0.0));
        allocator.update(Vector3::new(20.0, 0.0, 0.0), 0, &mut voices, &mut emitters);
        // the emitter got released first, then rebound to the relocated voice
        assert_eq!(emitters[0].attached_voice(), Some(0));
        assert_eq!(voices[0].position(), Vector3::new(20.0, 0.0, 0.0));
        assert_eq!(voices[0].connected_emitter(), Some(100));
    }

    #[test]
    fn disabled_voices_are_never_claimed() {
        let allocator = VoiceAllocator::new(10.0, 10.0).unwrap();
        let mut voices = voices(&[[0.0, 0.0, 0.0]]);
        voices[0].set_enabled(false);
        let mut emitters = emitters(&[[0.0, 0.0, 0.0]]);
        allocator.update(Vector3::ZERO, 0, &mut voices, &mut emitters);
        assert_eq!(emitters[0].state(), EmitterState::Idle);
    }

    #[test]
    fn disabled_emitters_release_their_voice() {
        let allocator = VoiceAllocator::new(10.0, 10.0).unwrap();
        let mut voices = voices(&[[0.0, 0.0, 0.0]]);
        let mut emitters = emitters(&[[1.0, 0.0, 0.0], [2.0, 0.0, 0.0]]);
        allocator.update(Vector3::ZERO, 0, &mut voices, &mut emitters);
        assert_eq!(emitters[0].attached_voice(), Some(0));
        assert_eq!(emitters[1].state(), EmitterState::Idle);

        // the waiting emitter takes over the voice
        emitters[0].set_enabled(false);
        allocator.update(Vector3::ZERO, 100, &mut voices, &mut emitters);
        assert_eq!(emitters[0].state(), EmitterState::Idle);
        assert!(emitters[0].in_range());
        assert_eq!(emitters[1].attached_voice(), Some(0));
        assert_eq!(voices[0].connected_emitter(), Some(101));

        // re-enabled emitters wait for a free voice again
        emitters[0].set_enabled(true);
        emitters[1].set_enabled(false);
        allocator.update(Vector3::ZERO, 5000, &mut voices, &mut emitters);
        assert_eq!(emitters[0].attached_voice(), Some(0));
        assert_eq!(emitters[0].last_grain_start(), 5000);
        assert_eq!(emitters[1].state(), EmitterState::Idle);
    }

    #[test]
    fn hysteresis() {
        let allocator = VoiceAllocator::new(10.0, 15.0).unwrap();
        let mut voices = voices(&[[0.0, 0.0, 0.0]]);
        let mut emitters = emitters(&[[12.0, 0.0, 0.0]]);
        allocator.update(Vector3::ZERO, 0, &mut voices, &mut emitters);
        assert_eq!(emitters[0].state(), EmitterState::Idle);

        emitters[0].set_position(Vector3::new(9.0, 0.0, 0.0));
        allocator.update(Vector3::ZERO, 0, &mut voices, &mut emitters);
        assert_eq!(emitters[0].state(), EmitterState::Active);

        emitters[0].set_position(Vector3::new(12.0, 0.0, 0.0));
        allocator.update(Vector3::ZERO, 0, &mut voices, &mut emitters);
        assert_eq!(emitters[0].state(), EmitterState::Active);

        emitters[0].set_position(Vector3::new(16.0, 0.0, 0.0));
        allocator.update(Vector3::ZERO, 0, &mut voices, &mut emitters);
        assert_eq!(emitters[0].state(), EmitterState::Idle);
    }
}
