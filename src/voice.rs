use crate::{emitter::EmitterId, utils::vector::Vector3};

// -------------------------------------------------------------------------------------------------

/// A positioned output "speaker" channel.
///
/// Voices form a fixed pool which never grows. Each voice owns one ring buffer in the
/// [`Mixer`](crate::Mixer), addressed by the voice's index, and is bound to at most one emitter
/// at a time. Bindings are managed by the [`VoiceAllocator`](crate::VoiceAllocator).
#[derive(Debug, Clone)]
pub struct Voice {
    index: usize,
    position: Vector3,
    in_range: bool,
    enabled: bool,
    connected_emitter: Option<EmitterId>,
}

impl Voice {
    pub fn new(index: usize, position: Vector3) -> Self {
        Self {
            index,
            position,
            in_range: false,
            enabled: true,
            connected_emitter: None,
        }
    }

    /// Index of the voice in the voice pool and mixer.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn position(&self) -> Vector3 {
        self.position
    }
    pub fn set_position(&mut self, position: Vector3) {
        self.position = position;
    }

    /// Result of the last range test against the listener.
    pub fn in_range(&self) -> bool {
        self.in_range
    }
    pub(crate) fn set_in_range(&mut self, in_range: bool) {
        self.in_range = in_range;
    }

    /// Disabled voices are treated as out of range: their emitter gets released and they are
    /// never claimed. Samples which already got written into the voice's ring still play out.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Id of the emitter bound to this voice, if any.
    pub fn connected_emitter(&self) -> Option<EmitterId> {
        self.connected_emitter
    }

    pub fn is_bound(&self) -> bool {
        self.connected_emitter.is_some()
    }

    /// Voices which are neither in range nor bound may get claimed and relocated.
    pub fn is_inactive(&self) -> bool {
        !self.in_range && self.connected_emitter.is_none()
    }

    pub(crate) fn bind(&mut self, emitter_id: EmitterId) {
        debug_assert!(
            self.connected_emitter.is_none(),
            "Voice #{} is already bound",
            self.index
        );
        self.connected_emitter = Some(emitter_id);
    }

    pub(crate) fn unbind(&mut self) -> Option<EmitterId> {
        self.connected_emitter.take()
    }
}
