use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crossbeam_queue::ArrayQueue;

use crate::{
    emitter::{EmissionProperties, EmitterId},
    filter::biquad::BiquadCoefficients,
    grain::GrainWindowMode,
    utils::vector::Vector3,
    Error,
};

// -------------------------------------------------------------------------------------------------

/// Automation messages for an emitter, applied at the start of the next control update.
#[derive(Debug, Clone)]
pub enum EmitterMessage {
    SetPosition(Vector3),
    SetEnabled(bool),
    SetVolume(f32),
    SetPitch(f32),
    SetCadence(f32),
    SetDuration(f32),
    SetPlaybackPosition(f32),
    SetClip(usize),
    SetFilter(Option<BiquadCoefficients>),
    SetBitcrush(usize),
    SetWindow(GrainWindowMode),
    SetProperties(Box<EmissionProperties>),
}

// -------------------------------------------------------------------------------------------------

/// State shared between an emitter in the scheduler and its handles.
#[derive(Debug)]
pub(crate) struct EmitterSharedState {
    pub is_alive: AtomicBool,
    pub is_active: AtomicBool,
    pub message_queue: ArrayQueue<EmitterMessage>,
}

impl EmitterSharedState {
    pub fn new(message_queue_size: usize) -> Self {
        Self {
            is_alive: AtomicBool::new(true),
            is_active: AtomicBool::new(false),
            message_queue: ArrayQueue::new(message_queue_size),
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Query and automate an emitter of a [`GrainScheduler`](crate::GrainScheduler) from any thread.
///
/// Changes are queued in a bounded lock-free queue and applied at the scheduler's next control
/// update. When the queue is full, changes are rejected with `Error::SendError`.
///
/// Handles are `Send` and `Sync` so they can be sent across threads.
#[derive(Debug, Clone)]
pub struct EmitterHandle {
    emitter_id: EmitterId,
    state: Arc<EmitterSharedState>,
}

impl EmitterHandle {
    pub(crate) fn new(emitter_id: EmitterId, state: Arc<EmitterSharedState>) -> Self {
        Self { emitter_id, state }
    }

    /// Id of the emitter this handle controls.
    pub fn id(&self) -> EmitterId {
        self.emitter_id
    }

    /// false once the emitter got removed from its scheduler.
    pub fn is_alive(&self) -> bool {
        self.state.is_alive.load(Ordering::Relaxed)
    }

    /// true while the emitter is bound to a voice, as of the last control update.
    pub fn is_active(&self) -> bool {
        self.state.is_active.load(Ordering::Relaxed)
    }

    /// Queue a raw emitter message.
    pub fn send(&self, message: EmitterMessage) -> Result<(), Error> {
        if !self.is_alive() {
            return Err(Error::EmitterNotFound(self.emitter_id));
        }
        self.state
            .message_queue
            .push(message)
            .map_err(|message| self.message_queue_error(&message))
    }

    /// Move the emitter to a new world position.
    pub fn set_position(&self, position: Vector3) -> Result<(), Error> {
        self.send(EmitterMessage::SetPosition(position))
    }

    /// Disabled emitters keep their voice, but stop emitting new grains.
    pub fn set_enabled(&self, enabled: bool) -> Result<(), Error> {
        self.send(EmitterMessage::SetEnabled(enabled))
    }

    pub fn set_volume(&self, volume: f32) -> Result<(), Error> {
        self.send(EmitterMessage::SetVolume(volume))
    }

    pub fn set_pitch(&self, pitch: f32) -> Result<(), Error> {
        self.send(EmitterMessage::SetPitch(pitch))
    }

    pub fn set_cadence_ms(&self, cadence_ms: f32) -> Result<(), Error> {
        self.send(EmitterMessage::SetCadence(cadence_ms))
    }

    pub fn set_duration_ms(&self, duration_ms: f32) -> Result<(), Error> {
        self.send(EmitterMessage::SetDuration(duration_ms))
    }

    pub fn set_playback_position(&self, position: f32) -> Result<(), Error> {
        self.send(EmitterMessage::SetPlaybackPosition(position))
    }

    pub fn set_clip(&self, clip_index: usize) -> Result<(), Error> {
        self.send(EmitterMessage::SetClip(clip_index))
    }

    pub fn set_filter(&self, filter: Option<BiquadCoefficients>) -> Result<(), Error> {
        self.send(EmitterMessage::SetFilter(filter))
    }

    pub fn set_bitcrush(&self, downsample_factor: usize) -> Result<(), Error> {
        self.send(EmitterMessage::SetBitcrush(downsample_factor))
    }

    pub fn set_window(&self, window: GrainWindowMode) -> Result<(), Error> {
        self.send(EmitterMessage::SetWindow(window))
    }

    /// Replace all emission properties at once.
    pub fn set_properties(&self, properties: EmissionProperties) -> Result<(), Error> {
        self.send(EmitterMessage::SetProperties(Box::new(properties)))
    }

    fn message_queue_error(&self, message: &EmitterMessage) -> Error {
        log::warn!("Emitter #{}'s message queue is full.", self.emitter_id);
        log::warn!("Increase the message queue size to prevent this from happening...");
        Error::SendError(format!(
            "emitter #{} message queue is full: dropped {message:?}",
            self.emitter_id
        ))
    }
}
