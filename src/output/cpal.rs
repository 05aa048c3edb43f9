use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread,
};

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    StreamConfig,
};
use crossbeam_channel::{bounded, Receiver, Sender};

use crate::{
    error::Error,
    output::{OutputDevice, OutputSink},
};

// -------------------------------------------------------------------------------------------------

const PREFERRED_SAMPLE_FORMAT: cpal::SampleFormat = cpal::SampleFormat::F32;
const PREFERRED_BUFFER_SIZE: cpal::BufferSize = if cfg!(debug_assertions) {
    cpal::BufferSize::Default
} else {
    cpal::BufferSize::Fixed(1024)
};

// -------------------------------------------------------------------------------------------------

/// Plays an [`OutputSink`], usually a [`MixerOutput`](crate::MixerOutput), on the system's
/// default audio output device.
///
/// The device gets opened with the sink's channel layout and the requested sample rate, using
/// 32 bit float samples. The stream is owned by a dedicated thread, which gets controlled via
/// messages, as cpal streams can not be moved across threads on all platforms.
pub struct CpalOutput {
    channel_count: usize,
    sample_rate: u32,
    volume: f32,
    playback_pos: Arc<AtomicU64>,
    callback_send: Sender<CallbackMsg>,
    stream_send: Sender<StreamMsg>,
    stream_thread: Option<thread::JoinHandle<()>>,
}

impl CpalOutput {
    /// Open the default output device and start pulling audio from the given sink.
    pub fn open<S: OutputSink>(sink: S, sample_rate: u32) -> Result<Self, Error> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(cpal::DefaultStreamConfigError::DeviceNotAvailable)?;

        if let Ok(name) = device.name() {
            log::info!("Using audio device: {name}");
        }

        let channel_count = sink.channel_count();
        let supported = Self::output_config(&device, channel_count, sample_rate)?;
        let config = StreamConfig {
            buffer_size: PREFERRED_BUFFER_SIZE,
            ..supported.config()
        };

        let playback_pos = Arc::new(AtomicU64::new(0));
        let (callback_send, callback_recv) = bounded(16);
        let (stream_send, stream_recv) = bounded(16);
        let (open_send, open_recv) = bounded(1);

        let stream_thread = thread::Builder::new()
            .name("graincore-audio-output".to_string())
            .spawn({
                let playback_pos = Arc::clone(&playback_pos);
                move || {
                    let callback = StreamCallback {
                        callback_recv,
                        sink,
                        channel_count,
                        playback_pos,
                        state: CallbackState::Playing,
                        volume: 1.0,
                    };
                    match Stream::open(device, config, callback) {
                        Ok(stream) => {
                            let _ = open_send.send(Ok(()));
                            stream.run(stream_recv);
                        }
                        Err(err) => {
                            let _ = open_send.send(Err(err));
                        }
                    }
                }
            })?;

        // wait until the stream got opened
        open_recv.recv().map_err(|_| {
            Error::OutputDeviceError("Audio output thread died while opening the stream".into())
        })??;

        Ok(Self {
            channel_count,
            sample_rate,
            volume: 1.0,
            playback_pos,
            callback_send,
            stream_send,
            stream_thread: Some(stream_thread),
        })
    }

    fn output_config(
        device: &cpal::Device,
        channel_count: usize,
        sample_rate: u32,
    ) -> Result<cpal::SupportedStreamConfig, Error> {
        let sample_rate = cpal::SampleRate(sample_rate);
        for config in device.supported_output_configs()? {
            let rates = config.min_sample_rate()..=config.max_sample_rate();
            if config.channels() as usize == channel_count
                && config.sample_format() == PREFERRED_SAMPLE_FORMAT
                && rates.contains(&sample_rate)
            {
                return Ok(config.with_sample_rate(sample_rate));
            }
        }
        Err(Error::OutputDeviceError(
            format!(
                "Audio device does not support {channel_count} channels at {} Hz in f32 format",
                sample_rate.0
            )
            .into(),
        ))
    }

    fn send_to_callback(&self, msg: CallbackMsg) {
        if self.callback_send.send(msg).is_err() {
            log::error!("Output stream callback is dead");
        }
    }

    fn send_to_stream(&self, msg: StreamMsg) {
        if self.stream_send.send(msg).is_err() {
            log::error!("Output stream thread is dead");
        }
    }
}

impl OutputDevice for CpalOutput {
    fn channel_count(&self) -> usize {
        self.channel_count
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn frame_position(&self) -> u64 {
        self.playback_pos.load(Ordering::Relaxed)
    }

    fn volume(&self) -> f32 {
        self.volume
    }
    fn set_volume(&mut self, volume: f32) {
        self.volume = volume;
        self.send_to_callback(CallbackMsg::SetVolume(volume));
    }

    fn pause(&mut self) {
        self.send_to_stream(StreamMsg::Pause);
        self.send_to_callback(CallbackMsg::Pause);
    }

    fn resume(&mut self) {
        self.send_to_callback(CallbackMsg::Resume);
        self.send_to_stream(StreamMsg::Resume);
    }

    fn close(&mut self) {
        if let Some(stream_thread) = self.stream_thread.take() {
            self.send_to_stream(StreamMsg::Close);
            if let Err(payload) = stream_thread.join() {
                log::error!(
                    "Audio output thread panicked: {}",
                    panic_message::panic_message(&payload)
                );
            }
        }
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.close();
    }
}

// -------------------------------------------------------------------------------------------------

enum StreamMsg {
    Pause,
    Resume,
    Close,
}

struct Stream {
    stream: cpal::Stream,
    _device: cpal::Device,
}

impl Stream {
    fn open<S: OutputSink>(
        device: cpal::Device,
        config: cpal::StreamConfig,
        mut callback: StreamCallback<S>,
    ) -> Result<Self, Error> {
        log::info!("Opening output stream: {config:?}");
        let stream = device.build_output_stream(
            &config,
            move |output, _| {
                callback.write_samples(output);
            },
            |err| {
                log::error!("Audio output error: {err}");
            },
            None,
        )?;
        stream.play()?;

        Ok(Self {
            _device: device,
            stream,
        })
    }

    fn run(self, stream_recv: Receiver<StreamMsg>) {
        while let Ok(msg) = stream_recv.recv() {
            match msg {
                StreamMsg::Pause => {
                    log::debug!("Pausing audio output stream");
                    if let Err(err) = self.stream.pause() {
                        log::error!("Failed to pause stream: {err}");
                    }
                }
                StreamMsg::Resume => {
                    log::debug!("Resuming audio output stream");
                    if let Err(err) = self.stream.play() {
                        log::error!("Failed to start stream: {err}");
                    }
                }
                StreamMsg::Close => {
                    log::debug!("Closing audio output stream");
                    let _ = self.stream.pause();
                    break;
                }
            }
        }
    }
}

// -------------------------------------------------------------------------------------------------

enum CallbackMsg {
    SetVolume(f32),
    Pause,
    Resume,
}

enum CallbackState {
    Playing,
    Paused,
}

struct StreamCallback<S: OutputSink> {
    callback_recv: Receiver<CallbackMsg>,
    sink: S,
    channel_count: usize,
    playback_pos: Arc<AtomicU64>,
    state: CallbackState,
    volume: f32,
}

impl<S: OutputSink> StreamCallback<S> {
    fn write_samples(&mut self, output: &mut [f32]) {
        // Process any pending messages.
        while let Ok(msg) = self.callback_recv.try_recv() {
            match msg {
                CallbackMsg::SetVolume(volume) => {
                    self.volume = volume;
                }
                CallbackMsg::Pause => {
                    self.state = CallbackState::Paused;
                }
                CallbackMsg::Resume => {
                    self.state = CallbackState::Playing;
                }
            }
        }

        let written = if matches!(self.state, CallbackState::Playing) {
            let written = self.sink.read(output);

            // Apply the global volume level.
            if self.volume != 1.0 {
                output[..written].iter_mut().for_each(|s| *s *= self.volume);
            }

            self.playback_pos.fetch_add(
                (output.len() / self.channel_count) as u64,
                Ordering::Relaxed,
            );
            written
        } else {
            0
        };

        // Mute any remaining samples.
        output[written..].fill(0.0);
    }
}
