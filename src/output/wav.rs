use std::{fs::File, io::BufWriter, path::Path};

use hound::{SampleFormat, WavSpec, WavWriter};

use crate::{
    error::Error,
    output::{OutputDevice, OutputSink},
    utils::time::SampleTime,
};

// -------------------------------------------------------------------------------------------------

/// Offline audio output, which pulls audio from an [`OutputSink`] as fast as possible and writes
/// it into a wav file instead of playing it back.
///
/// Rendering is driven by the caller via [`WavOutput::render`], which interleaves control updates
/// with sink reads, so scheduling runs deterministically and can never fall behind the output.
///
/// Wav files contents are always saved as 32bit floats.
pub struct WavOutput {
    writer: Option<WavWriter<BufWriter<File>>>,
    sample_rate: u32,
    channel_count: usize,
    frame_position: u64,
    volume: f32,
    is_paused: bool,
    buffer: Vec<f32>,
}

impl WavOutput {
    /// Create a new wav file at the given path with the given specs.
    pub fn create<P: AsRef<Path>>(
        file_path: P,
        sample_rate: u32,
        channel_count: usize,
    ) -> Result<Self, Error> {
        if sample_rate == 0 || channel_count == 0 || channel_count > u16::MAX as usize {
            return Err(Error::ParameterError(format!(
                "Invalid wav file specs: {sample_rate} Hz, {channel_count} channels"
            )));
        }
        let spec = WavSpec {
            channels: channel_count as u16,
            sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let writer = WavWriter::create(file_path.as_ref(), spec)?;
        log::info!(
            "Writing wav file '{}' with {sample_rate} Hz and {channel_count} channels",
            file_path.as_ref().display()
        );
        Ok(Self {
            writer: Some(writer),
            sample_rate,
            channel_count,
            frame_position: 0,
            volume: 1.0,
            is_paused: false,
            buffer: Vec::new(),
        })
    }

    /// Pull `frame_count` frames from the given sink in blocks of `block_frames` and write them.
    ///
    /// `control` gets invoked before each block with the current output frame position. This is
    /// where grain schedulers should run their updates. Paused outputs write silence and do not
    /// pull from the sink.
    ///
    /// Returns the number of written frames.
    pub fn render<S, F>(
        &mut self,
        sink: &mut S,
        frame_count: u64,
        block_frames: usize,
        mut control: F,
    ) -> Result<u64, Error>
    where
        S: OutputSink,
        F: FnMut(SampleTime) -> Result<(), Error>,
    {
        if sink.channel_count() != self.channel_count {
            return Err(Error::ParameterError(format!(
                "Sink channel count {} does not match the wav file's channel count {}",
                sink.channel_count(),
                self.channel_count
            )));
        }
        if block_frames == 0 {
            return Err(Error::ParameterError(
                "Render block size must be > 0".to_string(),
            ));
        }
        let writer = self.writer.as_mut().ok_or_else(|| {
            Error::OutputDeviceError("Wav output got closed".into())
        })?;

        let mut remaining = frame_count;
        while remaining > 0 {
            let frames = remaining.min(block_frames as u64) as usize;
            control(self.frame_position)?;

            self.buffer.resize(frames * self.channel_count, 0.0);
            if self.is_paused {
                self.buffer.fill(0.0);
            } else {
                let written = sink.read(&mut self.buffer);
                self.buffer[written..].fill(0.0);
            }
            for sample in &self.buffer {
                writer.write_sample(*sample * self.volume)?;
            }

            self.frame_position += frames as u64;
            remaining -= frames as u64;
        }
        Ok(frame_count)
    }

    /// Flush and close the wav file.
    pub fn finalize(mut self) -> Result<(), Error> {
        self.finalize_writer()
    }

    fn finalize_writer(&mut self) -> Result<(), Error> {
        if let Some(writer) = self.writer.take() {
            writer.finalize()?;
            log::info!("Wav file written: {} frames", self.frame_position);
        }
        Ok(())
    }
}

impl OutputDevice for WavOutput {
    fn channel_count(&self) -> usize {
        self.channel_count
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn frame_position(&self) -> u64 {
        self.frame_position
    }

    fn volume(&self) -> f32 {
        self.volume
    }
    fn set_volume(&mut self, volume: f32) {
        self.volume = volume;
    }

    fn pause(&mut self) {
        self.is_paused = true;
    }

    fn resume(&mut self) {
        self.is_paused = false;
    }

    fn close(&mut self) {
        if let Err(err) = self.finalize_writer() {
            log::error!("Failed to finalize wav file: {err}");
        }
    }
}

impl Drop for WavOutput {
    fn drop(&mut self) {
        self.close();
    }
}

// -------------------------------------------------------------------------------------------------
