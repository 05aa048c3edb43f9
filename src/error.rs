use std::{error, fmt, io};

// -------------------------------------------------------------------------------------------------

/// Provides an enumeration of all possible errors reported by graincore.
#[derive(Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    ClipNotFound(usize),
    VoiceNotFound(usize),
    EmitterNotFound(usize),
    LateGrain {
        voice_index: usize,
        start_sample: u64,
        read_position: u64,
    },
    OutputDeviceError(Box<dyn error::Error + Send + Sync>),
    ParameterError(String),
    SendError(String),
    IoError(io::Error),
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClipNotFound(clip_index) => write!(f, "Audio clip #{clip_index} not found"),
            Self::VoiceNotFound(voice_index) => write!(f, "Voice #{voice_index} not found"),
            Self::EmitterNotFound(emitter_id) => {
                write!(f, "Emitter with id {emitter_id} not found")
            }
            Self::LateGrain {
                voice_index,
                start_sample,
                read_position,
            } => write!(
                f,
                "Grain at sample {start_sample} is too late for voice #{voice_index} \
                 (already read up to sample {read_position})"
            ),
            Self::OutputDeviceError(err) => err.fmt(f),
            Self::ParameterError(str) => write!(f, "Invalid parameter: {str}"),
            Self::SendError(str) => write!(f, "Failed to send message: {str}"),
            Self::IoError(err) => err.fmt(f),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::IoError(err)
    }
}

impl<T> From<crossbeam_channel::SendError<T>> for Error {
    fn from(err: crossbeam_channel::SendError<T>) -> Self {
        Error::SendError(err.to_string())
    }
}

#[cfg(feature = "cpal-output")]
impl From<cpal::DefaultStreamConfigError> for Error {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        Error::OutputDeviceError(Box::new(err))
    }
}

#[cfg(feature = "cpal-output")]
impl From<cpal::SupportedStreamConfigsError> for Error {
    fn from(err: cpal::SupportedStreamConfigsError) -> Self {
        Error::OutputDeviceError(Box::new(err))
    }
}

#[cfg(feature = "cpal-output")]
impl From<cpal::BuildStreamError> for Error {
    fn from(err: cpal::BuildStreamError) -> Self {
        Error::OutputDeviceError(Box::new(err))
    }
}

#[cfg(feature = "cpal-output")]
impl From<cpal::PlayStreamError> for Error {
    fn from(err: cpal::PlayStreamError) -> Self {
        Error::OutputDeviceError(Box::new(err))
    }
}

#[cfg(feature = "wav-output")]
impl From<hound::Error> for Error {
    fn from(err: hound::Error) -> Self {
        Error::OutputDeviceError(Box::new(err))
    }
}
