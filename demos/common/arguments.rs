use std::path::PathBuf;

use arg::{parse_args, Args};

use graincore::RenderMode;

// -------------------------------------------------------------------------------------------------

const DEFAULT_LOG_LEVEL: log::Level = if cfg!(debug_assertions) {
    log::Level::Debug
} else {
    log::Level::Warn
};

// -------------------------------------------------------------------------------------------------

/// Default program arguments for graincore demo applications.
#[derive(Args, Debug, Default)]
#[allow(unused)]
pub struct Arguments {
    #[arg(short = "o", long = "output")]
    /// Render audio into the given wav file, instead of playing it on the default audio device.
    pub output_path: Option<PathBuf>,
    #[arg(short = "l", long = "log-level")]
    /// Set logging level to \"debug\", \"info\", \"warn\" or \"error\".
    /// By default \"debug\" in dev builds and \"warn\" in release builds.
    pub log_level: Option<log::Level>,
    #[arg(short = "d", long = "duration")]
    /// Playback duration in seconds. By default 10 seconds.
    pub duration: Option<f32>,
    #[arg(short = "e", long = "emitters")]
    /// Number of emitters which orbit around the listener. By default 6.
    pub emitter_count: Option<usize>,
    #[arg(short = "m", long = "render-mode")]
    /// Grain render mode: \"sequential\" or \"parallel\". By default \"parallel\".
    pub render_mode: Option<RenderMode>,
}

/// Parse common demo arguments and apply the log-level arg to the logger
#[allow(unused)]
pub fn parse() -> Arguments {
    // Parse args
    let args = parse_args::<Arguments>();

    create_logger(args.log_level);
    args
}

// -------------------------------------------------------------------------------------------------

/// Create default logger from arguments. Invoked from `parse`.
#[allow(unused)]
pub fn create_logger(log_level: Option<log::Level>) {
    simple_logger::SimpleLogger::new()
        .with_level(log_level.unwrap_or(DEFAULT_LOG_LEVEL).to_level_filter())
        .init()
        .expect("Failed to set logger");
}
