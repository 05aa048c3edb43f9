//! A demo showcasing spatial grain scheduling: a few emitters orbit around the listener, while a
//! smaller pool of voices follows the nearest ones.

use std::{f32::consts::PI, sync::Arc};

use graincore::{
    filters::{BiquadCoefficients, BiquadFilterType},
    utils::vector::Vector3,
    AudioClip, ClipLibrary, EmissionProperties, EmitterHandle, EngineConfig, EngineContext, Error,
    GrainScheduler, GrainWindowMode, WavOutput,
};

// -------------------------------------------------------------------------------------------------

// Common demo code
#[path = "./common/arguments.rs"]
mod arguments;

// -------------------------------------------------------------------------------------------------

#[cfg(all(debug_assertions, feature = "assert-allocs"))]
#[global_allocator]
static A: assert_no_alloc::AllocDisabler = assert_no_alloc::AllocDisabler;

// -------------------------------------------------------------------------------------------------

const SAMPLE_RATE: u32 = 44100;
const CHANNEL_COUNT: usize = 2;
const VOICE_COUNT: usize = 4;

/// Emitters orbit within this radius. Only the closer half is audible.
const ORBIT_RADIUS: f32 = 16.0;
const AUDIBLE_RANGE: f32 = 10.0;

/// Control rate of the scheduler updates.
const UPDATE_INTERVAL_MS: u64 = 10;

const DEFAULT_DURATION_SECS: f32 = 10.0;
const DEFAULT_EMITTER_COUNT: usize = 6;

// -------------------------------------------------------------------------------------------------

fn main() -> Result<(), Error> {
    // Parse optional arguments
    let args = arguments::parse();

    let duration = args.duration.unwrap_or(DEFAULT_DURATION_SECS).max(0.0);
    let emitter_count = args.emitter_count.unwrap_or(DEFAULT_EMITTER_COUNT).max(1);

    let library = Arc::new(
        ClipLibrary::new()
            .with_clip(synth_clip(&[220.0, 277.18, 329.63], 4.0)?)
            .with_clip(synth_clip(&[110.0, 164.81], 3.0)?),
    );

    let mut config = EngineConfig::new()
        .sample_rate(SAMPLE_RATE)
        .channel_count(CHANNEL_COUNT)
        .voice_count(VOICE_COUNT)
        .range(AUDIBLE_RANGE);
    if let Some(render_mode) = args.render_mode {
        config = config.render_mode(render_mode);
    }

    let (context, output) = EngineContext::new(config, Arc::clone(&library))?;
    let mut scheduler = GrainScheduler::new(context)?;

    let lowpass = BiquadCoefficients::design(
        BiquadFilterType::Lowpass,
        SAMPLE_RATE,
        2400.0,
        0.9,
        0.0,
    )?;

    let mut emitters = Vec::with_capacity(emitter_count);
    for index in 0..emitter_count {
        let mut properties = EmissionProperties::new()
            .clip_index(index % library.len())
            .cadence_ms(30.0 + 15.0 * index as f32)
            .duration_ms(120.0 + 40.0 * (index % 3) as f32)
            .playback_position(index as f32 / emitter_count as f32)
            .random_offset_samples(SAMPLE_RATE as usize / 4)
            .pitch(if index % 2 == 0 { 1.0 } else { 1.5 })
            .pitch_jitter(0.02)
            .volume_db(-12.0)
            .volume_jitter(0.3)
            .window(GrainWindowMode::Hann);
        if index % 3 == 2 {
            properties = properties.filter(lowpass).bitcrush(4);
        }
        let handle = scheduler.add_emitter(orbit_position(index, emitter_count, 0.0), properties)?;
        emitters.push(handle);
    }

    let frame_count = (duration * SAMPLE_RATE as f32) as u64;
    let update_frames = (UPDATE_INTERVAL_MS * SAMPLE_RATE as u64 / 1000) as usize;

    if let Some(output_path) = &args.output_path {
        // render offline, as fast as possible
        let mut output = output;
        let mut wav = WavOutput::create(output_path, SAMPLE_RATE, CHANNEL_COUNT)?;
        wav.render(&mut output, frame_count, update_frames, |frame_position| {
            let seconds = frame_position as f32 / SAMPLE_RATE as f32;
            move_emitters(&emitters, seconds)?;
            let summary = scheduler.update(Vector3::ZERO);
            log::debug!("{summary:?}");
            Ok(())
        })?;
        wav.finalize()?;
        println!("Rendered {duration} seconds into '{}'", output_path.display());
    } else {
        play_realtime(output, &mut scheduler, &emitters, frame_count)?;
    }

    let stats = scheduler.context().mixer().stats();
    println!(
        "Scheduled {} grains ({} late, {} truncated), {} underrun frames",
        stats.scheduled_grains, stats.late_grains, stats.truncated_grains, stats.underrun_frames
    );
    Ok(())
}

// -------------------------------------------------------------------------------------------------

#[cfg(feature = "cpal-output")]
fn play_realtime(
    output: graincore::MixerOutput,
    scheduler: &mut GrainScheduler,
    emitters: &[EmitterHandle],
    frame_count: u64,
) -> Result<(), Error> {
    use graincore::{CpalOutput, OutputDevice};
    use std::time::Duration;

    let mut device = CpalOutput::open(output, SAMPLE_RATE)?;
    let clock = Arc::clone(scheduler.context().clock());
    while clock.now() < frame_count {
        let seconds = clock.now() as f32 / SAMPLE_RATE as f32;
        move_emitters(emitters, seconds)?;
        let summary = scheduler.update(Vector3::ZERO);
        if summary.dropped_grains > 0 {
            log::warn!("{summary:?}");
        }
        std::thread::sleep(Duration::from_millis(UPDATE_INTERVAL_MS));
    }
    device.close();
    Ok(())
}

#[cfg(not(feature = "cpal-output"))]
fn play_realtime(
    _output: graincore::MixerOutput,
    _scheduler: &mut GrainScheduler,
    _emitters: &[EmitterHandle],
    _frame_count: u64,
) -> Result<(), Error> {
    Err(Error::ParameterError(
        "Realtime playback needs the 'cpal-output' feature: use --output instead".to_string(),
    ))
}

// -------------------------------------------------------------------------------------------------

fn orbit_position(index: usize, emitter_count: usize, seconds: f32) -> Vector3 {
    let speed = 0.1 + 0.05 * (index % 4) as f32;
    let angle = 2.0 * PI * (index as f32 / emitter_count as f32 + speed * seconds);
    // breathe in and out of the audible range
    let radius = ORBIT_RADIUS * (0.55 + 0.45 * (0.3 * seconds + index as f32).sin());
    Vector3::new(radius * angle.cos(), 0.0, radius * angle.sin())
}

fn move_emitters(emitters: &[EmitterHandle], seconds: f32) -> Result<(), Error> {
    for (index, emitter) in emitters.iter().enumerate() {
        emitter.set_position(orbit_position(index, emitters.len(), seconds))?;
    }
    Ok(())
}

/// Create a mono clip with a slowly swelling chord.
fn synth_clip(frequencies: &[f32], seconds: f32) -> Result<AudioClip, Error> {
    let frame_count = (seconds * SAMPLE_RATE as f32) as usize;
    let gain = 1.0 / frequencies.len() as f32;
    let samples = (0..frame_count)
        .map(|frame| {
            let time = frame as f32 / SAMPLE_RATE as f32;
            let swell = 0.5 - 0.5 * (2.0 * PI * time / seconds).cos();
            frequencies
                .iter()
                .map(|frequency| (2.0 * PI * frequency * time).sin() * gain)
                .sum::<f32>()
                * swell
        })
        .collect::<Vec<f32>>();
    AudioClip::mono(samples, SAMPLE_RATE)
}
