use strum::{Display, EnumIter, EnumString};

use crate::{utils::time::ms_to_samples, Error};

// -------------------------------------------------------------------------------------------------

/// Which [`RenderEngine`](crate::RenderEngine) a scheduler should render its grains with.
#[derive(Default, Clone, Copy, PartialEq, Eq, Debug, Display, EnumIter, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum RenderMode {
    /// Render all grains on the control thread.
    Sequential,
    /// Render grains in a fixed-size worker thread pool.
    #[default]
    Parallel,
}

// -------------------------------------------------------------------------------------------------

/// Options for setting up a grain engine.
///
/// All fields have sensible defaults: customize them with the builder functions, then pass the
/// config to [`EngineContext::new`](crate::EngineContext::new), which validates it.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Output sample rate in Hz. By default 44100.
    pub sample_rate: u32,
    /// Number of interleaved output channels. Voices are mixed into all of them. By default 2.
    pub channel_count: usize,
    /// Size of the fixed voice pool. By default 8.
    pub voice_count: usize,
    /// Capacity of each voice's ring buffer in milliseconds. Must be larger than the lookahead
    /// plus the longest grain. By default 1000 ms.
    pub ring_buffer_ms: f32,
    /// How far ahead of the clock grains get scheduled in milliseconds. Should cover at least
    /// one control update period plus one output callback. By default 50 ms.
    pub lookahead_ms: f32,
    /// Listener distance at which emitters and voices get in range. By default 10.0.
    pub activation_range: f32,
    /// Listener distance beyond which emitters and voices drop out of range. Must be >= the
    /// activation range. By default 10.0: no hysteresis.
    pub deactivation_range: f32,
    /// Max number of grains a single emitter may emit in one control update. By default 64.
    pub max_grains_per_tick: usize,
    /// Max grain length in milliseconds. Longer grains get shortened. By default 500 ms.
    pub max_grain_ms: f32,
    /// Number of preallocated grain render buffers. When all are in use, new grains get
    /// dropped. By default 256.
    pub grain_pool_size: usize,
    /// Render engine to use. By default parallel.
    pub render_mode: RenderMode,
    /// Worker threads of the parallel render engine. By default the number of CPUs.
    pub worker_threads: usize,
    /// Capacity of each emitter's automation message queue. By default 256.
    pub message_queue_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channel_count: 2,
            voice_count: 8,
            ring_buffer_ms: 1000.0,
            lookahead_ms: 50.0,
            activation_range: 10.0,
            deactivation_range: 10.0,
            max_grains_per_tick: 64,
            max_grain_ms: 500.0,
            grain_pool_size: 256,
            render_mode: RenderMode::default(),
            worker_threads: num_cpus::get().max(1),
            message_queue_size: 256,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn channel_count(mut self, channel_count: usize) -> Self {
        self.channel_count = channel_count;
        self
    }

    pub fn voice_count(mut self, voice_count: usize) -> Self {
        self.voice_count = voice_count;
        self
    }

    pub fn ring_buffer_ms(mut self, ring_buffer_ms: f32) -> Self {
        self.ring_buffer_ms = ring_buffer_ms;
        self
    }

    pub fn lookahead_ms(mut self, lookahead_ms: f32) -> Self {
        self.lookahead_ms = lookahead_ms;
        self
    }

    /// Set activation and deactivation range to the same value.
    pub fn range(mut self, range: f32) -> Self {
        self.activation_range = range;
        self.deactivation_range = range;
        self
    }

    pub fn activation_range(mut self, range: f32) -> Self {
        self.activation_range = range;
        self
    }

    pub fn deactivation_range(mut self, range: f32) -> Self {
        self.deactivation_range = range;
        self
    }

    pub fn max_grains_per_tick(mut self, max_grains: usize) -> Self {
        self.max_grains_per_tick = max_grains;
        self
    }

    pub fn max_grain_ms(mut self, max_grain_ms: f32) -> Self {
        self.max_grain_ms = max_grain_ms;
        self
    }

    pub fn grain_pool_size(mut self, pool_size: usize) -> Self {
        self.grain_pool_size = pool_size;
        self
    }

    pub fn render_mode(mut self, render_mode: RenderMode) -> Self {
        self.render_mode = render_mode;
        self
    }

    pub fn worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads;
        self
    }

    pub fn message_queue_size(mut self, queue_size: usize) -> Self {
        self.message_queue_size = queue_size;
        self
    }

    /// Ring buffer capacity per voice in samples.
    pub fn ring_buffer_samples(&self) -> usize {
        ms_to_samples(self.ring_buffer_ms, self.sample_rate).max(0) as usize
    }

    /// Lookahead in samples.
    pub fn lookahead_samples(&self) -> u64 {
        ms_to_samples(self.lookahead_ms, self.sample_rate).max(0) as u64
    }

    /// Max grain length in samples.
    pub fn max_grain_samples(&self) -> usize {
        ms_to_samples(self.max_grain_ms, self.sample_rate).max(0) as usize
    }

    /// Validate all parameters. Returns Error::ParameterError on errors.
    pub fn validate(&self) -> Result<(), Error> {
        if self.sample_rate == 0 {
            return Err(Error::ParameterError(
                "engine config 'sample_rate' must be > 0".to_string(),
            ));
        }
        if self.channel_count == 0 {
            return Err(Error::ParameterError(
                "engine config 'channel_count' must be > 0".to_string(),
            ));
        }
        if self.voice_count == 0 {
            return Err(Error::ParameterError(
                "engine config 'voice_count' must be > 0".to_string(),
            ));
        }
        if self.lookahead_ms < 0.0 || self.lookahead_ms.is_nan() {
            return Err(Error::ParameterError(format!(
                "engine config 'lookahead_ms' value is '{}'",
                self.lookahead_ms
            )));
        }
        if self.max_grain_samples() == 0 {
            return Err(Error::ParameterError(format!(
                "engine config 'max_grain_ms' value is '{}'",
                self.max_grain_ms
            )));
        }
        let required_ring_samples = self.lookahead_samples() as usize + self.max_grain_samples();
        if self.ring_buffer_samples() < required_ring_samples {
            return Err(Error::ParameterError(format!(
                "engine config 'ring_buffer_ms' value '{}' is too small: must be >= \
                 lookahead_ms + max_grain_ms ({} ms)",
                self.ring_buffer_ms,
                self.lookahead_ms + self.max_grain_ms
            )));
        }
        if self.activation_range < 0.0 || !self.activation_range.is_finite() {
            return Err(Error::ParameterError(format!(
                "engine config 'activation_range' value is '{}'",
                self.activation_range
            )));
        }
        if self.deactivation_range < self.activation_range || self.deactivation_range.is_nan() {
            return Err(Error::ParameterError(format!(
                "engine config 'deactivation_range' value '{}' must be >= activation_range",
                self.deactivation_range
            )));
        }
        if self.max_grains_per_tick == 0 {
            return Err(Error::ParameterError(
                "engine config 'max_grains_per_tick' must be > 0".to_string(),
            ));
        }
        if self.grain_pool_size == 0 {
            return Err(Error::ParameterError(
                "engine config 'grain_pool_size' must be > 0".to_string(),
            ));
        }
        if self.render_mode == RenderMode::Parallel && self.worker_threads == 0 {
            return Err(Error::ParameterError(
                "engine config 'worker_threads' must be > 0".to_string(),
            ));
        }
        if self.message_queue_size == 0 {
            return Err(Error::ParameterError(
                "engine config 'message_queue_size' must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

// -------------------------------------------------------------------------------------------------
