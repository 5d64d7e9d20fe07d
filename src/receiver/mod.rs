// Clock-synchronized, adaptive reader for one binding
//
// Every consumer owns its own Receiver, and every Receiver owns its own
// inlet: consumers on the same stream never share a connection, a buffer or
// a clock estimate.
//
// State machine:
//   Idle -> Synchronizing -> Streaming <-> TimedOut
//                                  any -> Closed

pub mod aliasing;
pub mod clock;

use crate::binding::StreamBinding;
use crate::error::{AcquisitionError, Result};
use crate::transport::{PulledChunk, StreamInlet, StreamResolver};
use crate::types::DataChunk;
use aliasing::AliasingCorrector;
use clock::ClockSync;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Overrides for the rate-derived read parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverOptions {
    /// Samples required before `read` returns (default 1% of the rate)
    pub min_chunk_size: Option<usize>,
    /// Samples pulled at most per read (default one second of data)
    pub max_chunk_size: Option<usize>,
    /// Seconds to wait for `min_chunk_size` samples
    pub timeout_secs: Option<f64>,
    /// Grow `max_chunk_size` when the source backlog exceeds it
    pub auto_mode: bool,
    /// Readings averaged per clock offset estimate
    pub clock_sync_samples: usize,
    /// Timeout of a single declared-correction query
    pub clock_sync_timeout_ms: u64,
    /// Sleep between empty pulls
    pub poll_interval_ms: u64,
}

impl Default for ReceiverOptions {
    fn default() -> Self {
        Self {
            min_chunk_size: None,
            max_chunk_size: None,
            timeout_secs: None,
            auto_mode: true,
            clock_sync_samples: 10,
            clock_sync_timeout_ms: 1000,
            poll_interval_ms: 1,
        }
    }
}

/// Lifecycle of a receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ReceiverState {
    #[default]
    Idle,
    /// Offsets estimated; the first read refreshes them once more
    Synchronizing,
    Streaming,
    /// Last read timed out; the next read simply tries again
    TimedOut,
    Closed,
}

/// Counters kept by a receiver
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReceiverStats {
    pub chunks_received: u64,
    pub samples_received: u64,
    pub timeouts: u64,
    pub aliasing_corrections: u64,
    pub largest_chunk: usize,
}

/// Chunk sizing derived from the sampling rate and the user overrides
#[derive(Debug, Clone, Copy, PartialEq)]
struct ChunkSizing {
    min: usize,
    max: usize,
    timeout: f64,
    timeout_fixed: bool,
}

impl ChunkSizing {
    fn resolve(rate: f64, options: &ReceiverOptions) -> Result<Self> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(AcquisitionError::InvalidConfiguration(format!(
                "Receivers need a positive sample rate, got {}",
                rate
            )));
        }

        let min = options
            .min_chunk_size
            .unwrap_or_else(|| ((0.01 * rate).floor() as usize).max(1));
        let max = options
            .max_chunk_size
            .unwrap_or_else(|| (rate.floor() as usize).max(2 * min));

        if min == 0 || max < min {
            return Err(AcquisitionError::InvalidConfiguration(format!(
                "Invalid chunk sizes (min {}, max {})",
                min, max
            )));
        }

        let timeout = match options.timeout_secs {
            Some(t) if t.is_finite() && t > 0.0 => t,
            Some(t) => {
                return Err(AcquisitionError::InvalidConfiguration(format!(
                    "Timeout must be positive, got {}",
                    t
                )))
            }
            None => 1.5 * max as f64 / rate,
        };

        Ok(Self {
            min,
            max,
            timeout,
            timeout_fixed: options.timeout_secs.is_some(),
        })
    }
}

/// Reads channel-selected, clock-corrected chunks from one stream
pub struct Receiver {
    binding_uid: String,
    selected: Vec<usize>,
    sample_rate: f64,
    inlet: Box<dyn StreamInlet>,
    remote: bool,
    // Source correction is queried only when set
    apply_correction: bool,

    sizing: ChunkSizing,
    auto_mode: bool,
    poll_interval: Duration,
    clock_samples: usize,
    clock_timeout: Duration,
    clock: ClockSync,

    state: ReceiverState,
    pending: PulledChunk,
    local_alias: AliasingCorrector,
    source_alias: AliasingCorrector,
    stats: ReceiverStats,
}

impl Receiver {
    /// Open a fresh inlet for `binding` and synchronize clocks
    pub fn new(
        binding: &StreamBinding,
        resolver: &dyn StreamResolver,
        options: &ReceiverOptions,
    ) -> Result<Self> {
        // Validate before touching the network
        ChunkSizing::resolve(binding.sample_rate, options)?;

        let inlet = resolver.open(&binding.descriptor, binding.flags)?;
        let remote = binding.descriptor.host != resolver.local_host();
        Self::with_inlet(binding, inlet, remote, options)
    }

    /// Build a receiver over an already opened inlet
    pub fn with_inlet(
        binding: &StreamBinding,
        mut inlet: Box<dyn StreamInlet>,
        remote: bool,
        options: &ReceiverOptions,
    ) -> Result<Self> {
        let sizing = ChunkSizing::resolve(binding.sample_rate, options)?;
        let clock_timeout = Duration::from_millis(options.clock_sync_timeout_ms);
        let apply_correction = remote && binding.flags.clock_sync;
        let clock = ClockSync::estimate(
            inlet.as_mut(),
            options.clock_sync_samples,
            apply_correction,
            clock_timeout,
        )?;

        log::info!(
            "Receiver '{}' ready: chunk {}..{} samples, timeout {:.3}s, offset {:.6}s, correction {:.6}s",
            binding.binding_uid,
            sizing.min,
            sizing.max,
            sizing.timeout,
            clock.local_offset,
            clock.source_correction
        );

        Ok(Self {
            binding_uid: binding.binding_uid.clone(),
            selected: binding.selected_indices.clone(),
            sample_rate: binding.sample_rate,
            inlet,
            remote,
            apply_correction,
            sizing,
            auto_mode: options.auto_mode,
            poll_interval: Duration::from_millis(options.poll_interval_ms),
            clock_samples: options.clock_sync_samples,
            clock_timeout,
            clock,
            state: ReceiverState::Synchronizing,
            pending: PulledChunk::default(),
            local_alias: AliasingCorrector::new(),
            source_alias: AliasingCorrector::new(),
            stats: ReceiverStats::default(),
        })
    }

    /// Read the next chunk.
    ///
    /// Blocks until at least `min_chunk_size` samples arrived, or fails with
    /// a recoverable `Timeout`. Samples received before a timeout are kept
    /// and returned by the next successful read.
    pub fn read(&mut self) -> Result<DataChunk> {
        match self.state {
            ReceiverState::Closed => return Err(AcquisitionError::ReceiverClosed),
            ReceiverState::Synchronizing => self.resynchronize(),
            _ => {}
        }

        if self.auto_mode {
            self.adapt_to_backlog();
        }

        let started = Instant::now();
        while self.pending.len() < self.sizing.min {
            let room = self.sizing.max.saturating_sub(self.pending.len());
            let pulled = self.inlet.pull_chunk(room)?;
            let got_samples = !pulled.is_empty();
            self.pending.samples.extend(pulled.samples);
            self.pending.timestamps.extend(pulled.timestamps);

            if self.pending.len() >= self.sizing.min {
                break;
            }

            let elapsed = started.elapsed().as_secs_f64();
            if elapsed > self.sizing.timeout {
                self.state = ReceiverState::TimedOut;
                self.stats.timeouts += 1;
                return Err(AcquisitionError::Timeout {
                    elapsed,
                    received: self.pending.len(),
                    required: self.sizing.min,
                });
            }
            if !got_samples {
                std::thread::sleep(self.poll_interval);
            }
        }

        let chunk = self.emit();
        self.state = ReceiverState::Streaming;
        Ok(chunk)
    }

    /// Discard everything queued at the source and reset the timeline
    pub fn flush(&mut self) -> Result<usize> {
        if self.state == ReceiverState::Closed {
            return Err(AcquisitionError::ReceiverClosed);
        }
        let dropped = self.inlet.flush() + self.pending.len();
        self.pending = PulledChunk::default();
        self.local_alias.reset();
        self.source_alias.reset();
        log::debug!("Receiver '{}' flushed {} sample(s)", self.binding_uid, dropped);
        Ok(dropped)
    }

    /// Stop reading; subsequent reads fail with `ReceiverClosed`
    pub fn close(&mut self) {
        if self.state != ReceiverState::Closed {
            self.state = ReceiverState::Closed;
            self.pending = PulledChunk::default();
            log::info!("Receiver '{}' closed", self.binding_uid);
        }
    }

    pub fn binding_uid(&self) -> &str {
        &self.binding_uid
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    pub fn stats(&self) -> &ReceiverStats {
        &self.stats
    }

    pub fn clock(&self) -> ClockSync {
        self.clock
    }

    pub fn is_remote(&self) -> bool {
        self.remote
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn n_cha(&self) -> usize {
        self.selected.len()
    }

    pub fn min_chunk_size(&self) -> usize {
        self.sizing.min
    }

    pub fn max_chunk_size(&self) -> usize {
        self.sizing.max
    }

    /// Current read timeout in seconds
    pub fn timeout(&self) -> f64 {
        self.sizing.timeout
    }

    fn resynchronize(&mut self) {
        match ClockSync::estimate(
            self.inlet.as_mut(),
            self.clock_samples,
            self.apply_correction,
            self.clock_timeout,
        ) {
            Ok(clock) => self.clock = clock,
            Err(e) => log::warn!(
                "Receiver '{}' keeps its initial clock estimate: {}",
                self.binding_uid,
                e
            ),
        }
        // One-shot: later reads go straight to pulling
        self.state = ReceiverState::Streaming;
    }

    fn adapt_to_backlog(&mut self) {
        let backlog = self.inlet.samples_available();
        if backlog > self.sizing.max {
            self.sizing.max = backlog;
            if !self.sizing.timeout_fixed {
                self.sizing.timeout = 1.5 * self.sizing.max as f64 / self.sample_rate;
            }
            log::debug!(
                "Receiver '{}' grew max chunk size to {} (timeout {:.3}s)",
                self.binding_uid,
                self.sizing.max,
                self.sizing.timeout
            );
        }
    }

    fn emit(&mut self) -> DataChunk {
        let PulledChunk {
            samples,
            timestamps,
        } = std::mem::take(&mut self.pending);

        let mut source_timestamps = timestamps;
        let mut local_timestamps: Vec<f64> = source_timestamps
            .iter()
            .map(|&ts| self.clock.to_local(ts))
            .collect();

        if let Some(step) = self.local_alias.correct(&mut local_timestamps) {
            self.stats.aliasing_corrections += 1;
            log::warn!(
                "Receiver '{}' corrected an aliasing of {:.3} ms",
                self.binding_uid,
                step * 1000.0
            );
        }
        if self.source_alias.correct(&mut source_timestamps).is_some() {
            self.stats.aliasing_corrections += 1;
        }

        let samples: Vec<Vec<f64>> = samples
            .iter()
            .map(|row| {
                self.selected
                    .iter()
                    .map(|&i| row.get(i).copied().unwrap_or(f64::NAN))
                    .collect()
            })
            .collect();

        self.stats.chunks_received += 1;
        self.stats.samples_received += samples.len() as u64;
        self.stats.largest_chunk = self.stats.largest_chunk.max(samples.len());
        log::debug!(
            "Receiver '{}' read {} sample(s)",
            self.binding_uid,
            samples.len()
        );

        DataChunk {
            samples,
            local_timestamps,
            source_timestamps,
        }
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        self.close();
    }
}
