// Pluggable discovery/streaming transport
//
// The acquisition core never talks to the network directly. A transport
// provides two capabilities:
// 1. `StreamResolver`: enumerate currently advertised streams and open
//    point-to-point pull connections to one of them
// 2. `StreamInlet`: the private connection handle owned by one Receiver
//
// Current implementations:
// - Simulated: in-process outlets and a signal generator (see `simulated`)

use crate::error::Result;
use crate::types::{ProcessingFlags, StreamDescriptor};
use std::time::Duration;

/// Samples and timestamps returned by a single pull
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PulledChunk {
    /// Full-width samples: samples[sample_idx][channel_idx]
    pub samples: Vec<Vec<f64>>,

    /// Source-clock timestamp of every sample
    pub timestamps: Vec<f64>,
}

impl PulledChunk {
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

/// Discovery side of the transport
///
/// Implementations must be safe to call from any thread; discovery is
/// read-only.
pub trait StreamResolver: Send + Sync {
    /// Wait up to `wait_time` and return every stream currently advertised
    fn resolve(&self, wait_time: Duration) -> Result<Vec<StreamDescriptor>>;

    /// Open a new, independent pull connection to `descriptor`
    fn open(
        &self,
        descriptor: &StreamDescriptor,
        flags: ProcessingFlags,
    ) -> Result<Box<dyn StreamInlet>>;

    /// Host name of the machine running this process
    fn local_host(&self) -> String;
}

/// Point-to-point pull connection to one stream
///
/// An inlet is exclusively owned by one Receiver and is never shared.
pub trait StreamInlet: Send {
    /// Pull whatever is queued, up to `max_samples`. Never blocks.
    fn pull_chunk(&mut self, max_samples: usize) -> Result<PulledChunk>;

    /// Number of samples currently queued at the source side
    fn samples_available(&self) -> usize;

    /// Drop everything queued without reading it. Returns the number dropped.
    fn flush(&mut self) -> usize;

    /// Current reading of the protocol's internal clock, in seconds
    fn source_clock(&self) -> f64;

    /// Source-declared correction between the remote clock and ours.
    ///
    /// Pulled timestamps never include it; receivers add it when the
    /// binding asks for clock sync.
    fn time_correction(&mut self, timeout: Duration) -> Result<f64>;
}
