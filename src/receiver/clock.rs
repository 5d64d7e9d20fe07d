// Clock synchronization between the source clock and the local wall clock

use crate::error::Result;
use crate::transport::StreamInlet;
use std::time::Duration;

/// Current local wall-clock time in seconds since the Unix epoch
pub fn wall_clock() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1e6
}

/// Offsets mapping source timestamps onto the local wall clock
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ClockSync {
    /// Mean of `wall_clock() - source_clock()`
    pub local_offset: f64,
    /// Mean declared source correction (0 for local sources)
    pub source_correction: f64,
}

impl ClockSync {
    /// Average `samples` readings of both offsets.
    ///
    /// The source correction is only queried for remote sources.
    pub fn estimate(
        inlet: &mut dyn StreamInlet,
        samples: usize,
        remote: bool,
        correction_timeout: Duration,
    ) -> Result<Self> {
        let samples = samples.max(1);

        let local_offset = (0..samples)
            .map(|_| wall_clock() - inlet.source_clock())
            .sum::<f64>()
            / samples as f64;

        let source_correction = if remote {
            let mut total = 0.0;
            for _ in 0..samples {
                total += inlet.time_correction(correction_timeout)?;
            }
            total / samples as f64
        } else {
            0.0
        };

        Ok(Self {
            local_offset,
            source_correction,
        })
    }

    /// Convert one source-clock timestamp to local time
    pub fn to_local(&self, source_ts: f64) -> f64 {
        source_ts + self.source_correction + self.local_offset
    }
}
