// Identity records for network-published streams

use serde::{Deserialize, Serialize};

/// Identity and declared capabilities of one advertised stream.
///
/// Descriptors are snapshots taken at discovery time. `uid` identifies the
/// advertising process and changes when the source restarts, while
/// `source_id` is meant to survive restarts and is the preferred key for
/// reconnecting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub stream_type: String,
    pub source_id: String,
    pub uid: String,
    pub host: String,
    pub channel_count: usize,
    /// Declared sampling rate in Hz (0 for irregular streams)
    pub nominal_rate: f64,
    /// Raw, vendor-specific description as published by the source
    #[serde(default)]
    pub description: String,
}

impl StreamDescriptor {
    /// One-line description used in listings and logs
    pub fn summary(&self) -> String {
        format!(
            "{} (host: {}, type: {}, channels: {})",
            self.name, self.host, self.stream_type, self.channel_count
        )
    }
}

/// Post-processing options requested from the transport when an inlet is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingFlags {
    /// Apply the source clock correction to timestamps
    #[serde(default = "default_true")]
    pub clock_sync: bool,
    /// Remove jitter from regularly sampled timestamps
    #[serde(default)]
    pub dejitter: bool,
    /// Force timestamps to be monotonically increasing
    #[serde(default)]
    pub monotonize: bool,
    /// Make the inlet safe to share across threads
    #[serde(default = "default_true")]
    pub threadsafe: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ProcessingFlags {
    fn default() -> Self {
        Self {
            clock_sync: true,
            dejitter: false,
            monotonize: false,
            threadsafe: true,
        }
    }
}

/// A block of samples returned by [`crate::Receiver::read`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataChunk {
    /// Channel-selected samples: samples[sample_idx][selected_channel_idx]
    pub samples: Vec<Vec<f64>>,

    /// Timestamps converted to the local wall clock (seconds since epoch)
    pub local_timestamps: Vec<f64>,

    /// Timestamps in the source clock
    pub source_timestamps: Vec<f64>,
}

impl DataChunk {
    /// Get the number of samples in this chunk
    pub fn num_samples(&self) -> usize {
        self.samples.len()
    }

    /// Get the number of channels
    pub fn num_channels(&self) -> usize {
        self.samples.first().map(|s| s.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary() {
        let descriptor = StreamDescriptor {
            name: "EEG1".to_string(),
            stream_type: "EEG".to_string(),
            source_id: "amp-01".to_string(),
            uid: "u1".to_string(),
            host: "lab-pc".to_string(),
            channel_count: 8,
            nominal_rate: 256.0,
            description: String::new(),
        };
        assert_eq!(
            descriptor.summary(),
            "EEG1 (host: lab-pc, type: EEG, channels: 8)"
        );
    }

    #[test]
    fn test_flags_default_from_empty_json() {
        let flags: ProcessingFlags = serde_json::from_str("{}").unwrap();
        assert_eq!(flags, ProcessingFlags::default());
    }
}
