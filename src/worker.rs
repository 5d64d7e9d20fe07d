// Per-consumer worker loops
//
// Each consumer runs its own Receiver on a dedicated thread:
// flush once, then read -> callback -> short sleep, checking a shared
// "keep running" flag at the top of every iteration. Timeouts are retried
// until `max_consecutive_timeouts` is reached, which is reported as a lost
// source.

use crate::error::{AcquisitionError, Result};
use crate::receiver::{Receiver, ReceiverStats};
use crate::types::DataChunk;
use crossbeam::channel::{self, TrySendError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Worker loop pacing and failure policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Consumer update interval in milliseconds
    pub update_interval_ms: u64,
    /// Fraction of the update interval slept after each chunk
    pub sleep_fraction: f64,
    /// Timeouts in a row tolerated before giving up on the source
    pub max_consecutive_timeouts: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: 100,
            sleep_fraction: 0.1,
            max_consecutive_timeouts: 5,
        }
    }
}

impl WorkerConfig {
    fn pause(&self) -> Duration {
        let secs = self.update_interval_ms as f64 * self.sleep_fraction.clamp(0.0, 1.0) / 1000.0;
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
    }
}

/// Drive `receiver` until `keep_running` is cleared.
///
/// Returns the receiver statistics on a clean stop, `SourceDisconnected`
/// after too many consecutive timeouts, or the first hard read error.
pub fn run_read_loop<F>(
    receiver: &mut Receiver,
    keep_running: &AtomicBool,
    config: &WorkerConfig,
    mut on_chunk: F,
) -> Result<ReceiverStats>
where
    F: FnMut(DataChunk),
{
    receiver.flush()?;
    let pause = config.pause();
    let mut consecutive_timeouts = 0u32;

    while keep_running.load(Ordering::Acquire) {
        match receiver.read() {
            Ok(chunk) => {
                consecutive_timeouts = 0;
                on_chunk(chunk);
            }
            Err(e) if e.is_recoverable() => {
                consecutive_timeouts += 1;
                log::warn!(
                    "Consumer of '{}': {} ({}/{})",
                    receiver.binding_uid(),
                    e,
                    consecutive_timeouts,
                    config.max_consecutive_timeouts
                );
                if consecutive_timeouts >= config.max_consecutive_timeouts {
                    return Err(AcquisitionError::SourceDisconnected(consecutive_timeouts));
                }
                continue;
            }
            Err(e) => return Err(e),
        }

        if !pause.is_zero() {
            thread::sleep(pause);
        }
    }

    Ok(receiver.stats().clone())
}

/// Handle to a running consumer thread
pub struct ConsumerHandle {
    name: String,
    keep_running: Arc<AtomicBool>,
    handle: Option<JoinHandle<Result<ReceiverStats>>>,
}

impl ConsumerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask the worker to stop after its current iteration
    pub fn stop(&self) {
        self.keep_running.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.keep_running.load(Ordering::Acquire)
            && self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the worker and wait for its outcome
    pub fn join(mut self) -> Result<ReceiverStats> {
        self.stop();
        let handle = self
            .handle
            .take()
            .ok_or_else(|| AcquisitionError::Transport(format!("Consumer '{}' already joined", self.name)))?;
        handle
            .join()
            .map_err(|_| AcquisitionError::Transport(format!("Consumer '{}' panicked", self.name)))?
    }
}

impl Drop for ConsumerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Run `receiver` on its own thread, handing every chunk to `on_chunk`
pub fn spawn_consumer<F>(
    name: impl Into<String>,
    receiver: Receiver,
    config: WorkerConfig,
    on_chunk: F,
) -> Result<ConsumerHandle>
where
    F: FnMut(DataChunk) + Send + 'static,
{
    spawn_with_flag(
        name.into(),
        receiver,
        config,
        Arc::new(AtomicBool::new(true)),
        on_chunk,
    )
}

/// Run `receiver` on its own thread and deliver chunks over a bounded channel.
///
/// Chunks are dropped with a warning when the channel is full; the worker
/// stops once the channel's receiving side is gone.
pub fn spawn_channel_consumer(
    name: impl Into<String>,
    receiver: Receiver,
    config: WorkerConfig,
    capacity: usize,
) -> Result<(ConsumerHandle, channel::Receiver<DataChunk>)> {
    let name = name.into();
    let (tx, rx) = channel::bounded(capacity.max(1));
    let keep_running = Arc::new(AtomicBool::new(true));

    let flag = Arc::clone(&keep_running);
    let consumer = name.clone();
    let on_chunk = move |chunk: DataChunk| match tx.try_send(chunk) {
        Ok(()) => {}
        Err(TrySendError::Full(dropped)) => {
            log::warn!(
                "Consumer '{}' is lagging, dropped {} sample(s)",
                consumer,
                dropped.num_samples()
            );
        }
        Err(TrySendError::Disconnected(_)) => {
            flag.store(false, Ordering::Release);
        }
    };

    let handle = spawn_with_flag(name, receiver, config, keep_running, on_chunk)?;
    Ok((handle, rx))
}

fn spawn_with_flag<F>(
    name: String,
    mut receiver: Receiver,
    config: WorkerConfig,
    keep_running: Arc<AtomicBool>,
    on_chunk: F,
) -> Result<ConsumerHandle>
where
    F: FnMut(DataChunk) + Send + 'static,
{
    let flag = Arc::clone(&keep_running);
    let thread_name = name.clone();
    let handle = thread::Builder::new()
        .name(format!("consumer-{}", name))
        .spawn(move || {
            log::info!("Consumer '{}' started", thread_name);
            let outcome = run_read_loop(&mut receiver, &flag, &config, on_chunk);
            receiver.close();
            match &outcome {
                Ok(stats) => log::info!(
                    "Consumer '{}' stopped after {} chunk(s)",
                    thread_name,
                    stats.chunks_received
                ),
                Err(e) => log::error!("Consumer '{}' failed: {}", thread_name, e),
            }
            outcome
        })?;

    Ok(ConsumerHandle {
        name,
        keep_running,
        handle: Some(handle),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::{BindingRequest, StreamBinding};
    use crate::metadata::CanonicalChannelInfo;
    use crate::transport::{PulledChunk, StreamInlet};
    use crate::types::StreamDescriptor;
    use crate::ReceiverOptions;

    #[test]
    fn test_pause_from_config() {
        let pause = WorkerConfig::default().pause();
        assert!((pause.as_secs_f64() - 0.01).abs() < 1e-9);

        let config = WorkerConfig {
            sleep_fraction: f64::NAN,
            ..Default::default()
        };
        assert_eq!(config.pause(), Duration::ZERO);

        let config = WorkerConfig {
            update_interval_ms: u64::MAX,
            sleep_fraction: 1.0,
            ..Default::default()
        };
        assert!(config.pause() > Duration::from_secs(1_000_000));
    }

    /// Inlet that never delivers anything
    struct SilentInlet;

    impl StreamInlet for SilentInlet {
        fn pull_chunk(&mut self, _max_samples: usize) -> Result<PulledChunk> {
            Ok(PulledChunk::default())
        }

        fn samples_available(&self) -> usize {
            0
        }

        fn flush(&mut self) -> usize {
            0
        }

        fn source_clock(&self) -> f64 {
            0.0
        }

        fn time_correction(&mut self, _timeout: Duration) -> Result<f64> {
            Ok(0.0)
        }
    }

    /// Inlet producing one sample per pull with increasing timestamps
    struct CountingInlet {
        next: f64,
    }

    impl StreamInlet for CountingInlet {
        fn pull_chunk(&mut self, _max_samples: usize) -> Result<PulledChunk> {
            let ts = self.next;
            self.next += 0.01;
            Ok(PulledChunk {
                samples: vec![vec![ts, -ts]],
                timestamps: vec![ts],
            })
        }

        fn samples_available(&self) -> usize {
            1
        }

        fn flush(&mut self) -> usize {
            0
        }

        fn source_clock(&self) -> f64 {
            self.next
        }

        fn time_correction(&mut self, _timeout: Duration) -> Result<f64> {
            Ok(0.0)
        }
    }

    fn binding() -> StreamBinding {
        let descriptor = StreamDescriptor {
            name: "Test".to_string(),
            stream_type: "EEG".to_string(),
            source_id: "test".to_string(),
            uid: "u".to_string(),
            host: "A".to_string(),
            channel_count: 2,
            nominal_rate: 100.0,
            description: String::new(),
        };
        StreamBinding::new(
            &descriptor,
            &CanonicalChannelInfo::placeholder(2),
            BindingRequest::new("test"),
        )
        .unwrap()
    }

    fn receiver(inlet: Box<dyn StreamInlet>) -> Receiver {
        let options = ReceiverOptions {
            timeout_secs: Some(0.01),
            ..Default::default()
        };
        Receiver::with_inlet(&binding(), inlet, false, &options).unwrap()
    }

    #[test]
    fn test_timeouts_escalate() {
        let mut receiver = receiver(Box::new(SilentInlet));
        let keep_running = AtomicBool::new(true);
        let result = run_read_loop(&mut receiver, &keep_running, &WorkerConfig::default(), |_| {});
        assert!(matches!(result, Err(AcquisitionError::SourceDisconnected(5))));
        assert_eq!(receiver.stats().timeouts, 5);
    }

    #[test]
    fn test_loop_stops_on_flag() {
        let mut receiver = receiver(Box::new(CountingInlet { next: 0.0 }));
        let keep_running = AtomicBool::new(true);
        let mut seen = 0;
        let config = WorkerConfig {
            update_interval_ms: 0,
            ..Default::default()
        };
        let stats = run_read_loop(&mut receiver, &keep_running, &config, |chunk| {
            assert_eq!(chunk.num_channels(), 2);
            seen += chunk.num_samples();
            if seen >= 10 {
                keep_running.store(false, Ordering::Release);
            }
        })
        .unwrap();
        assert_eq!(seen, 10);
        assert_eq!(stats.samples_received, 10);
    }

    #[test]
    fn test_channel_consumer() {
        let receiver = receiver(Box::new(CountingInlet { next: 0.0 }));
        let (handle, chunks) =
            spawn_channel_consumer("counting", receiver, WorkerConfig::default(), 64).unwrap();
        assert_eq!(handle.name(), "counting");

        let first = chunks.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(first.num_channels(), 2);
        let stats = handle.join().unwrap();
        assert!(stats.chunks_received >= 1);
    }
}
