// In-process simulated transport
//
// A `SimulatedNetwork` advertises outlets and hands out inlets with their
// own queues, so several consumers of one outlet each receive every sample.
// Each outlet may run on a skewed clock and declare a time correction, which
// lets tests exercise the remote-source synchronization path. A
// `SignalGenerator` thread pushes random data at the nominal rate.

use crate::error::{AcquisitionError, Result};
use crate::transport::{PulledChunk, StreamInlet, StreamResolver};
use crate::types::{ProcessingFlags, StreamDescriptor};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Host name reported by the simulated network for this process
pub const SIMULATED_LOCAL_HOST: &str = "localhost";

type SampleQueue = Arc<Mutex<VecDeque<(Vec<f64>, f64)>>>;

/// Outlet declaration
#[derive(Debug, Clone)]
pub struct OutletConfig {
    pub name: String,
    pub stream_type: String,
    pub source_id: String,
    /// Advertising host; the local host when `None`
    pub host: Option<String>,
    pub channel_count: usize,
    pub nominal_rate: f64,
    pub description: String,
    /// Seconds the outlet clock runs ahead of the network clock
    pub clock_offset: f64,
    /// Declared correction; `-clock_offset` when `None`
    pub time_correction: Option<f64>,
    /// Samples kept per inlet before the oldest are dropped
    pub max_buffered: usize,
}

impl OutletConfig {
    pub fn new(name: impl Into<String>, stream_type: impl Into<String>, channel_count: usize, nominal_rate: f64) -> Self {
        let name = name.into();
        Self {
            source_id: format!("{}-source", name),
            name,
            stream_type: stream_type.into(),
            host: None,
            channel_count,
            nominal_rate,
            description: String::new(),
            clock_offset: 0.0,
            time_correction: None,
            max_buffered: 360 * nominal_rate.max(1.0) as usize,
        }
    }

    /// Description with a manufacturer and one `{label, units, type}` record per channel
    pub fn with_channel_labels<S: AsRef<str>>(mut self, manufacturer: &str, labels: &[S]) -> Self {
        let mut xml = format!("<desc><manufacturer>{}</manufacturer><channels>", manufacturer);
        for label in labels {
            xml.push_str(&format!(
                "<channel><label>{}</label><units>uV</units><type>{}</type></channel>",
                label.as_ref(),
                self.stream_type
            ));
        }
        xml.push_str("</channels></desc>");
        self.description = xml;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn source_id(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = source_id.into();
        self
    }

    pub fn remote(mut self, host: impl Into<String>, clock_offset: f64) -> Self {
        self.host = Some(host.into());
        self.clock_offset = clock_offset;
        self
    }
}

struct NetworkInner {
    epoch: Instant,
    local_host: String,
    outlets: Mutex<Vec<Arc<OutletShared>>>,
}

impl NetworkInner {
    fn clock(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }
}

struct OutletShared {
    descriptor: StreamDescriptor,
    clock_offset: f64,
    time_correction: f64,
    max_buffered: usize,
    inlets: Mutex<Vec<Weak<Mutex<VecDeque<(Vec<f64>, f64)>>>>>,
}

/// Shared in-process network
#[derive(Clone)]
pub struct SimulatedNetwork {
    inner: Arc<NetworkInner>,
}

impl Default for SimulatedNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedNetwork {
    pub fn new() -> Self {
        Self::with_local_host(SIMULATED_LOCAL_HOST)
    }

    pub fn with_local_host(host: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(NetworkInner {
                epoch: Instant::now(),
                local_host: host.into(),
                outlets: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Network protocol clock, in seconds
    pub fn clock(&self) -> f64 {
        self.inner.clock()
    }

    /// Start advertising a new outlet; every call gets a fresh `uid`
    pub fn add_outlet(&self, config: OutletConfig) -> SimulatedOutlet {
        let descriptor = StreamDescriptor {
            name: config.name,
            stream_type: config.stream_type,
            source_id: config.source_id,
            uid: uuid::Uuid::new_v4().to_string(),
            host: config
                .host
                .unwrap_or_else(|| self.inner.local_host.clone()),
            channel_count: config.channel_count,
            nominal_rate: config.nominal_rate,
            description: config.description,
        };
        log::debug!("Advertising simulated stream {}", descriptor.summary());

        let shared = Arc::new(OutletShared {
            descriptor,
            clock_offset: config.clock_offset,
            time_correction: config.time_correction.unwrap_or(-config.clock_offset),
            max_buffered: config.max_buffered.max(1),
            inlets: Mutex::new(Vec::new()),
        });
        self.inner.outlets.lock().push(Arc::clone(&shared));

        SimulatedOutlet {
            shared,
            network: Arc::clone(&self.inner),
        }
    }

    /// Number of currently advertised outlets
    pub fn outlet_count(&self) -> usize {
        self.inner.outlets.lock().len()
    }
}

impl StreamResolver for SimulatedNetwork {
    /// Advertisements are visible immediately, so this never waits
    fn resolve(&self, _wait_time: Duration) -> Result<Vec<StreamDescriptor>> {
        Ok(self
            .inner
            .outlets
            .lock()
            .iter()
            .map(|o| o.descriptor.clone())
            .collect())
    }

    fn open(&self, descriptor: &StreamDescriptor, flags: ProcessingFlags) -> Result<Box<dyn StreamInlet>> {
        let outlet = self
            .inner
            .outlets
            .lock()
            .iter()
            .find(|o| o.descriptor.uid == descriptor.uid)
            .cloned()
            .ok_or_else(|| {
                AcquisitionError::Transport(format!(
                    "Stream '{}' ({}) is not advertised",
                    descriptor.name, descriptor.uid
                ))
            })?;

        let queue: SampleQueue = Arc::new(Mutex::new(VecDeque::new()));
        outlet.inlets.lock().push(Arc::downgrade(&queue));
        log::debug!("Opened inlet on '{}' with {:?}", descriptor.name, flags);

        Ok(Box::new(SimulatedInlet {
            queue,
            outlet: Arc::downgrade(&outlet),
            network: Arc::clone(&self.inner),
        }))
    }

    fn local_host(&self) -> String {
        self.inner.local_host.clone()
    }
}

/// Sending side of one simulated stream
#[derive(Clone)]
pub struct SimulatedOutlet {
    shared: Arc<OutletShared>,
    network: Arc<NetworkInner>,
}

impl SimulatedOutlet {
    pub fn descriptor(&self) -> &StreamDescriptor {
        &self.shared.descriptor
    }

    /// Outlet clock: network clock plus the configured offset
    pub fn clock(&self) -> f64 {
        self.network.clock() + self.shared.clock_offset
    }

    /// Push samples stamped with explicit outlet-clock timestamps
    pub fn push_chunk_at(&self, samples: &[Vec<f64>], timestamps: &[f64]) {
        let mut inlets = self.shared.inlets.lock();
        inlets.retain(|queue| queue.strong_count() > 0);
        for queue in inlets.iter().filter_map(Weak::upgrade) {
            let mut queue = queue.lock();
            for (sample, &ts) in samples.iter().zip(timestamps) {
                queue.push_back((sample.clone(), ts));
            }
            while queue.len() > self.shared.max_buffered {
                queue.pop_front();
            }
        }
    }

    /// Push samples stamped with the current outlet clock
    pub fn push_chunk(&self, samples: &[Vec<f64>]) {
        let now = self.clock();
        let timestamps = vec![now; samples.len()];
        self.push_chunk_at(samples, &timestamps);
    }

    pub fn push_sample(&self, sample: Vec<f64>) {
        self.push_chunk(&[sample]);
    }

    /// Number of inlets currently connected
    pub fn consumers(&self) -> usize {
        self.shared
            .inlets
            .lock()
            .iter()
            .filter(|q| q.strong_count() > 0)
            .count()
    }

    /// Stop advertising. Open inlets stay connected but receive nothing more.
    pub fn close(&self) {
        let uid = &self.shared.descriptor.uid;
        self.network
            .outlets
            .lock()
            .retain(|o| &o.descriptor.uid != uid);
        log::debug!("Simulated stream '{}' closed", self.shared.descriptor.name);
    }
}

/// Receiving side of one simulated connection
pub struct SimulatedInlet {
    queue: SampleQueue,
    outlet: Weak<OutletShared>,
    network: Arc<NetworkInner>,
}

impl StreamInlet for SimulatedInlet {
    fn pull_chunk(&mut self, max_samples: usize) -> Result<PulledChunk> {
        let mut queue = self.queue.lock();
        let n = max_samples.min(queue.len());
        let mut chunk = PulledChunk {
            samples: Vec::with_capacity(n),
            timestamps: Vec::with_capacity(n),
        };
        for (sample, ts) in queue.drain(..n) {
            chunk.samples.push(sample);
            chunk.timestamps.push(ts);
        }
        Ok(chunk)
    }

    fn samples_available(&self) -> usize {
        self.queue.lock().len()
    }

    fn flush(&mut self) -> usize {
        let mut queue = self.queue.lock();
        let dropped = queue.len();
        queue.clear();
        dropped
    }

    fn source_clock(&self) -> f64 {
        self.network.clock()
    }

    fn time_correction(&mut self, _timeout: Duration) -> Result<f64> {
        self.outlet
            .upgrade()
            .map(|o| o.time_correction)
            .ok_or_else(|| AcquisitionError::Transport("Source is no longer reachable".to_string()))
    }
}

/// Signal generator settings
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Peak amplitude of the random samples
    pub amplitude: f64,
    /// Push period for regular streams
    pub push_interval: Duration,
    /// Upper bound of the random gap between irregular samples
    pub irregular_max_gap: Duration,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            amplitude: 1.0,
            push_interval: Duration::from_millis(10),
            irregular_max_gap: Duration::from_millis(200),
        }
    }
}

/// Background thread feeding an outlet with random samples
pub struct SignalGenerator {
    keep_running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SignalGenerator {
    /// Start pushing to `outlet`. Regular streams get evenly spaced
    /// timestamps at the nominal rate; irregular ones (rate 0) get single
    /// samples at random intervals.
    pub fn start(outlet: SimulatedOutlet, config: GeneratorConfig) -> Result<Self> {
        let keep_running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&keep_running);
        let name = outlet.descriptor().name.clone();

        let handle = thread::Builder::new()
            .name(format!("generator-{}", name))
            .spawn(move || {
                let rate = outlet.descriptor().nominal_rate;
                if rate > 0.0 {
                    run_regular(&outlet, &config, rate, &flag);
                } else {
                    run_irregular(&outlet, &config, &flag);
                }
            })?;

        log::info!("Signal generator started for '{}'", name);
        Ok(Self {
            keep_running,
            handle: Some(handle),
        })
    }

    pub fn stop(&mut self) {
        self.keep_running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Signal generator thread panicked");
            }
        }
    }
}

impl Drop for SignalGenerator {
    fn drop(&mut self) {
        self.stop();
    }
}

fn random_sample(rng: &mut impl Rng, n_cha: usize, amplitude: f64) -> Vec<f64> {
    (0..n_cha)
        .map(|_| amplitude * rng.random_range(-1.0..1.0))
        .collect()
}

fn run_regular(outlet: &SimulatedOutlet, config: &GeneratorConfig, rate: f64, keep_running: &AtomicBool) {
    let mut rng = rand::rng();
    let n_cha = outlet.descriptor().channel_count;
    let start = outlet.clock();
    let mut sent: u64 = 0;

    while keep_running.load(Ordering::Acquire) {
        let due = ((outlet.clock() - start) * rate).floor() as u64 + 1;
        if due > sent {
            let n = (due - sent) as usize;
            let samples: Vec<Vec<f64>> = (0..n)
                .map(|_| random_sample(&mut rng, n_cha, config.amplitude))
                .collect();
            let timestamps: Vec<f64> = (sent..due).map(|i| start + i as f64 / rate).collect();
            outlet.push_chunk_at(&samples, &timestamps);
            sent = due;
        }
        thread::sleep(config.push_interval);
    }
}

fn run_irregular(outlet: &SimulatedOutlet, config: &GeneratorConfig, keep_running: &AtomicBool) {
    let mut rng = rand::rng();
    let n_cha = outlet.descriptor().channel_count;
    let max_gap = config.irregular_max_gap.as_secs_f64();

    while keep_running.load(Ordering::Acquire) {
        outlet.push_sample(random_sample(&mut rng, n_cha, config.amplitude));
        // Sleep in short slices so stop() stays responsive
        let deadline = Instant::now() + Duration::from_secs_f64(max_gap * rng.random::<f64>());
        while keep_running.load(Ordering::Acquire) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
    }
}
