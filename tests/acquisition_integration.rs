use std::sync::Arc;
use std::thread;
use std::time::Duration;
use streamsync::receiver::clock::wall_clock;
use streamsync::simulated::{GeneratorConfig, OutletConfig, SignalGenerator, SimulatedNetwork, SimulatedOutlet};
use streamsync::{
    spawn_channel_consumer, AcquisitionError, BindingRequest, ReceiverOptions, ReceiverState,
    StreamCatalog, StreamFilter, WorkerConfig,
};

const WAIT: Duration = Duration::from_millis(10);

fn regular_chunk(outlet: &SimulatedOutlet, start: usize, n: usize) {
    let rate = outlet.descriptor().nominal_rate;
    let width = outlet.descriptor().channel_count;
    let samples: Vec<Vec<f64>> = (start..start + n)
        .map(|i| (0..width).map(|c| (i * 100 + c) as f64).collect())
        .collect();
    let timestamps: Vec<f64> = (start..start + n).map(|i| i as f64 / rate).collect();
    outlet.push_chunk_at(&samples, &timestamps);
}

fn eeg_network() -> (SimulatedNetwork, SimulatedOutlet) {
    let network = SimulatedNetwork::with_local_host("A");
    let outlet = network.add_outlet(OutletConfig::new("EEG1", "EEG", 8, 256.0));
    network.add_outlet(OutletConfig::new("Markers", "Markers", 1, 0.0));
    (network, outlet)
}

// =============================================================================
// END TO END
// =============================================================================

#[test]
fn test_bind_and_read_two_chunks() {
    let (network, outlet) = eeg_network();
    let catalog = StreamCatalog::new(Arc::new(network));

    let descriptor = catalog
        .find_one(&StreamFilter::new().name("EEG1").stream_type("EEG"), WAIT)
        .unwrap();
    assert_eq!(descriptor.host, "A");
    assert_eq!(descriptor.channel_count, 8);

    let binding = catalog
        .bind(&descriptor, BindingRequest::new("eeg").select(vec![0, 1, 2, 3]))
        .unwrap();
    assert_eq!(binding.n_cha, 4);
    assert_eq!(binding.labels, vec!["0", "1", "2", "3"]);

    let mut receiver = catalog
        .open_receiver("eeg", &ReceiverOptions::default())
        .unwrap();
    assert!(!receiver.is_remote());
    assert_eq!(receiver.state(), ReceiverState::Synchronizing);

    regular_chunk(&outlet, 0, 300);
    let first = receiver.read().unwrap();
    regular_chunk(&outlet, 300, 300);
    let second = receiver.read().unwrap();

    assert_eq!(first.num_samples(), 300);
    assert_eq!(second.num_samples(), 300);
    assert_eq!(first.num_channels(), 4);
    assert_eq!(second.samples[0], vec![30000.0, 30001.0, 30002.0, 30003.0]);

    let timeline: Vec<f64> = first
        .local_timestamps
        .iter()
        .chain(second.local_timestamps.iter())
        .copied()
        .collect();
    assert!(timeline.windows(2).all(|w| w[1] > w[0]));
    assert_eq!(receiver.stats().aliasing_corrections, 0);
    assert_eq!(receiver.state(), ReceiverState::Streaming);
}

#[test]
fn test_consumers_are_independent() {
    let (network, outlet) = eeg_network();
    let catalog = StreamCatalog::new(Arc::new(network));
    let descriptor = catalog.find_one(&StreamFilter::new().name("EEG1"), WAIT).unwrap();
    catalog.bind(&descriptor, BindingRequest::new("eeg")).unwrap();

    let mut a = catalog.open_receiver("eeg", &ReceiverOptions::default()).unwrap();
    let mut b = catalog.open_receiver("eeg", &ReceiverOptions::default()).unwrap();

    regular_chunk(&outlet, 0, 100);
    assert_eq!(a.read().unwrap().num_samples(), 100);
    assert_eq!(b.flush().unwrap(), 100);

    regular_chunk(&outlet, 100, 50);
    assert_eq!(a.read().unwrap().source_timestamps[0], 100.0 / 256.0);
    let from_b = b.read().unwrap();
    assert_eq!(from_b.num_samples(), 50);
    assert_eq!(from_b.num_channels(), 8);
}

#[test]
fn test_timeout_then_recovery() {
    let (network, outlet) = eeg_network();
    let catalog = StreamCatalog::new(Arc::new(network));
    let descriptor = catalog.find_one(&StreamFilter::new().name("EEG1"), WAIT).unwrap();
    catalog.bind(&descriptor, BindingRequest::new("eeg")).unwrap();

    let options = ReceiverOptions {
        timeout_secs: Some(0.05),
        ..Default::default()
    };
    let mut receiver = catalog.open_receiver("eeg", &options).unwrap();

    let err = receiver.read().unwrap_err();
    assert!(matches!(err, AcquisitionError::Timeout { received: 0, .. }));
    assert!(err.is_recoverable());
    assert_eq!(receiver.state(), ReceiverState::TimedOut);

    regular_chunk(&outlet, 0, 10);
    assert_eq!(receiver.read().unwrap().num_samples(), 10);
    assert_eq!(receiver.state(), ReceiverState::Streaming);
}

#[test]
fn test_irregular_stream_cannot_open_receiver() {
    let (network, _outlet) = eeg_network();
    let catalog = StreamCatalog::new(Arc::new(network));
    let markers = catalog.find_one(&StreamFilter::new().stream_type("Markers"), WAIT).unwrap();

    // Binding succeeds with a warning; reading needs a rate
    catalog.bind(&markers, BindingRequest::new("markers")).unwrap();
    assert!(matches!(
        catalog.open_receiver("markers", &ReceiverOptions::default()),
        Err(AcquisitionError::InvalidConfiguration(_))
    ));
}

#[test]
fn test_aliasing_is_corrected() {
    let (network, outlet) = eeg_network();
    let catalog = StreamCatalog::new(Arc::new(network));
    let descriptor = catalog.find_one(&StreamFilter::new().name("EEG1"), WAIT).unwrap();
    catalog.bind(&descriptor, BindingRequest::new("eeg")).unwrap();
    let mut receiver = catalog.open_receiver("eeg", &ReceiverOptions::default()).unwrap();

    regular_chunk(&outlet, 100, 20);
    let first = receiver.read().unwrap();
    // Arrives stamped earlier than what was already emitted
    regular_chunk(&outlet, 110, 20);
    let second = receiver.read().unwrap();

    assert_eq!(second.local_timestamps[0], *first.local_timestamps.last().unwrap());
    assert_eq!(second.source_timestamps[0], *first.source_timestamps.last().unwrap());
    assert!(second.local_timestamps.windows(2).all(|w| w[1] >= w[0]));
    assert_eq!(receiver.stats().aliasing_corrections, 2);
}

#[test]
fn test_remote_source_clock_is_corrected() {
    let network = SimulatedNetwork::with_local_host("A");
    let outlet = network.add_outlet(OutletConfig::new("EEG2", "EEG", 2, 100.0).remote("B", 1000.0));
    let catalog = StreamCatalog::new(Arc::new(network));
    let descriptor = catalog.find_one(&StreamFilter::new().host("B"), WAIT).unwrap();
    catalog.bind(&descriptor, BindingRequest::new("remote")).unwrap();

    let mut receiver = catalog.open_receiver("remote", &ReceiverOptions::default()).unwrap();
    assert!(receiver.is_remote());
    assert_eq!(receiver.clock().source_correction, -1000.0);

    outlet.push_chunk(&[vec![1.0, 2.0], vec![3.0, 4.0]]);
    let chunk = receiver.read().unwrap();
    let now = wall_clock();
    assert!(chunk.source_timestamps[0] > 999.0);
    assert!((chunk.local_timestamps[0] - now).abs() < 0.5);
}

// =============================================================================
// CATALOG AND PERSISTENCE
// =============================================================================

#[test]
fn test_duplicate_binding_id_rejected() {
    let (network, _outlet) = eeg_network();
    let catalog = StreamCatalog::new(Arc::new(network));
    let descriptor = catalog.find_one(&StreamFilter::new().name("EEG1"), WAIT).unwrap();

    catalog.bind(&descriptor, BindingRequest::new("eeg")).unwrap();
    assert!(!catalog.is_binding_uid_available("eeg"));
    assert!(matches!(
        catalog.bind(&descriptor, BindingRequest::new("eeg")),
        Err(AcquisitionError::DuplicateBindingId(id)) if id == "eeg"
    ));
    assert_eq!(catalog.bindings().len(), 1);
}

#[test]
fn test_match_bindings_by_binding_uid() {
    let (network, _outlet) = eeg_network();
    let catalog = StreamCatalog::new(Arc::new(network));
    for descriptor in catalog.discover(WAIT).unwrap() {
        let uid = descriptor.name.to_lowercase();
        catalog.bind(&descriptor, BindingRequest::new(uid)).unwrap();
    }

    let found = catalog
        .match_bindings(&StreamFilter::new().binding_uid("markers"), true)
        .unwrap();
    assert_eq!(found[0].descriptor.name, "Markers");
    assert!(matches!(
        catalog.match_bindings(&StreamFilter::new().uid("x"), false),
        Err(AcquisitionError::InvalidFilter(_))
    ));
}

#[test]
fn test_bindings_survive_source_restart() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("bindings.json");

    let network = SimulatedNetwork::with_local_host("A");
    let eeg = network.add_outlet(
        OutletConfig::new("EEG1", "EEG", 3, 256.0).with_channel_labels("ACME", &["C3", "Cz", "C4"]),
    );
    let emg = network.add_outlet(OutletConfig::new("EMG1", "EMG", 2, 512.0));

    let catalog = StreamCatalog::new(Arc::new(network.clone()));
    for descriptor in catalog.discover(WAIT).unwrap() {
        let request = BindingRequest::new(descriptor.name.to_lowercase()).label_field("label");
        let request = if descriptor.name == "EMG1" {
            BindingRequest::new("emg1")
        } else {
            request.select(vec![2, 0])
        };
        catalog.bind(&descriptor, request).unwrap();
    }
    catalog.save_bindings(&path).unwrap();

    // The EEG source restarts with a new uid, the EMG source goes away
    let old_uid = eeg.descriptor().uid.clone();
    eeg.close();
    emg.close();
    let restarted = network.add_outlet(
        OutletConfig::new("EEG1", "EEG", 3, 256.0).with_channel_labels("ACME", &["C3", "Cz", "C4"]),
    );

    let reloaded = StreamCatalog::new(Arc::new(network));
    assert_eq!(reloaded.load_bindings(&path, WAIT).unwrap(), 1);

    let binding = reloaded.binding("eeg1").unwrap();
    assert_ne!(binding.descriptor.uid, old_uid);
    assert_eq!(binding.descriptor.uid, restarted.descriptor().uid);
    assert_eq!(binding.labels, vec!["C4", "C3"]);
    assert_eq!(binding.selected_indices, vec![2, 0]);
    assert!(reloaded.binding("emg1").is_none());

    let mut receiver = reloaded.open_receiver("eeg1", &ReceiverOptions::default()).unwrap();
    regular_chunk(&restarted, 0, 4);
    assert_eq!(receiver.read().unwrap().samples[1], vec![102.0, 100.0]);
}

#[test]
fn test_missing_bindings_reported() {
    let (network, outlet) = eeg_network();
    let catalog = StreamCatalog::new(Arc::new(network));
    let descriptor = catalog.find_one(&StreamFilter::new().name("EEG1"), WAIT).unwrap();
    catalog.bind(&descriptor, BindingRequest::new("eeg")).unwrap();
    assert!(catalog.missing_bindings(WAIT).unwrap().is_empty());

    outlet.close();
    assert_eq!(catalog.missing_bindings(WAIT).unwrap(), vec!["eeg"]);
    assert!(matches!(
        catalog.open_receiver("eeg", &ReceiverOptions::default()),
        Err(AcquisitionError::Transport(_))
    ));
}

#[test]
fn test_quirky_vendor_description_is_repaired() {
    let network = SimulatedNetwork::with_local_host("A");
    network.add_outlet(OutletConfig::new("Enobio", "EEG", 2, 500.0).description(
        "<desc><manufacturer>NeuroElectrics</manufacturer>\
         <channel><label>P7</label></channel><channel><label>P4</label></channel></desc>",
    ));
    let catalog = StreamCatalog::new(Arc::new(network));
    let descriptor = catalog.find_one(&StreamFilter::new().name("Enobio"), WAIT).unwrap();

    let info = catalog.normalize(&descriptor);
    assert!(!info.synthetic);
    let binding = catalog
        .bind(&descriptor, BindingRequest::new("enobio").label_field("label"))
        .unwrap();
    assert_eq!(binding.labels, vec!["P7", "P4"]);
    assert_eq!(binding.channel_indexes(&["p4"], false), vec![1]);
}

// =============================================================================
// WORKERS
// =============================================================================

#[test]
fn test_channel_consumers_on_generated_stream() {
    let network = SimulatedNetwork::new();
    let outlet = network.add_outlet(OutletConfig::new("Gen", "EEG", 4, 250.0));
    let mut generator = SignalGenerator::start(outlet, GeneratorConfig::default()).unwrap();

    let catalog = StreamCatalog::new(Arc::new(network));
    let descriptor = catalog.find_one(&StreamFilter::new().name("Gen"), WAIT).unwrap();
    catalog
        .bind(&descriptor, BindingRequest::new("gen").select(vec![3, 1]))
        .unwrap();

    let mut consumers = Vec::new();
    for name in ["plot", "record"] {
        let receiver = catalog.open_receiver("gen", &ReceiverOptions::default()).unwrap();
        consumers.push(spawn_channel_consumer(name, receiver, WorkerConfig::default(), 256).unwrap());
    }

    thread::sleep(Duration::from_millis(300));
    for (handle, chunks) in consumers {
        assert!(handle.is_running());
        let chunk = chunks.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(chunk.num_channels(), 2);
        let stats = handle.join().unwrap();
        assert!(stats.samples_received > 0);
    }
    generator.stop();
}
