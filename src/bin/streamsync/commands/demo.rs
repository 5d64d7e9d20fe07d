use crate::cli::DemoArgs;
use crate::exit_codes;
use crate::output;
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use streamsync::simulated::{GeneratorConfig, OutletConfig, SignalGenerator, SimulatedNetwork};
use streamsync::{
    spawn_consumer, AcquisitionConfig, BindingRequest, ConsumerHandle, StreamCatalog,
};

#[derive(Serialize)]
struct ConsumerReport {
    binding_uid: String,
    consumer: String,
    remote: bool,
    chunks: u64,
    samples: u64,
    timeouts: u64,
    aliasing_corrections: u64,
    backwards_steps: u64,
    error: Option<String>,
}

struct RunningConsumer {
    binding_uid: String,
    remote: bool,
    backwards: Arc<AtomicU64>,
    handle: ConsumerHandle,
}

pub fn execute(args: DemoArgs, config_path: Option<&str>) -> i32 {
    if args.consumers == 0 || !(args.duration > 0.0) || args.channels == 0 || !(args.rate > 0.0) {
        eprintln!("Error: --consumers, --duration, --channels and --rate must be positive");
        return exit_codes::INPUT_ERROR;
    }
    let config = match output::load_config(config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::INPUT_ERROR;
        }
    };

    match run(&args, &config) {
        Ok(reports) => print_reports(&reports, args.json),
        Err(e) => {
            eprintln!("Error: {}", e);
            exit_codes::EXECUTION_ERROR
        }
    }
}

fn run(args: &DemoArgs, config: &AcquisitionConfig) -> streamsync::Result<Vec<ConsumerReport>> {
    let network = SimulatedNetwork::new();

    let labels: Vec<String> = (0..args.channels).map(|i| format!("E{}", i + 1)).collect();
    let mut outlets = vec![network.add_outlet(
        OutletConfig::new("SignalGenerator", "EEG", args.channels, args.rate)
            .with_channel_labels("streamsync", labels.as_slice()),
    )];
    if args.remote {
        outlets.push(network.add_outlet(
            OutletConfig::new("RemoteAmp", "EMG", 4, 128.0)
                .with_channel_labels("streamsync", &["L1", "L2", "R1", "R2"])
                .remote("remote-amp", 3.5),
        ));
    }

    let mut generators = Vec::with_capacity(outlets.len());
    for outlet in &outlets {
        generators.push(SignalGenerator::start(outlet.clone(), GeneratorConfig::default())?);
    }

    let catalog = StreamCatalog::with_normalizer(Arc::new(network.clone()), config.normalizer.build());
    let streams = catalog.discover(config.discovery.wait_time())?;
    for descriptor in &streams {
        log::info!("Found {}", descriptor.summary());
        let mut request = BindingRequest::new(descriptor.name.to_lowercase()).label_field("label");
        if descriptor.name == "SignalGenerator" {
            if let Some(select) = &args.select {
                request = request.select(select.clone());
            }
        }
        catalog.bind(descriptor, request)?;
    }

    if let Some(path) = &args.save_bindings {
        catalog.save_bindings(Path::new(path))?;
    }

    let mut running = Vec::new();
    for binding in catalog.bindings() {
        for i in 0..args.consumers {
            let receiver = catalog.open_receiver(&binding.binding_uid, &config.receiver)?;
            let remote = receiver.is_remote();
            let backwards = Arc::new(AtomicU64::new(0));
            let counter = Arc::clone(&backwards);
            let mut last: Option<f64> = None;

            let handle = spawn_consumer(
                format!("{}-{}", binding.binding_uid, i + 1),
                receiver,
                config.worker.clone(),
                move |chunk| {
                    for &ts in &chunk.local_timestamps {
                        if last.is_some_and(|prev| ts < prev) {
                            counter.fetch_add(1, Ordering::Relaxed);
                        }
                        last = Some(ts);
                    }
                },
            )?;
            running.push(RunningConsumer {
                binding_uid: binding.binding_uid.clone(),
                remote,
                backwards,
                handle,
            });
        }
    }

    std::thread::sleep(Duration::from_secs_f64(args.duration));

    let reports = running
        .into_iter()
        .map(|consumer| {
            let name = consumer.handle.name().to_string();
            let backwards_steps = consumer.backwards.load(Ordering::Relaxed);
            let mut report = ConsumerReport {
                binding_uid: consumer.binding_uid,
                consumer: name,
                remote: consumer.remote,
                chunks: 0,
                samples: 0,
                timeouts: 0,
                aliasing_corrections: 0,
                backwards_steps,
                error: None,
            };
            match consumer.handle.join() {
                Ok(stats) => {
                    report.chunks = stats.chunks_received;
                    report.samples = stats.samples_received;
                    report.timeouts = stats.timeouts;
                    report.aliasing_corrections = stats.aliasing_corrections;
                }
                Err(e) => report.error = Some(e.to_string()),
            }
            report
        })
        .collect();

    for mut generator in generators {
        generator.stop();
    }
    Ok(reports)
}

fn print_reports(reports: &[ConsumerReport], json: bool) -> i32 {
    if json {
        if let Err(e) = output::emit_json(&reports, false, None) {
            eprintln!("Error: {}", e);
            return exit_codes::EXECUTION_ERROR;
        }
    } else {
        println!();
        println!(
            "  {:<24} {:<8} {:<8} {:<10} {:<9} {:<9} {:<9}",
            "Consumer", "Remote", "Chunks", "Samples", "Timeouts", "Aliasing", "Backward"
        );
        println!("  {}", "-".repeat(82));
        for r in reports {
            println!(
                "  {:<24} {:<8} {:<8} {:<10} {:<9} {:<9} {:<9}",
                r.consumer, r.remote, r.chunks, r.samples, r.timeouts, r.aliasing_corrections, r.backwards_steps
            );
            if let Some(e) = &r.error {
                println!("    error: {}", e);
            }
        }
    }

    if reports.iter().any(|r| r.error.is_some()) {
        exit_codes::EXECUTION_ERROR
    } else {
        exit_codes::SUCCESS
    }
}
