// locus_node/src/main.rs

use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use nalgebra::{Matrix3, Vector3};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use locus_core::bridge::factory::make_update_bridge;
use locus_core::bridge::{CourseBridge, PlanarFilter, PoseBridge, RangeBridge, UpdaterInterface};
use locus_core::estimation::state::PlanarState;
use locus_core::updaters::{
    CourseModel, CourseUpdater, PoseModel, PoseUpdater, RangeModel, RangeUpdater,
};

use locus_node::bus::MessageBus;
use locus_node::cli::Cli;
use locus_node::clock::{Clock, SystemClock};
use locus_node::config::{NodeConfig, COURSE, POSE, RANGE};
use locus_node::health::HealthMonitor;
use locus_node::sim::{GroundTruth, SensorTopics, SyntheticSensors};

fn main() -> ExitCode {
    init_logging();
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// `RUST_LOG` selects the levels; `info` otherwise.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    // --- 1. Load Configuration ---
    if !cli.config.exists() {
        warn!("'{}' not found, using the built-in defaults", cli.config.display());
    }
    let mut config = NodeConfig::load(&cli.config)?;
    if let Some(duration) = cli.duration {
        config.simulation.duration_seconds = duration;
    }
    if let Some(seed) = cli.seed {
        config.simulation.seed = Some(seed);
    }
    config.validate()?;

    if cli.print_config {
        println!("{}", config.to_toml()?);
        return Ok(());
    }
    info!("Loaded configuration from '{}'", cli.config.display());

    // --- 2. Build the Filter ---
    let sim = config.simulation.clone();
    let truth = GroundTruth::new(&sim.trajectory);
    let prior_std = Vector3::from(sim.initial_state.std);
    let initial_state = PlanarState::new(
        truth.pose_at(0.0),
        Matrix3::from_diagonal(&prior_std.component_mul(&prior_std)),
    )
    .with_process_noise(Vector3::from(sim.initial_state.process_noise));
    let filter = Arc::new(PlanarFilter::new(initial_state, config.filter, config.predictor));

    // --- 3. Wire the Bridges ---
    let bus = MessageBus::new();
    let course: CourseBridge = make_update_bridge(
        &bus,
        config.topic(COURSE)?,
        Arc::clone(&filter),
        CourseUpdater::new(CourseModel, config.exteroceptive(COURSE)?),
    )?;
    let pose: PoseBridge = make_update_bridge(
        &bus,
        config.topic(POSE)?,
        Arc::clone(&filter),
        PoseUpdater::new(PoseModel, config.exteroceptive(POSE)?),
    )?;
    let range: RangeBridge = make_update_bridge(
        &bus,
        config.topic(RANGE)?,
        Arc::clone(&filter),
        RangeUpdater::new(RangeModel, config.exteroceptive(RANGE)?),
    )?;
    let bridges: Vec<Arc<dyn UpdaterInterface>> =
        vec![Arc::new(course), Arc::new(pose), Arc::new(range)];

    // --- 4. Health Monitoring ---
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let mut monitor = HealthMonitor::new(Arc::clone(&clock));
    for bridge in &bridges {
        monitor.register(Arc::clone(bridge));
    }
    {
        let filter = Arc::clone(&filter);
        monitor.add_reporter(move |now| filter.get_report(now));
    }
    let monitor = Arc::new(monitor);
    let running = Arc::new(AtomicBool::new(true));
    let health = Arc::clone(&monitor).spawn(
        Duration::from_secs_f64(sim.health_period),
        Arc::clone(&running),
    )?;

    // --- 5. Start the Sensors ---
    let rng = match sim.seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_entropy(),
    };
    let topics = SensorTopics {
        course: config.topic(COURSE)?.to_string(),
        pose: config.topic(POSE)?.to_string(),
        range: config.topic(RANGE)?.to_string(),
    };
    let started = Instant::now();
    let sensors = SyntheticSensors::new(sim.clone(), rng)?.spawn(
        bus.clone(),
        topics,
        Arc::clone(&clock),
        Arc::clone(&running),
    )?;

    // --- 6. Run ---
    info!("Running for {:.1}s", sim.duration_seconds);
    thread::sleep(Duration::from_secs_f64(sim.duration_seconds));
    running.store(false, Ordering::Relaxed);
    sensors.join();
    health.join();

    let elapsed = started.elapsed().as_secs_f64();
    let report = monitor.check();

    // Unsubscribes every bridge once its queue has drained.
    drop(monitor);
    drop(bridges);

    // --- 7. Report ---
    let estimate = filter.snapshot();
    let expected = truth.pose_at(elapsed);
    info!(
        "Final estimate: x={:.2} y={:.2} yaw={:.3} (truth x={:.2} y={:.2} yaw={:.3})",
        estimate.x(),
        estimate.y(),
        estimate.yaw(),
        expected.x,
        expected.y,
        expected.z
    );
    info!(
        "Position error {:.2} m, position 1-sigma {:.2} m",
        (estimate.mean.xy() - expected.xy()).norm(),
        (estimate.covariance[(0, 0)] + estimate.covariance[(1, 1)]).sqrt()
    );
    println!("{report}");
    Ok(())
}
