//! Main driver for the `forged` job-orchestration daemon.
//!
//! Usage:
//!
//! ```text
//! Persistent job queue, engine lifecycle manager, and event bus daemon.
//!
//! Usage: forged [OPTIONS] <COMMAND>
//!
//! Commands:
//!   run      Run the daemon in the foreground until interrupted
//!   config   Display the resolved configuration and exit
//!   version  List all package versions
//!   help     Print this message or the help of the given subcommand(s)
//!
//! Options:
//!   -c, --config <CONFIG>  configuration file
//!   -D, --debug            debug mode (hierarchical log output)
//!   -v, --verbose...       Verbose mode
//!   -h, --help             Print help
//! ```

mod cli;
mod config;
mod segments;

use std::collections::HashMap;
use std::sync::Arc;

use clap::{crate_authors, crate_description, crate_version, Parser};
use eyre::Result;
use tracing::{info, trace, warn};

use forge_common::telemetry::{self, TelemetryOptions};
use forge_common::{ChapterId, Settings};
use forge_engine::runner::local_docker::{DockerVolumes, LocalDockerRunner};
use forge_engine::runner::local_process::LocalProcessRunner;
use forge_engine::runner::remote_docker::RemoteDockerRunner;
use forge_engine::runner::EngineRunner;
use forge_engine::{EngineManager, EngineRepository, PortRegistry, RunnerKind, VariantRegistry};
use forge_events::EventBus;
use forge_store::{AutoChainPolicy, EngineDispatch, JobKind, JobStore, Worker, WorkerConfig};

use crate::cli::{Opts, SubCommand};
use crate::config::Config;
use crate::segments::MemorySegmentSink;

/// Binary name
pub const NAME: &str = env!("CARGO_BIN_NAME");
/// Binary version
pub const VERSION: &str = crate_version!();
/// Authors
pub const AUTHORS: &str = crate_authors!();

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let opts = Opts::parse();

    telemetry::init(
        NAME,
        TelemetryOptions {
            hierarchical: opts.debug,
            ..Default::default()
        },
    )?;

    banner();
    trace!(verbose = opts.verbose, "daemon starting");

    let cfg = Config::load(opts.config.clone())?;

    match opts.subcmd {
        SubCommand::Version => {
            println!("{}", version());
            println!("{}", forge_engine::version());
            Ok(())
        }
        SubCommand::Config => {
            println!("workdir: {}", cfg.resolved_workdir()?.display());
            Ok(())
        }
        SubCommand::Run => run(cfg).await,
    }
}

/// Wires every subsystem together and runs until interrupted: opens the
/// database, loads (or seeds) the engine catalog, spawns the event bus
/// and both per-kind workers with auto-chaining between them, then waits
/// on Ctrl-C before draining and stopping everything in reverse order.
async fn run(cfg: Config) -> Result<()> {
    let workdir = cfg.resolved_workdir()?;
    let db_path = workdir.join("forged.sqlite");
    info!(path = %db_path.display(), "opening database");
    let db = forge_repo::Database::open(&db_path)?;

    let registry = Arc::new(VariantRegistry::new());
    let engine_repo = db.engine_repository();
    registry.load_from(&engine_repo).await?;
    if registry.list().is_empty() {
        info!("catalog is empty, registering seed variants from config");
        for variant in cfg.seed_variants {
            engine_repo.upsert(&variant).await?;
            registry.register(variant);
        }
    }

    let settings = Arc::new(Settings::new(Arc::new(db.settings_repository())));
    let events = EventBus::spawn().await?;
    let ports = Arc::new(PortRegistry::new());
    let runners = build_runners(&cfg);

    let manager = Arc::new(EngineManager::new(registry.clone(), ports, runners, settings.clone(), events.clone()));
    let dispatch: Arc<dyn EngineDispatch> = manager.clone();

    let segments = Arc::new(MemorySegmentSink::new());
    seed_demo_chapter(&segments);

    let store = Arc::new(JobStore::new(Arc::new(db.job_repository()), segments, events.clone()));

    let recovered = store.recover_stuck_jobs().await?;
    if !recovered.is_empty() {
        info!(count = recovered.len(), "failed jobs left running by a previous crash");
    }

    let autochain = Arc::new(AutoChainPolicy::new(store.clone(), dispatch.clone(), settings));

    let synthesis = Arc::new(Worker::new(
        store.clone(),
        dispatch.clone(),
        autochain.clone(),
        WorkerConfig::for_kind(JobKind::Synthesis),
    ));
    let analysis = Arc::new(Worker::new(store, dispatch, autochain, WorkerConfig::for_kind(JobKind::Analysis)));

    let synthesis_handle = synthesis.spawn();
    let analysis_handle = analysis.spawn();
    let idle_ticker = manager.spawn_auto_stop_ticker();

    info!("forged is running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, draining workers");

    synthesis_handle.shutdown().await;
    analysis_handle.shutdown().await;
    idle_ticker.abort();

    for variant in registry.list() {
        if manager.is_running(&variant.id) {
            if let Err(e) = manager.stop(&variant.id, "manual").await {
                warn!(variant = %variant.id, error = %e, "failed to stop engine during shutdown");
            }
        }
    }

    info!("forged stopped");
    Ok(())
}

/// Local process support is always available; local and remote Docker
/// runners are added only when the config names volumes or endpoints for
/// them, so a bare install with no Docker daemon still starts cleanly.
fn build_runners(cfg: &Config) -> HashMap<RunnerKind, Arc<dyn EngineRunner>> {
    let mut runners: HashMap<RunnerKind, Arc<dyn EngineRunner>> = HashMap::new();
    runners.insert(RunnerKind::LocalProcess, Arc::new(LocalProcessRunner::default()));

    let Some(docker) = &cfg.docker else {
        return runners;
    };

    let volumes = DockerVolumes {
        samples: docker.samples_volume.clone(),
        models: docker.models_volume.clone(),
    };
    match LocalDockerRunner::connect(volumes) {
        Ok(runner) => {
            runners.insert(RunnerKind::LocalDocker, Arc::new(runner));
        }
        Err(e) => warn!(error = %e, "local Docker runner unavailable, continuing without it"),
    }

    for remote in &docker.remote_endpoints {
        let volumes = DockerVolumes {
            samples: docker.samples_volume.clone(),
            models: docker.models_volume.clone(),
        };
        match RemoteDockerRunner::connect(&remote.endpoint, remote.host_label.clone(), remote.reachable_host.clone(), volumes) {
            Ok(runner) => {
                runners.insert(RunnerKind::RemoteDocker, Arc::new(runner));
            }
            Err(e) => warn!(endpoint = %remote.endpoint, error = %e, "remote Docker runner unavailable, continuing without it"),
        }
    }

    runners
}

/// Seed a single demo chapter so `forged run` has something to process
/// out of the box. The segment/chapter subsystem this stands in for is
/// owned by another project in a real deployment.
fn seed_demo_chapter(segments: &MemorySegmentSink) {
    segments.seed_chapter(
        &ChapterId::new("demo-chapter"),
        &["Welcome to the first chapter.", "This is the second segment."],
    );
}

/// Return our version string.
#[inline]
pub fn version() -> String {
    format!("{}/{}", NAME, VERSION)
}

fn banner() {
    eprintln!(
        r##"
{}/{} by {}
{}
"##,
        NAME,
        VERSION,
        AUTHORS,
        crate_description!()
    );
}
