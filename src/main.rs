//! Block Lifecycle CLI
//!
//! Verifies the sample class hierarchy, prints it, or simulates the life of
//! a sample RAID group under the tokio monitor service.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use block_lifecycle::classes::{base_object, raid_group};
use block_lifecycle::{
    sample_registry, AppConfig, BroadcastNotifier, ChannelScheduler, Error, LifecycleEngine,
    LifecycleObject, LifecycleState, MonitorScheduler, MonitorService, ObjectId, RaidGroupObject,
    Result, StateChangeEvent,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Block Lifecycle - Object Lifecycle Engine for Block Services
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (.yaml, .yml or .json)
    #[arg(long, env = "LIFECYCLE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register and verify the sample class hierarchy
    Verify,

    /// Print the sample hierarchy, base class first
    Hierarchy,

    /// Drive a sample RAID group from Specialize to Destroy
    Simulate {
        /// Number of ticks to stay in Ready
        #[arg(long, default_value = "5")]
        ticks: u32,

        /// Length of one tick in milliseconds
        #[arg(long, default_value = "1000")]
        tick_ms: u64,

        /// RAID group width
        #[arg(long, default_value = "4")]
        width: u32,

        /// Print trace entries as JSON
        #[arg(long)]
        json: bool,
    },
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let config = match &args.config {
        Some(path) => {
            info!(path = %path.display(), "Loading configuration");
            AppConfig::from_file(path)?
        }
        None => AppConfig::default(),
    };

    match args.command {
        Command::Verify => verify(),
        Command::Hierarchy => hierarchy(),
        Command::Simulate {
            ticks,
            tick_ms,
            width,
            json,
        } => simulate(config, ticks, Duration::from_millis(tick_ms), width, json).await,
    }
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Commands
// =============================================================================

fn verify() -> Result<()> {
    let registry = sample_registry()?;
    registry.verify_all()?;
    println!("{} classes verified", registry.len());
    Ok(())
}

fn hierarchy() -> Result<()> {
    let registry = sample_registry()?;
    for class_id in registry.class_hierarchy(raid_group::CLASS_ID)? {
        let name = registry.get(class_id).map(|desc| desc.name).unwrap_or("?");
        println!("{:>5}  {}", class_id.0, name);
    }
    Ok(())
}

async fn simulate(
    config: AppConfig,
    ticks: u32,
    tick: Duration,
    width: u32,
    json: bool,
) -> Result<()> {
    let (scheduler, rx) = ChannelScheduler::new();
    let notifier = BroadcastNotifier::new(config.monitor.event_channel_capacity);
    let mut events = notifier.subscribe();

    let trace_capacity = config.lifecycle.default_trace_capacity;
    let trace_flags = config.lifecycle.default_trace_flags;
    let engine = LifecycleEngine::new(Arc::new(sample_registry()?), Arc::new(scheduler.clone()))
        .with_notifier(Arc::new(notifier))
        .with_config(config.lifecycle);

    let service = MonitorService::new(engine.clone(), &scheduler, rx);
    let handle = service.handle();
    let service_task = tokio::spawn(service.run());

    let rg = RaidGroupObject::new(&engine, ObjectId(1), width)?;
    engine.attach_trace(&rg, trace_capacity, trace_flags)?;
    handle.add_object(Arc::clone(&rg));
    scheduler.run_now(rg.object_id());

    let settled = wait_for_state(&mut events, |s| {
        matches!(s, LifecycleState::Ready | LifecycleState::Fail)
    })
    .await?;
    info!(object_id = %rg.object_id(), state = %settled, "Object settled");

    if settled == LifecycleState::Ready {
        for n in 1..=ticks {
            tokio::time::sleep(tick).await;
            let stats = rg.stats();
            info!(
                tick = n,
                heartbeats = stats.heartbeats,
                verify_passes = stats.verify_passes,
                "Tick"
            );
        }
    }

    // The record is torn down once destroyed, so copy the ring first
    let entries = engine.trace_entries(&rg)?;
    let stats = rg.stats();

    engine.set_cond(&rg, base_object::GO_DESTROY)?;
    wait_for_state(&mut events, |s| s == LifecycleState::Destroy).await?;
    let removed = async {
        while handle.contains(rg.object_id()) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(30), removed)
        .await
        .map_err(|_| Error::Internal("timed out waiting for the object to be removed".to_string()))?;

    scheduler.shutdown();
    let cranks = service_task
        .await
        .map_err(|e| Error::Internal(format!("monitor service task failed: {}", e)))?;

    let metrics = engine.metrics().snapshot();
    if json {
        let report = serde_json::json!({
            "trace": entries,
            "object": stats,
            "metrics": metrics,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for entry in &entries {
            println!("{}", entry);
        }
        println!();
        println!(
            "heartbeats={} verify_passes={}",
            stats.heartbeats, stats.verify_passes
        );
        println!(
            "cranks={} conditions_run={} transitions={} destroyed={} work_ratio={:.2}",
            cranks,
            metrics.conditions_run,
            metrics.transitions,
            metrics.destroyed,
            metrics.work_ratio()
        );
    }
    Ok(())
}

/// Wait until a state change lands in a state accepted by `accept`
async fn wait_for_state(
    events: &mut broadcast::Receiver<StateChangeEvent>,
    accept: impl Fn(LifecycleState) -> bool,
) -> Result<LifecycleState> {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(event) if accept(event.to) => return Ok(event.to),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "State change events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(Error::Internal("state change channel closed".to_string()))
                }
            }
        }
    };

    tokio::time::timeout(Duration::from_secs(30), wait)
        .await
        .map_err(|_| Error::Internal("timed out waiting for a state change".to_string()))?
}
