// CLASSIFICATION: COMMUNITY
// Filename: tsdb_sim.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-16

//! Drive a mixed thread and interrupt workload through the thread-state
//! database and dump the registration trace as JSONL.

use std::thread;

use clap::Parser;
use cohesix_threadstate::{
    DeviceId, EntryFlags, HostPlatform, SetupFlags, ThreadStateConfig, ThreadStateDb,
    ThreadStateError, TimeoutMode,
};
use log::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "tsdb-sim", about = "Exercise the thread-state database on the host")]
struct Cli {
    /// Worker threads performing ordinary entries.
    #[arg(long, default_value_t = 4)]
    threads: u32,
    /// Entries per worker.
    #[arg(long, default_value_t = 64)]
    iterations: u32,
    /// Virtual processors exposed by the host platform. Raised to one per
    /// worker plus the driving thread.
    #[arg(long, default_value_t = 4)]
    processors: u32,
    /// Devices exposed by the host platform.
    #[arg(long, default_value_t = 2)]
    devices: u32,
    /// Non-compute budget in milliseconds.
    #[arg(long, default_value_t = 500)]
    timeout_ms: u32,
    /// Measure with busy-delay decrements instead of absolute deadlines.
    #[arg(long)]
    delay_mode: bool,
    /// Log node details on every entry and exit.
    #[arg(long)]
    print_info: bool,
}

fn main() {
    env_logger::init();
    if let Err(err) = run(Cli::parse()) {
        eprintln!("tsdb-sim: {err}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), ThreadStateError> {
    let mut flags = SetupFlags::ENABLED | SetupFlags::TIMEOUT_ENABLED | SetupFlags::RESET_ON_TIMEOUT;
    if cli.print_info {
        flags |= SetupFlags::PRINT_INFO;
    }
    let config = ThreadStateConfig::from_env()
        .unwrap_or_else(|err| {
            warn!("tsdb-sim: ignoring environment overrides: {err}");
            ThreadStateConfig::default()
        })
        .with_setup_flags(flags);
    let devices = cli.devices.max(1);
    let iterations = cli.iterations;
    // Host identities map round-robin onto processors; two workers sharing
    // one would run lockless handlers for the same pair concurrently.
    let processors = cli.processors.max(cli.threads.saturating_add(1));
    if processors != cli.processors {
        info!("tsdb-sim: raising processors to {processors} for {} workers", cli.threads);
    }
    let platform = HostPlatform::new(processors, devices);
    let db = ThreadStateDb::start(platform, config)?;

    let mode = if cli.delay_mode {
        TimeoutMode::OsDelay
    } else {
        TimeoutMode::OsTimer
    };
    for instance in 0..devices {
        db.init_timeout(DeviceId::new(instance), cli.timeout_ms.saturating_mul(1000), mode)?;
    }
    db.set_timeout_hook(|report| {
        warn!(
            "tsdb-sim: seq {} ({}) exceeded {} ms after {} us",
            report.sequence, report.kind, report.budget_ms, report.elapsed_us
        );
    });

    let collisions = thread::scope(|scope| {
        let workers: Vec<_> = (0..cli.threads)
            .map(|worker| {
                let db = &db;
                scope.spawn(move || {
                    let device = DeviceId::new(worker % devices);
                    let mut collisions = 0u32;
                    for round in 0..iterations {
                        let outer = db.enter(EntryFlags::empty());
                        if round % 4 == 0 {
                            let nested = db.enter(EntryFlags::empty());
                            let _ = db.check_timeout(Some(device));
                            drop(nested);
                        }
                        match db.enter_isr_lockless(device) {
                            Ok(isr) => {
                                let _ = db.check_timeout(Some(device));
                                drop(isr);
                            }
                            Err(err @ ThreadStateError::DoubleOccupancy { .. }) => {
                                warn!("tsdb-sim: worker {worker}: {err}");
                                collisions += 1;
                            }
                            Err(err) => warn!("tsdb-sim: lockless entry failed: {err}"),
                        }
                        db.yield_if_necessary(Some(device));
                        drop(outer);
                    }
                    collisions
                })
            })
            .collect();

        let device = DeviceId::new(0);
        for _ in 0..iterations {
            let isr = db.enter_isr(device);
            drop(isr);
            let deferred = db.enter_deferred(device);
            let _ = db.check_timeout(Some(device));
            drop(deferred);
        }

        workers
            .into_iter()
            .map(|worker| worker.join().unwrap_or(0))
            .sum::<u32>()
    });

    let stats = db.registry_stats();
    info!(
        "tsdb-sim: {} registrations traced, {} active, {} preempted, {} lockless double occupancies",
        stats.traced, stats.active, stats.preempted, collisions
    );
    for record in db.trace_snapshot() {
        match record.to_json_line() {
            Ok(line) => println!("{line}"),
            Err(err) => warn!("tsdb-sim: dropping trace record {}: {err:?}", record.sequence()),
        }
    }
    db.shutdown();
    Ok(())
}
