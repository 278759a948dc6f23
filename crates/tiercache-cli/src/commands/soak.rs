//! Soak command - run a fill-and-read workload against one region.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context as _, Result};
use clap::Args;
use serde::Serialize;

use tiercache::{DisposeReport, MapAuxiliary, Region, RegionStats};
use tiercache_config::CacheConfig;

use super::Context;

/// Arguments for the soak command.
#[derive(Args, Debug)]
pub struct SoakArgs {
    /// Configuration file (TOML); built-in defaults when omitted
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Region to exercise
    #[arg(short, long, default_value = "soak")]
    pub region: String,

    /// Number of distinct keys to write
    #[arg(short, long, default_value_t = 1000)]
    pub keys: usize,

    /// Number of full read passes over the keys
    #[arg(long, default_value_t = 3)]
    pub rounds: usize,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct SoakReport {
    region: String,
    keys: usize,
    rounds: usize,
    found: u64,
    missing: u64,
    elapsed_ms: u128,
    stats: RegionStats,
    dispose: DisposeReport,
}

/// Run the soak command.
pub async fn run(args: SoakArgs, ctx: &Context) -> Result<()> {
    let config = match &args.config {
        Some(path) => tiercache_config::load_config(path)
            .with_context(|| format!("{} is not a valid cache configuration", path.display()))?,
        None => CacheConfig::default(),
    };
    let region_config = config.region(&args.region);

    let disk: Arc<MapAuxiliary<String, String>> = Arc::new(MapAuxiliary::disk("soak-disk"));
    let region = Region::builder(args.region.as_str(), region_config)
        .with_auxiliary(disk.clone())
        .build()
        .context("Failed to build region")?;

    let started = Instant::now();
    for i in 0..args.keys {
        region.put(soak_key(i), format!("value-{i}"))?;
    }
    tracing::debug!(region = %args.region, keys = args.keys, "Fill complete");

    let mut found = 0u64;
    let mut missing = 0u64;
    for round in 0..args.rounds {
        for i in 0..args.keys {
            match region.get(&soak_key(i)).await {
                Some(_) => found += 1,
                None => missing += 1,
            }
        }
        if ctx.verbose {
            eprintln!("round {}/{}: {} found, {} missing", round + 1, args.rounds, found, missing);
        }
    }
    region.wait_for_spool().await;
    let elapsed_ms = started.elapsed().as_millis();

    let stats = region.stats();
    let dispose = region.dispose().await.context("Failed to dispose region")?;

    let report = SoakReport {
        region: args.region,
        keys: args.keys,
        rounds: args.rounds,
        found,
        missing,
        elapsed_ms,
        stats,
        dispose,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, disk.len());
    }
    Ok(())
}

fn soak_key(i: usize) -> String {
    format!("soak:{i}")
}

fn print_report(report: &SoakReport, disk_len: usize) {
    let stats = &report.stats;
    println!("Region:        {}", report.region);
    println!("Policy:        {}", stats.memory.policy);
    println!("Keys:          {} x {} rounds", report.keys, report.rounds);
    println!("Found:         {}", report.found);
    println!("Missing:       {}", report.missing);
    println!("Hit ratio:     {:.3}", stats.hit_ratio());
    println!(
        "Hits:          {} memory, {} auxiliary",
        stats.hits_memory, stats.hits_auxiliary
    );
    println!("Evictions:     {}", stats.memory.evictions);
    println!(
        "Spool:         {} spooled, {} failed, {} dropped",
        stats.spool.spooled, stats.spool.failures, stats.spool.dropped
    );
    println!(
        "Dispose:       {} flushed, {} skipped",
        report.dispose.flushed, report.dispose.skipped
    );
    println!("Disk entries:  {disk_len}");
    println!("Elapsed:       {} ms", report.elapsed_ms);
}
