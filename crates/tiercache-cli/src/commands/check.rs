//! Check command - validate a configuration file.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Args;
use serde::Serialize;

use tiercache_config::RegionConfig;

use super::Context;

/// Arguments for the check command.
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Configuration file (TOML)
    pub file: PathBuf,
}

/// Fully resolved settings, one table per region.
#[derive(Serialize)]
struct Effective<'a> {
    default: &'a RegionConfig,
    regions: BTreeMap<&'a str, RegionConfig>,
}

/// Run the check command.
pub async fn run(args: CheckArgs, ctx: &Context) -> Result<()> {
    let config = tiercache_config::load_config(&args.file)
        .with_context(|| format!("{} is not a valid cache configuration", args.file.display()))?;

    let effective = Effective {
        default: &config.default,
        regions: config
            .region_names()
            .map(|name| (name, config.region(name)))
            .collect(),
    };
    tracing::debug!(file = %args.file.display(), regions = effective.regions.len(), "Configuration valid");

    if ctx.verbose {
        println!("# {}", args.file.display());
        println!("# {} named region(s)\n", effective.regions.len());
    }
    print!("{}", toml::to_string_pretty(&effective)?);
    Ok(())
}
