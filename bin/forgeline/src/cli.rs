use std::path::PathBuf;

use alloy_core::primitives::Address;
use clap::{Parser, Subcommand};
use forgeline_deploy::MANIFEST_FILENAME;
use tracing::level_filters::LevelFilter;
use url::Url;

#[derive(Parser)]
#[command(name = "forgeline")]
#[command(
    author,
    version,
    about = "Deploy and wire interdependent contract modules from a manifest"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "FORGELINE_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to the run manifest, or a directory containing `Forgeline.toml`.
    #[arg(short, long, env = "FORGELINE_MANIFEST", default_value = MANIFEST_FILENAME)]
    pub manifest: PathBuf,

    /// The JSON-RPC endpoint of the target network.
    #[arg(long, alias = "rpc", env = "FORGELINE_RPC_URL")]
    pub rpc_url: Url,

    /// The unlocked account that signs every transaction of the run.
    #[arg(long, alias = "deployer", env = "FORGELINE_FROM")]
    pub from: Address,

    /// An external input, as `KEY=VALUE`. Overrides the process environment.
    #[arg(short, long = "input", value_parser = parse_input)]
    pub inputs: Vec<(String, String)>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Deploy every pending unit and run its post-deploy actions.
    Deploy {
        /// Stop the run at the first failed post-deploy action.
        #[arg(long)]
        halt_on_partial: bool,
    },
    /// Order and validate the units without sending anything.
    Plan,
}

fn parse_input(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{raw}`"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in `{raw}`"));
    }
    Ok((key.to_string(), value.to_string()))
}
