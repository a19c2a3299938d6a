use std::path::PathBuf;

use alloy_core::primitives::Address;
use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;

/// How `registry show` prints entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(Parser)]
#[command(name = "hubspoke")]
#[command(
    author,
    version,
    about = "Deploy and upgrade hub and spoke contracts idempotently across networks"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "HUBSPOKE_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to a Hubspoke.toml configuration file, or a directory containing one.
    ///
    /// Defaults to ./Hubspoke.toml when present.
    #[arg(long, alias = "conf", env = "HUBSPOKE_CONFIG")]
    pub config: Option<PathBuf>,

    /// The network to operate on, as named in the configuration.
    #[arg(short, long, env = "HUBSPOKE_NETWORK", global = true)]
    pub network: Option<String>,

    /// Run against an in-memory chain. The registry on disk is read but never written.
    #[arg(long, env = "HUBSPOKE_DRY_RUN", default_value_t = false, global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Deploy a plain contract unless it is already recorded.
    Deploy(DeployArgs),

    /// Deploy an upgradeable contract behind a proxy, or upgrade it.
    Upgrade(DeployArgs),

    /// Apply a deployment plan.
    Apply {
        /// Path to the plan TOML file.
        plan: PathBuf,
    },

    /// Inspect or edit the address registry.
    #[command(subcommand)]
    Registry(RegistryCommand),

    /// Show the sender balance and the on-chain state of every recorded contract.
    Status,
}

#[derive(Debug, Clone, clap::Args)]
pub struct DeployArgs {
    /// Artifact name of the contract.
    pub name: String,

    /// Registry key to use instead of the contract name (plain deployments only).
    #[arg(long)]
    pub label: Option<String>,

    /// Constructor or initializer arguments, as `type:value` or `@Key` / `@network:Key`.
    #[arg(long = "arg", value_name = "ARG")]
    pub args: Vec<String>,

    /// Library links, as `Name=@Key` or `Name=0x...`.
    #[arg(long = "library", value_name = "NAME=ADDRESS")]
    pub libraries: Vec<String>,
}

#[derive(Debug, Subcommand)]
pub enum RegistryCommand {
    /// Print every entry recorded for the network.
    Show {
        #[arg(long, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },

    /// Record an address by hand, e.g. after reconciling an interrupted deployment.
    Set { key: String, address: Address },
}
