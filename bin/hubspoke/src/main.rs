//! hubspoke is a CLI tool to deploy and upgrade hub and spoke contracts across networks.

mod cli;

use std::collections::BTreeMap;

use alloy_core::primitives::{Address, U256};
use anyhow::{Context, Result};
use clap::Parser;
use comfy_table::{Table, presets::UTF8_FULL};

use cli::{Cli, Command, DeployArgs, OutputFormat, RegistryCommand};
use hubspoke_deploy::{
    AddressRegistry, ArtifactSource, ChainProvider, ContractFactory, Deployer, DeploymentPlan,
    DevChain, ExplorerVerifier, HubspokeConfig, IMPLEMENTATION_SLOT, JsonRpcChain, PlanExecutor,
    PlanReport, PlanStep, StepReport, TransactionSubmitter,
};

/// Balance given to the sender on the in-memory chain: 100 ether.
const DRY_RUN_BALANCE: u128 = 100_000_000_000_000_000_000;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt().with_max_level(cli.verbosity).init();

    let config = HubspokeConfig::load(cli.config.as_deref())?;
    let network = cli
        .network
        .clone()
        .context("No network selected: pass --network or set HUBSPOKE_NETWORK")?;

    let registry = if cli.dry_run {
        config.registry().overlay()
    } else {
        config.registry()
    };

    // Registry commands never touch the chain.
    if let Command::Registry(command) = &cli.command {
        return registry_command(&registry, &network, command);
    }

    let network_config = config.network(&network)?;
    let verifier = network_config.explorer.as_ref().map(|e| e.verifier());

    if cli.dry_run {
        let chain = dry_run_chain(&config, &registry, &network)?;
        chain.fund(network_config.sender, U256::from(DRY_RUN_BALANCE));
        tracing::warn!(
            network = %network,
            "Dry run: transactions go to an in-memory chain, the registry on disk is left untouched"
        );

        let deployer = deployer(&config, &network, chain, registry, verifier)?;
        run(cli.command, &deployer).await
    } else {
        let chain = JsonRpcChain::new(&network_config.rpc_url, config.rpc_timeout())?;
        tracing::info!(
            network = %network,
            rpc_url = chain.url(),
            sender = %network_config.sender,
            "Connected"
        );

        let deployer = deployer(&config, &network, chain, registry, verifier)?;
        run(cli.command, &deployer).await
    }
}

fn deployer<P: ChainProvider>(
    config: &HubspokeConfig,
    network: &str,
    chain: P,
    registry: AddressRegistry,
    verifier: Option<ExplorerVerifier>,
) -> Result<Deployer<P, Option<ExplorerVerifier>>> {
    let submitter = TransactionSubmitter::new(chain, config.submitter_config());
    Ok(Deployer::new(
        submitter,
        registry,
        config.artifacts(),
        config.deploy_options(network)?,
    )
    .with_verifier(verifier))
}

/// In-memory chain that recognises the configured proxy and mirrors recorded contracts.
fn dry_run_chain(
    config: &HubspokeConfig,
    registry: &AddressRegistry,
    network: &str,
) -> Result<DevChain> {
    let mut chain = DevChain::new();

    match config
        .artifacts()
        .artifact(&config.proxy_artifact)
        .and_then(|artifact| ContractFactory::from_artifact(&artifact))
    {
        Ok(proxy) => chain = chain.with_proxy_bytecode(proxy.bytecode().clone()),
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Proxy artifact unavailable, proxy deployments will not be simulated"
            )
        }
    }

    // Recorded contracts exist on the real chain; give them placeholder code so calls succeed.
    for (key, address) in registry.get(network)?.iter() {
        tracing::debug!(key = %key, %address, "Mirroring recorded contract");
        chain.set_code(*address, vec![0x00]);
    }

    Ok(chain)
}

async fn run<P: ChainProvider>(
    command: Command,
    deployer: &Deployer<P, Option<ExplorerVerifier>>,
) -> Result<()> {
    let plan = match command {
        Command::Deploy(args) => single_step(args, false)?,
        Command::Upgrade(args) => single_step(args, true)?,
        Command::Apply { plan } => DeploymentPlan::load_from_file(&plan)?,
        Command::Status => return status(deployer).await,
        Command::Registry(_) => {
            anyhow::bail!("Registry commands do not need a chain connection")
        }
    };

    let report = PlanExecutor::new(deployer).execute(&plan).await?;
    println!("{}", report_table(&report));
    Ok(())
}

/// Wrap a single deploy or upgrade command into a one-step plan.
fn single_step(args: DeployArgs, upgradeable: bool) -> Result<DeploymentPlan> {
    let libraries = args
        .libraries
        .iter()
        .map(|link| {
            link.split_once('=')
                .map(|(name, address)| (name.trim().to_string(), address.trim().to_string()))
                .with_context(|| format!("Invalid library link {link:?}, expected NAME=ADDRESS"))
        })
        .collect::<Result<BTreeMap<_, _>>>()?;

    let step = if upgradeable {
        PlanStep::DeployProxy {
            name: args.name,
            label: args.label,
            args: args.args,
            libraries,
        }
    } else {
        PlanStep::Deploy {
            name: args.name,
            label: args.label,
            args: args.args,
            libraries,
        }
    };

    Ok(DeploymentPlan { steps: vec![step] })
}

fn registry_command(
    registry: &AddressRegistry,
    network: &str,
    command: &RegistryCommand,
) -> Result<()> {
    match command {
        RegistryCommand::Show { format } => {
            let addresses = registry.get(network)?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&addresses)?),
                OutputFormat::Table => {
                    let mut table = Table::new();
                    table.load_preset(UTF8_FULL).set_header(vec!["Key", "Address"]);
                    for (key, address) in addresses.iter() {
                        table.add_row(vec![key.clone(), address.to_string()]);
                    }
                    println!("{table}");
                }
            }
        }
        RegistryCommand::Set { key, address } => {
            registry.set(network, key, *address)?;
            tracing::info!(network, key = %key, %address, "Registry entry recorded");
        }
    }
    Ok(())
}

async fn status<P: ChainProvider>(deployer: &Deployer<P, Option<ExplorerVerifier>>) -> Result<()> {
    let provider = deployer.submitter().provider();
    let network = deployer.network();

    let block = provider
        .block_number()
        .await
        .context("Failed to read block number")?;
    let timestamp = provider
        .block_timestamp()
        .await
        .context("Failed to read block timestamp")?;
    let balance = provider
        .balance(deployer.sender())
        .await
        .context("Failed to read sender balance")?;

    println!("network:   {network}");
    println!("block:     {block} (timestamp {timestamp})");
    println!("sender:    {} ({balance} wei)", deployer.sender());

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["Key", "Address", "Code", "Implementation"]);

    for (key, address) in deployer.registry().get(network)?.iter() {
        let code = provider.code_at(*address).await?;
        let slot = provider.storage_at(*address, IMPLEMENTATION_SLOT).await?;
        let implementation = Address::from_word(slot);

        table.add_row(vec![
            key.clone(),
            address.to_string(),
            if code.is_empty() {
                "missing".to_string()
            } else {
                format!("{} bytes", code.len())
            },
            if implementation.is_zero() {
                "-".to_string()
            } else {
                implementation.to_string()
            },
        ]);
    }

    println!("{table}");
    Ok(())
}

fn report_table(report: &PlanReport) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["Step", "Result", "Address / Label", "Transaction"]);

    for (index, step) in report.steps.iter().enumerate() {
        let row = match step {
            StepReport::Deployed(record) => vec![
                index.to_string(),
                record.kind.to_string(),
                format!(
                    "{} {}{}",
                    record.label.as_deref().unwrap_or(&record.name),
                    record.address,
                    record
                        .implementation
                        .map(|i| format!(" (impl {i})"))
                        .unwrap_or_default()
                ),
                record.tx_hash.to_string(),
            ],
            StepReport::Skipped { key, address } => vec![
                index.to_string(),
                "skipped".to_string(),
                format!("{key} {address}"),
                "-".to_string(),
            ],
            StepReport::Called { label, hash } => vec![
                index.to_string(),
                "call".to_string(),
                label.clone(),
                hash.to_string(),
            ],
            StepReport::Batched { label, batches } => vec![
                index.to_string(),
                format!("{batches} batches"),
                label.clone(),
                "-".to_string(),
            ],
        };
        table.add_row(row);
    }

    table
}
