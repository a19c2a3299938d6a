//! Declarative deployment plans.
//!
//! A plan is a TOML file listing steps executed strictly in order:
//!
//! ```toml
//! [[step]]
//! action = "deploy"
//! name = "ZUSD"
//! label = "USDC"
//! args = ["string:USD Coin", "string:USDC", "uint8:6"]
//!
//! [[step]]
//! action = "deploy_proxy"
//! name = "Hub"
//! args = ["@USDC"]
//!
//! [[step]]
//! action = "call"
//! target = "Hub"
//! signature = "setSpoke(uint256,address)"
//! args = ["421614", "@arbitrum-sepolia:Spoke"]
//!
//! [[step]]
//! action = "batch_call"
//! target = "Hub"
//! signature = "setCollateralRatios(address[],uint256[])"
//! lists = [["@USDC", "@WETH", "@WBTC"], ["8000", "7500", "7000"]]
//! batch_size = 2
//! ```
//!
//! Arguments are `type:value` strings, registry references (`@Key` on the
//! current network, `@network:Key` on another one), or plain values when the
//! step's signature already fixes the type.

use std::{
    collections::BTreeMap,
    fmt,
    path::Path,
};

use alloy_core::{
    dyn_abi::{DynSolType, DynSolValue},
    primitives::{Address, TxHash},
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    abi::{self, FunctionSignature},
    artifacts::Libraries,
    batch::{columns, process_batches},
    chain::{ChainProvider, TransactionRequest},
    deployer::{DeployOutcome, DeployRequest, Deployer, DeploymentRecord},
    verify::Verifier,
};

/// An ordered list of deployment steps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentPlan {
    #[serde(default, rename = "step")]
    pub steps: Vec<PlanStep>,
}

/// A single plan step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlanStep {
    /// Deploy a plain contract once.
    Deploy {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
        #[serde(default)]
        args: Vec<String>,
        /// Library name to address argument (usually a registry reference).
        #[serde(default)]
        libraries: BTreeMap<String, String>,
    },
    /// Deploy an upgradeable contract, or upgrade it if already deployed.
    DeployProxy {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        libraries: BTreeMap<String, String>,
    },
    /// Send one transaction to a deployed contract.
    Call {
        target: String,
        signature: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
    },
    /// Send a list of values in batches, one transaction per batch.
    ///
    /// Every parameter of `signature` must be a dynamic array; list `i`
    /// supplies the elements of parameter `i`.
    BatchCall {
        target: String,
        signature: String,
        lists: Vec<Vec<String>>,
        batch_size: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
    },
}

impl PlanStep {
    /// The step's `action` tag.
    pub fn action(&self) -> &'static str {
        match self {
            PlanStep::Deploy { .. } => "deploy",
            PlanStep::DeployProxy { .. } => "deploy_proxy",
            PlanStep::Call { .. } => "call",
            PlanStep::BatchCall { .. } => "batch_call",
        }
    }
}

impl fmt::Display for PlanStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanStep::Deploy { name, label, .. } | PlanStep::DeployProxy { name, label, .. } => {
                write!(f, "{} {}", self.action(), label.as_deref().unwrap_or(name))
            }
            PlanStep::Call {
                target, signature, ..
            }
            | PlanStep::BatchCall {
                target, signature, ..
            } => write!(f, "{} {}.{}", self.action(), target, signature),
        }
    }
}

impl DeploymentPlan {
    /// Parse a plan from TOML.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse deployment plan as TOML")
    }

    /// Load a plan from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("Deployment plan not found: {}", path.display());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read deployment plan from {}", path.display()))?;
        let plan = Self::from_toml(&content)?;
        tracing::info!(path = %path.display(), steps = plan.steps.len(), "Deployment plan loaded");
        Ok(plan)
    }
}

/// What a step did.
#[derive(Debug, Clone, PartialEq)]
pub enum StepReport {
    Deployed(DeploymentRecord),
    Skipped { key: String, address: Address },
    Called { label: String, hash: TxHash },
    Batched { label: String, batches: usize },
}

/// Per-step results of a plan run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanReport {
    pub steps: Vec<StepReport>,
}

impl PlanReport {
    /// Deployments and upgrades performed.
    pub fn records(&self) -> impl Iterator<Item = &DeploymentRecord> {
        self.steps.iter().filter_map(|step| match step {
            StepReport::Deployed(record) => Some(record),
            _ => None,
        })
    }

    pub fn skipped(&self) -> usize {
        self.steps
            .iter()
            .filter(|step| matches!(step, StepReport::Skipped { .. }))
            .count()
    }

    /// Transactions sent by call and batch-call steps.
    pub fn calls(&self) -> usize {
        self.steps
            .iter()
            .map(|step| match step {
                StepReport::Called { .. } => 1,
                StepReport::Batched { batches, .. } => *batches,
                _ => 0,
            })
            .sum()
    }
}

/// Runs a [`DeploymentPlan`] through a [`Deployer`].
#[derive(Debug)]
pub struct PlanExecutor<'a, P, V> {
    deployer: &'a Deployer<P, V>,
}

impl<'a, P: ChainProvider, V: Verifier> PlanExecutor<'a, P, V> {
    pub fn new(deployer: &'a Deployer<P, V>) -> Self {
        Self { deployer }
    }

    /// Execute every step in order, stopping at the first failure.
    ///
    /// Re-running a partially applied plan skips the deployments that were
    /// already recorded.
    pub async fn execute(&self, plan: &DeploymentPlan) -> Result<PlanReport> {
        let mut report = PlanReport::default();

        for (index, step) in plan.steps.iter().enumerate() {
            tracing::info!(
                network = self.deployer.network(),
                step = index,
                action = step.action(),
                "Running {}",
                step
            );

            let outcome = self
                .execute_step(step)
                .await
                .with_context(|| format!("Step {index} ({step}) failed"))?;
            report.steps.push(outcome);
        }

        tracing::info!(
            network = self.deployer.network(),
            deployed = report.records().count(),
            skipped = report.skipped(),
            calls = report.calls(),
            "Plan applied"
        );

        Ok(report)
    }

    async fn execute_step(&self, step: &PlanStep) -> Result<StepReport> {
        match step {
            PlanStep::Deploy {
                name,
                label,
                args,
                libraries,
            } => {
                let request = self.request(name, label, args, libraries)?;
                Ok(match self.deployer.deploy(request).await? {
                    DeployOutcome::Deployed(record) => StepReport::Deployed(record),
                    DeployOutcome::Skipped { key, address } => StepReport::Skipped { key, address },
                })
            }
            PlanStep::DeployProxy {
                name,
                label,
                args,
                libraries,
            } => {
                let request = self.request(name, label, args, libraries)?;
                Ok(StepReport::Deployed(
                    self.deployer.deploy_or_upgrade(request).await?,
                ))
            }
            PlanStep::Call {
                target,
                signature,
                args,
                label,
            } => {
                let address = self.resolve_target(target)?;
                let signature = FunctionSignature::parse(signature)?;
                let args = args
                    .iter()
                    .enumerate()
                    .map(|(i, raw)| self.resolve_arg(raw, signature.params.get(i)))
                    .collect::<Result<Vec<_>>>()?;
                let calldata = signature.encode_call(&args)?;

                let label = label
                    .clone()
                    .unwrap_or_else(|| format!("{target}.{}", signature.name));
                let confirmed = self
                    .deployer
                    .submitter()
                    .send(
                        TransactionRequest::call(self.deployer.sender(), address, calldata),
                        &label,
                    )
                    .await?;

                Ok(StepReport::Called {
                    label,
                    hash: confirmed.hash,
                })
            }
            PlanStep::BatchCall {
                target,
                signature,
                lists,
                batch_size,
                label,
            } => {
                let address = self.resolve_target(target)?;
                let signature = FunctionSignature::parse(signature)?;
                if lists.len() != signature.params.len() {
                    anyhow::bail!(
                        "{} takes {} arrays, got {} lists",
                        signature.canonical(),
                        signature.params.len(),
                        lists.len()
                    );
                }

                let values = lists
                    .iter()
                    .zip(&signature.params)
                    .map(|(list, ty)| {
                        let DynSolType::Array(element) = ty else {
                            anyhow::bail!(
                                "{} must take dynamic arrays to be batched",
                                signature.canonical()
                            );
                        };
                        list.iter()
                            .map(|raw| self.resolve_arg(raw, Some(element)))
                            .collect::<Result<Vec<_>>>()
                    })
                    .collect::<Result<Vec<_>>>()?;

                let label = label
                    .clone()
                    .unwrap_or_else(|| format!("{target}.{}", signature.name));
                let submitter = self.deployer.submitter();
                let sender = self.deployer.sender();
                let signature = &signature;
                let label_ref = label.as_str();

                let batches = process_batches(&values, *batch_size, |batch| async move {
                    let args = columns(&batch)
                        .into_iter()
                        .map(DynSolValue::Array)
                        .collect::<Vec<_>>();
                    let calldata = signature.encode_call(&args)?;
                    submitter
                        .send(TransactionRequest::call(sender, address, calldata), label_ref)
                        .await?;
                    Ok::<_, anyhow::Error>(())
                })
                .await?;

                Ok(StepReport::Batched { label, batches })
            }
        }
    }

    fn request(
        &self,
        name: &str,
        label: &Option<String>,
        args: &[String],
        libraries: &BTreeMap<String, String>,
    ) -> Result<DeployRequest> {
        let args = args
            .iter()
            .map(|raw| self.resolve_arg(raw, None))
            .collect::<Result<Vec<_>>>()?;
        let libraries = libraries
            .iter()
            .map(|(lib, raw)| -> Result<(String, Address)> {
                Ok((lib.clone(), self.resolve_address(raw)?))
            })
            .collect::<Result<Libraries>>()?;

        let mut request = DeployRequest::new(name).args(args).libraries(libraries);
        if let Some(label) = label {
            request = request.label(label);
        }
        Ok(request)
    }

    /// Resolve a raw argument, using `expected` for untyped values.
    fn resolve_arg(&self, raw: &str, expected: Option<&DynSolType>) -> Result<DynSolValue> {
        let raw = raw.trim();

        if raw.starts_with('@') {
            return Ok(DynSolValue::Address(self.resolve_address(raw)?));
        }

        if let Some((ty, value)) = raw.split_once(':') {
            if let Ok(ty) = DynSolType::parse(ty.trim()) {
                return abi::coerce(&ty, value);
            }
        }

        match expected {
            Some(ty) => abi::coerce(ty, raw),
            None => anyhow::bail!("Argument {raw:?} needs an explicit type, e.g. uint256:{raw}"),
        }
    }

    /// Resolve `@Key`, `@network:Key` or a literal address.
    fn resolve_address(&self, raw: &str) -> Result<Address> {
        let raw = raw.trim();
        let Some(reference) = raw.strip_prefix('@') else {
            return raw
                .parse()
                .with_context(|| format!("{raw:?} is neither an address nor a registry reference"));
        };

        let (network, key) = reference
            .split_once(':')
            .unwrap_or((self.deployer.network(), reference));

        self.deployer
            .registry()
            .lookup(network, key)?
            .with_context(|| format!("{key} is not deployed on {network}"))
    }

    /// Resolve a call target: a registry key on the current network, a reference or an address.
    fn resolve_target(&self, target: &str) -> Result<Address> {
        if target.starts_with('@') || target.starts_with("0x") {
            self.resolve_address(target)
        } else {
            self.resolve_address(&format!("@{target}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use alloy_core::primitives::{U256, address};

    use super::*;
    use crate::{
        deployer::test_utils::{NETWORK, deployer, dev_chain},
        registry::AddressRegistry,
    };

    const PLAN: &str = r#"
[[step]]
action = "deploy"
name = "ZUSD"
label = "USDC"
args = ["string:USD Coin", "uint8:6"]

[[step]]
action = "deploy_proxy"
name = "Hub"
args = ["@USDC"]

[[step]]
action = "call"
target = "Hub"
signature = "setSpoke(uint256,address)"
args = ["421614", "@arbitrum-sepolia:Spoke"]

[[step]]
action = "batch_call"
target = "Hub"
signature = "setCollateralRatios(address[],uint256[])"
lists = [["@USDC", "@USDC", "@USDC"], ["8000", "7500", "7000"]]
batch_size = 2
label = "hub.setCollateralRatios"
"#;

    const SPOKE: Address = address!("e7f1725E7734CE288F8367e1Bb143E90bb3F0512");

    #[test]
    fn test_parse_plan() {
        let plan = DeploymentPlan::from_toml(PLAN).unwrap();
        assert_eq!(plan.steps.len(), 4);
        assert_eq!(plan.steps[0].action(), "deploy");
        assert_eq!(plan.steps[0].to_string(), "deploy USDC");
        assert_eq!(plan.steps[2].to_string(), "call Hub.setSpoke(uint256,address)");
        assert!(matches!(
            &plan.steps[3],
            PlanStep::BatchCall { batch_size: 2, lists, .. } if lists.len() == 2
        ));
    }

    #[test]
    fn test_unknown_action_is_rejected() {
        let err = DeploymentPlan::from_toml("[[step]]\naction = \"destroy\"\nname = \"Hub\"\n");
        assert!(err.is_err());
    }

    #[test]
    fn test_load_from_missing_file() {
        assert!(DeploymentPlan::load_from_file(Path::new("/nonexistent/plan.toml")).is_err());
    }

    #[tokio::test]
    async fn test_execute_plan() {
        let chain = dev_chain();
        let registry = AddressRegistry::in_memory();
        registry.set("arbitrum-sepolia", "Spoke", SPOKE).unwrap();
        let deployer = deployer(&chain, &registry);
        let plan = DeploymentPlan::from_toml(PLAN).unwrap();

        let report = PlanExecutor::new(&deployer).execute(&plan).await.unwrap();

        assert_eq!(report.records().count(), 2);
        assert_eq!(report.calls(), 1 + 2);
        assert!(registry.lookup(NETWORK, "USDC").unwrap().is_some());
        let hub = registry.lookup(NETWORK, "Hub").unwrap().unwrap();

        let sent = chain.sent_transactions();
        let calls: Vec<_> = sent.iter().filter(|tx| tx.to == Some(hub)).collect();
        assert_eq!(calls.len(), 3);
        let set_spoke = FunctionSignature::parse("setSpoke(uint256,address)").unwrap();
        assert_eq!(&calls[0].data[..4], &set_spoke.selector());

        // Second run skips the token, upgrades the hub and repeats the calls.
        let report = PlanExecutor::new(&deployer).execute(&plan).await.unwrap();
        assert_eq!(report.skipped(), 1);
        assert_eq!(registry.lookup(NETWORK, "Hub").unwrap(), Some(hub));
    }

    #[tokio::test]
    async fn test_missing_reference_stops_the_plan() {
        let chain = dev_chain();
        let registry = AddressRegistry::in_memory();
        let deployer = deployer(&chain, &registry);
        let plan = DeploymentPlan::from_toml(PLAN).unwrap();

        let err = PlanExecutor::new(&deployer)
            .execute(&plan)
            .await
            .unwrap_err();

        assert!(format!("{err:#}").contains("Spoke is not deployed on arbitrum-sepolia"));
        // The deployments before the failing call are kept.
        assert!(registry.lookup(NETWORK, "USDC").unwrap().is_some());
        assert!(registry.lookup(NETWORK, "Hub").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_resolve_args() {
        let chain = dev_chain();
        let registry = AddressRegistry::in_memory();
        registry.set(NETWORK, "USDC", SPOKE).unwrap();
        let deployer = deployer(&chain, &registry);
        let executor = PlanExecutor::new(&deployer);

        assert_eq!(
            executor.resolve_arg("@USDC", None).unwrap(),
            DynSolValue::Address(SPOKE)
        );
        assert_eq!(
            executor
                .resolve_arg("125", Some(&DynSolType::Uint(256)))
                .unwrap(),
            DynSolValue::Uint(U256::from(125u64), 256)
        );
        assert!(executor.resolve_arg("125", None).is_err());
        assert!(executor.resolve_arg("@WETH", None).is_err());
        assert_eq!(
            executor.resolve_target(&SPOKE.to_string()).unwrap(),
            SPOKE
        );
    }
}
