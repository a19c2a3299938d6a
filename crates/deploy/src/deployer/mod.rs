//! Idempotent contract deployment.
//!
//! [`Deployer::deploy`] deploys plain contracts once per network and skips
//! anything the registry already knows about. [`Deployer::deploy_or_upgrade`]
//! manages upgradeable contracts behind ERC-1967 proxies: the first run deploys
//! the proxy, later runs upgrade its implementation in place.
//!
//! The registry is only written after the deployment is confirmed on chain, so
//! re-running after a failure resumes from the first contract that is missing.

mod plain;
mod upgradeable;

use std::sync::Arc;

use alloy_core::{
    dyn_abi::DynSolValue,
    primitives::{Address, TxHash},
};
use anyhow::Context;

use crate::{
    artifacts::{ArtifactSource, ContractFactory, Libraries},
    chain::ChainProvider,
    proxy::DEFAULT_PROXY_ARTIFACT,
    registry::AddressRegistry,
    tx::TransactionSubmitter,
    verify::{NoopVerifier, Verifier},
};

/// Per-run deployment settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployOptions {
    /// Network whose registry is read and written.
    pub network: String,
    /// Account sending every transaction.
    pub from: Address,
    /// Artifact name of the ERC-1967 proxy contract.
    pub proxy_artifact: String,
}

impl DeployOptions {
    pub fn new(network: impl Into<String>, from: Address) -> Self {
        Self {
            network: network.into(),
            from,
            proxy_artifact: DEFAULT_PROXY_ARTIFACT.to_string(),
        }
    }

    pub fn proxy_artifact(mut self, proxy_artifact: impl Into<String>) -> Self {
        self.proxy_artifact = proxy_artifact.into();
        self
    }
}

/// A contract to deploy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeployRequest {
    /// Artifact name of the contract.
    pub name: String,
    /// Alternative registry key for plain deployments (e.g. `USDC` for a `ZUSD` instance).
    pub label: Option<String>,
    /// Constructor arguments, or initializer arguments for proxies.
    pub args: Vec<DynSolValue>,
    pub libraries: Libraries,
}

impl DeployRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn args(mut self, args: Vec<DynSolValue>) -> Self {
        self.args = args;
        self
    }

    pub fn libraries(mut self, libraries: Libraries) -> Self {
        self.libraries = libraries;
        self
    }

    /// Key used in the registry for a plain deployment: the label if any, else the name.
    pub fn registry_key(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }
}

/// How a contract ended up at its address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum DeploymentKind {
    Plain,
    ProxyInitial,
    ProxyUpgrade,
}

/// What a deployment did.
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentRecord {
    pub name: String,
    pub label: Option<String>,
    pub args: Vec<DynSolValue>,
    /// The contract address; for proxies, the proxy address.
    pub address: Address,
    /// Implementation behind the proxy, for proxy deployments.
    pub implementation: Option<Address>,
    /// Creation transaction, or the upgrade call for upgrades.
    pub tx_hash: TxHash,
    pub kind: DeploymentKind,
}

/// Result of [`Deployer::deploy`].
#[derive(Debug, Clone, PartialEq)]
pub enum DeployOutcome {
    Deployed(DeploymentRecord),
    /// The registry already had an address under `key`; nothing was sent.
    Skipped { key: String, address: Address },
}

impl DeployOutcome {
    pub fn address(&self) -> Address {
        match self {
            DeployOutcome::Deployed(record) => record.address,
            DeployOutcome::Skipped { address, .. } => *address,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, DeployOutcome::Skipped { .. })
    }

    pub fn record(&self) -> Option<&DeploymentRecord> {
        match self {
            DeployOutcome::Deployed(record) => Some(record),
            DeployOutcome::Skipped { .. } => None,
        }
    }
}

/// Deploys contracts against one network, recording addresses in the registry.
pub struct Deployer<P, V = NoopVerifier> {
    submitter: TransactionSubmitter<P>,
    registry: AddressRegistry,
    artifacts: Arc<dyn ArtifactSource>,
    verifier: V,
    options: DeployOptions,
}

impl<P: ChainProvider> Deployer<P> {
    pub fn new(
        submitter: TransactionSubmitter<P>,
        registry: AddressRegistry,
        artifacts: impl ArtifactSource + 'static,
        options: DeployOptions,
    ) -> Self {
        Self {
            submitter,
            registry,
            artifacts: Arc::new(artifacts),
            verifier: NoopVerifier,
            options,
        }
    }
}

impl<P: ChainProvider, V: Verifier> Deployer<P, V> {
    /// Replace the verifier used after each deployment.
    pub fn with_verifier<W: Verifier>(self, verifier: W) -> Deployer<P, W> {
        Deployer {
            submitter: self.submitter,
            registry: self.registry,
            artifacts: self.artifacts,
            verifier,
            options: self.options,
        }
    }

    pub fn network(&self) -> &str {
        &self.options.network
    }

    pub fn sender(&self) -> Address {
        self.options.from
    }

    pub fn options(&self) -> &DeployOptions {
        &self.options
    }

    pub fn registry(&self) -> &AddressRegistry {
        &self.registry
    }

    pub fn submitter(&self) -> &TransactionSubmitter<P> {
        &self.submitter
    }

    /// Load and link the factory for contract `name`.
    pub fn factory(&self, name: &str, libraries: &Libraries) -> anyhow::Result<ContractFactory> {
        let artifact = self
            .artifacts
            .artifact(name)
            .with_context(|| format!("Failed to load artifact for {name}"))?;
        ContractFactory::new(&artifact, libraries)
    }

    /// Submit `address` for verification, logging failures.
    async fn verify_best_effort(&self, address: Address, name: &str, constructor_args: &[u8]) {
        if let Err(e) = self.verifier.verify(address, name, constructor_args).await {
            tracing::warn!(%address, contract = name, error = %e, "Verification failed");
        }
    }
}

impl<P, V> std::fmt::Debug for Deployer<P, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deployer")
            .field("network", &self.options.network)
            .field("from", &self.options.from)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_key_prefers_label() {
        let request = DeployRequest::new("ZUSD");
        assert_eq!(request.registry_key(), "ZUSD");

        let request = request.label("USDC");
        assert_eq!(request.registry_key(), "USDC");
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(DeploymentKind::Plain.to_string(), "plain");
        assert_eq!(DeploymentKind::ProxyInitial.to_string(), "proxy-initial");
        assert_eq!(DeploymentKind::ProxyUpgrade.to_string(), "proxy-upgrade");
    }

    #[test]
    fn test_outcome_accessors() {
        let skipped = DeployOutcome::Skipped {
            key: "Hub".to_string(),
            address: Address::ZERO,
        };
        assert!(skipped.is_skipped());
        assert!(skipped.record().is_none());
        assert_eq!(skipped.address(), Address::ZERO);
    }
}
