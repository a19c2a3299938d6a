//! Layered configuration.
//!
//! Values come from built-in defaults, then `Hubspoke.toml`, then
//! `HUBSPOKE_*` environment variables (nested keys separated by `__`, e.g.
//! `HUBSPOKE_NETWORKS__SEPOLIA__RPC_URL`).

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::{
    artifacts::FileArtifacts,
    deployer::DeployOptions,
    proxy::DEFAULT_PROXY_ARTIFACT,
    registry::AddressRegistry,
    retry::DEFAULT_MAX_ATTEMPTS,
    tx::{REQUIRED_CONFIRMATIONS, SubmitterConfig},
    verify::ExplorerVerifier,
};

/// Default configuration file name.
pub const CONFIG_FILENAME: &str = "Hubspoke.toml";

/// Prefix of configuration environment variables.
pub const ENV_PREFIX: &str = "HUBSPOKE_";

/// Connection settings for one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub rpc_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    /// Node-managed account that sends every transaction.
    pub sender: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explorer: Option<ExplorerConfig>,
}

/// Block explorer used for source verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplorerConfig {
    pub api_url: String,
    pub api_key: String,
}

impl ExplorerConfig {
    pub fn verifier(&self) -> ExplorerVerifier {
        ExplorerVerifier::new(&self.api_url, &self.api_key)
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubspokeConfig {
    /// Directory holding one `<network>.json` registry file per network.
    pub deployments_dir: PathBuf,
    /// Root of the compiled Hardhat artifacts.
    pub artifacts_dir: PathBuf,
    /// Artifact name of the ERC-1967 proxy.
    pub proxy_artifact: String,
    pub confirmations: u64,
    /// Attempts for retried reads.
    pub max_attempts: usize,
    pub poll_interval_ms: u64,
    pub confirmation_timeout_secs: u64,
    pub rpc_timeout_secs: u64,
    #[serde(default)]
    pub networks: BTreeMap<String, NetworkConfig>,
}

impl Default for HubspokeConfig {
    fn default() -> Self {
        Self {
            deployments_dir: PathBuf::from("deployments"),
            artifacts_dir: PathBuf::from("artifacts"),
            proxy_artifact: DEFAULT_PROXY_ARTIFACT.to_string(),
            confirmations: REQUIRED_CONFIRMATIONS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            poll_interval_ms: 1_000,
            confirmation_timeout_secs: 300,
            rpc_timeout_secs: 30,
            networks: BTreeMap::new(),
        }
    }
}

impl HubspokeConfig {
    /// The provider stack: defaults, then the TOML file, then the environment.
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load the configuration.
    ///
    /// An explicit `path` must exist. Without one, `Hubspoke.toml` in the
    /// working directory is used if present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) if !path.exists() => {
                anyhow::bail!("Configuration file not found: {}", path.display())
            }
            Some(path) if path.is_dir() => path.join(CONFIG_FILENAME),
            Some(path) => path.to_path_buf(),
            None => PathBuf::from(CONFIG_FILENAME),
        };

        let config: Self = Self::figment(&path)
            .extract()
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

        tracing::debug!(
            path = %path.display(),
            networks = config.networks.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Settings for `network`.
    pub fn network(&self, network: &str) -> Result<&NetworkConfig> {
        self.networks.get(network).with_context(|| {
            format!(
                "Network {network} is not configured (add [networks.{network}] to {CONFIG_FILENAME})"
            )
        })
    }

    pub fn submitter_config(&self) -> SubmitterConfig {
        SubmitterConfig {
            confirmations: self.confirmations,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            timeout: Duration::from_secs(self.confirmation_timeout_secs),
            read_attempts: self.max_attempts,
        }
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    pub fn deploy_options(&self, network: &str) -> Result<DeployOptions> {
        let sender = self.network(network)?.sender;
        Ok(DeployOptions::new(network, sender).proxy_artifact(&self.proxy_artifact))
    }

    pub fn registry(&self) -> AddressRegistry {
        AddressRegistry::in_dir(&self.deployments_dir)
    }

    pub fn artifacts(&self) -> FileArtifacts {
        FileArtifacts::new(&self.artifacts_dir)
    }
}
