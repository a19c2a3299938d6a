//! hubspoke-deploy - Idempotent multi-network contract deployment.
//!
//! This crate deploys and upgrades a set of related contracts per network,
//! records their addresses in a per-network registry, and wires them together
//! with setter transactions. Re-running a deployment only does what is missing.

pub mod abi;

mod artifacts;
pub use artifacts::{
    Artifact, ArtifactSource, ContractFactory, ContractHandle, FileArtifacts, Libraries,
    LinkReference, MemoryArtifacts,
};

mod batch;
pub use batch::{columns, process_batches};

pub mod chain;
pub use chain::{ChainProvider, DevChain, JsonRpcChain, TransactionReceipt, TransactionRequest};

mod config;
pub use config::{CONFIG_FILENAME, ENV_PREFIX, ExplorerConfig, HubspokeConfig, NetworkConfig};

mod deployer;
pub use deployer::{
    DeployOptions, DeployOutcome, DeployRequest, Deployer, DeploymentKind, DeploymentRecord,
};

pub mod error;
pub use error::{
    BatchError, DeployError, RegistryError, RpcError, TransactionError, VerificationError,
};

mod plan;
pub use plan::{DeploymentPlan, PlanExecutor, PlanReport, PlanStep, StepReport};

mod proxy;
pub use proxy::{
    DEFAULT_PROXY_ARTIFACT, IMPLEMENTATION_SLOT, INITIALIZER, ProxyDeployment, ProxyManager,
    UPGRADE_SIGNATURE,
};

mod registry;
pub use registry::{AddressRegistry, FileStore, MemoryStore, NetworkAddresses, RegistryStore};

mod retry;
pub use retry::{
    DEFAULT_MAX_ATTEMPTS, RetryOutcome, retry_with_outcome, retry_with_outcome_if,
    with_read_retries, with_retries,
};

mod tx;
pub use tx::{
    ConfirmedTransaction, DEFAULT_CONFIRMATION_TIMEOUT, DEFAULT_POLL_INTERVAL,
    REQUIRED_CONFIRMATIONS, SubmitterConfig, TransactionSubmitter,
};

mod verify;
pub use verify::{ExplorerVerifier, NoopVerifier, Verifier};
