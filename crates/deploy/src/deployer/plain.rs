use crate::{
    abi,
    chain::ChainProvider,
    error::DeployError,
    verify::Verifier,
};

use super::{DeployOutcome, DeployRequest, Deployer, DeploymentKind, DeploymentRecord};

impl<P: ChainProvider, V: Verifier> Deployer<P, V> {
    /// Deploy a plain contract unless the registry already has it.
    ///
    /// The registry key is the request's label if set, else its name. On
    /// success the address is persisted under that key before verification is
    /// attempted. A failed creation leaves the registry untouched.
    pub async fn deploy(&self, request: DeployRequest) -> Result<DeployOutcome, DeployError> {
        let network = self.network();
        let key = request.registry_key();

        if let Some(address) = self.registry.lookup(network, key)? {
            tracing::info!(network, key, %address, "{} already exists at {}", key, address);
            return Ok(DeployOutcome::Skipped {
                key: key.to_string(),
                address,
            });
        }

        tracing::info!(
            network,
            contract = %request.name,
            key,
            args = %abi::format_args(&request.args),
            "Deploying {}",
            key
        );

        let created = async {
            let factory = self.factory(&request.name, &request.libraries)?;
            factory
                .deploy(&self.submitter, self.sender(), &request.args, key)
                .await
        }
        .await
        .map_err(|source| DeployError::Deployment {
            name: key.to_string(),
            source,
        })?;
        let (contract, confirmed) = created;

        self.registry.set(network, key, contract.address)?;

        self.verify_best_effort(
            contract.address,
            &request.name,
            &abi::encode_args(&request.args),
        )
        .await;

        tracing::info!(network, key, address = %contract.address, "{} deployed", key);

        Ok(DeployOutcome::Deployed(DeploymentRecord {
            address: contract.address,
            implementation: None,
            tx_hash: confirmed.hash,
            kind: DeploymentKind::Plain,
            name: request.name,
            label: request.label,
            args: request.args,
        }))
    }
}
