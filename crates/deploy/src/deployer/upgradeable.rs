use anyhow::Context;

use crate::{
    artifacts::{ContractFactory, Libraries},
    chain::ChainProvider,
    error::DeployError,
    proxy::ProxyManager,
    verify::Verifier,
};

use super::{DeployRequest, Deployer, DeploymentKind, DeploymentRecord};

impl<P: ChainProvider, V: Verifier> Deployer<P, V> {
    /// Deploy an upgradeable contract behind a proxy, or upgrade the existing proxy.
    ///
    /// The registry key is always the contract name; the label only shows up
    /// in logs. The first run deploys the implementation and an ERC-1967 proxy
    /// initialized with the request's arguments, then records the proxy. Later
    /// runs check that the recorded address is still a live proxy (it has code
    /// and a non-zero implementation slot), deploy a new
    /// implementation and upgrade the proxy to it. The registry is not
    /// rewritten on upgrade.
    pub async fn deploy_or_upgrade(
        &self,
        request: DeployRequest,
    ) -> Result<DeploymentRecord, DeployError> {
        let network = self.network();
        let name = request.name.as_str();
        let label = request.label.as_deref().unwrap_or(name);

        match self.registry.lookup(network, name)? {
            None => {
                tracing::info!(
                    network,
                    contract = name,
                    label,
                    "Deploying {} behind a proxy",
                    label
                );

                let deployed = async {
                    let implementation = self.factory(name, &request.libraries)?;
                    let proxy_factory = self.proxy_factory()?;
                    ProxyManager::new(&self.submitter, &proxy_factory, self.sender())
                        .deploy_proxy(&implementation, &request.args, label)
                        .await
                }
                .await
                .map_err(|source| DeployError::Deployment {
                    name: name.to_string(),
                    source,
                })?;

                self.registry.set(network, name, deployed.proxy)?;
                self.verify_best_effort(deployed.implementation, name, &[]).await;

                tracing::info!(
                    network,
                    contract = name,
                    proxy = %deployed.proxy,
                    implementation = %deployed.implementation,
                    "{} deployed",
                    label
                );

                Ok(DeploymentRecord {
                    address: deployed.proxy,
                    implementation: Some(deployed.implementation),
                    tx_hash: deployed.tx_hash,
                    kind: DeploymentKind::ProxyInitial,
                    name: request.name.clone(),
                    label: request.label.clone(),
                    args: request.args.clone(),
                })
            }
            Some(proxy) => {
                tracing::info!(
                    network,
                    contract = name,
                    label,
                    %proxy,
                    "Upgrading {} at {}",
                    label,
                    proxy
                );

                let upgrade_error = |source: anyhow::Error| DeployError::Upgrade {
                    name: name.to_string(),
                    proxy,
                    source,
                };

                let implementation = self
                    .factory(name, &request.libraries)
                    .map_err(upgrade_error)?;
                let proxy_factory = self.proxy_factory().map_err(upgrade_error)?;
                let manager = ProxyManager::new(&self.submitter, &proxy_factory, self.sender());

                if !manager.has_code(proxy).await.map_err(upgrade_error)? {
                    return Err(DeployError::ProxyMissing {
                        name: name.to_string(),
                        proxy,
                    });
                }
                if manager
                    .implementation_of(proxy)
                    .await
                    .map_err(upgrade_error)?
                    .is_zero()
                {
                    return Err(DeployError::NotAProxy {
                        name: name.to_string(),
                        proxy,
                    });
                }

                let upgraded = manager
                    .upgrade_proxy(proxy, &implementation, label)
                    .await
                    .map_err(upgrade_error)?;

                self.verify_best_effort(upgraded.implementation, name, &[]).await;

                Ok(DeploymentRecord {
                    address: upgraded.proxy,
                    implementation: Some(upgraded.implementation),
                    tx_hash: upgraded.tx_hash,
                    kind: DeploymentKind::ProxyUpgrade,
                    name: request.name.clone(),
                    label: request.label.clone(),
                    args: request.args.clone(),
                })
            }
        }
    }

    fn proxy_factory(&self) -> anyhow::Result<ContractFactory> {
        let proxy_artifact = &self.options().proxy_artifact;
        self.factory(proxy_artifact, &Libraries::new())
            .with_context(|| format!("Failed to load proxy contract {proxy_artifact}"))
    }
}

#[cfg(test)]
mod tests {
    use alloy_core::{dyn_abi::DynSolValue, primitives::Address};

    use super::*;
    use crate::{
        deployer::test_utils::{NETWORK, SENDER, deployer, dev_chain},
        proxy::IMPLEMENTATION_SLOT,
        registry::AddressRegistry,
    };

    #[tokio::test]
    async fn test_first_run_deploys_proxy() {
        let chain = dev_chain();
        let registry = AddressRegistry::in_memory();
        let deployer = deployer(&chain, &registry);

        let record = deployer
            .deploy_or_upgrade(
                DeployRequest::new("Hub")
                    .label("hub")
                    .args(vec![DynSolValue::Address(SENDER)]),
            )
            .await
            .unwrap();

        assert_eq!(record.kind, DeploymentKind::ProxyInitial);
        assert_eq!(registry.lookup(NETWORK, "Hub").unwrap(), Some(record.address));
        assert_eq!(registry.lookup(NETWORK, "hub").unwrap(), None);
        assert_eq!(
            chain.storage_at(record.address, IMPLEMENTATION_SLOT).await.unwrap(),
            record.implementation.unwrap().into_word()
        );
    }

    #[tokio::test]
    async fn test_second_run_upgrades_in_place() {
        let chain = dev_chain();
        let registry = AddressRegistry::in_memory();
        let deployer = deployer(&chain, &registry);

        let first = deployer
            .deploy_or_upgrade(DeployRequest::new("Hub"))
            .await
            .unwrap();
        let registry_before = registry.get(NETWORK).unwrap();

        let second = deployer
            .deploy_or_upgrade(DeployRequest::new("Hub"))
            .await
            .unwrap();

        assert_eq!(second.kind, DeploymentKind::ProxyUpgrade);
        assert_eq!(second.address, first.address);
        assert_ne!(second.implementation, first.implementation);
        assert_eq!(registry.get(NETWORK).unwrap(), registry_before);
    }

    #[tokio::test]
    async fn test_missing_proxy_is_reported() {
        let chain = dev_chain();
        let ghost = Address::repeat_byte(0x42);
        let registry = AddressRegistry::in_memory();
        registry.set(NETWORK, "Hub", ghost).unwrap();
        let deployer = deployer(&chain, &registry);

        let err = deployer
            .deploy_or_upgrade(DeployRequest::new("Hub"))
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::ProxyMissing { proxy, .. } if proxy == ghost));
        assert!(chain.sent_transactions().is_empty());
        assert_eq!(registry.lookup(NETWORK, "Hub").unwrap(), Some(ghost));
    }

    #[tokio::test]
    async fn test_non_proxy_entry_sends_nothing() {
        let chain = dev_chain();
        let plain = Address::repeat_byte(0x43);
        chain.set_code(plain, vec![0x01]);
        let registry = AddressRegistry::in_memory();
        registry.set(NETWORK, "Hub", plain).unwrap();
        let deployer = deployer(&chain, &registry);

        let err = deployer
            .deploy_or_upgrade(DeployRequest::new("Hub"))
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::NotAProxy { proxy, .. } if proxy == plain));
        assert!(chain.sent_transactions().is_empty());
        assert_eq!(chain.creation_count(), 0);
        assert_eq!(registry.lookup(NETWORK, "Hub").unwrap(), Some(plain));
    }

    #[tokio::test]
    async fn test_failed_upgrade_keeps_registry() {
        let chain = dev_chain();
        let registry = AddressRegistry::in_memory();
        let deployer = deployer(&chain, &registry);

        let first = deployer
            .deploy_or_upgrade(DeployRequest::new("Hub"))
            .await
            .unwrap();
        chain.revert_calls_to(first.address);

        let err = deployer
            .deploy_or_upgrade(DeployRequest::new("Hub"))
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::Upgrade { proxy, .. } if proxy == first.address));
        assert_eq!(registry.lookup(NETWORK, "Hub").unwrap(), Some(first.address));
    }

    #[tokio::test]
    async fn test_failed_initial_deploy_records_nothing() {
        let chain = dev_chain();
        chain.reject_next_sends(1);
        let registry = AddressRegistry::in_memory();
        let deployer = deployer(&chain, &registry);

        let err = deployer
            .deploy_or_upgrade(DeployRequest::new("Hub"))
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::Deployment { .. }));
        assert!(registry.get(NETWORK).unwrap().is_empty());
    }
}
