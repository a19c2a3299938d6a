//! ERC-1967 / UUPS proxy deployment and upgrades.
//!
//! A proxy is deployed as `ERC1967Proxy(implementation, initialize(args))`.
//! Upgrades call `upgradeToAndCall(newImplementation, 0x)` on the proxy, which
//! the UUPS implementation authorizes. The current implementation is always
//! read back from the ERC-1967 implementation slot.

use alloy_core::{
    dyn_abi::DynSolValue,
    primitives::{Address, B256, TxHash, b256},
};
use anyhow::{Context, Result};

use crate::{
    abi,
    artifacts::ContractFactory,
    chain::ChainProvider,
    retry::with_read_retries,
    tx::TransactionSubmitter,
};

/// `bytes32(uint256(keccak256("eip1967.proxy.implementation")) - 1)`.
pub const IMPLEMENTATION_SLOT: B256 =
    b256!("360894a13ba1a3210667c828492db98dca3e2076cc3735a920a3ca505d382bbc");

/// UUPS upgrade entry point.
pub const UPGRADE_SIGNATURE: &str = "upgradeToAndCall(address,bytes)";

/// Name of the initializer called through the proxy on first deployment.
pub const INITIALIZER: &str = "initialize";

/// Artifact name of the proxy contract.
pub const DEFAULT_PROXY_ARTIFACT: &str = "ERC1967Proxy";

/// Result of deploying or upgrading a proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyDeployment {
    pub proxy: Address,
    pub implementation: Address,
    /// Proxy creation on first deployment, the upgrade call otherwise.
    pub tx_hash: TxHash,
}

/// Deploys and upgrades ERC-1967 proxies.
#[derive(Debug)]
pub struct ProxyManager<'a, P> {
    submitter: &'a TransactionSubmitter<P>,
    proxy_factory: &'a ContractFactory,
    from: Address,
}

impl<'a, P: ChainProvider> ProxyManager<'a, P> {
    pub fn new(
        submitter: &'a TransactionSubmitter<P>,
        proxy_factory: &'a ContractFactory,
        from: Address,
    ) -> Self {
        Self {
            submitter,
            proxy_factory,
            from,
        }
    }

    /// Deploy `implementation` and a proxy in front of it, initialized with `init_args`.
    pub async fn deploy_proxy(
        &self,
        implementation: &ContractFactory,
        init_args: &[DynSolValue],
        label: &str,
    ) -> Result<ProxyDeployment> {
        let (implementation, _) = implementation
            .deploy(
                self.submitter,
                self.from,
                &[],
                &format!("{label} implementation"),
            )
            .await
            .context("Failed to deploy implementation")?;

        let initializer = abi::signature_for(INITIALIZER, init_args)?;
        let init_data = abi::encode_call(&initializer, init_args)
            .with_context(|| format!("Failed to encode {initializer}"))?;

        tracing::debug!(
            label,
            implementation = %implementation.address,
            initializer,
            args = %abi::format_args(init_args),
            "Deploying proxy"
        );

        let (proxy, confirmed) = self
            .proxy_factory
            .deploy(
                self.submitter,
                self.from,
                &[
                    DynSolValue::Address(implementation.address),
                    DynSolValue::Bytes(init_data.to_vec()),
                ],
                &format!("{label} proxy"),
            )
            .await
            .context("Failed to deploy proxy")?;

        let recorded = self.implementation_of(proxy.address).await?;
        if recorded != implementation.address {
            anyhow::bail!(
                "Proxy {} points at {}, expected {}",
                proxy.address,
                recorded,
                implementation.address
            );
        }

        Ok(ProxyDeployment {
            proxy: proxy.address,
            implementation: implementation.address,
            tx_hash: confirmed.hash,
        })
    }

    /// Deploy a new `implementation` and point the proxy at `proxy` to it.
    ///
    /// Fails without sending anything when `proxy` has an empty implementation slot.
    pub async fn upgrade_proxy(
        &self,
        proxy: Address,
        implementation: &ContractFactory,
        label: &str,
    ) -> Result<ProxyDeployment> {
        let previous = self.implementation_of(proxy).await?;
        if previous.is_zero() {
            anyhow::bail!("{proxy} has no implementation in its ERC-1967 slot");
        }

        let (implementation, _) = implementation
            .deploy(
                self.submitter,
                self.from,
                &[],
                &format!("{label} implementation"),
            )
            .await
            .context("Failed to deploy new implementation")?;

        let upgrade = self
            .proxy_factory
            .attach(proxy)
            .call(
                self.from,
                UPGRADE_SIGNATURE,
                &[
                    DynSolValue::Address(implementation.address),
                    DynSolValue::Bytes(Vec::new()),
                ],
            )?;
        let confirmed = self
            .submitter
            .send(upgrade, &format!("{label} upgrade"))
            .await
            .context("Upgrade call failed")?;

        let current = self.implementation_of(proxy).await?;
        if current != implementation.address {
            anyhow::bail!(
                "Proxy {} still points at {} after upgrade to {}",
                proxy,
                current,
                implementation.address
            );
        }

        tracing::info!(
            label,
            %proxy,
            %previous,
            implementation = %current,
            "Proxy upgraded"
        );

        Ok(ProxyDeployment {
            proxy,
            implementation: current,
            tx_hash: confirmed.hash,
        })
    }

    /// The implementation address stored in the proxy's ERC-1967 slot.
    pub async fn implementation_of(&self, proxy: Address) -> Result<Address> {
        let provider = self.submitter.provider();
        let word = with_read_retries(
            "implementation slot",
            self.submitter.config().read_attempts,
            || provider.storage_at(proxy, IMPLEMENTATION_SLOT),
        )
        .await
        .with_context(|| format!("Failed to read implementation slot of {proxy}"))?;
        Ok(Address::from_word(word))
    }

    /// Whether `address` holds contract code.
    pub async fn has_code(&self, address: Address) -> Result<bool> {
        let provider = self.submitter.provider();
        let code = with_read_retries(
            "code lookup",
            self.submitter.config().read_attempts,
            || provider.code_at(address),
        )
        .await
        .with_context(|| format!("Failed to read code at {address}"))?;
        Ok(!code.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use alloy_core::primitives::{U256, address, keccak256};

    use super::*;
    use crate::{artifacts::Artifact, chain::DevChain, tx::SubmitterConfig};

    const SENDER: Address = address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266");
    const PROXY_CODE: [u8; 3] = [0xfe, 0xed, 0x01];

    fn setup() -> (DevChain, TransactionSubmitter<DevChain>, ContractFactory) {
        let chain = DevChain::new().with_proxy_bytecode(PROXY_CODE.to_vec());
        let submitter = TransactionSubmitter::new(
            chain.clone(),
            SubmitterConfig {
                poll_interval: Duration::from_millis(1),
                ..Default::default()
            },
        );
        let proxy =
            ContractFactory::from_artifact(&Artifact::new(DEFAULT_PROXY_ARTIFACT, PROXY_CODE))
                .unwrap();
        (chain, submitter, proxy)
    }

    #[test]
    fn test_implementation_slot_constant() {
        let slot = U256::from_be_bytes(keccak256("eip1967.proxy.implementation").0) - U256::from(1);
        assert_eq!(B256::from(slot), IMPLEMENTATION_SLOT);
    }

    #[tokio::test]
    async fn test_deploy_then_upgrade() {
        let (chain, submitter, proxy_factory) = setup();
        let manager = ProxyManager::new(&submitter, &proxy_factory, SENDER);
        let hub_v1 = ContractFactory::from_artifact(&Artifact::new("Hub", [0x01])).unwrap();
        let hub_v2 = ContractFactory::from_artifact(&Artifact::new("Hub", [0x02])).unwrap();

        let deployed = manager
            .deploy_proxy(&hub_v1, &[DynSolValue::Address(SENDER)], "Hub")
            .await
            .unwrap();
        assert_ne!(deployed.proxy, deployed.implementation);
        assert!(manager.has_code(deployed.proxy).await.unwrap());
        assert_eq!(
            manager.implementation_of(deployed.proxy).await.unwrap(),
            deployed.implementation
        );

        let upgraded = manager
            .upgrade_proxy(deployed.proxy, &hub_v2, "Hub")
            .await
            .unwrap();
        assert_eq!(upgraded.proxy, deployed.proxy);
        assert_ne!(upgraded.implementation, deployed.implementation);

        // implementation, proxy, implementation, upgrade call
        assert_eq!(chain.sent_transactions().len(), 4);
        assert_eq!(chain.creation_count(), 3);
    }

    #[tokio::test]
    async fn test_upgrade_of_non_proxy_fails() {
        let (chain, submitter, proxy_factory) = setup();
        let manager = ProxyManager::new(&submitter, &proxy_factory, SENDER);
        let plain = address!("5FbDB2315678afecb367f032d93F642f64180aa3");
        chain.set_code(plain, vec![0x01]);

        let hub = ContractFactory::from_artifact(&Artifact::new("Hub", [0x02])).unwrap();
        let err = manager.upgrade_proxy(plain, &hub, "Hub").await.unwrap_err();
        assert!(err.to_string().contains("no implementation"));
        assert!(chain.sent_transactions().is_empty());
    }

    #[tokio::test]
    async fn test_has_code() {
        let (chain, submitter, proxy_factory) = setup();
        let manager = ProxyManager::new(&submitter, &proxy_factory, SENDER);
        let address = address!("5FbDB2315678afecb367f032d93F642f64180aa3");

        assert!(!manager.has_code(address).await.unwrap());
        chain.set_code(address, vec![0x01]);
        assert!(manager.has_code(address).await.unwrap());
    }
}
