//! Best-effort source verification on block explorers.

use std::future::Future;

use alloy_core::primitives::Address;
use serde::Deserialize;

use crate::error::VerificationError;

/// Submits deployed contracts for verification.
///
/// Deployers log verification failures and carry on; a contract is usable
/// whether or not the explorer accepted it.
pub trait Verifier: Send + Sync {
    fn verify(
        &self,
        address: Address,
        contract_name: &str,
        constructor_args: &[u8],
    ) -> impl Future<Output = Result<(), VerificationError>> + Send;
}

/// Skips verification entirely.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopVerifier;

impl Verifier for NoopVerifier {
    async fn verify(
        &self,
        address: Address,
        contract_name: &str,
        _constructor_args: &[u8],
    ) -> Result<(), VerificationError> {
        tracing::trace!(%address, contract = contract_name, "Verification disabled");
        Ok(())
    }
}

impl<V: Verifier> Verifier for Option<V> {
    async fn verify(
        &self,
        address: Address,
        contract_name: &str,
        constructor_args: &[u8],
    ) -> Result<(), VerificationError> {
        match self {
            Some(verifier) => {
                verifier
                    .verify(address, contract_name, constructor_args)
                    .await
            }
            None => Ok(()),
        }
    }
}

/// Etherscan-style explorer API response.
#[derive(Debug, Deserialize)]
struct ExplorerResponse {
    status: String,
    #[serde(default)]
    result: String,
}

/// Verifier talking to an Etherscan-compatible explorer API.
#[derive(Debug, Clone)]
pub struct ExplorerVerifier {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
}

impl ExplorerVerifier {
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.into(),
            api_key: api_key.into(),
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }
}

impl Verifier for ExplorerVerifier {
    async fn verify(
        &self,
        address: Address,
        contract_name: &str,
        constructor_args: &[u8],
    ) -> Result<(), VerificationError> {
        let address = address.to_checksum(None);
        let constructor_args = hex::encode(constructor_args);
        let form = [
            ("module", "contract"),
            ("action", "verifysourcecode"),
            ("apikey", self.api_key.as_str()),
            ("contractaddress", address.as_str()),
            ("contractname", contract_name),
            // Etherscan's field name is misspelled.
            ("constructorArguements", constructor_args.as_str()),
        ];

        let response: ExplorerResponse = self
            .client
            .post(&self.api_url)
            .form(&form)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if response.status != "1" {
            return Err(VerificationError::Rejected(response.result));
        }

        tracing::info!(
            %address,
            contract = contract_name,
            guid = %response.result,
            "Verification submitted"
        );
        Ok(())
    }
}
