//! Compiled contract artifacts and contract factories.
//!
//! Artifacts follow the Hardhat layout: `<artifacts_dir>/contracts/Hub.sol/Hub.json`
//! holding `contractName`, creation `bytecode` and `linkReferences`. Library
//! placeholders (`__$<hash>$__`) in the bytecode are resolved from the
//! `linkReferences` offsets before deployment.

use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::{Path, PathBuf},
};

use alloy_core::{
    dyn_abi::DynSolValue,
    primitives::{Address, Bytes},
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    abi,
    chain::{ChainProvider, TransactionRequest},
    tx::{ConfirmedTransaction, TransactionSubmitter},
};

/// Library name to deployed address. Keys are either the bare library name
/// (`MathLib`) or its fully qualified name (`contracts/MathLib.sol:MathLib`).
pub type Libraries = BTreeMap<String, Address>;

/// Size of a linked library address, in bytes.
const LINK_LENGTH: usize = 20;

/// A single placeholder location in the creation bytecode, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkReference {
    pub start: usize,
    pub length: usize,
}

/// A compiled contract artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub contract_name: String,
    #[serde(default)]
    pub source_name: String,
    /// Creation bytecode as hex. May contain unlinked library placeholders.
    pub bytecode: String,
    /// Source file -> library name -> placeholder locations.
    #[serde(default)]
    pub link_references: BTreeMap<String, BTreeMap<String, Vec<LinkReference>>>,
}

impl Artifact {
    /// An artifact without library references.
    pub fn new(contract_name: impl Into<String>, bytecode: impl AsRef<[u8]>) -> Self {
        Self {
            contract_name: contract_name.into(),
            source_name: String::new(),
            bytecode: format!("0x{}", hex::encode(bytecode)),
            link_references: BTreeMap::new(),
        }
    }

    /// Parse an artifact from its JSON representation.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse contract artifact")
    }

    /// Whether the bytecode references libraries that must be linked.
    pub fn needs_linking(&self) -> bool {
        self.link_references.values().any(|libs| !libs.is_empty())
    }
}

/// Where contract artifacts come from.
pub trait ArtifactSource: Send + Sync {
    /// Load the artifact of the contract called `name`.
    fn artifact(&self, name: &str) -> Result<Artifact>;
}

/// Reads Hardhat artifacts from a directory tree.
#[derive(Debug, Clone)]
pub struct FileArtifacts {
    dir: PathBuf,
}

impl FileArtifacts {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn find(&self, dir: &Path, file_name: &str) -> Result<Option<PathBuf>> {
        let mut entries = fs::read_dir(dir)
            .with_context(|| format!("Failed to read artifacts directory {}", dir.display()))?
            .collect::<std::io::Result<Vec<_>>>()
            .with_context(|| format!("Failed to list artifacts directory {}", dir.display()))?;
        entries.sort_by_key(|entry| entry.file_name());

        for entry in entries {
            let path = entry.path();
            if path.is_dir() {
                // Hardhat's build-info holds compiler input/output, not artifacts.
                if entry.file_name() == "build-info" {
                    continue;
                }
                if let Some(found) = self.find(&path, file_name)? {
                    return Ok(Some(found));
                }
            } else if entry.file_name() == file_name {
                return Ok(Some(path));
            }
        }

        Ok(None)
    }
}

impl ArtifactSource for FileArtifacts {
    fn artifact(&self, name: &str) -> Result<Artifact> {
        let file_name = format!("{name}.json");
        let path = self.find(&self.dir, &file_name)?.with_context(|| {
            format!(
                "No artifact for contract {} under {}",
                name,
                self.dir.display()
            )
        })?;

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read artifact {}", path.display()))?;
        let artifact = Artifact::from_json(&content)
            .with_context(|| format!("Invalid artifact {}", path.display()))?;

        tracing::debug!(contract = name, path = %path.display(), "Artifact loaded");
        Ok(artifact)
    }
}

/// In-memory artifact source.
#[derive(Debug, Clone, Default)]
pub struct MemoryArtifacts {
    artifacts: HashMap<String, Artifact>,
}

impl MemoryArtifacts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `artifact`, keyed by its contract name.
    pub fn with(mut self, artifact: Artifact) -> Self {
        self.insert(artifact);
        self
    }

    pub fn insert(&mut self, artifact: Artifact) {
        self.artifacts
            .insert(artifact.contract_name.clone(), artifact);
    }
}

impl ArtifactSource for MemoryArtifacts {
    fn artifact(&self, name: &str) -> Result<Artifact> {
        self.artifacts
            .get(name)
            .cloned()
            .with_context(|| format!("No artifact for contract {name}"))
    }
}

/// Builds creation transactions for a linked contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractFactory {
    name: String,
    bytecode: Bytes,
}

impl ContractFactory {
    /// Link `artifact` against `libraries` and decode its bytecode.
    pub fn new(artifact: &Artifact, libraries: &Libraries) -> Result<Self> {
        let name = &artifact.contract_name;
        let mut code = artifact.bytecode.trim_start_matches("0x").to_string();
        if !code.is_ascii() {
            anyhow::bail!("{name} bytecode is not valid hex");
        }

        for (source, libs) in &artifact.link_references {
            for (lib, references) in libs {
                let qualified = format!("{source}:{lib}");
                let address = libraries
                    .get(&qualified)
                    .or_else(|| libraries.get(lib))
                    .with_context(|| {
                        format!("{name} requires library {qualified}, which was not provided")
                    })?;
                let encoded = hex::encode(address);

                for reference in references {
                    let start = reference.start * 2;
                    let end = start + reference.length * 2;
                    if reference.length != LINK_LENGTH || end > code.len() {
                        anyhow::bail!("{name} has an invalid link reference for {qualified}");
                    }
                    code.replace_range(start..end, &encoded);
                }
            }
        }

        if code.contains("__$") {
            anyhow::bail!("{name} has unresolved library placeholders");
        }

        let bytecode = hex::decode(&code)
            .with_context(|| format!("{name} bytecode is not valid hex"))?;

        Ok(Self {
            name: name.clone(),
            bytecode: bytecode.into(),
        })
    }

    /// Factory for a contract without libraries.
    pub fn from_artifact(artifact: &Artifact) -> Result<Self> {
        Self::new(artifact, &Libraries::new())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bytecode(&self) -> &Bytes {
        &self.bytecode
    }

    /// Creation code: linked bytecode followed by the ABI-encoded constructor arguments.
    pub fn init_code(&self, args: &[DynSolValue]) -> Bytes {
        let mut code = self.bytecode.to_vec();
        code.extend(abi::encode_args(args));
        code.into()
    }

    /// The contract creation transaction sent by `from`.
    pub fn deploy_transaction(&self, from: Address, args: &[DynSolValue]) -> TransactionRequest {
        TransactionRequest::create(from, self.init_code(args))
    }

    /// Send the creation transaction and wait for it to be confirmed.
    pub async fn deploy<P: ChainProvider>(
        &self,
        submitter: &TransactionSubmitter<P>,
        from: Address,
        args: &[DynSolValue],
        label: &str,
    ) -> Result<(ContractHandle, ConfirmedTransaction)> {
        let confirmed = submitter
            .send(self.deploy_transaction(from, args), label)
            .await?;
        let address = confirmed
            .contract_address()
            .with_context(|| format!("Receipt of {label} has no contract address"))?;
        Ok((self.attach(address), confirmed))
    }

    /// A handle to an already deployed instance at `address`.
    pub fn attach(&self, address: Address) -> ContractHandle {
        ContractHandle::new(self.name.clone(), address)
    }
}

/// A deployed contract.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContractHandle {
    pub name: String,
    pub address: Address,
}

impl ContractHandle {
    pub fn new(name: impl Into<String>, address: Address) -> Self {
        Self {
            name: name.into(),
            address,
        }
    }

    /// A call to `signature` on this contract sent by `from`.
    pub fn call(
        &self,
        from: Address,
        signature: &str,
        args: &[DynSolValue],
    ) -> Result<TransactionRequest> {
        let calldata = abi::encode_call(signature, args)
            .with_context(|| format!("Failed to encode {} call on {}", signature, self.name))?;
        Ok(TransactionRequest::call(from, self.address, calldata))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_core::primitives::{U256, address};
    use tempdir::TempDir;

    const LIB: Address = address!("5FbDB2315678afecb367f032d93F642f64180aa3");

    fn linked_artifact() -> Artifact {
        // PUSH20 <lib> followed by STOP.
        let placeholder = "__$3e1f5b8a2c7d4e9f0a1b2c3d4e5f6a7b8c$__";
        Artifact {
            contract_name: "Hub".to_string(),
            source_name: "contracts/Hub.sol".to_string(),
            bytecode: format!("0x73{placeholder}00"),
            link_references: BTreeMap::from([(
                "contracts/MathLib.sol".to_string(),
                BTreeMap::from([(
                    "MathLib".to_string(),
                    vec![LinkReference {
                        start: 1,
                        length: 20,
                    }],
                )]),
            )]),
        }
    }

    #[test]
    fn test_link_libraries() {
        let artifact = linked_artifact();
        assert!(artifact.needs_linking());

        let factory =
            ContractFactory::new(&artifact, &Libraries::from([("MathLib".to_string(), LIB)]))
                .unwrap();
        assert_eq!(factory.bytecode().len(), 22);
        assert_eq!(&factory.bytecode()[1..21], LIB.as_slice());

        let qualified = Libraries::from([("contracts/MathLib.sol:MathLib".to_string(), LIB)]);
        assert_eq!(ContractFactory::new(&artifact, &qualified).unwrap(), factory);
    }

    #[test]
    fn test_missing_library_is_an_error() {
        let err = ContractFactory::from_artifact(&linked_artifact()).unwrap_err();
        assert!(err.to_string().contains("MathLib"));
    }

    #[test]
    fn test_init_code_appends_constructor_args() {
        let factory =
            ContractFactory::from_artifact(&Artifact::new("Token", [0x60, 0x80])).unwrap();

        assert_eq!(factory.init_code(&[]).as_ref(), &[0x60, 0x80]);
        let init = factory.init_code(&[DynSolValue::Uint(U256::from(6u64), 8)]);
        assert_eq!(init.len(), 2 + 32);
        assert_eq!(init[init.len() - 1], 6);

        let tx = factory.deploy_transaction(LIB, &[]);
        assert_eq!(tx.to, None);
        assert_eq!(tx.from, LIB);
    }

    #[test]
    fn test_file_artifacts_search_subdirectories() {
        let dir = TempDir::new("artifacts").unwrap();
        let contract_dir = dir.path().join("contracts").join("Hub.sol");
        fs::create_dir_all(&contract_dir).unwrap();
        fs::create_dir_all(dir.path().join("build-info")).unwrap();
        fs::write(
            contract_dir.join("Hub.json"),
            serde_json::json!({
                "_format": "hh-sol-artifact-1",
                "contractName": "Hub",
                "sourceName": "contracts/Hub.sol",
                "abi": [],
                "bytecode": "0x6080",
                "deployedBytecode": "0x6080",
                "linkReferences": {},
                "deployedLinkReferences": {}
            })
            .to_string(),
        )
        .unwrap();

        let source = FileArtifacts::new(dir.path());
        let artifact = source.artifact("Hub").unwrap();
        assert_eq!(artifact.contract_name, "Hub");
        assert_eq!(artifact.source_name, "contracts/Hub.sol");
        assert!(!artifact.needs_linking());

        assert!(source.artifact("Spoke").is_err());
    }

    #[test]
    fn test_memory_artifacts() {
        let source = MemoryArtifacts::new().with(Artifact::new("Token", [0x01]));
        assert!(source.artifact("Token").is_ok());
        assert!(source.artifact("Hub").is_err());
    }

    #[test]
    fn test_handle_call() {
        let handle = ContractHandle::new("Hub", LIB);
        let tx = handle
            .call(Address::ZERO, "setMintvault(address)", &[DynSolValue::Address(LIB)])
            .unwrap();
        assert_eq!(tx.to, Some(LIB));
        assert_eq!(tx.data.len(), 36);

        assert!(handle.call(Address::ZERO, "setMintvault(address)", &[]).is_err());
    }
}
