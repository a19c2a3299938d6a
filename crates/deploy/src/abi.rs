//! ABI helpers for constructor arguments and setter calls.
//!
//! Arguments are written as `type:value` strings (`uint256:125`,
//! `address:0x5FbD...`, `string:USD Coin`, `uint256[]:[1,2]`) and coerced into
//! [`DynSolValue`]s. Function signatures use the canonical Solidity form
//! (`setMintvault(address)`).

use alloy_core::{
    dyn_abi::{DynSolType, DynSolValue},
    primitives::{Bytes, keccak256},
};
use anyhow::{Context, Result};

/// A parsed function signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSignature {
    pub name: String,
    pub params: Vec<DynSolType>,
}

impl FunctionSignature {
    /// Parse a signature such as `setSpokes(uint256[],address[])`.
    pub fn parse(signature: &str) -> Result<Self> {
        let signature = signature.trim();
        let (name, rest) = signature
            .split_once('(')
            .with_context(|| format!("Invalid function signature: {signature}"))?;
        let inner = rest
            .strip_suffix(')')
            .with_context(|| format!("Invalid function signature: {signature}"))?;

        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            anyhow::bail!("Invalid function name in signature: {signature}");
        }

        let params = if inner.trim().is_empty() {
            Vec::new()
        } else {
            match DynSolType::parse(&format!("({inner})"))
                .with_context(|| format!("Invalid parameter types in signature: {signature}"))?
            {
                DynSolType::Tuple(params) => params,
                other => vec![other],
            }
        };

        Ok(Self {
            name: name.to_string(),
            params,
        })
    }

    /// Canonical form, e.g. `transfer(address,uint256)`.
    pub fn canonical(&self) -> String {
        let params: Vec<_> = self.params.iter().map(|p| p.sol_type_name()).collect();
        format!("{}({})", self.name, params.join(","))
    }

    /// The 4-byte function selector.
    pub fn selector(&self) -> [u8; 4] {
        let hash = keccak256(self.canonical().as_bytes());
        [hash[0], hash[1], hash[2], hash[3]]
    }

    /// Encode a call to this function with `args`.
    ///
    /// Fails if the argument count or any argument type does not match.
    pub fn encode_call(&self, args: &[DynSolValue]) -> Result<Bytes> {
        if args.len() != self.params.len() {
            anyhow::bail!(
                "{} expects {} arguments, got {}",
                self.canonical(),
                self.params.len(),
                args.len()
            );
        }

        for (i, (arg, ty)) in args.iter().zip(&self.params).enumerate() {
            if !arg.matches(ty) {
                anyhow::bail!(
                    "Argument {} of {} should be {}, got {}",
                    i,
                    self.canonical(),
                    ty.sol_type_name(),
                    format_arg(arg)
                );
            }
        }

        let mut calldata = self.selector().to_vec();
        calldata.extend(encode_args(args));
        Ok(calldata.into())
    }
}

/// ABI-encode `args` as a parameter list (constructor arguments, call data body).
pub fn encode_args(args: &[DynSolValue]) -> Vec<u8> {
    if args.is_empty() {
        return Vec::new();
    }
    DynSolValue::Tuple(args.to_vec()).abi_encode_params()
}

/// Encode a call from a textual signature.
pub fn encode_call(signature: &str, args: &[DynSolValue]) -> Result<Bytes> {
    FunctionSignature::parse(signature)?.encode_call(args)
}

/// Derive the signature of `name` called with `args`, e.g. `initialize(address,uint256)`.
pub fn signature_for(name: &str, args: &[DynSolValue]) -> Result<String> {
    let types = args
        .iter()
        .map(|arg| {
            arg.sol_type_name()
                .map(|t| t.into_owned())
                .with_context(|| format!("Cannot derive a type for argument {}", format_arg(arg)))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(format!("{name}({})", types.join(",")))
}

/// Parse a `type:value` argument.
pub fn parse_typed_arg(raw: &str) -> Result<DynSolValue> {
    let (ty, value) = raw
        .split_once(':')
        .with_context(|| format!("Argument {raw:?} is not of the form type:value"))?;
    let ty = DynSolType::parse(ty.trim()).with_context(|| format!("Unknown type in {raw:?}"))?;
    coerce(&ty, value)
}

/// Coerce a textual `value` into `ty`.
pub fn coerce(ty: &DynSolType, value: &str) -> Result<DynSolValue> {
    ty.coerce_str(value.trim())
        .with_context(|| format!("Cannot read {value:?} as {}", ty.sol_type_name()))
}

/// Human-readable rendering of an argument for logs.
pub fn format_arg(value: &DynSolValue) -> String {
    match value {
        DynSolValue::Bool(b) => b.to_string(),
        DynSolValue::Int(i, _) => i.to_string(),
        DynSolValue::Uint(u, _) => u.to_string(),
        DynSolValue::Address(a) => a.to_checksum(None),
        DynSolValue::FixedBytes(word, size) => format!("0x{}", hex::encode(&word[..*size])),
        DynSolValue::Bytes(bytes) => format!("0x{}", hex::encode(bytes)),
        DynSolValue::String(s) => format!("{s:?}"),
        DynSolValue::Array(values) | DynSolValue::FixedArray(values) => {
            let items: Vec<_> = values.iter().map(format_arg).collect();
            format!("[{}]", items.join(", "))
        }
        DynSolValue::Tuple(values) => {
            let items: Vec<_> = values.iter().map(format_arg).collect();
            format!("({})", items.join(", "))
        }
        other => format!("{other:?}"),
    }
}

/// Render a list of arguments for logs.
pub fn format_args(values: &[DynSolValue]) -> String {
    let items: Vec<_> = values.iter().map(format_arg).collect();
    items.join(", ")
}
