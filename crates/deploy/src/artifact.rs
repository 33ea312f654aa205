//! Compiled contract artifacts and the registry resolving contract names to them.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use alloy_core::{
    dyn_abi::{DynSolValue, JsonAbiExt, Specifier},
    json_abi::{JsonAbi, Param},
    primitives::{Bytes, FixedBytes},
};
use anyhow::Context;
use serde::Deserialize;

/// Errors raised while turning string arguments into calldata.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArtifactError {
    #[error("{contract}: expected {expected} argument(s), got {got}")]
    Arity {
        contract: String,
        expected: usize,
        got: usize,
    },
    #[error("{contract}: no function `{function}` taking {arity} argument(s)")]
    UnknownFunction {
        contract: String,
        function: String,
        arity: usize,
    },
    #[error("{contract}: argument {index} ({ty}): {reason}")]
    InvalidArgument {
        contract: String,
        index: usize,
        ty: String,
        reason: String,
    },
    #[error("{contract}: has no creation bytecode (abstract contract or interface?)")]
    EmptyBytecode { contract: String },
}

/// The bytecode field in Hardhat (string) and Foundry (object) layouts.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawBytecode {
    Hex(Bytes),
    Object { object: Bytes },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawArtifact {
    contract_name: Option<String>,
    abi: JsonAbi,
    bytecode: RawBytecode,
}

/// A compiled contract: its ABI and creation bytecode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractArtifact {
    pub name: String,
    pub abi: JsonAbi,
    pub bytecode: Bytes,
}

impl ContractArtifact {
    pub fn new(name: impl Into<String>, abi: JsonAbi, bytecode: Bytes) -> Self {
        Self {
            name: name.into(),
            abi,
            bytecode,
        }
    }

    /// Parse a Hardhat or Foundry artifact. `fallback_name` is used when the JSON
    /// does not carry a contract name.
    pub fn from_json(json: &str, fallback_name: &str) -> Result<Self, anyhow::Error> {
        let raw: RawArtifact =
            serde_json::from_str(json).context("Failed to parse contract artifact")?;
        let bytecode = match raw.bytecode {
            RawBytecode::Hex(bytes) | RawBytecode::Object { object: bytes } => bytes,
        };
        Ok(Self {
            name: raw.contract_name.unwrap_or_else(|| fallback_name.to_string()),
            abi: raw.abi,
            bytecode,
        })
    }

    /// Creation bytecode followed by the ABI-encoded constructor arguments.
    pub fn encode_deploy(&self, args: &[String]) -> Result<Bytes, ArtifactError> {
        let params = self
            .abi
            .constructor
            .as_ref()
            .map(|constructor| constructor.inputs.as_slice())
            .unwrap_or_default();
        let values = self.coerce(params, args)?;
        self.encode_deploy_values(&values)
    }

    /// Creation bytecode followed by already-typed constructor arguments.
    pub fn encode_deploy_values(&self, values: &[DynSolValue]) -> Result<Bytes, ArtifactError> {
        if self.bytecode.is_empty() {
            return Err(ArtifactError::EmptyBytecode {
                contract: self.name.clone(),
            });
        }

        let encoded = match &self.abi.constructor {
            Some(constructor) => constructor
                .abi_encode_input(values)
                .map_err(|e| self.invalid(0, "constructor", e))?,
            None if values.is_empty() => Vec::new(),
            None => return Err(self.arity(0, values.len())),
        };

        Ok([self.bytecode.as_ref(), encoded.as_slice()].concat().into())
    }

    /// Selector-prefixed calldata for `function(args)`. Overloads are resolved by arity.
    pub fn encode_call(&self, function: &str, args: &[String]) -> Result<Bytes, ArtifactError> {
        let candidate = self
            .abi
            .function(function)
            .and_then(|overloads| overloads.iter().find(|f| f.inputs.len() == args.len()))
            .ok_or_else(|| ArtifactError::UnknownFunction {
                contract: self.name.clone(),
                function: function.to_string(),
                arity: args.len(),
            })?;

        let values = self.coerce(&candidate.inputs, args)?;
        candidate
            .abi_encode_input(&values)
            .map(Bytes::from)
            .map_err(|e| self.invalid(0, function, e))
    }

    /// The selector `encode_call` would use.
    pub fn selector(&self, function: &str, arity: usize) -> Option<FixedBytes<4>> {
        self.abi
            .function(function)?
            .iter()
            .find(|f| f.inputs.len() == arity)
            .map(|f| f.selector())
    }

    fn coerce(&self, params: &[Param], args: &[String]) -> Result<Vec<DynSolValue>, ArtifactError> {
        if params.len() != args.len() {
            return Err(self.arity(params.len(), args.len()));
        }

        params
            .iter()
            .zip(args)
            .enumerate()
            .map(|(index, (param, arg))| {
                let ty = param
                    .resolve()
                    .map_err(|e| self.invalid(index, &param.ty, e))?;
                ty.coerce_str(arg).map_err(|e| self.invalid(index, &param.ty, e))
            })
            .collect()
    }

    fn arity(&self, expected: usize, got: usize) -> ArtifactError {
        ArtifactError::Arity {
            contract: self.name.clone(),
            expected,
            got,
        }
    }

    fn invalid(&self, index: usize, ty: &str, reason: impl std::fmt::Display) -> ArtifactError {
        ArtifactError::InvalidArgument {
            contract: self.name.clone(),
            index,
            ty: ty.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Contract name to artifact lookup.
#[derive(Debug, Clone, Default)]
pub struct ContractRegistry {
    artifacts: BTreeMap<String, ContractArtifact>,
}

impl ContractRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an artifact, replacing any previous one with the same name.
    pub fn insert(&mut self, artifact: ContractArtifact) {
        self.artifacts.insert(artifact.name.clone(), artifact);
    }

    pub fn get(&self, name: &str) -> Option<&ContractArtifact> {
        self.artifacts.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.artifacts.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    /// Load every artifact found under `dir`, recursively.
    ///
    /// Hardhat debug files (`*.dbg.json`) and JSON files that are not artifacts
    /// (build info, caches) are skipped.
    pub fn load_dir(dir: &Path) -> Result<Self, anyhow::Error> {
        if !dir.is_dir() {
            anyhow::bail!("Artifacts directory not found: {}", dir.display());
        }

        let mut registry = Self::new();
        let mut pending: Vec<PathBuf> = vec![dir.to_path_buf()];

        while let Some(current) = pending.pop() {
            let entries = std::fs::read_dir(&current)
                .with_context(|| format!("Failed to read {}", current.display()))?;

            for entry in entries {
                let path = entry
                    .with_context(|| format!("Failed to read {}", current.display()))?
                    .path();

                if path.is_dir() {
                    pending.push(path);
                    continue;
                }

                let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                if !file_name.ends_with(".json") || file_name.ends_with(".dbg.json") {
                    continue;
                }

                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                let stem = file_name.trim_end_matches(".json");

                match ContractArtifact::from_json(&content, stem) {
                    Ok(artifact) => {
                        tracing::trace!(name = %artifact.name, path = %path.display(), "Loaded artifact");
                        registry.insert(artifact);
                    }
                    Err(e) if looks_like_artifact(&content) => {
                        tracing::warn!(
                            path = %path.display(),
                            error = %format!("{e:#}"),
                            "Skipping unusable artifact (unlinked libraries?)"
                        );
                    }
                    Err(e) => {
                        tracing::trace!(path = %path.display(), error = %e, "Skipping non-artifact JSON");
                    }
                }
            }
        }

        tracing::debug!(dir = %dir.display(), count = registry.len(), "Artifacts loaded");
        Ok(registry)
    }
}

/// A JSON object with both `abi` and `bytecode` members.
fn looks_like_artifact(content: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(content).is_ok_and(|value| {
        value.get("abi").is_some() && value.get("bytecode").is_some()
    })
}
