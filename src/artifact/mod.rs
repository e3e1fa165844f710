//! Compiled contract artifacts and the compiler boundary

mod solc;

pub use solc::SolcArtifactSource;

use crate::config::CompilerConfig;
use crate::error::{DeployError, DeployResult};

use async_trait::async_trait;
use ethers::abi::token::{LenientTokenizer, Tokenizer};
use ethers::abi::{Abi, Function, Param, Token};
use ethers::types::Bytes;

/// ABI and creation bytecode of one contract
#[derive(Debug, Clone)]
pub struct Artifact {
    pub contract_name: String,
    pub abi: Abi,
    pub bytecode: Bytes,
}

impl Artifact {
    /// Look up a function by name; overloaded names resolve to the first match
    pub fn function(&self, name: &str) -> DeployResult<&Function> {
        self.abi.function(name).map_err(|_| {
            DeployError::InvalidIntent(format!(
                "{} has no function named {}",
                self.contract_name, name
            ))
        })
    }

    /// Tokenize constructor arguments from their textual form
    pub fn constructor_args(&self, args: &[String]) -> DeployResult<Vec<Token>> {
        let inputs = self
            .abi
            .constructor()
            .map(|c| c.inputs.as_slice())
            .unwrap_or(&[]);
        tokenize(&format!("{} constructor", self.contract_name), inputs, args)
    }

    /// Tokenize arguments for `function`
    pub fn function_args(&self, function: &Function, args: &[String]) -> DeployResult<Vec<Token>> {
        tokenize(&function.signature(), &function.inputs, args)
    }
}

fn tokenize(context: &str, params: &[Param], args: &[String]) -> DeployResult<Vec<Token>> {
    if params.len() != args.len() {
        return Err(DeployError::InvalidIntent(format!(
            "{} takes {} arguments, got {}",
            context,
            params.len(),
            args.len()
        )));
    }

    params
        .iter()
        .zip(args)
        .map(|(param, arg)| {
            LenientTokenizer::tokenize(&param.kind, arg).map_err(|e| {
                DeployError::InvalidIntent(format!(
                    "{}: argument {} ({}) is not a valid {}: {}",
                    context, param.name, arg, param.kind, e
                ))
            })
        })
        .collect()
}

/// Produces artifacts from Solidity source.
///
/// The compiler settings travel with each call so concurrent compilations
/// can use different pinned versions.
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    async fn compile(
        &self,
        source: &str,
        contract_name: &str,
        config: &CompilerConfig,
    ) -> DeployResult<Artifact>;
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// ABI of the bundled ERC-20 token
    pub const TOKEN_ABI: &str = r#"[
        {"type":"constructor","inputs":[{"name":"initialSupply","type":"uint256"}],"stateMutability":"nonpayable"},
        {"type":"function","name":"transfer","inputs":[{"name":"to","type":"address"},{"name":"amount","type":"uint256"}],"outputs":[{"name":"","type":"bool"}],"stateMutability":"nonpayable"},
        {"type":"function","name":"balanceOf","inputs":[{"name":"","type":"address"}],"outputs":[{"name":"","type":"uint256"}],"stateMutability":"view"}
    ]"#;

    pub fn token_artifact() -> Artifact {
        Artifact {
            contract_name: "MyToken".to_string(),
            abi: serde_json::from_str(TOKEN_ABI).unwrap(),
            bytecode: Bytes::from(vec![0x60, 0x80, 0x60, 0x40, 0x52]),
        }
    }
}
