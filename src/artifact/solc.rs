//! `solc --standard-json` compiler backend

use super::{Artifact, ArtifactSource};
use crate::config::CompilerConfig;
use crate::error::{DeployError, DeployResult};

use async_trait::async_trait;
use ethers::abi::Abi;
use serde_json::{json, Value};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Compiles through a local `solc` binary
#[derive(Debug, Default, Clone)]
pub struct SolcArtifactSource;

impl SolcArtifactSource {
    pub fn new() -> Self {
        Self
    }

    /// Ensure the configured binary is the pinned version
    async fn check_version(&self, contract: &str, config: &CompilerConfig) -> DeployResult<()> {
        let Some(pinned) = &config.version else {
            return Ok(());
        };

        let output = Command::new(&config.solc_path)
            .arg("--version")
            .output()
            .await
            .map_err(|e| compilation(contract, format!("cannot run {:?}: {}", config.solc_path, e)))?;

        let reported = String::from_utf8_lossy(&output.stdout);
        if !version_matches(&reported, pinned) {
            return Err(compilation(
                contract,
                format!(
                    "{:?} is not solc {} ({})",
                    config.solc_path,
                    pinned,
                    reported.trim()
                ),
            ));
        }

        Ok(())
    }
}

#[async_trait]
impl ArtifactSource for SolcArtifactSource {
    async fn compile(
        &self,
        source: &str,
        contract_name: &str,
        config: &CompilerConfig,
    ) -> DeployResult<Artifact> {
        self.check_version(contract_name, config).await?;

        let file_name = format!("{}.sol", contract_name);
        let input = standard_json_input(&file_name, source, config);

        let mut command = Command::new(&config.solc_path);
        command.arg("--standard-json");
        if !config.allow_paths.is_empty() {
            let paths: Vec<String> = config
                .allow_paths
                .iter()
                .map(|p| p.display().to_string())
                .collect();
            command.arg("--allow-paths").arg(paths.join(","));
        }

        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                compilation(
                    contract_name,
                    format!("cannot start {:?}: {}", config.solc_path, e),
                )
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input.to_string().as_bytes()).await?;
        }

        let output = child.wait_with_output().await?;
        if output.stdout.is_empty() {
            return Err(compilation(
                contract_name,
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let artifact = parse_output(&file_name, contract_name, &output.stdout)?;
        info!(
            "Compiled {} ({} bytes of bytecode)",
            contract_name,
            artifact.bytecode.len()
        );
        Ok(artifact)
    }
}

fn compilation(contract: &str, diagnostics: String) -> DeployError {
    DeployError::Compilation {
        contract: contract.to_string(),
        diagnostics,
    }
}

fn version_matches(reported: &str, pinned: &str) -> bool {
    reported
        .lines()
        .filter_map(|line| line.strip_prefix("Version: "))
        .any(|version| version == pinned || version.starts_with(&format!("{}+", pinned)))
}

fn standard_json_input(file_name: &str, source: &str, config: &CompilerConfig) -> Value {
    let mut sources = serde_json::Map::new();
    sources.insert(file_name.to_string(), json!({ "content": source }));

    json!({
        "language": "Solidity",
        "sources": sources,
        "settings": {
            "optimizer": {
                "enabled": config.optimizer,
                "runs": config.optimizer_runs,
            },
            "outputSelection": {
                "*": { "*": ["abi", "evm.bytecode.object"] }
            }
        }
    })
}

/// Extract one contract from solc's standard-JSON output
fn parse_output(file_name: &str, contract_name: &str, stdout: &[u8]) -> DeployResult<Artifact> {
    let output: Value = serde_json::from_slice(stdout)
        .map_err(|e| compilation(contract_name, format!("unreadable compiler output: {}", e)))?;

    let mut errors = Vec::new();
    for diagnostic in output["errors"].as_array().into_iter().flatten() {
        let message = diagnostic["formattedMessage"]
            .as_str()
            .or_else(|| diagnostic["message"].as_str())
            .unwrap_or("unknown diagnostic")
            .trim()
            .to_string();

        if diagnostic["severity"] == "error" {
            errors.push(message);
        } else {
            warn!("solc: {}", message);
        }
    }

    if !errors.is_empty() {
        return Err(compilation(contract_name, errors.join("\n")));
    }

    let contract = &output["contracts"][file_name][contract_name];
    if contract.is_null() {
        return Err(compilation(
            contract_name,
            format!("contract {} not found in {}", contract_name, file_name),
        ));
    }

    let abi: Abi = serde_json::from_value(contract["abi"].clone())
        .map_err(|e| compilation(contract_name, format!("invalid ABI: {}", e)))?;

    let object = contract["evm"]["bytecode"]["object"].as_str().unwrap_or_default();
    let object = object.strip_prefix("0x").unwrap_or(object);
    let bytecode = hex::decode(object)
        .map_err(|e| compilation(contract_name, format!("bytecode is not hex: {}", e)))?;

    if bytecode.is_empty() {
        return Err(compilation(
            contract_name,
            "no bytecode produced (abstract contract or interface?)".to_string(),
        ));
    }

    debug!("{} exposes {} functions", contract_name, abi.functions().count());

    Ok(Artifact {
        contract_name: contract_name.to_string(),
        abi,
        bytecode: bytecode.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_successful_output() {
        let stdout = json!({
            "errors": [
                {"severity": "warning", "formattedMessage": "Warning: SPDX license identifier not provided"}
            ],
            "contracts": {
                "MyToken.sol": {
                    "MyToken": {
                        "abi": [
                            {"type":"function","name":"transfer","inputs":[{"name":"to","type":"address"},{"name":"amount","type":"uint256"}],"outputs":[{"name":"","type":"bool"}],"stateMutability":"nonpayable"}
                        ],
                        "evm": {"bytecode": {"object": "6080604052"}}
                    }
                }
            }
        })
        .to_string();

        let artifact = parse_output("MyToken.sol", "MyToken", stdout.as_bytes()).unwrap();
        assert_eq!(artifact.bytecode.to_vec(), vec![0x60, 0x80, 0x60, 0x40, 0x52]);
        assert!(artifact.function("transfer").is_ok());
    }

    #[test]
    fn test_errors_become_compilation_failure() {
        let stdout = json!({
            "errors": [
                {"severity": "error", "formattedMessage": "ParserError: Expected ';' but got '}'"}
            ]
        })
        .to_string();

        match parse_output("MyToken.sol", "MyToken", stdout.as_bytes()) {
            Err(DeployError::Compilation { diagnostics, .. }) => {
                assert!(diagnostics.contains("ParserError"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_missing_contract_and_empty_bytecode() {
        let stdout = json!({
            "contracts": {
                "MyToken.sol": {
                    "IToken": { "abi": [], "evm": {"bytecode": {"object": ""}} }
                }
            }
        })
        .to_string();

        assert!(parse_output("MyToken.sol", "MyToken", stdout.as_bytes()).is_err());
        let err = parse_output("MyToken.sol", "IToken", stdout.as_bytes()).unwrap_err();
        assert!(err.is_batch_fatal());
    }

    #[test]
    fn test_version_pinning() {
        let reported = "solc, the solidity compiler commandline interface\nVersion: 0.8.0+commit.c7dfd78e.Linux.g++\n";
        assert!(version_matches(reported, "0.8.0"));
        assert!(!version_matches(reported, "0.8.1"));
        assert!(!version_matches(reported, "0.8"));
    }

    #[test]
    fn test_standard_json_carries_settings() {
        let config = CompilerConfig {
            optimizer: true,
            optimizer_runs: 1000,
            ..CompilerConfig::default()
        };
        let input = standard_json_input("MyNFT.sol", "contract MyNFT {}", &config);
        assert_eq!(input["sources"]["MyNFT.sol"]["content"], "contract MyNFT {}");
        assert_eq!(input["settings"]["optimizer"]["runs"], 1000);
    }
}
