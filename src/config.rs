//! Configuration management for the contract deployer
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "DEPLOYER_CONFIG";

lazy_static! {
    static ref ENV_VAR_PATTERN: Regex =
        Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("valid env var pattern");
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub chain: ChainConfig,
    #[serde(default)]
    pub deployer: DeployerConfig,
    #[serde(default)]
    pub compiler: CompilerConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub report: ReportConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub name: String,
    /// Expected chain id; checked against the node at startup when set
    pub chain_id: Option<u64>,
    pub rpc_urls: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeployerConfig {
    pub max_concurrent_accounts: usize,
    pub max_submit_retries: u32,
    pub retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub poll_interval_ms: u64,
    pub confirmation_timeout_ms: u64,
    pub gas_limit_buffer_percent: u64,
    pub gas_price_buffer_percent: u64,
}

impl Default for DeployerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_accounts: 4,
            max_submit_retries: 3,
            retry_delay_ms: 500,
            max_retry_delay_ms: 8_000,
            poll_interval_ms: 1_000,
            confirmation_timeout_ms: 120_000,
            gas_limit_buffer_percent: 20,
            gas_price_buffer_percent: 0,
        }
    }
}

/// Solidity compiler settings, passed explicitly to every compile call
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    pub solc_path: PathBuf,
    /// Pinned compiler version, e.g. "0.8.0"
    pub version: Option<String>,
    pub optimizer: bool,
    pub optimizer_runs: u32,
    /// Extra directories solc may read imports from
    pub allow_paths: Vec<PathBuf>,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            solc_path: PathBuf::from("solc"),
            version: None,
            optimizer: false,
            optimizer_runs: 200,
            allow_paths: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    /// Prometheus text exposition written here when the run ends
    pub output_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// JSON file receiving one entry per account
    pub output_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    pub steps: Vec<StepConfig>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Deploy,
    Call,
    Transfer,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StepConfig {
    pub kind: StepKind,
    pub name: Option<String>,
    /// Contract name; for calls, whose ABI resolves `function`
    pub contract: Option<String>,
    /// Solidity source file, required for deploy steps
    pub source: Option<PathBuf>,
    /// "deployed" (the default) or a 0x address
    pub target: Option<String>,
    pub function: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    /// Wei, decimal
    pub value: Option<String>,
    /// Hex calldata for transfers
    pub data: Option<String>,
    /// Fixed gas limit; estimated when absent
    pub gas_limit: Option<u64>,
}

impl StepConfig {
    pub fn display_name(&self, index: usize) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        match (&self.kind, &self.contract, &self.function) {
            (StepKind::Deploy, Some(contract), _) => format!("deploy {}", contract),
            (StepKind::Call, _, Some(function)) => format!("call {}", function),
            _ => format!("step {}", index + 1),
        }
    }
}

impl Settings {
    /// Load settings from the path in `DEPLOYER_CONFIG` or `config/default.toml`
    pub fn load() -> Result<Self> {
        let config_path = env::var(CONFIG_ENV_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from a specific file
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::parse(&config_str)
    }

    /// Parse settings from TOML text
    pub fn parse(config_str: &str) -> Result<Self> {
        let config_str = substitute_env_vars(config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.chain.rpc_urls.is_empty() {
            anyhow::bail!("Chain {} has no RPC URLs configured", self.chain.name);
        }

        if self.deployer.max_concurrent_accounts == 0 {
            anyhow::bail!("max_concurrent_accounts must be at least 1");
        }

        if self.deployer.poll_interval_ms == 0 {
            anyhow::bail!("poll_interval_ms must be positive");
        }

        if self.pipeline.steps.is_empty() {
            anyhow::bail!("Pipeline has no steps");
        }

        for (index, step) in self.pipeline.steps.iter().enumerate() {
            let name = step.display_name(index);
            match step.kind {
                StepKind::Deploy => {
                    if step.contract.is_none() || step.source.is_none() {
                        anyhow::bail!("Deploy step {} needs `contract` and `source`", name);
                    }
                }
                StepKind::Call => {
                    if step.function.is_none() {
                        anyhow::bail!("Call step {} needs `function`", name);
                    }
                }
                // Without `target`, calls and transfers go to the latest deployment
                StepKind::Transfer => {}
            }
        }

        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    ENV_VAR_PATTERN
        .replace_all(input, |caps: &regex::Captures| {
            env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
[chain]
name = "monad-testnet"
rpc_urls = ["${DEPLOYER_TEST_RPC}"]

[[pipeline.steps]]
kind = "deploy"
contract = "MyToken"
source = "contracts/MyToken.sol"
args = ["1000000000"]
gas_limit = 2000000
"#;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("DEPLOYER_TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${DEPLOYER_TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input);
        assert_eq!(result, "url = \"https://api.example.com/test_value/endpoint\"");
    }

    #[test]
    fn test_missing_env_var_becomes_empty() {
        let result = substitute_env_vars("key = \"${DEPLOYER_SURELY_UNSET_VAR}\"");
        assert_eq!(result, "key = \"\"");
    }

    #[test]
    fn test_load_from_file_applies_defaults() {
        env::set_var("DEPLOYER_TEST_RPC", "http://127.0.0.1:8545");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.chain.rpc_urls, vec!["http://127.0.0.1:8545"]);
        assert_eq!(settings.deployer.max_submit_retries, 3);
        assert_eq!(settings.compiler.solc_path, PathBuf::from("solc"));
        assert_eq!(settings.pipeline.steps[0].gas_limit, Some(2_000_000));
        assert_eq!(settings.pipeline.steps[0].display_name(0), "deploy MyToken");
    }

    #[test]
    fn test_load_follows_config_env_var() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.replace("monad-testnet", "from-env").as_bytes())
            .unwrap();
        env::set_var(CONFIG_ENV_VAR, file.path());

        let settings = Settings::load().unwrap();
        assert_eq!(settings.chain.name, "from-env");
    }

    #[test]
    fn test_rejects_call_without_function() {
        let config = r#"
[chain]
name = "local"
rpc_urls = ["http://127.0.0.1:8545"]

[[pipeline.steps]]
kind = "call"
target = "deployed"
"#;
        let err = Settings::parse(config).unwrap_err();
        assert!(err.to_string().contains("needs `function`"));
    }

    #[test]
    fn test_shipped_presets_parse() {
        let root = Path::new(env!("CARGO_MANIFEST_DIR"));

        let erc20 = Settings::load_from(&root.join("config/default.toml")).unwrap();
        assert_eq!(erc20.chain.chain_id, Some(10143));
        assert_eq!(erc20.pipeline.steps[0].gas_limit, Some(2_000_000));

        let erc721 = Settings::load_from(&root.join("config/erc721.toml")).unwrap();
        assert_eq!(erc721.pipeline.steps.len(), 2);
        assert_eq!(erc721.pipeline.steps[1].kind, StepKind::Call);
        assert_eq!(erc721.pipeline.steps[1].gas_limit, None);
    }

    #[test]
    fn test_rejects_empty_rpc_list() {
        let config = r#"
[chain]
name = "local"
rpc_urls = []

[pipeline]
steps = []
"#;
        assert!(Settings::parse(config).is_err());
    }
}
