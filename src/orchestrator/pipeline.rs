//! Composable pipeline stages run for every account
//!
//! A pipeline is an ordered list of steps. Call and transfer steps may target
//! the contract created by the most recent confirmed deploy step of the same
//! account, which is how "deploy, then mint" sequences are expressed.

use crate::artifact::Artifact;
use crate::config::{PipelineConfig, StepConfig, StepKind};
use crate::error::{DeployError, DeployResult};
use crate::tx::{GasLimit, Intent};

use ethers::abi::{Function, Token};
use ethers::types::{Address, Bytes, U256};
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

/// Destination of a call or transfer step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Contract created by the latest confirmed deploy step
    Deployed,
    Address(Address),
}

impl FromStr for Target {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("deployed") {
            return Ok(Target::Deployed);
        }
        if !s.starts_with("0x") || s.len() != 42 {
            return Err(DeployError::InvalidAddress {
                value: s.to_string(),
                message: "expected 0x followed by 40 hex digits".to_string(),
            });
        }
        s.parse::<Address>()
            .map(Target::Address)
            .map_err(|e| DeployError::InvalidAddress {
                value: s.to_string(),
                message: e.to_string(),
            })
    }
}

#[derive(Debug, Clone)]
pub enum Action {
    Deploy {
        contract: String,
        bytecode: Bytes,
        constructor_args: Vec<Token>,
    },
    Transfer {
        to: Target,
        value: U256,
        data: Bytes,
    },
    Call {
        to: Target,
        function: Function,
        args: Vec<Token>,
        value: U256,
    },
}

/// One transaction in a pipeline
#[derive(Debug, Clone)]
pub struct Step {
    pub name: String,
    pub action: Action,
    pub gas_limit: GasLimit,
}

impl Step {
    pub fn deploy(artifact: &Artifact, constructor_args: Vec<Token>) -> Self {
        Self {
            name: format!("deploy {}", artifact.contract_name),
            action: Action::Deploy {
                contract: artifact.contract_name.clone(),
                bytecode: artifact.bytecode.clone(),
                constructor_args,
            },
            gas_limit: GasLimit::Estimate,
        }
    }

    pub fn call(to: Target, function: Function, args: Vec<Token>) -> Self {
        Self {
            name: format!("call {}", function.name),
            action: Action::Call {
                to,
                function,
                args,
                value: U256::zero(),
            },
            gas_limit: GasLimit::Estimate,
        }
    }

    pub fn transfer(to: Target, value: U256, data: Bytes) -> Self {
        Self {
            name: "transfer".to_string(),
            action: Action::Transfer { to, value, data },
            gas_limit: GasLimit::Estimate,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_gas_limit(mut self, gas_limit: GasLimit) -> Self {
        self.gas_limit = gas_limit;
        self
    }

    pub fn is_deploy(&self) -> bool {
        matches!(self.action, Action::Deploy { .. })
    }

    /// Resolve this step into a transaction intent.
    ///
    /// `deployed` must come from a confirmed receipt of an earlier step.
    pub fn intent(&self, deployed: Option<Address>) -> DeployResult<Intent> {
        let resolve = |target: &Target| match target {
            Target::Address(address) => Ok(*address),
            Target::Deployed => deployed.ok_or_else(|| DeployError::MissingDeployment {
                step: self.name.clone(),
            }),
        };

        match &self.action {
            Action::Deploy {
                bytecode,
                constructor_args,
                ..
            } => Ok(Intent::Create {
                bytecode: bytecode.clone(),
                constructor_args: constructor_args.clone(),
            }),
            Action::Transfer { to, value, data } => Ok(Intent::Transfer {
                to: resolve(to)?,
                value: *value,
                data: data.clone(),
            }),
            Action::Call {
                to,
                function,
                args,
                value,
            } => Ok(Intent::Call {
                contract: resolve(to)?,
                selector: function.short_signature(),
                args: args.clone(),
                value: *value,
            }),
        }
    }
}

/// Ordered steps executed for each account
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    steps: Vec<Step>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Contracts that must be compiled before a pipeline can be built
    pub fn sources(config: &PipelineConfig) -> Vec<(String, PathBuf)> {
        let mut sources: Vec<(String, PathBuf)> = Vec::new();
        for step in &config.steps {
            if let (Some(contract), Some(source)) = (&step.contract, &step.source) {
                if !sources.iter().any(|(name, _)| name == contract) {
                    sources.push((contract.clone(), source.clone()));
                }
            }
        }
        sources
    }

    /// Build a pipeline from configuration and compiled artifacts
    pub fn from_config(
        config: &PipelineConfig,
        artifacts: &HashMap<String, Artifact>,
    ) -> DeployResult<Self> {
        let mut pipeline = Pipeline::new();
        let mut last_deployed: Option<&str> = None;

        for (index, step_config) in config.steps.iter().enumerate() {
            let name = step_config.display_name(index);
            let step = match step_config.kind {
                StepKind::Deploy => {
                    let contract = step_config.contract.as_deref().unwrap_or_default();
                    let artifact = lookup(artifacts, contract, &name)?;
                    last_deployed = Some(contract);
                    Step::deploy(artifact, artifact.constructor_args(&step_config.args)?)
                }
                StepKind::Call => {
                    let contract = step_config
                        .contract
                        .as_deref()
                        .or(last_deployed)
                        .ok_or_else(|| {
                            DeployError::Config(format!("{}: no contract ABI to call", name))
                        })?;
                    let artifact = lookup(artifacts, contract, &name)?;
                    let function = artifact
                        .function(step_config.function.as_deref().unwrap_or_default())?
                        .clone();
                    let args = artifact.function_args(&function, &step_config.args)?;
                    let mut step = Step::call(target(step_config)?, function, args);
                    if let Action::Call { value, .. } = &mut step.action {
                        *value = parse_value(step_config)?;
                    }
                    step
                }
                StepKind::Transfer => {
                    let data = match &step_config.data {
                        Some(data) => {
                            let digits = data.strip_prefix("0x").unwrap_or(data);
                            hex::decode(digits)
                                .map_err(|e| {
                                    DeployError::Config(format!("{}: bad data: {}", name, e))
                                })?
                                .into()
                        }
                        None => Bytes::default(),
                    };
                    Step::transfer(target(step_config)?, parse_value(step_config)?, data)
                }
            };

            let gas_limit = step_config
                .gas_limit
                .map(|limit| GasLimit::Fixed(U256::from(limit)))
                .unwrap_or(GasLimit::Estimate);

            pipeline = pipeline.then(step.named(name).with_gas_limit(gas_limit));
        }

        Ok(pipeline)
    }
}

fn lookup<'a>(
    artifacts: &'a HashMap<String, Artifact>,
    contract: &str,
    step: &str,
) -> DeployResult<&'a Artifact> {
    artifacts
        .get(contract)
        .ok_or_else(|| DeployError::Config(format!("{}: contract {} was not compiled", step, contract)))
}

fn target(step: &StepConfig) -> DeployResult<Target> {
    step.target.as_deref().unwrap_or("deployed").parse()
}

fn parse_value(step: &StepConfig) -> DeployResult<U256> {
    match &step.value {
        Some(value) => U256::from_dec_str(value.trim())
            .map_err(|e| DeployError::Config(format!("invalid value {}: {}", value, e))),
        None => Ok(U256::zero()),
    }
}
