//! Static deployment unit descriptors.
//!
//! A [`DeploymentUnit`] names the module to create, the ordered constructor
//! parameters it needs, the key its produced address is recorded under, and
//! the ordered wiring actions to run once it exists.

use alloy_core::primitives::{B256, keccak256};
use serde::{Deserialize, Serialize};

/// Default multiplier applied to a simulated gas estimate.
pub const DEFAULT_GAS_MULTIPLIER: f64 = 1.3;

/// Default gas budget when simulation fails.
pub const DEFAULT_GAS_FALLBACK: u64 = 2_000_000;

/// The declared type of a parameter.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ParamType {
    Address,
    Integer,
    String,
    Bytes,
}

/// Where a parameter's value comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "kebab-case")]
pub enum ParamSource {
    /// Supplied by the operator for this run (environment or `--input`).
    External {
        /// Lookup key; defaults to the parameter's own key.
        #[serde(default, rename = "from", skip_serializing_if = "Option::is_none")]
        key: Option<String>,
    },
    /// Read from the config store, usually an address produced by an earlier unit.
    Store {
        #[serde(default, rename = "from", skip_serializing_if = "Option::is_none")]
        key: Option<String>,
    },
    /// A constant fixed in the descriptor. Passed through without validation.
    Literal { value: String },
    /// The signing identity of the run.
    Deployer,
}

impl ParamSource {
    pub fn external() -> Self {
        ParamSource::External { key: None }
    }

    pub fn store() -> Self {
        ParamSource::Store { key: None }
    }

    pub fn store_key(key: impl Into<String>) -> Self {
        ParamSource::Store {
            key: Some(key.into()),
        }
    }

    pub fn literal(value: impl Into<String>) -> Self {
        ParamSource::Literal {
            value: value.into(),
        }
    }

    /// The config store key this source reads, given the owning parameter's key.
    pub fn store_lookup<'a>(&'a self, param_key: &'a str) -> Option<&'a str> {
        match self {
            ParamSource::Store { key } => Some(key.as_deref().unwrap_or(param_key)),
            _ => None,
        }
    }
}

/// A single typed input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstructorParam {
    pub key: String,
    #[serde(rename = "type")]
    pub ty: ParamType,
    #[serde(flatten)]
    pub source: ParamSource,
}

impl ConstructorParam {
    pub fn new(key: impl Into<String>, ty: ParamType, source: ParamSource) -> Self {
        Self {
            key: key.into(),
            ty,
            source,
        }
    }

    /// The key looked up in the source, if the source is keyed.
    pub fn lookup_key(&self) -> Option<&str> {
        match &self.source {
            ParamSource::External { key } | ParamSource::Store { key } => {
                Some(key.as_deref().unwrap_or(&self.key))
            }
            ParamSource::Literal { .. } | ParamSource::Deployer => None,
        }
    }
}

/// An access-control role, written the way module authors refer to it.
///
/// `DEFAULT_ADMIN_ROLE` is the zero word, a `0x`-prefixed 32-byte hex string
/// is taken verbatim, and any other name is hashed with keccak256.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleId(pub String);

impl RoleId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn to_b256(&self) -> B256 {
        let name = self.0.trim();
        if name == "DEFAULT_ADMIN_ROLE" {
            return B256::ZERO;
        }
        if name.len() == 66 && name.starts_with("0x") {
            if let Ok(word) = name.parse::<B256>() {
                return word;
            }
        }
        keccak256(name.as_bytes())
    }
}

/// An address-typed argument of a wiring action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AddressArg(pub ParamSource);

impl AddressArg {
    /// Keyed sources have no parameter key to fall back on, so an absent
    /// lookup key becomes an empty one and fails validation.
    fn explicit_source(&self) -> ParamSource {
        match &self.0 {
            ParamSource::External { key } => ParamSource::External {
                key: Some(key.clone().unwrap_or_default()),
            },
            ParamSource::Store { key } => ParamSource::Store {
                key: Some(key.clone().unwrap_or_default()),
            },
            other => other.clone(),
        }
    }
}

/// A wiring call executed against the freshly created module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum PostDeployAction {
    /// `grantRole(bytes32,address)`, skipped when `hasRole` already holds.
    GrantRole { role: RoleId, grantee: AddressArg },
    /// `transferOwnership(address)`, skipped when `owner()` already matches.
    TransferOwnership { new_owner: AddressArg },
    /// An arbitrary initializer such as `initializePhase1(address,address,address)`.
    Initialize {
        signature: String,
        #[serde(default)]
        args: Vec<ConstructorParam>,
        /// Zero-argument view returning `bool`; `true` means already initialized.
        /// Required before a run: without it a rerun cannot tell the call already landed.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        skip_if: Option<String>,
    },
}

impl PostDeployAction {
    /// Short human-readable label, used in reports and logs.
    pub fn label(&self) -> String {
        match self {
            PostDeployAction::GrantRole { role, .. } => format!("grantRole({})", role.0),
            PostDeployAction::TransferOwnership { .. } => "transferOwnership".to_string(),
            PostDeployAction::Initialize { signature, .. } => signature.clone(),
        }
    }

    /// The action's inputs as parameters, named `actions.<index>.<arg>`.
    pub fn inputs(&self, index: usize) -> Vec<ConstructorParam> {
        match self {
            PostDeployAction::GrantRole { grantee, .. } => vec![ConstructorParam::new(
                action_input_name(index, "grantee"),
                ParamType::Address,
                grantee.explicit_source(),
            )],
            PostDeployAction::TransferOwnership { new_owner } => vec![ConstructorParam::new(
                action_input_name(index, "new_owner"),
                ParamType::Address,
                new_owner.explicit_source(),
            )],
            PostDeployAction::Initialize { args, .. } => args
                .iter()
                .map(|arg| ConstructorParam {
                    key: action_input_name(index, &arg.key),
                    ty: arg.ty,
                    source: match &arg.source {
                        // keyed sources keep looking up the declared key
                        ParamSource::External { key } => ParamSource::External {
                            key: Some(key.clone().unwrap_or_else(|| arg.key.clone())),
                        },
                        ParamSource::Store { key } => ParamSource::Store {
                            key: Some(key.clone().unwrap_or_else(|| arg.key.clone())),
                        },
                        other => other.clone(),
                    },
                })
                .collect(),
        }
    }
}

/// Name under which an action input is resolved.
pub fn action_input_name(index: usize, arg: &str) -> String {
    format!("actions.{}.{}", index, arg)
}

/// Per-unit gas budget policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GasPolicy {
    /// Safety multiplier applied to a simulated estimate; must be strictly greater than 1.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Budget used when simulation fails.
    #[serde(default = "default_fallback")]
    pub fallback: u64,
}

fn default_multiplier() -> f64 {
    DEFAULT_GAS_MULTIPLIER
}

fn default_fallback() -> u64 {
    DEFAULT_GAS_FALLBACK
}

impl Default for GasPolicy {
    fn default() -> Self {
        Self {
            multiplier: DEFAULT_GAS_MULTIPLIER,
            fallback: DEFAULT_GAS_FALLBACK,
        }
    }
}

/// A single module's deployment descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentUnit {
    /// Module name, unique within a run.
    pub name: String,
    /// Contract whose creation code is deployed. Defaults to `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract: Option<String>,
    /// Config store key the produced address is recorded under.
    pub output_key: String,
    /// Header written above the recorded key. Defaults to `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(default)]
    pub gas: GasPolicy,
    #[serde(default)]
    pub params: Vec<ConstructorParam>,
    #[serde(default)]
    pub actions: Vec<PostDeployAction>,
}

impl DeploymentUnit {
    pub fn new(name: impl Into<String>, output_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            contract: None,
            output_key: output_key.into(),
            section: None,
            gas: GasPolicy::default(),
            params: Vec::new(),
            actions: Vec::new(),
        }
    }

    pub fn contract(mut self, contract: impl Into<String>) -> Self {
        self.contract = Some(contract.into());
        self
    }

    pub fn param(mut self, key: impl Into<String>, ty: ParamType, source: ParamSource) -> Self {
        self.params.push(ConstructorParam::new(key, ty, source));
        self
    }

    pub fn action(mut self, action: PostDeployAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn gas(mut self, gas: GasPolicy) -> Self {
        self.gas = gas;
        self
    }

    pub fn contract_name(&self) -> &str {
        self.contract.as_deref().unwrap_or(&self.name)
    }

    pub fn section_name(&self) -> &str {
        self.section.as_deref().unwrap_or(&self.name)
    }

    /// Constructor parameters followed by every action input.
    pub fn all_inputs(&self) -> Vec<ConstructorParam> {
        let mut inputs = self.params.clone();
        for (i, action) in self.actions.iter().enumerate() {
            inputs.extend(action.inputs(i));
        }
        inputs
    }

    /// Config store keys this unit reads.
    pub fn store_dependencies(&self) -> Vec<String> {
        self.all_inputs()
            .iter()
            .filter_map(|param| {
                param
                    .source
                    .store_lookup(&param.key)
                    .filter(|key| !key.is_empty())
                    .map(|key| key.to_string())
            })
            .collect()
    }
}
