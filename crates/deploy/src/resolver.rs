//! Parameter resolution and validation.
//!
//! Every declared parameter is resolved against its source and checked
//! against its declared type by one shared routine, [`validate_value`].
//! Failures are collected for the whole unit instead of stopping at the first.

use std::collections::{BTreeMap, HashSet};

use alloy_core::{
    dyn_abi::DynSolValue,
    primitives::{Address, Bytes, U256},
};

use crate::{
    error::{IssueKind, ValidationError, ValidationIssue},
    store::ConfigStore,
    unit::{ConstructorParam, DeploymentUnit, ParamSource, ParamType},
};

/// Operator-supplied inputs of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExternalInputs(BTreeMap<String, String>);

impl ExternalInputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the process environment.
    pub fn from_env() -> Self {
        Self(std::env::vars().collect())
    }

    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Insert or override an input.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }
}

/// A validated value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedValue {
    Address(Address),
    Integer(U256),
    String(String),
    Bytes(Bytes),
    /// A literal constant, kept as written.
    Literal { ty: ParamType, raw: String },
}

impl ResolvedValue {
    /// Convert to an ABI value. Literals are only checked here.
    pub fn to_sol_value(&self) -> Result<DynSolValue, String> {
        Ok(match self {
            ResolvedValue::Address(address) => DynSolValue::Address(*address),
            ResolvedValue::Integer(value) => DynSolValue::Uint(*value, 256),
            ResolvedValue::String(value) => DynSolValue::String(value.clone()),
            ResolvedValue::Bytes(value) => DynSolValue::Bytes(value.to_vec()),
            ResolvedValue::Literal { ty, raw } => validate_value(*ty, raw)?.to_sol_value()?,
        })
    }

    /// The value as an address, parsing literals on the way.
    pub fn as_address(&self) -> Result<Address, String> {
        match self {
            ResolvedValue::Address(address) => Ok(*address),
            ResolvedValue::Literal {
                ty: ParamType::Address,
                raw,
            } => parse_address(raw),
            other => Err(format!("{:?} is not an address", other)),
        }
    }
}

/// A resolved parameter, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedParam {
    pub key: String,
    pub ty: ParamType,
    pub value: ResolvedValue,
}

/// The complete resolved input set of a unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, derive_more::Deref)]
pub struct ResolvedParams(Vec<ResolvedParam>);

impl ResolvedParams {
    pub fn get(&self, key: &str) -> Option<&ResolvedValue> {
        self.0.iter().find(|p| p.key == key).map(|p| &p.value)
    }

    /// The resolved constructor arguments of `unit`, in declaration order.
    pub fn constructor_args<'a>(
        &'a self,
        unit: &'a DeploymentUnit,
    ) -> impl Iterator<Item = &'a ResolvedParam> + 'a {
        unit.params
            .iter()
            .filter_map(move |param| self.0.iter().find(|p| p.key == param.key))
    }
}

/// What a resolution may read.
#[derive(Debug, Clone, Copy)]
pub struct ResolveContext<'a> {
    pub store: &'a ConfigStore,
    pub externals: &'a ExternalInputs,
    /// The signing identity of the run.
    pub deployer: Address,
}

pub struct Resolver;

impl Resolver {
    /// Resolve the constructor parameters and every action input of `unit`.
    pub fn resolve_unit(
        unit: &DeploymentUnit,
        ctx: ResolveContext<'_>,
    ) -> Result<ResolvedParams, ValidationError> {
        Self::resolve(&unit.name, &unit.all_inputs(), ctx)
    }

    /// Resolve `params`, returning every offending parameter at once.
    ///
    /// Resolution reads nothing but `ctx`, so the result is the same for the
    /// same store and inputs whatever order the parameters are declared in.
    pub fn resolve(
        unit: &str,
        params: &[ConstructorParam],
        ctx: ResolveContext<'_>,
    ) -> Result<ResolvedParams, ValidationError> {
        let mut resolved = Vec::with_capacity(params.len());
        let mut issues = Vec::new();
        let mut seen = HashSet::new();

        for param in params {
            if !seen.insert(param.key.as_str()) {
                issues.push(ValidationIssue {
                    param: param.key.clone(),
                    kind: IssueKind::Declaration("parameter declared more than once".to_string()),
                });
                continue;
            }

            match resolve_one(param, ctx) {
                Ok(value) => resolved.push(ResolvedParam {
                    key: param.key.clone(),
                    ty: param.ty,
                    value,
                }),
                Err(kind) => issues.push(ValidationIssue {
                    param: param.key.clone(),
                    kind,
                }),
            }
        }

        if issues.is_empty() {
            return Ok(ResolvedParams(resolved));
        }

        issues.sort_by(|a, b| a.param.cmp(&b.param));
        Err(ValidationError {
            unit: unit.to_string(),
            issues,
        })
    }
}

fn resolve_one(
    param: &ConstructorParam,
    ctx: ResolveContext<'_>,
) -> Result<ResolvedValue, IssueKind> {
    let (origin, raw) = match &param.source {
        ParamSource::Literal { value } => {
            return Ok(ResolvedValue::Literal {
                ty: param.ty,
                raw: value.clone(),
            });
        }
        ParamSource::Deployer => {
            return match param.ty {
                ParamType::Address => Ok(ResolvedValue::Address(ctx.deployer)),
                other => Err(IssueKind::Declaration(format!(
                    "deployer source requires an address parameter, declared {}",
                    other
                ))),
            };
        }
        ParamSource::External { .. } => ("external", lookup(param, |k| ctx.externals.get(k))),
        ParamSource::Store { .. } => ("store", lookup(param, |k| ctx.store.get(k))),
    };

    let (key, raw) = raw?;
    let Some(raw) = raw else {
        return Err(IssueKind::Missing { origin, key });
    };
    if clean(raw).is_empty() {
        return Err(IssueKind::Empty { origin, key });
    }

    validate_value(param.ty, raw).map_err(|reason| IssueKind::Malformed {
        expected: param.ty.to_string(),
        found: raw.to_string(),
        reason,
    })
}

fn lookup<'s>(
    param: &ConstructorParam,
    get: impl Fn(&str) -> Option<&'s str>,
) -> Result<(String, Option<&'s str>), IssueKind> {
    match param.lookup_key() {
        Some(key) if !key.is_empty() => Ok((key.to_string(), get(key))),
        _ => Err(IssueKind::Declaration("no lookup key given".to_string())),
    }
}

/// Strip whitespace and stray quote characters around a raw value.
pub fn clean(raw: &str) -> &str {
    raw.trim_matches(|c: char| c.is_whitespace() || matches!(c, '"' | '\'' | '`'))
}

/// Check `raw` against `ty`. Shared by every parameter type.
pub fn validate_value(ty: ParamType, raw: &str) -> Result<ResolvedValue, String> {
    let value = clean(raw);
    match ty {
        ParamType::Address => parse_address(value).map(ResolvedValue::Address),
        ParamType::Integer => parse_integer(value).map(ResolvedValue::Integer),
        ParamType::String => {
            if raw.is_empty() {
                Err("empty string".to_string())
            } else {
                Ok(ResolvedValue::String(raw.to_string()))
            }
        }
        ParamType::Bytes => parse_bytes(value).map(ResolvedValue::Bytes),
    }
}

/// Parse a `0x`-prefixed 20-byte hex address.
///
/// All-lowercase and all-uppercase forms are accepted as-is; mixed case must
/// carry a valid EIP-55 checksum.
pub fn parse_address(raw: &str) -> Result<Address, String> {
    let value = clean(raw);
    let Some(digits) = value.strip_prefix("0x") else {
        return Err("address must start with 0x".to_string());
    };
    if digits.len() != 40 {
        return Err(format!(
            "address must have 40 hex digits, found {}",
            digits.len()
        ));
    }
    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err("address contains non-hex characters".to_string());
    }

    let has_lower = digits.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = digits.chars().any(|c| c.is_ascii_uppercase());
    if has_lower && has_upper {
        return Address::parse_checksummed(value, None).map_err(|e| format!("bad checksum: {}", e));
    }

    value.parse::<Address>().map_err(|e| e.to_string())
}

fn parse_integer(value: &str) -> Result<U256, String> {
    let digits: String = value.chars().filter(|&c| c != '_').collect();
    if digits.is_empty() {
        return Err("empty integer".to_string());
    }
    if let Some(hex) = digits.strip_prefix("0x") {
        U256::from_str_radix(hex, 16).map_err(|e| e.to_string())
    } else {
        U256::from_str_radix(&digits, 10).map_err(|e| e.to_string())
    }
}

fn parse_bytes(value: &str) -> Result<Bytes, String> {
    let Some(digits) = value.strip_prefix("0x") else {
        return Err("bytes must start with 0x".to_string());
    };
    hex::decode(digits)
        .map(Bytes::from)
        .map_err(|e| e.to_string())
}
