//! Label selector parsing and matching
//!
//! Converts a `metav1.LabelSelector` taken from a PodDisruptionBudget into a
//! validated [`Selector`] and tests pod labels against it. A budget without a
//! selector matches nothing; an empty selector matches everything.
//!
//! `kube::core::Selector` is not used here: its `TryFrom<LabelSelector>`
//! accepts any key or value, while the API server's rules are enforced below
//! so a malformed budget is skipped instead of matching unexpectedly.

use crate::error::{OperatorError, Result};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use std::collections::{BTreeMap, BTreeSet};

const MAX_NAME_LEN: usize = 63;
const MAX_PREFIX_LEN: usize = 253;

/// Operator of a single selector requirement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

/// One `key <op> values` clause; all clauses of a selector must hold
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    key: String,
    operator: Operator,
    values: BTreeSet<String>,
}

impl Requirement {
    fn new(key: &str, operator: Operator, values: Vec<String>) -> Result<Self> {
        validate_key(key)?;
        match operator {
            Operator::In | Operator::NotIn if values.is_empty() => {
                return Err(OperatorError::InvalidSelector(format!(
                    "values for key {:?} must be non-empty for In and NotIn",
                    key
                )));
            }
            Operator::Exists | Operator::DoesNotExist if !values.is_empty() => {
                return Err(OperatorError::InvalidSelector(format!(
                    "values for key {:?} must be empty for Exists and DoesNotExist",
                    key
                )));
            }
            _ => {}
        }
        for value in &values {
            validate_value(key, value)?;
        }
        Ok(Self {
            key: key.to_string(),
            operator,
            values: values.into_iter().collect(),
        })
    }

    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self.operator {
            Operator::In => labels.get(&self.key).is_some_and(|v| self.values.contains(v)),
            Operator::NotIn => labels.get(&self.key).is_none_or(|v| !self.values.contains(v)),
            Operator::Exists => labels.contains_key(&self.key),
            Operator::DoesNotExist => !labels.contains_key(&self.key),
        }
    }
}

/// A parsed, validated label selector
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// Matches no label set
    Nothing,
    /// Matches when every requirement holds; no requirements matches everything
    Requirements(Vec<Requirement>),
}

impl Selector {
    /// Parse an optional selector. `None` yields [`Selector::Nothing`].
    pub fn parse(selector: Option<&LabelSelector>) -> Result<Self> {
        let Some(selector) = selector else {
            return Ok(Selector::Nothing);
        };

        let mut requirements = Vec::new();
        for (key, value) in selector.match_labels.iter().flatten() {
            requirements.push(Requirement::new(key, Operator::In, vec![value.clone()])?);
        }
        for expr in selector.match_expressions.iter().flatten() {
            let operator = match expr.operator.as_str() {
                "In" => Operator::In,
                "NotIn" => Operator::NotIn,
                "Exists" => Operator::Exists,
                "DoesNotExist" => Operator::DoesNotExist,
                other => {
                    return Err(OperatorError::InvalidSelector(format!(
                        "{:?} is not a valid label selector operator",
                        other
                    )));
                }
            };
            requirements.push(Requirement::new(
                &expr.key,
                operator,
                expr.values.clone().unwrap_or_default(),
            )?);
        }
        Ok(Selector::Requirements(requirements))
    }

    /// Test a label set. A pod without labels is passed as an empty map.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Selector::Nothing => false,
            Selector::Requirements(reqs) => reqs.iter().all(|r| r.matches(labels)),
        }
    }
}

fn validate_key(key: &str) -> Result<()> {
    let (prefix, name) = match key.split_once('/') {
        Some((prefix, name)) => (Some(prefix), name),
        None => (None, key),
    };
    if let Some(prefix) = prefix {
        if prefix.is_empty() || prefix.len() > MAX_PREFIX_LEN || !is_dns_subdomain(prefix) {
            return Err(OperatorError::InvalidSelector(format!(
                "invalid label key {:?}: prefix must be a DNS subdomain",
                key
            )));
        }
    }
    if name.is_empty() || !is_label_name(name) {
        return Err(OperatorError::InvalidSelector(format!(
            "invalid label key {:?}: name must be 1-63 alphanumeric characters, '-', '_' or '.'",
            key
        )));
    }
    Ok(())
}

fn validate_value(key: &str, value: &str) -> Result<()> {
    if value.is_empty() || is_label_name(value) {
        return Ok(());
    }
    Err(OperatorError::InvalidSelector(format!(
        "invalid label value {:?} for key {:?}",
        value, key
    )))
}

/// Label name or value body: alphanumeric at both ends, `-_.` allowed inside.
fn is_label_name(s: &str) -> bool {
    let bytes = s.as_bytes();
    !bytes.is_empty()
        && bytes.len() <= MAX_NAME_LEN
        && bytes[0].is_ascii_alphanumeric()
        && bytes[bytes.len() - 1].is_ascii_alphanumeric()
        && bytes
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
}

/// RFC 1123 subdomain; only the whole prefix is length-limited, not each label.
fn is_dns_subdomain(s: &str) -> bool {
    s.split('.').all(|label| {
        let bytes = label.as_bytes();
        !bytes.is_empty()
            && bytes[0].is_ascii_alphanumeric()
            && bytes[bytes.len() - 1].is_ascii_alphanumeric()
            && bytes
                .iter()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
    })
}
