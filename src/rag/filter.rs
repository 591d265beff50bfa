use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::VectorStoreError;

/// Flat scalar stored next to a vector. The index never holds nested values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

pub type Metadata = BTreeMap<String, MetadataValue>;

impl MetadataValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetadataValue::Int(v) => Some(*v as f64),
            MetadataValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetadataValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::Str(v) => Some(v),
            _ => None,
        }
    }
}

impl From<bool> for MetadataValue {
    fn from(v: bool) -> Self {
        MetadataValue::Bool(v)
    }
}

impl From<i64> for MetadataValue {
    fn from(v: i64) -> Self {
        MetadataValue::Int(v)
    }
}

impl From<f64> for MetadataValue {
    fn from(v: f64) -> Self {
        MetadataValue::Float(v)
    }
}

impl From<&str> for MetadataValue {
    fn from(v: &str) -> Self {
        MetadataValue::Str(v.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(v: String) -> Self {
        MetadataValue::Str(v)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Equals(MetadataValue),
    AtLeast(f64),
    /// Substring match on a string field (used on comma-joined lists).
    Contains(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub field: String,
    pub condition: Condition,
}

/// Conjunction of metadata predicates. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataFilter {
    predicates: Vec<Predicate>,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: &str, value: impl Into<MetadataValue>) -> Self {
        self.predicates.push(Predicate {
            field: field.to_string(),
            condition: Condition::Equals(value.into()),
        });
        self
    }

    pub fn gte(mut self, field: &str, threshold: f64) -> Self {
        self.predicates.push(Predicate {
            field: field.to_string(),
            condition: Condition::AtLeast(threshold),
        });
        self
    }

    pub fn contains(mut self, field: &str, needle: &str) -> Self {
        self.predicates.push(Predicate {
            field: field.to_string(),
            condition: Condition::Contains(needle.to_string()),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn validate(&self) -> Result<(), VectorStoreError> {
        for predicate in &self.predicates {
            if predicate.field.trim().is_empty() {
                return Err(VectorStoreError::InvalidFilter {
                    reason: "empty field name".to_string(),
                });
            }
            match &predicate.condition {
                Condition::AtLeast(threshold) if !threshold.is_finite() => {
                    return Err(VectorStoreError::InvalidFilter {
                        reason: format!("non-finite threshold on {}", predicate.field),
                    });
                }
                Condition::Contains(needle) if needle.is_empty() => {
                    return Err(VectorStoreError::InvalidFilter {
                        reason: format!("empty contains needle on {}", predicate.field),
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Evaluates the filter locally. Missing fields never match.
    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.predicates.iter().all(|predicate| {
            let Some(value) = metadata.get(&predicate.field) else {
                return false;
            };
            match &predicate.condition {
                Condition::Equals(expected) => match (value.as_f64(), expected.as_f64()) {
                    (Some(a), Some(b)) => a == b,
                    _ => value == expected,
                },
                Condition::AtLeast(threshold) => {
                    value.as_f64().is_some_and(|v| v >= *threshold)
                }
                Condition::Contains(needle) => {
                    value.as_str().is_some_and(|s| s.contains(needle.as_str()))
                }
            }
        })
    }
}
