//! Tag conditions used by routing and limiting rules.

use serde::{Deserialize, Serialize};

/// Comparison applied by a [`TagCondition`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OpType {
    #[default]
    Equal,
    NotEqual,
    In,
    NotIn,
    Prefix,
}

/// Predicate over one request attribute.
///
/// `condition_type` selects the matcher (for example `header` or `query`),
/// `key` names the attribute inside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagCondition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub key: String,
    #[serde(default)]
    pub op_type: OpType,
    #[serde(default)]
    pub values: Vec<String>,
}

impl TagCondition {
    pub fn new(
        condition_type: impl Into<String>,
        key: impl Into<String>,
        op_type: OpType,
        values: Vec<String>,
    ) -> Self {
        Self {
            condition_type: condition_type.into(),
            key: key.into(),
            op_type,
            values,
        }
    }

    /// Evaluate the comparison against the attribute values found on a request.
    pub fn test(&self, actual: &[&str]) -> bool {
        match self.op_type {
            OpType::Equal | OpType::In => actual
                .iter()
                .any(|a| self.values.iter().any(|v| v == a)),
            OpType::NotEqual | OpType::NotIn => !actual
                .iter()
                .any(|a| self.values.iter().any(|v| v == a)),
            OpType::Prefix => actual
                .iter()
                .any(|a| self.values.iter().any(|v| a.starts_with(v.as_str()))),
        }
    }
}
