use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ClauseGraphError;

/// Dense node identifier. Ids are assigned from zero in build order and double as row indices.
pub type NodeId = usize;

/// Risk tier of a clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub const ALL: [RiskLevel; 3] = [RiskLevel::Low, RiskLevel::Medium, RiskLevel::High];

    pub fn index(self) -> usize {
        match self {
            RiskLevel::Low => 0,
            RiskLevel::Medium => 1,
            RiskLevel::High => 2,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
        }
    }

    /// Lenient parse for operator input: accepts indices and forms like "low" or "High Risk".
    pub fn from_loose(value: &str) -> Option<Self> {
        let trimmed = value.trim();
        if let Ok(index) = trimmed.parse::<usize>() {
            return Self::from_index(index);
        }
        let upper = trimmed.to_uppercase();
        if upper.contains("LOW") {
            Some(RiskLevel::Low)
        } else if upper.contains("MED") {
            Some(RiskLevel::Medium)
        } else if upper.contains("HIGH") {
            Some(RiskLevel::High)
        } else {
            None
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strict parse: only the exact uppercase literals are accepted.
impl FromStr for RiskLevel {
    type Err = ClauseGraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOW" => Ok(RiskLevel::Low),
            "MEDIUM" => Ok(RiskLevel::Medium),
            "HIGH" => Ok(RiskLevel::High),
            other => Err(ClauseGraphError::Validation(format!(
                "invalid risk_level: {other}"
            ))),
        }
    }
}

/// Label column value. Persisted as an integer in {-1, 0, 1, 2}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum Label {
    Unlabeled,
    Risk(RiskLevel),
}

impl Label {
    pub const UNLABELED_VALUE: i64 = -1;

    pub fn is_labeled(self) -> bool {
        matches!(self, Label::Risk(_))
    }

    pub fn class_index(self) -> Option<usize> {
        match self {
            Label::Unlabeled => None,
            Label::Risk(level) => Some(level.index()),
        }
    }
}

impl Default for Label {
    fn default() -> Self {
        Label::Unlabeled
    }
}

impl TryFrom<i64> for Label {
    type Error = ClauseGraphError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        if value == Self::UNLABELED_VALUE {
            return Ok(Label::Unlabeled);
        }
        usize::try_from(value)
            .ok()
            .and_then(RiskLevel::from_index)
            .map(Label::Risk)
            .ok_or_else(|| ClauseGraphError::DataIntegrity(format!("invalid label value {value}")))
    }
}

impl From<Label> for i64 {
    fn from(label: Label) -> Self {
        match label {
            Label::Unlabeled => Label::UNLABELED_VALUE,
            Label::Risk(level) => level.index() as i64,
        }
    }
}

/// One clause in the training graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClauseNode {
    pub node_id: NodeId,
    pub source_document_id: String,
    /// Position within the source document, -1 when unknown.
    pub sequence_index: i64,
    pub text: String,
    pub embedding: Vec<f32>,
}

/// Undirected structural adjacency between consecutive clauses of one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StructuralEdge {
    pub src: NodeId,
    pub dst: NodeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelRecord {
    pub node_id: NodeId,
    pub label: Label,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_parse_rejects_lowercase() {
        assert_eq!("HIGH".parse::<RiskLevel>().unwrap(), RiskLevel::High);
        assert!("high".parse::<RiskLevel>().is_err());
        assert!("CRITICAL".parse::<RiskLevel>().is_err());
    }

    #[test]
    fn loose_parse_accepts_operator_forms() {
        assert_eq!(RiskLevel::from_loose("Low Risk"), Some(RiskLevel::Low));
        assert_eq!(RiskLevel::from_loose("med"), Some(RiskLevel::Medium));
        assert_eq!(RiskLevel::from_loose("2"), Some(RiskLevel::High));
        assert_eq!(RiskLevel::from_loose("7"), None);
        assert_eq!(RiskLevel::from_loose("unclear"), None);
    }

    #[test]
    fn label_serializes_as_integer() {
        let record = LabelRecord {
            node_id: 4,
            label: Label::Risk(RiskLevel::Medium),
        };
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"node_id":4,"label":1}"#);

        let unlabeled: LabelRecord = serde_json::from_str(r#"{"node_id":0,"label":-1}"#).unwrap();
        assert_eq!(unlabeled.label, Label::Unlabeled);

        assert!(serde_json::from_str::<LabelRecord>(r#"{"node_id":0,"label":5}"#).is_err());
    }
}
