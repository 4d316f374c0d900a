use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Lifecycle state of an analysis task as seen by polling clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TaskStatus {
    Processing,
    Completed,
    Error,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskStatus::Processing)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub const HIGH_THRESHOLD: f32 = 0.8;
    pub const MEDIUM_THRESHOLD: f32 = 0.5;

    /// Buckets a raw model score in `[0, 1]` into a confidence tier.
    pub fn from_score(score: f32) -> Self {
        if score >= Self::HIGH_THRESHOLD {
            Confidence::High
        } else if score >= Self::MEDIUM_THRESHOLD {
            Confidence::Medium
        } else {
            Confidence::Low
        }
    }
}

/// One registry trial, already reduced to what the results view shows.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TrialSummary {
    pub id: String,
    pub title: String,
    pub status: String,
    pub phases: Vec<String>,
    pub locations: Vec<String>,
    pub match_reason: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AnalysisResult {
    pub condition: String,
    pub confidence: Confidence,
    pub explanation: String,
    pub trials: Vec<TrialSummary>,
}

/// Wire form of a task returned by the status endpoint.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Task {
    pub id: String,
    pub status: TaskStatus,
    pub created_at: String,
    pub updated_at: String,
    #[serde(rename = "data", skip_serializing_if = "Option::is_none", default)]
    pub result: Option<AnalysisResult>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn confidence_thresholds_are_inclusive() {
        assert_eq!(Confidence::from_score(0.8), Confidence::High);
        assert_eq!(Confidence::from_score(0.79), Confidence::Medium);
        assert_eq!(Confidence::from_score(0.5), Confidence::Medium);
        assert_eq!(Confidence::from_score(0.49), Confidence::Low);
        assert_eq!(Confidence::from_score(0.0), Confidence::Low);
    }

    #[test]
    fn confidence_parses_any_casing() {
        assert_eq!(Confidence::from_str("High").unwrap(), Confidence::High);
        assert_eq!(Confidence::from_str("MEDIUM").unwrap(), Confidence::Medium);
        assert!(Confidence::from_str("certain").is_err());
    }

    #[test]
    fn processing_task_serializes_without_data_or_error() {
        let task = Task {
            id: "abc".into(),
            status: TaskStatus::Processing,
            created_at: "2024-01-01T00:00:00Z".into(),
            updated_at: "2024-01-01T00:00:00Z".into(),
            result: None,
            error: None,
        };
        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["status"], "processing");
        assert!(value.get("data").is_none());
        assert!(value.get("error").is_none());
    }

    #[test]
    fn terminal_statuses() {
        assert!(!TaskStatus::Processing.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Error.is_terminal());
        assert_eq!(TaskStatus::Completed.to_string(), "completed");
    }
}
