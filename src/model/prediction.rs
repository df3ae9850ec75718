// src/model/prediction.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Version tag written into every stored prediction.
pub const WORKFLOW_VERSION: &str = "2.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Label {
    Fake,
    Real,
    Uncertain,
    Unknown,
}

impl Label {
    pub const ALL: [Label; 4] = [Label::Fake, Label::Real, Label::Uncertain, Label::Unknown];

    pub fn as_str(self) -> &'static str {
        match self {
            Label::Fake => "FAKE",
            Label::Real => "REAL",
            Label::Uncertain => "UNCERTAIN",
            Label::Unknown => "UNKNOWN",
        }
    }

    /// Row/column position in the reconciliation table.
    pub(crate) fn index(self) -> usize {
        match self {
            Label::Fake => 0,
            Label::Real => 1,
            Label::Uncertain => 2,
            Label::Unknown => 3,
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Label {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FAKE" => Ok(Label::Fake),
            "REAL" => Ok(Label::Real),
            "UNCERTAIN" => Ok(Label::Uncertain),
            "UNKNOWN" => Ok(Label::Unknown),
            other => Err(format!("unknown label '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PrimaryScores {
    pub fake: f64,
    pub real: f64,
}

/// What the primary model said about one text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimaryOutput {
    pub label: Label,
    pub confidence: f64,
    pub scores: PrimaryScores,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PrimaryOutput {
    /// The degraded result used when the primary call failed.
    pub fn unknown(model: impl Into<String>, error: impl ToString) -> Self {
        Self {
            label: Label::Unknown,
            confidence: 0.0,
            scores: PrimaryScores::default(),
            model: model.into(),
            error: Some(error.to_string()),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.error.is_some()
    }
}

/// What the LLM second opinion said.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecondaryOutput {
    pub label: Label,
    pub confidence: f64,
    pub reason: String,
    pub model: String,
    #[serde(default)]
    pub rate_limited: bool,
}

impl SecondaryOutput {
    pub fn uncertain(model: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            label: Label::Uncertain,
            confidence: 0.0,
            reason: reason.into(),
            model: model.into(),
            rate_limited: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierOutputs {
    pub primary: PrimaryOutput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary: Option<SecondaryOutput>,
}

/// The prediction attached to an item. Replaced as a whole, never merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: Label,
    pub confidence: f64,
    pub classifier_outputs: ClassifierOutputs,
    pub explanation: String,
    pub classified_at: DateTime<Utc>,
    pub workflow_version: String,
}
