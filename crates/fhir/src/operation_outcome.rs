//! OperationOutcome wire model.

use serde::{Deserialize, Serialize};

/// An `OperationOutcome` resource.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationOutcome {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default)]
    pub issue: Vec<OperationOutcomeIssue>,
}

/// One issue reported by an outcome.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationOutcomeIssue {
    pub severity: IssueSeverity,

    pub code: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<CodeableText>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<String>,
}

/// A codeable concept reduced to its `text`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeableText {
    pub text: String,
}

/// Issue severity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Fatal,
    Error,
    Warning,
    Information,
}

impl OperationOutcome {
    /// An outcome with a single issue.
    pub fn single(
        severity: IssueSeverity,
        code: impl Into<String>,
        diagnostics: Option<String>,
        details_text: Option<String>,
    ) -> Self {
        Self {
            id: None,
            issue: vec![OperationOutcomeIssue {
                severity,
                code: code.into(),
                details: details_text.map(|text| CodeableText { text }),
                diagnostics,
            }],
        }
    }
}
