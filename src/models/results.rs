use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Pass,
    Fail,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Critical,
    Warning,
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Framework {
    #[serde(rename = "FAR")]
    Far,
    #[serde(rename = "DFARS")]
    Dfars,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Regulation {
    pub framework: Framework,
    pub section: String,
    pub reference: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueLocation {
    pub page: u32,
    pub section: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceIssue {
    pub id: String,
    pub severity: IssueSeverity,
    pub title: String,
    pub description: String,
    pub regulation: Regulation,
    #[serde(default)]
    pub location: Option<IssueLocation>,
    #[serde(default)]
    pub remediation: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsSummary {
    pub total_issues: u32,
    pub critical_issues: u32,
    pub warning_issues: u32,
}

/// Compliance findings for a completed analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceResults {
    pub id: String,
    pub proposal_id: String,
    pub status: ResultStatus,
    #[serde(default)]
    pub issues: Vec<ComplianceIssue>,
    #[serde(default)]
    pub summary: ResultsSummary,
    pub generated_at: DateTime<Utc>,
}

impl ComplianceResults {
    pub fn issues_by_severity(&self, severity: IssueSeverity) -> impl Iterator<Item = &ComplianceIssue> {
        self.issues.iter().filter(move |issue| issue.severity == severity)
    }
}
