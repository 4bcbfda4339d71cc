//! Worker types and the subtype keys each one dispatches on.

use std::fmt;
use std::hash::Hash;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Family of worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerType {
    /// Fuzzing and discovery scans.
    Scan,
    /// Alert processing.
    Alert,
    /// Report generation.
    Report,
}

impl WorkerType {
    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scan => "scan",
            Self::Alert => "alert",
            Self::Report => "report",
        }
    }
}

impl fmt::Display for WorkerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subtype key a worker dispatches on.
pub trait WorkKind: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static {
    /// Every subtype; a worker must bind all of them.
    const ALL: &'static [Self];
    /// Worker family these subtypes belong to.
    const WORKER_TYPE: WorkerType;
    /// Per-item timeout when none is given.
    const DEFAULT_TIMEOUT: Duration;

    /// Wire name.
    fn as_str(self) -> &'static str;

    /// Look up by wire name.
    fn parse(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.as_str() == name)
    }
}

/// Scan subtypes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanKind {
    /// Full fuzzing run.
    Full,
    /// Reduced wordlist run.
    Quick,
    /// Deep vulnerability scan.
    Deep,
    /// Scan of selected endpoints.
    Targeted,
    /// Subdomain enumeration.
    Subdomain,
}

impl WorkKind for ScanKind {
    const ALL: &'static [Self] = &[
        Self::Full,
        Self::Quick,
        Self::Deep,
        Self::Targeted,
        Self::Subdomain,
    ];
    const WORKER_TYPE: WorkerType = WorkerType::Scan;
    const DEFAULT_TIMEOUT: Duration = Duration::from_secs(7200);

    fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Quick => "quick",
            Self::Deep => "deep",
            Self::Targeted => "targeted",
            Self::Subdomain => "subdomain",
        }
    }
}

/// Alert processing actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertAction {
    /// Build alerts from findings.
    Generate,
    /// Pattern analysis.
    Analyze,
    /// Run the classifier.
    Classify,
    /// Group related alerts.
    Correlate,
    /// Assign priorities.
    Prioritize,
}

impl WorkKind for AlertAction {
    const ALL: &'static [Self] = &[
        Self::Generate,
        Self::Analyze,
        Self::Classify,
        Self::Correlate,
        Self::Prioritize,
    ];
    const WORKER_TYPE: WorkerType = WorkerType::Alert;
    const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

    fn as_str(self) -> &'static str {
        match self {
            Self::Generate => "generate",
            Self::Analyze => "analyze",
            Self::Classify => "classify",
            Self::Correlate => "correlate",
            Self::Prioritize => "prioritize",
        }
    }
}

/// Report types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    /// Overall security posture.
    SecuritySummary,
    /// Findings list.
    VulnerabilityReport,
    /// Changes over time.
    TrendAnalysis,
    /// Compliance checklist.
    ComplianceReport,
    /// One-page summary.
    ExecutiveSummary,
}

impl WorkKind for ReportKind {
    const ALL: &'static [Self] = &[
        Self::SecuritySummary,
        Self::VulnerabilityReport,
        Self::TrendAnalysis,
        Self::ComplianceReport,
        Self::ExecutiveSummary,
    ];
    const WORKER_TYPE: WorkerType = WorkerType::Report;
    const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

    fn as_str(self) -> &'static str {
        match self {
            Self::SecuritySummary => "security_summary",
            Self::VulnerabilityReport => "vulnerability_report",
            Self::TrendAnalysis => "trend_analysis",
            Self::ComplianceReport => "compliance_report",
            Self::ExecutiveSummary => "executive_summary",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for kind in ScanKind::ALL {
            assert_eq!(ScanKind::parse(kind.as_str()), Some(*kind));
        }
        assert_eq!(
            ReportKind::parse("trend_analysis"),
            Some(ReportKind::TrendAnalysis)
        );
        assert_eq!(AlertAction::parse("escalate"), None);
    }

    #[test]
    fn per_type_timeouts() {
        assert_eq!(ScanKind::DEFAULT_TIMEOUT, Duration::from_secs(7200));
        assert_eq!(AlertAction::DEFAULT_TIMEOUT, Duration::from_secs(300));
        assert_eq!(ReportKind::DEFAULT_TIMEOUT, Duration::from_secs(600));
        assert_eq!(AlertAction::WORKER_TYPE.to_string(), "alert");
    }
}
