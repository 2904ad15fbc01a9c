//! Artifacts produced by pipeline tasks.
//!
//! An artifact is addressed by (phase, name, version). New versions are
//! written side-by-side; reads resolve to the most recent one.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::phase::Phase;

/// Approval state of an artifact version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    /// Produced by an ungated phase
    NotRequired,

    /// Waiting for an operator decision
    Pending,

    /// Confirmed by an operator; immutable from here on
    Approved,
}

impl ApprovalStatus {
    /// Initial status for a freshly written artifact of `phase`
    pub fn initial_for(phase: Phase) -> Self {
        if phase.requires_approval() {
            Self::Pending
        } else {
            Self::NotRequired
        }
    }

    /// Whether the artifact can feed later phases
    pub fn is_cleared(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotRequired => "not_required",
            Self::Pending => "pending",
            Self::Approved => "approved",
        };
        f.write_str(s)
    }
}

/// One stored version of an artifact, as recorded in the manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub version: u32,

    /// File name relative to the artifact directory
    pub file: String,

    pub produced_at: DateTime<Utc>,

    pub status: ApprovalStatus,

    /// First 16 hex chars of the content's SHA-256
    pub content_hash: String,

    pub size_bytes: u64,
}

/// Handle to a stored artifact version (no content)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub phase: Phase,
    pub name: String,
    pub version: u32,
    pub path: PathBuf,
    pub status: ApprovalStatus,
    pub produced_at: DateTime<Utc>,
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} v{} ({})", self.phase, self.name, self.version, self.status)
    }
}

/// A stored artifact version with its content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub phase: Phase,
    pub name: String,
    pub version: u32,
    pub content: String,
    pub produced_at: DateTime<Utc>,
    pub status: ApprovalStatus,
    pub content_hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_status_follows_gate() {
        assert_eq!(ApprovalStatus::initial_for(Phase::Design), ApprovalStatus::Pending);
        assert_eq!(
            ApprovalStatus::initial_for(Phase::Reporting),
            ApprovalStatus::NotRequired
        );
    }

    #[test]
    fn test_cleared_statuses() {
        assert!(ApprovalStatus::Approved.is_cleared());
        assert!(ApprovalStatus::NotRequired.is_cleared());
        assert!(!ApprovalStatus::Pending.is_cleared());
    }

    #[test]
    fn test_version_record_serialization() {
        let record = VersionRecord {
            version: 2,
            file: "v0002.md".to_string(),
            produced_at: Utc::now(),
            status: ApprovalStatus::Pending,
            content_hash: "0123456789abcdef".to_string(),
            size_bytes: 12,
        };

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"status\":\"pending\""));

        let parsed: VersionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, record);
    }
}
