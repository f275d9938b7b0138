//! Per-asset results of a sync pass

use std::path::PathBuf;

use serde::Serialize;

/// What happened to one asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum Outcome {
    /// The asset (and its gzip companion, if any) was written
    Uploaded,
    /// The stored checksum matched
    SkippedUnchanged,
    /// A joined bundle that is neither css nor js
    SkippedNotCombinable,
    Failed { reason: String },
}

impl Outcome {
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetOutcome {
    pub remote_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
    /// Size of the processed asset in bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl AssetOutcome {
    pub(crate) fn failed(remote_path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            remote_path: remote_path.into(),
            content_type: None,
            local_path: None,
            size: None,
            outcome: Outcome::Failed {
                reason: reason.into(),
            },
        }
    }
}

/// Everything a pass did, in completion order
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub outcomes: Vec<AssetOutcome>,
    /// Set when closing the storage session failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_error: Option<String>,
}

impl SyncReport {
    fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.outcome)).count()
    }

    #[must_use]
    pub fn uploaded(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Uploaded))
    }

    #[must_use]
    pub fn skipped(&self) -> usize {
        self.count(|o| {
            matches!(o, Outcome::SkippedUnchanged | Outcome::SkippedNotCombinable)
        })
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(Outcome::is_failure)
    }

    /// Bytes written for uploaded assets, companions not included
    #[must_use]
    pub fn uploaded_bytes(&self) -> u64 {
        self.outcomes
            .iter()
            .filter(|o| o.outcome == Outcome::Uploaded)
            .filter_map(|o| o.size)
            .sum()
    }

    /// Failed assets with their reasons
    pub fn failures(&self) -> impl Iterator<Item = (&str, &str)> {
        self.outcomes.iter().filter_map(|o| match &o.outcome {
            Outcome::Failed { reason } => Some((o.remote_path.as_str(), reason.as_str())),
            _ => None,
        })
    }

    /// Outcome recorded for a remote path
    #[must_use]
    pub fn get(&self, remote_path: &str) -> Option<&Outcome> {
        self.outcomes
            .iter()
            .find(|o| o.remote_path == remote_path)
            .map(|o| &o.outcome)
    }

    /// No asset failed and the session closed cleanly
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed() == 0 && self.close_error.is_none()
    }
}
