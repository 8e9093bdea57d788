use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One chat message as delivered by the history collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Stable message id (Slack `ts`). Re-delivered edits share it.
    pub id: Option<String>,
    pub author: String,
    pub timestamp: DateTime<Utc>,
    pub text: String,
}

impl RawMessage {
    pub fn new(author: &str, timestamp: DateTime<Utc>, text: &str) -> Self {
        Self {
            id: None,
            author: author.to_string(),
            timestamp,
            text: text.to_string(),
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseStatus {
    Production,
    Testing,
    RolledBack,
    Unknown,
}

impl ReleaseStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Production => "Production",
            Self::Testing => "Testing",
            Self::RolledBack => "Rolled back",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Natural identity of a release: two records with equal keys describe the same event.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ReleaseKey {
    pub application: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseRecord {
    pub application: String,
    pub version: String,
    pub build: Option<String>,
    pub publish_date: NaiveDate,
    pub rollout_percent: Option<u8>,
    pub status: ReleaseStatus,
    /// Timestamp of the announcing message; drives merge tie-breaks only.
    pub announced_at: DateTime<Utc>,
}

impl ReleaseRecord {
    pub fn key(&self) -> ReleaseKey {
        ReleaseKey {
            application: self.application.clone(),
            version: self.version.clone(),
        }
    }

    /// Number of optional fields carrying a value.
    pub fn completeness(&self) -> usize {
        usize::from(self.build.is_some())
            + usize::from(self.rollout_percent.is_some())
            + usize::from(self.status != ReleaseStatus::Unknown)
    }
}

/// Deduplicated records keyed by (application, version).
pub type CanonicalReleaseSet = BTreeMap<ReleaseKey, ReleaseRecord>;

/// Rendered managed fragment. Equal inputs always produce equal text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageFragment(String);

impl PageFragment {
    pub fn new(text: String) -> Self {
        Self(text)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PageFragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
