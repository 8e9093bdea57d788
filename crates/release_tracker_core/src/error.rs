use thiserror::Error;

/// Fatal conditions that abort a run before any page write.
///
/// A message that does not look like a release announcement is not an error;
/// the extractor simply yields nothing for it.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("chat history retrieval failed: {0}")]
    Retrieval(String),
    #[error("{service} rejected credentials: {detail}")]
    Auth { service: String, detail: String },
    #[error("wiki page {0} not found")]
    PageNotFound(String),
    #[error("wiki page {page_id} changed concurrently (fetched revision {revision})")]
    SyncConflict { page_id: String, revision: u64 },
    #[error("managed fragment markers are inconsistent: {0}")]
    MalformedPage(String),
    #[error("wiki request failed: {0}")]
    Wiki(String),
}

impl TrackerError {
    pub fn auth(service: &str, detail: impl Into<String>) -> Self {
        Self::Auth {
            service: service.to_string(),
            detail: detail.into(),
        }
    }

    /// True when the next scheduled run may succeed without operator action.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::SyncConflict { .. } | Self::Retrieval(_))
    }
}

pub type TrackerResult<T> = Result<T, TrackerError>;
