pub mod chat;
pub mod config;
pub mod error;
pub mod extract;
pub mod http;
pub mod merge;
pub mod model;
pub mod pipeline;
pub mod render;
pub mod sync;
pub mod wiki;
pub mod window;

pub use error::{TrackerError, TrackerResult};
pub use model::{CanonicalReleaseSet, PageFragment, RawMessage, ReleaseRecord, ReleaseStatus};
