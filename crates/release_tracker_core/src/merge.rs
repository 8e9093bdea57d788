use std::cmp::Ordering;
use std::collections::btree_map::Entry;

use serde::{Deserialize, Serialize};

use crate::model::{CanonicalReleaseSet, ReleaseRecord};

/// How to pick one record when several announce the same (application, version).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// More present optional fields first, then the later announcement.
    #[default]
    MostComplete,
    /// Always the later announcement.
    MostRecent,
}

impl MergePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MostComplete => "most_complete",
            Self::MostRecent => "most_recent",
        }
    }

    /// `Greater` when `candidate` should replace `current`.
    fn compare(self, candidate: &ReleaseRecord, current: &ReleaseRecord) -> Ordering {
        let by_time = candidate.announced_at.cmp(&current.announced_at);
        match self {
            Self::MostComplete => candidate
                .completeness()
                .cmp(&current.completeness())
                .then(by_time),
            Self::MostRecent => by_time,
        }
    }
}

/// Collapses records sharing a key into one canonical record per key.
///
/// On a full tie the record later in input order wins, so chronological input
/// resolves equal candidates in favor of the newest message.
pub fn merge<I>(records: I, policy: MergePolicy) -> CanonicalReleaseSet
where
    I: IntoIterator<Item = ReleaseRecord>,
{
    let mut canonical = CanonicalReleaseSet::new();
    for record in records {
        match canonical.entry(record.key()) {
            Entry::Vacant(slot) => {
                slot.insert(record);
            }
            Entry::Occupied(mut slot) => {
                if policy.compare(&record, slot.get()) != Ordering::Less {
                    slot.insert(record);
                }
            }
        }
    }
    canonical
}
