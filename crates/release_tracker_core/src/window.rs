use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::model::RawMessage;

pub const DEFAULT_LOOKBACK_DAYS: i64 = 7;

/// Start of the lookback window ending at `as_of`.
pub fn window_start(window: Duration, as_of: DateTime<Utc>) -> DateTime<Utc> {
    as_of - window
}

/// Keeps messages with `as_of - window <= timestamp <= as_of`, in delivery order.
///
/// When the same message id is delivered more than once (an edit re-delivered by
/// the chat service), only the last delivered copy survives.
pub fn filter_window(
    messages: &[RawMessage],
    window: Duration,
    as_of: DateTime<Utc>,
) -> Vec<RawMessage> {
    let start = window_start(window, as_of);
    let in_window = messages
        .iter()
        .filter(|message| message.timestamp >= start && message.timestamp <= as_of)
        .collect::<Vec<_>>();

    let mut last_index_by_id = HashMap::new();
    for (index, message) in in_window.iter().enumerate() {
        if let Some(id) = &message.id {
            last_index_by_id.insert(id.as_str(), index);
        }
    }

    in_window
        .iter()
        .enumerate()
        .filter(|(index, message)| match &message.id {
            Some(id) => last_index_by_id.get(id.as_str()) == Some(index),
            None => true,
        })
        .map(|(_, message)| (*message).clone())
        .collect()
}
