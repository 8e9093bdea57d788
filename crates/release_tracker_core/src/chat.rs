use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::debug;

use crate::error::{TrackerError, TrackerResult};
use crate::http::{HttpSettings, send_with_retry};
use crate::model::RawMessage;

pub const DEFAULT_SLACK_API_URL: &str = "https://slack.com/api";

const SERVICE: &str = "slack";
const PAGE_LIMIT: &str = "200";
const AUTH_ERRORS: &[&str] = &[
    "invalid_auth",
    "not_authed",
    "account_inactive",
    "token_revoked",
    "token_expired",
    "missing_scope",
    "not_in_channel",
];
const SKIPPED_SUBTYPES: &[&str] = &["channel_join", "channel_leave", "message_deleted"];

/// Source of channel history.
pub trait ChatHistoryApi {
    /// Messages posted in `[oldest, latest]`, oldest first. Any failure is terminal.
    fn history(
        &mut self,
        channel_id: &str,
        oldest: DateTime<Utc>,
        latest: DateTime<Utc>,
    ) -> TrackerResult<Vec<RawMessage>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlackClientConfig {
    pub api_url: String,
    pub token: String,
    pub http: HttpSettings,
}

/// `conversations.history` client following cursor pagination.
pub struct SlackClient {
    client: Client,
    config: SlackClientConfig,
    request_count: usize,
}

impl SlackClient {
    pub fn new(config: SlackClientConfig) -> TrackerResult<Self> {
        let client = config.http.build_client().map_err(|error| {
            TrackerError::Retrieval(format!("failed to build HTTP client: {error}"))
        })?;
        Ok(Self {
            client,
            config,
            request_count: 0,
        })
    }

    pub fn request_count(&self) -> usize {
        self.request_count
    }

    fn fetch_page(
        &mut self,
        params: &[(&str, String)],
    ) -> TrackerResult<HistoryResponse> {
        let url = format!(
            "{}/conversations.history",
            self.config.api_url.trim_end_matches('/')
        );
        self.request_count += 1;
        let response = send_with_retry(&self.config.http, self.config.http.max_retries, || {
            self.client
                .get(&url)
                .bearer_auth(&self.config.token)
                .query(params)
        })
        .map_err(|error| TrackerError::Retrieval(format!("failed to call Slack: {error}")))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(TrackerError::Retrieval(
                "Slack rate limit persisted after retries".to_string(),
            ));
        }
        if !status.is_success() {
            return Err(TrackerError::Retrieval(format!(
                "Slack request failed with HTTP {status}"
            )));
        }
        let payload: HistoryResponse = response.json().map_err(|error| {
            TrackerError::Retrieval(format!("failed to decode Slack response: {error}"))
        })?;
        check_payload(payload)
    }
}

impl ChatHistoryApi for SlackClient {
    fn history(
        &mut self,
        channel_id: &str,
        oldest: DateTime<Utc>,
        latest: DateTime<Utc>,
    ) -> TrackerResult<Vec<RawMessage>> {
        let mut messages = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut params = vec![
                ("channel", channel_id.to_string()),
                ("oldest", format_ts(oldest)),
                ("latest", format_ts(latest)),
                ("inclusive", "true".to_string()),
                ("limit", PAGE_LIMIT.to_string()),
            ];
            if let Some(cursor) = &cursor {
                params.push(("cursor", cursor.clone()));
            }

            let page = self.fetch_page(&params)?;
            debug!(count = page.messages.len(), "fetched history page");
            for item in page.messages {
                if let Some(message) = item.into_raw()? {
                    messages.push(message);
                }
            }

            cursor = page
                .response_metadata
                .and_then(|metadata| metadata.next_cursor)
                .filter(|next| !next.is_empty());
            if cursor.is_none() {
                break;
            }
        }

        messages.sort_by_key(|message| message.timestamp);
        Ok(messages)
    }
}

fn check_payload(payload: HistoryResponse) -> TrackerResult<HistoryResponse> {
    if payload.ok {
        return Ok(payload);
    }
    let code = payload
        .error
        .clone()
        .unwrap_or_else(|| "unknown_error".to_string());
    if AUTH_ERRORS.contains(&code.as_str()) {
        return Err(TrackerError::auth(SERVICE, code));
    }
    Err(TrackerError::Retrieval(format!("Slack API error: {code}")))
}

/// Slack timestamps are Unix seconds with a microsecond fraction, e.g. `1697040000.000100`.
pub fn parse_ts(ts: &str) -> Option<DateTime<Utc>> {
    let (seconds, fraction) = ts.split_once('.').unwrap_or((ts, ""));
    let seconds = seconds.parse::<i64>().ok()?;
    if fraction.len() > 9 || !fraction.chars().all(|ch| ch.is_ascii_digit()) {
        return None;
    }
    let nanos = if fraction.is_empty() {
        0
    } else {
        format!("{fraction:0<9}").parse::<u32>().ok()?
    };
    DateTime::from_timestamp(seconds, nanos)
}

fn format_ts(instant: DateTime<Utc>) -> String {
    format!(
        "{}.{:06}",
        instant.timestamp(),
        instant.timestamp_subsec_micros()
    )
}

#[derive(Debug, Deserialize, Default)]
struct HistoryResponse {
    #[serde(default)]
    ok: bool,
    error: Option<String>,
    #[serde(default)]
    messages: Vec<SlackMessage>,
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Deserialize, Default)]
struct ResponseMetadata {
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SlackMessage {
    ts: String,
    user: Option<String>,
    username: Option<String>,
    bot_id: Option<String>,
    subtype: Option<String>,
    #[serde(default)]
    text: String,
}

impl SlackMessage {
    fn into_raw(self) -> TrackerResult<Option<RawMessage>> {
        if self
            .subtype
            .as_deref()
            .is_some_and(|subtype| SKIPPED_SUBTYPES.contains(&subtype))
        {
            return Ok(None);
        }
        let timestamp = parse_ts(&self.ts).ok_or_else(|| {
            TrackerError::Retrieval(format!("invalid Slack message timestamp: {}", self.ts))
        })?;
        let author = self
            .user
            .or(self.username)
            .or(self.bot_id)
            .unwrap_or_else(|| "unknown".to_string());
        Ok(Some(RawMessage {
            id: Some(self.ts),
            author,
            timestamp,
            text: self.text,
        }))
    }
}
