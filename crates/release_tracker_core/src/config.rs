use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::chat::{DEFAULT_SLACK_API_URL, SlackClientConfig};
use crate::http::HttpSettings;
use crate::merge::MergePolicy;
use crate::render::TableFormat;
use crate::sync::{FragmentMarkers, is_valid_marker_name};
use crate::wiki::ConfluenceClientConfig;
use crate::window::DEFAULT_LOOKBACK_DAYS;

pub const DEFAULT_CONFIG_FILENAME: &str = "release-tracker.toml";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct TrackerConfig {
    #[serde(default)]
    pub tracker: TrackerSection,
    #[serde(default)]
    pub slack: SlackSection,
    #[serde(default)]
    pub confluence: ConfluenceSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct TrackerSection {
    pub lookback_days: Option<i64>,
    #[serde(default)]
    pub known_applications: Vec<String>,
    pub merge_policy: Option<MergePolicy>,
    pub table_format: Option<TableFormat>,
    pub begin_marker: Option<String>,
    pub end_marker: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SlackSection {
    pub channel_id: Option<String>,
    pub api_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ConfluenceSection {
    pub base_url: Option<String>,
    pub page_id: Option<String>,
    pub email: Option<String>,
}

impl TrackerConfig {
    /// Lookback window: env TRACKER_LOOKBACK_DAYS > config > 7 days.
    pub fn lookback_window(&self) -> Result<Duration> {
        let days = match env_trimmed("TRACKER_LOOKBACK_DAYS") {
            Some(value) => value
                .parse::<i64>()
                .with_context(|| format!("invalid TRACKER_LOOKBACK_DAYS: {value}"))?,
            None => self.tracker.lookback_days.unwrap_or(DEFAULT_LOOKBACK_DAYS),
        };
        if days <= 0 {
            bail!("lookback window must be at least one day, got {days}");
        }
        Duration::try_days(days).with_context(|| format!("lookback window too large: {days} days"))
    }

    /// Evaluation instant: env TRACKER_AS_OF (RFC 3339) > now.
    pub fn as_of(&self) -> Result<DateTime<Utc>> {
        match env_trimmed("TRACKER_AS_OF") {
            Some(value) => parse_as_of(&value),
            None => Ok(Utc::now()),
        }
    }

    pub fn merge_policy(&self) -> MergePolicy {
        self.tracker.merge_policy.unwrap_or_default()
    }

    pub fn table_format(&self) -> TableFormat {
        self.tracker.table_format.unwrap_or_default()
    }

    /// Marker names from config; the embedding style follows the table format.
    pub fn markers(&self) -> Result<FragmentMarkers> {
        let defaults = FragmentMarkers::for_format(self.table_format());
        let markers = FragmentMarkers {
            begin: self.tracker.begin_marker.clone().unwrap_or(defaults.begin),
            end: self.tracker.end_marker.clone().unwrap_or(defaults.end),
            style: defaults.style,
        };
        for name in [&markers.begin, &markers.end] {
            if !is_valid_marker_name(name) {
                bail!("invalid fragment marker name {name:?}: use letters, digits, ':', '-', '_' or '.'");
            }
        }
        if markers.begin == markers.end {
            bail!("begin and end markers must differ");
        }
        Ok(markers)
    }

    /// Channel id: env SLACK_CHANNEL_ID > config.
    pub fn channel_id(&self) -> Option<String> {
        env_trimmed("SLACK_CHANNEL_ID").or_else(|| self.slack.channel_id.clone())
    }

    /// Page id: env CONFLUENCE_PAGE_ID > config.
    pub fn page_id(&self) -> Option<String> {
        env_trimmed("CONFLUENCE_PAGE_ID").or_else(|| self.confluence.page_id.clone())
    }

    pub fn slack_api_url(&self) -> String {
        env_trimmed("SLACK_API_URL")
            .or_else(|| self.slack.api_url.clone())
            .unwrap_or_else(|| DEFAULT_SLACK_API_URL.to_string())
    }

    /// Confluence site root: env CONFLUENCE_BASE_URL > config > derived from ATLASSIAN_CLOUD_ID.
    pub fn confluence_base_url(&self) -> Option<String> {
        env_trimmed("CONFLUENCE_BASE_URL")
            .or_else(|| self.confluence.base_url.clone())
            .or_else(|| env_trimmed("ATLASSIAN_CLOUD_ID").map(|id| cloud_base_url(&id)))
    }

    pub fn confluence_email(&self) -> Option<String> {
        env_trimmed("ATLASSIAN_EMAIL").or_else(|| self.confluence.email.clone())
    }

    pub fn slack_client_config(&self) -> Result<SlackClientConfig> {
        let token = env_trimmed("SLACK_TOKEN")
            .ok_or_else(|| anyhow::anyhow!("SLACK_TOKEN is required"))?;
        Ok(SlackClientConfig {
            api_url: self.slack_api_url(),
            token,
            http: HttpSettings::from_env(),
        })
    }

    pub fn confluence_client_config(&self) -> Result<ConfluenceClientConfig> {
        let base_url = self.confluence_base_url().ok_or_else(|| {
            anyhow::anyhow!("Confluence base URL is required (CONFLUENCE_BASE_URL or ATLASSIAN_CLOUD_ID)")
        })?;
        let email = self
            .confluence_email()
            .ok_or_else(|| anyhow::anyhow!("ATLASSIAN_EMAIL is required"))?;
        let api_token = env_trimmed("ATLASSIAN_API_TOKEN")
            .ok_or_else(|| anyhow::anyhow!("ATLASSIAN_API_TOKEN is required"))?;
        Ok(ConfluenceClientConfig {
            base_url,
            email,
            api_token,
            http: HttpSettings::from_env(),
        })
    }
}

/// Load and parse a TrackerConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<TrackerConfig> {
    if !config_path.exists() {
        return Ok(TrackerConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: TrackerConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

pub fn parse_as_of(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|instant| instant.with_timezone(&Utc))
        .with_context(|| format!("invalid RFC 3339 instant: {value}"))
}

pub fn cloud_base_url(cloud_id: &str) -> String {
    format!("https://api.atlassian.com/ex/confluence/{}", cloud_id.trim())
}

fn env_trimmed(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
