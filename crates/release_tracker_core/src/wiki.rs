use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{TrackerError, TrackerResult};
use crate::http::{HttpSettings, send_with_retry};

const SERVICE: &str = "confluence";
const VERSION_MESSAGE: &str = "Automated release table update";

/// Current page body plus the revision token needed to update it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSnapshot {
    pub title: String,
    pub content: String,
    pub revision: u64,
}

/// Page storage with optimistic concurrency on writes.
pub trait WikiPageApi {
    fn fetch_page(&mut self, page_id: &str) -> TrackerResult<PageSnapshot>;

    /// Replaces the full page body. Fails with [`TrackerError::SyncConflict`]
    /// when `base.revision` is no longer current. Returns the new revision.
    fn update_page(
        &mut self,
        page_id: &str,
        base: &PageSnapshot,
        content: &str,
    ) -> TrackerResult<u64>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfluenceClientConfig {
    /// Site root, e.g. `https://api.atlassian.com/ex/confluence/<cloud-id>`.
    pub base_url: String,
    pub email: String,
    pub api_token: String,
    pub http: HttpSettings,
}

/// Confluence Cloud REST v2 pages client.
pub struct ConfluenceClient {
    client: Client,
    config: ConfluenceClientConfig,
}

impl ConfluenceClient {
    pub fn new(config: ConfluenceClientConfig) -> TrackerResult<Self> {
        let client = config
            .http
            .build_client()
            .map_err(|error| TrackerError::Wiki(format!("failed to build HTTP client: {error}")))?;
        Ok(Self { client, config })
    }

    fn page_url(&self, page_id: &str) -> String {
        format!(
            "{}/wiki/api/v2/pages/{}",
            self.config.base_url.trim_end_matches('/'),
            page_id
        )
    }

    fn check_status(&self, page_id: &str, response: Response) -> TrackerResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().unwrap_or_default();
        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                TrackerError::auth(SERVICE, format!("HTTP {status}: {}", truncate(&body)))
            }
            StatusCode::NOT_FOUND => TrackerError::PageNotFound(page_id.to_string()),
            _ => TrackerError::Wiki(format!("HTTP {status}: {}", truncate(&body))),
        })
    }
}

impl WikiPageApi for ConfluenceClient {
    fn fetch_page(&mut self, page_id: &str) -> TrackerResult<PageSnapshot> {
        let url = self.page_url(page_id);
        debug!(%url, "fetching page");
        let response = send_with_retry(&self.config.http, self.config.http.max_retries, || {
            self.client
                .get(&url)
                .basic_auth(&self.config.email, Some(&self.config.api_token))
                .query(&[("body-format", "storage")])
        })
        .map_err(|error| TrackerError::Wiki(format!("failed to call Confluence: {error}")))?;

        let payload: PagePayload = self
            .check_status(page_id, response)?
            .json()
            .map_err(|error| TrackerError::Wiki(format!("failed to decode page: {error}")))?;
        Ok(payload.into_snapshot())
    }

    fn update_page(
        &mut self,
        page_id: &str,
        base: &PageSnapshot,
        content: &str,
    ) -> TrackerResult<u64> {
        let url = self.page_url(page_id);
        let request = UpdateRequest {
            id: page_id,
            status: "current",
            title: &base.title,
            body: UpdateBody {
                representation: "storage",
                value: content,
            },
            version: UpdateVersion {
                number: base.revision + 1,
                message: VERSION_MESSAGE,
            },
        };
        let response =
            send_with_retry(&self.config.http, self.config.http.max_write_retries, || {
                self.client
                    .put(&url)
                    .basic_auth(&self.config.email, Some(&self.config.api_token))
                    .json(&request)
            })
            .map_err(|error| TrackerError::Wiki(format!("failed to call Confluence: {error}")))?;

        if response.status() == StatusCode::CONFLICT {
            return Err(TrackerError::SyncConflict {
                page_id: page_id.to_string(),
                revision: base.revision,
            });
        }
        let payload: PagePayload = self
            .check_status(page_id, response)?
            .json()
            .map_err(|error| TrackerError::Wiki(format!("failed to decode update: {error}")))?;
        Ok(payload
            .version
            .map(|version| version.number)
            .unwrap_or(base.revision + 1))
    }
}

fn truncate(body: &str) -> String {
    const LIMIT: usize = 200;
    match body.char_indices().nth(LIMIT) {
        Some((index, _)) => format!("{}…", &body[..index]),
        None => body.to_string(),
    }
}

#[derive(Debug, Deserialize, Default)]
struct PagePayload {
    #[serde(default)]
    title: String,
    version: Option<VersionPayload>,
    #[serde(default)]
    body: BodyPayload,
}

impl PagePayload {
    fn into_snapshot(self) -> PageSnapshot {
        PageSnapshot {
            title: self.title,
            content: self.body.storage.map(|storage| storage.value).unwrap_or_default(),
            revision: self.version.map(|version| version.number).unwrap_or(1),
        }
    }
}

#[derive(Debug, Deserialize)]
struct VersionPayload {
    number: u64,
}

#[derive(Debug, Deserialize, Default)]
struct BodyPayload {
    storage: Option<StoragePayload>,
}

#[derive(Debug, Deserialize)]
struct StoragePayload {
    #[serde(default)]
    value: String,
}

#[derive(Debug, Serialize)]
struct UpdateRequest<'a> {
    id: &'a str,
    status: &'a str,
    title: &'a str,
    body: UpdateBody<'a>,
    version: UpdateVersion<'a>,
}

#[derive(Debug, Serialize)]
struct UpdateBody<'a> {
    representation: &'a str,
    value: &'a str,
}

#[derive(Debug, Serialize)]
struct UpdateVersion<'a> {
    number: u64,
    message: &'a str,
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use super::{PagePayload, PageSnapshot, UpdateBody, UpdateRequest, UpdateVersion, WikiPageApi};
    use crate::error::{TrackerError, TrackerResult};

    /// In-memory page store with the same concurrency rules as the real service.
    #[derive(Default)]
    pub(crate) struct MemoryWiki {
        pub pages: BTreeMap<String, PageSnapshot>,
        pub writes: usize,
        pub fetches: usize,
        /// Applied as a competing edit right before the next write lands.
        pub concurrent_edit_before_write: Option<String>,
        pub reject_credentials: bool,
        /// Server-side normalization applied to every saved body.
        pub rewrite_on_save: Option<fn(&str) -> String>,
    }

    /// Mimics Confluence re-serializing storage XHTML: macros and tables gain ids on save.
    pub(crate) fn confluence_save(content: &str) -> String {
        content
            .replace(
                r#"<ac:structured-macro ac:name="anchor">"#,
                r#"<ac:structured-macro ac:name="anchor" ac:schema-version="1" ac:macro-id="9b1e0c4a">"#,
            )
            .replace("<table>", r#"<table data-layout="default" ac:local-id="4f2c7d10">"#)
    }

    impl MemoryWiki {
        pub fn with_page(page_id: &str, title: &str, content: &str) -> Self {
            let mut wiki = Self::default();
            wiki.pages.insert(
                page_id.to_string(),
                PageSnapshot {
                    title: title.to_string(),
                    content: content.to_string(),
                    revision: 1,
                },
            );
            wiki
        }

        pub fn page(&self, page_id: &str) -> &PageSnapshot {
            self.pages.get(page_id).expect("page exists")
        }
    }

    impl WikiPageApi for MemoryWiki {
        fn fetch_page(&mut self, page_id: &str) -> TrackerResult<PageSnapshot> {
            self.fetches += 1;
            if self.reject_credentials {
                return Err(TrackerError::auth("confluence", "HTTP 401"));
            }
            self.pages
                .get(page_id)
                .cloned()
                .ok_or_else(|| TrackerError::PageNotFound(page_id.to_string()))
        }

        fn update_page(
            &mut self,
            page_id: &str,
            base: &PageSnapshot,
            content: &str,
        ) -> TrackerResult<u64> {
            let competing = self.concurrent_edit_before_write.take();
            let page = self
                .pages
                .get_mut(page_id)
                .ok_or_else(|| TrackerError::PageNotFound(page_id.to_string()))?;
            if let Some(edit) = competing {
                page.content = edit;
                page.revision += 1;
            }
            if page.revision != base.revision {
                return Err(TrackerError::SyncConflict {
                    page_id: page_id.to_string(),
                    revision: base.revision,
                });
            }
            page.content = match self.rewrite_on_save {
                Some(rewrite) => rewrite(content),
                None => content.to_string(),
            };
            page.revision += 1;
            self.writes += 1;
            Ok(page.revision)
        }
    }

    #[test]
    fn decodes_v2_page_payload() {
        let payload: PagePayload = serde_json::from_value(json!({
            "id": "123",
            "status": "current",
            "title": "NPC Releases",
            "version": { "number": 14, "message": "" },
            "body": { "storage": { "representation": "storage", "value": "<p>hi</p>" } }
        }))
        .expect("decode");
        let snapshot = payload.into_snapshot();
        assert_eq!(snapshot.title, "NPC Releases");
        assert_eq!(snapshot.content, "<p>hi</p>");
        assert_eq!(snapshot.revision, 14);
    }

    #[test]
    fn missing_body_decodes_as_empty_content() {
        let payload: PagePayload =
            serde_json::from_value(json!({ "title": "Empty", "version": { "number": 3 } }))
                .expect("decode");
        let snapshot = payload.into_snapshot();
        assert_eq!(snapshot.content, "");
        assert_eq!(snapshot.revision, 3);
    }

    #[test]
    fn update_request_bumps_version() {
        let request = UpdateRequest {
            id: "123",
            status: "current",
            title: "NPC Releases",
            body: UpdateBody {
                representation: "storage",
                value: "<p>new</p>",
            },
            version: UpdateVersion {
                number: 15,
                message: "m",
            },
        };
        let value = serde_json::to_value(&request).expect("encode");
        assert_eq!(value["version"]["number"], 15);
        assert_eq!(value["body"]["representation"], "storage");
        assert_eq!(value["title"], "NPC Releases");
    }
}
