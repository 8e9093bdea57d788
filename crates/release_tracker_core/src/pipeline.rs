use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use similar::TextDiff;
use tracing::{debug, info};

use crate::chat::ChatHistoryApi;
use crate::error::TrackerResult;
use crate::extract::RecordExtractor;
use crate::merge::{MergePolicy, merge};
use crate::model::{CanonicalReleaseSet, PageFragment, RawMessage, ReleaseRecord};
use crate::render::{TableFormat, fingerprint, render, sorted_records};
use crate::sync::{FragmentMarkers, plan_update, sync_page};
use crate::wiki::WikiPageApi;
use crate::window::{filter_window, window_start};

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub channel_id: String,
    pub page_id: String,
    pub window: Duration,
    pub as_of: DateTime<Utc>,
    pub merge_policy: MergePolicy,
    pub table_format: TableFormat,
    pub markers: FragmentMarkers,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub fetched_messages: usize,
    pub window_messages: usize,
    pub extracted_records: usize,
    pub records: Vec<ReleaseRecord>,
    #[serde(skip)]
    pub fragment: PageFragment,
    pub fragment_hash: String,
    pub dry_run: bool,
    pub updated: bool,
    /// Revision after the run; the fetched revision for no-ops and dry runs.
    pub revision: Option<u64>,
    /// Current and proposed page bodies, only captured on dry runs.
    #[serde(skip)]
    pub preview: Option<PagePreview>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagePreview {
    pub current: String,
    pub proposed: String,
}

impl PagePreview {
    pub fn has_changes(&self) -> bool {
        self.current != self.proposed
    }

    pub fn unified_diff(&self) -> String {
        TextDiff::from_lines(&self.current, &self.proposed)
            .unified_diff()
            .context_radius(2)
            .header("current", "proposed")
            .to_string()
    }
}

/// Extracts and merges releases from already-windowed messages.
pub fn collect_releases(
    extractor: &RecordExtractor,
    messages: &[RawMessage],
    policy: MergePolicy,
) -> (usize, CanonicalReleaseSet) {
    let mut extracted = Vec::new();
    for message in messages {
        match extractor.extract(message) {
            Some(record) => extracted.push(record),
            None => debug!(author = %message.author, "message is not a release announcement"),
        }
    }
    let count = extracted.len();
    (count, merge(extracted, policy))
}

/// Fetch → window → extract → merge → render → sync. Any error aborts before a write.
pub fn run_pipeline<C, W>(
    chat: &mut C,
    wiki: &mut W,
    extractor: &RecordExtractor,
    options: &RunOptions,
) -> TrackerResult<RunReport>
where
    C: ChatHistoryApi + ?Sized,
    W: WikiPageApi + ?Sized,
{
    let oldest = window_start(options.window, options.as_of);
    let fetched = chat.history(&options.channel_id, oldest, options.as_of)?;
    info!(count = fetched.len(), channel = %options.channel_id, "fetched chat history");

    let windowed = filter_window(&fetched, options.window, options.as_of);
    let (extracted_records, canonical) =
        collect_releases(extractor, &windowed, options.merge_policy);
    info!(
        in_window = windowed.len(),
        extracted = extracted_records,
        releases = canonical.len(),
        "extracted releases"
    );

    let fragment = render(&canonical, options.table_format);
    let records = sorted_records(&canonical).into_iter().cloned().collect();

    let mut report = RunReport {
        fetched_messages: fetched.len(),
        window_messages: windowed.len(),
        extracted_records,
        records,
        fragment_hash: fingerprint(&fragment),
        fragment,
        dry_run: options.dry_run,
        updated: false,
        revision: None,
        preview: None,
    };

    if options.dry_run {
        let snapshot = wiki.fetch_page(&options.page_id)?;
        let proposed = plan_update(&snapshot.content, &report.fragment, &options.markers)?
            .unwrap_or_else(|| snapshot.content.clone());
        info!(page_id = %options.page_id, "dry run, page left untouched");
        report.revision = Some(snapshot.revision);
        report.preview = Some(PagePreview {
            current: snapshot.content,
            proposed,
        });
        return Ok(report);
    }

    let outcome = sync_page(wiki, &options.page_id, &report.fragment, &options.markers)?;
    report.updated = outcome.updated;
    report.revision = Some(outcome.revision);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{RunOptions, run_pipeline};
    use crate::chat::tests::MemoryChat;
    use crate::error::TrackerError;
    use crate::extract::RecordExtractor;
    use crate::merge::MergePolicy;
    use crate::model::{RawMessage, ReleaseStatus};
    use crate::render::TableFormat;
    use crate::sync::FragmentMarkers;
    use crate::wiki::tests::{MemoryWiki, confluence_save};

    fn options(dry_run: bool) -> RunOptions {
        RunOptions {
            channel_id: "C033MFEDQ2C".to_string(),
            page_id: "42".to_string(),
            window: Duration::days(7),
            as_of: Utc.with_ymd_and_hms(2026, 10, 15, 12, 0, 0).unwrap(),
            merge_policy: MergePolicy::MostComplete,
            table_format: TableFormat::Markdown,
            markers: FragmentMarkers::for_format(TableFormat::Markdown),
            dry_run,
        }
    }

    fn chat() -> MemoryChat {
        let as_of = Utc.with_ymd_and_hms(2026, 10, 15, 12, 0, 0).unwrap();
        MemoryChat {
            messages: vec![
                RawMessage::new("U1", as_of - Duration::days(10), "Old App 0.9.0 production")
                    .with_id("1"),
                RawMessage::new(
                    "U1",
                    as_of - Duration::days(2),
                    "App X shipped v1.2.0, 10% rollout, production",
                )
                .with_id("2"),
                RawMessage::new("U2", as_of - Duration::days(1), "good morning team").with_id("3"),
                RawMessage::new(
                    "U1",
                    as_of - Duration::hours(5),
                    "App X 1.2.0 rollout now 100%, production",
                )
                .with_id("4"),
            ],
            ..MemoryChat::default()
        }
    }

    #[test]
    fn run_extracts_merges_and_updates_page() {
        let mut chat = chat();
        let mut wiki = MemoryWiki::with_page("42", "Releases", "# Releases\n\nIntro text.\n");
        let extractor = RecordExtractor::default();

        let report = run_pipeline(&mut chat, &mut wiki, &extractor, &options(false)).expect("run");
        assert_eq!(report.fetched_messages, 4);
        assert_eq!(report.window_messages, 3);
        assert_eq!(report.extracted_records, 2);
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].application, "App X");
        assert_eq!(report.records[0].rollout_percent, Some(100));
        assert_eq!(report.records[0].status, ReleaseStatus::Production);
        assert!(report.updated);
        assert_eq!(report.revision, Some(2));

        let page = &wiki.page("42").content;
        assert!(page.starts_with("# Releases\n\nIntro text.\n"));
        assert!(page.contains("| App X | 1.2.0 |"));
        assert!(!page.contains("Old App"));

        let (channel, oldest, latest) = &chat.requested[0];
        assert_eq!(channel, "C033MFEDQ2C");
        assert_eq!(*latest - *oldest, Duration::days(7));
    }

    #[test]
    fn repeated_run_is_a_no_op() {
        let mut chat = chat();
        let mut wiki = MemoryWiki::with_page("42", "Releases", "intro");
        let extractor = RecordExtractor::default();

        let first = run_pipeline(&mut chat, &mut wiki, &extractor, &options(false)).expect("run");
        let second = run_pipeline(&mut chat, &mut wiki, &extractor, &options(false)).expect("run");
        assert!(first.updated);
        assert!(!second.updated);
        assert_eq!(first.fragment, second.fragment);
        assert_eq!(wiki.writes, 1);
    }

    #[test]
    fn repeated_storage_run_is_a_no_op_after_server_rewrites() {
        let mut chat = chat();
        let mut wiki = MemoryWiki::with_page("42", "Releases", "<p>Release log</p>");
        wiki.rewrite_on_save = Some(confluence_save);
        let extractor = RecordExtractor::default();
        let mut options = options(false);
        options.table_format = TableFormat::Storage;
        options.markers = FragmentMarkers::for_format(TableFormat::Storage);

        let first = run_pipeline(&mut chat, &mut wiki, &extractor, &options).expect("run");
        assert!(first.updated);
        assert!(wiki.page("42").content.contains("<td>App X</td>"));

        let second = run_pipeline(&mut chat, &mut wiki, &extractor, &options).expect("run");
        assert!(!second.updated);
        assert_eq!(second.revision, Some(2));
        assert_eq!(wiki.writes, 1);

        options.dry_run = true;
        let preview = run_pipeline(&mut chat, &mut wiki, &extractor, &options)
            .expect("dry run")
            .preview
            .expect("preview");
        assert!(!preview.has_changes());
    }

    #[test]
    fn dry_run_previews_without_writing() {
        let mut chat = chat();
        let mut wiki = MemoryWiki::with_page("42", "Releases", "intro");
        let extractor = RecordExtractor::default();

        let report = run_pipeline(&mut chat, &mut wiki, &extractor, &options(true)).expect("run");
        let preview = report.preview.expect("preview");
        assert!(preview.has_changes());
        assert!(preview.unified_diff().contains("+| App X | 1.2.0 |"));
        assert!(!report.updated);
        assert_eq!(report.revision, Some(1));
        assert_eq!(wiki.writes, 0);
        assert_eq!(wiki.page("42").content, "intro");
    }

    #[test]
    fn retrieval_failure_aborts_before_touching_the_page() {
        let mut chat = MemoryChat {
            failure: Some("ratelimited".to_string()),
            ..MemoryChat::default()
        };
        let mut wiki = MemoryWiki::with_page("42", "Releases", "intro");
        let error = run_pipeline(&mut chat, &mut wiki, &RecordExtractor::default(), &options(false))
            .expect_err("retrieval failure");
        assert!(matches!(error, TrackerError::Retrieval(_)));
        assert_eq!(wiki.fetches, 0);
        assert_eq!(wiki.writes, 0);
    }

    #[test]
    fn auth_failure_is_surfaced() {
        let mut chat = chat();
        let mut wiki = MemoryWiki::with_page("42", "Releases", "intro");
        wiki.reject_credentials = true;
        let error = run_pipeline(&mut chat, &mut wiki, &RecordExtractor::default(), &options(false))
            .expect_err("auth failure");
        assert!(matches!(error, TrackerError::Auth { .. }));
    }

    #[test]
    fn concurrent_edit_fails_the_run_without_overwrite() {
        let mut chat = chat();
        let mut wiki = MemoryWiki::with_page("42", "Releases", "intro");
        wiki.concurrent_edit_before_write = Some("human edit".to_string());
        let error = run_pipeline(&mut chat, &mut wiki, &RecordExtractor::default(), &options(false))
            .expect_err("conflict");
        assert!(matches!(error, TrackerError::SyncConflict { .. }));
        assert_eq!(wiki.page("42").content, "human edit");

        let retry = run_pipeline(&mut chat, &mut wiki, &RecordExtractor::default(), &options(false))
            .expect("next run");
        assert!(retry.updated);
        assert!(wiki.page("42").content.starts_with("human edit\n\n"));
    }
}
