use regex::Regex;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{TrackerError, TrackerResult};
use crate::model::PageFragment;
use crate::render::{TableFormat, fingerprint};
use crate::wiki::WikiPageApi;

pub const DEFAULT_BEGIN_MARKER: &str = "release-tracker:begin";
pub const DEFAULT_END_MARKER: &str = "release-tracker:end";

/// How marker names are embedded in the page body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerStyle {
    /// `<!-- name -->`, for markdown pages.
    Comment,
    /// Confluence anchor macros. Storage format keeps them on save; comments may be dropped.
    Anchor,
}

impl MarkerStyle {
    pub fn for_format(format: TableFormat) -> Self {
        match format {
            TableFormat::Markdown => Self::Comment,
            TableFormat::Storage => Self::Anchor,
        }
    }

    fn wrap(self, name: &str) -> String {
        match self {
            Self::Comment => format!("<!-- {name} -->"),
            Self::Anchor => format!(
                r#"<ac:structured-macro ac:name="anchor"><ac:parameter ac:name="">{name}</ac:parameter></ac:structured-macro>"#
            ),
        }
    }

    /// Matches a wrapped `name`, optionally suffixed with `:<fingerprint>`.
    ///
    /// Attributes the server adds on save (`ac:macro-id`, `ac:schema-version`)
    /// and whitespace changes inside the marker are tolerated.
    fn pattern(self, name: &str) -> Regex {
        let name = regex::escape(name);
        let pattern = match self {
            Self::Comment => format!(r"<!--\s*{name}(?::([0-9a-f]+))?\s*-->"),
            Self::Anchor => format!(
                r#"<ac:structured-macro\b[^>]*\bac:name="anchor"[^>]*>\s*<ac:parameter\b[^>]*>\s*{name}(?::([0-9a-f]+))?\s*</ac:parameter>\s*</ac:structured-macro>"#
            ),
        };
        Regex::new(&pattern).expect("escaped marker pattern")
    }
}

/// Names and embedding style of the markers around the region this tool owns.
///
/// The begin marker also records the fingerprint of the fragment last written,
/// so a page the server has reformatted is still recognized as up to date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentMarkers {
    pub begin: String,
    pub end: String,
    pub style: MarkerStyle,
}

impl FragmentMarkers {
    pub fn for_format(format: TableFormat) -> Self {
        Self {
            begin: DEFAULT_BEGIN_MARKER.to_string(),
            end: DEFAULT_END_MARKER.to_string(),
            style: MarkerStyle::for_format(format),
        }
    }

    fn region(&self, fragment: &PageFragment) -> String {
        let begin = format!("{}:{}", self.begin, fingerprint(fragment));
        format!(
            "{}\n{}\n{}",
            self.style.wrap(&begin),
            fragment.as_str(),
            self.style.wrap(&self.end)
        )
    }
}

impl Default for FragmentMarkers {
    fn default() -> Self {
        Self::for_format(TableFormat::default())
    }
}

/// Marker names end up inside XML and HTML comments, so they stay plain.
pub fn is_valid_marker_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, ':' | '-' | '_' | '.'))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    pub updated: bool,
    pub revision: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ManagedRegion {
    start: usize,
    end: usize,
    fingerprint: Option<String>,
}

fn locate_region(content: &str, markers: &FragmentMarkers) -> TrackerResult<Option<ManagedRegion>> {
    let begin_re = markers.style.pattern(&markers.begin);
    let end_re = markers.style.pattern(&markers.end);

    let Some(begin) = begin_re.captures(content) else {
        if end_re.is_match(content) {
            return Err(TrackerError::MalformedPage(format!(
                "end marker `{}` appears without a begin marker",
                markers.end
            )));
        }
        return Ok(None);
    };
    let begin_match = begin.get_match();
    let end_match = end_re
        .find_at(content, begin_match.end())
        .ok_or_else(|| {
            TrackerError::MalformedPage(format!(
                "begin marker `{}` has no matching end marker",
                markers.begin
            ))
        })?;
    Ok(Some(ManagedRegion {
        start: begin_match.start(),
        end: end_match.end(),
        fingerprint: begin.get(1).map(|found| found.as_str().to_string()),
    }))
}

/// Replaces the managed region of `content` with `fragment`.
///
/// Everything outside the markers is returned verbatim. A page without markers
/// gets the marked region appended.
pub fn splice_fragment(
    content: &str,
    fragment: &PageFragment,
    markers: &FragmentMarkers,
) -> TrackerResult<String> {
    let region = markers.region(fragment);
    match locate_region(content, markers)? {
        Some(existing) => Ok(format!(
            "{}{region}{}",
            &content[..existing.start],
            &content[existing.end..]
        )),
        None => {
            if content.trim().is_empty() {
                return Ok(region);
            }
            let separator = if content.ends_with("\n\n") {
                ""
            } else if content.ends_with('\n') {
                "\n"
            } else {
                "\n\n"
            };
            Ok(format!("{content}{separator}{region}"))
        }
    }
}

/// New page content, or `None` when the managed region already holds `fragment`.
///
/// Up-to-date is decided by the fingerprint stored in the begin marker, not by
/// comparing bodies, since the server may reformat the stored markup.
pub fn plan_update(
    content: &str,
    fragment: &PageFragment,
    markers: &FragmentMarkers,
) -> TrackerResult<Option<String>> {
    let current = locate_region(content, markers)?;
    if current
        .as_ref()
        .and_then(|region| region.fingerprint.as_deref())
        .is_some_and(|stored| stored == fingerprint(fragment))
    {
        return Ok(None);
    }
    let next = splice_fragment(content, fragment, markers)?;
    Ok((next != content).then_some(next))
}

/// Writes `fragment` into the managed region of the page, skipping no-op writes.
///
/// A stale revision surfaces as [`TrackerError::SyncConflict`]; the caller is
/// expected to give up and let the next scheduled run start from a fresh fetch.
pub fn sync_page<A: WikiPageApi + ?Sized>(
    api: &mut A,
    page_id: &str,
    fragment: &PageFragment,
    markers: &FragmentMarkers,
) -> TrackerResult<SyncOutcome> {
    let snapshot = api.fetch_page(page_id)?;
    let Some(next) = plan_update(&snapshot.content, fragment, markers)? else {
        info!(page_id, revision = snapshot.revision, "page already up to date");
        return Ok(SyncOutcome {
            updated: false,
            revision: snapshot.revision,
        });
    };

    match api.update_page(page_id, &snapshot, &next) {
        Ok(revision) => {
            info!(page_id, from = snapshot.revision, to = revision, "page updated");
            Ok(SyncOutcome {
                updated: true,
                revision,
            })
        }
        Err(error) => {
            if let TrackerError::SyncConflict { .. } = &error {
                warn!(page_id, revision = snapshot.revision, "page edited concurrently");
            }
            Err(error)
        }
    }
}
