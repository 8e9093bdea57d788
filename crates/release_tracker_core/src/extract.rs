use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::{Captures, Regex};

use crate::model::{RawMessage, ReleaseRecord, ReleaseStatus};

static MENTION_RE: OnceLock<Regex> = OnceLock::new();
static LABELED_LINK_RE: OnceLock<Regex> = OnceLock::new();
static BARE_LINK_RE: OnceLock<Regex> = OnceLock::new();
static VERSION_RE: OnceLock<Regex> = OnceLock::new();
static BUILD_RE: OnceLock<Regex> = OnceLock::new();
static PERCENT_RE: OnceLock<Regex> = OnceLock::new();
static DATE_RE: OnceLock<Regex> = OnceLock::new();
static ROLLED_BACK_RE: OnceLock<Regex> = OnceLock::new();
static PRODUCTION_RE: OnceLock<Regex> = OnceLock::new();
static TESTING_RE: OnceLock<Regex> = OnceLock::new();
static WORD_RE: OnceLock<Regex> = OnceLock::new();

/// Words that often sit next to an application name in announcements but are never part of it.
const FILLER_WORDS: &[&str] = &[
    "build", "hotfix", "new", "our", "release", "released", "releasing", "rollout", "the",
    "today", "update", "updated", "version", "we",
];

fn cached_regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("valid extractor regex"))
}

/// Turns free-text chat messages into release records.
///
/// Application names are matched against a known vocabulary first; without a
/// vocabulary hit the extractor falls back to the run of capitalized words
/// nearest before the version token.
#[derive(Debug, Clone, Default)]
pub struct RecordExtractor {
    vocabulary: Vec<(String, Regex)>,
}

impl RecordExtractor {
    pub fn new<I, S>(known_applications: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let vocabulary = known_applications
            .into_iter()
            .filter_map(|name| {
                let name = name.as_ref().trim();
                if name.is_empty() {
                    return None;
                }
                let pattern = format!(
                    r"(?i)(?:^|[^\p{{L}}\p{{N}}])({})(?:$|[^\p{{L}}\p{{N}}])",
                    regex::escape(name)
                );
                Regex::new(&pattern).ok().map(|re| (name.to_string(), re))
            })
            .collect();
        Self { vocabulary }
    }

    /// Returns `None` unless both an application and a version are found.
    pub fn extract(&self, message: &RawMessage) -> Option<ReleaseRecord> {
        let text = normalize_text(&message.text);
        let version = find_version(&text)?;
        let application = self
            .vocabulary_match(&text)
            .or_else(|| heuristic_application(&text, version.start, version.end))?;

        let build = version.build.clone().or_else(|| find_build(&text));
        let publish_date =
            find_date(&text).unwrap_or_else(|| message.timestamp.date_naive());

        Some(ReleaseRecord {
            application,
            version: version.number,
            build,
            publish_date,
            rollout_percent: find_rollout(&text),
            status: find_status(&text),
            announced_at: message.timestamp,
        })
    }

    fn vocabulary_match(&self, text: &str) -> Option<String> {
        self.vocabulary
            .iter()
            .filter_map(|(name, re)| {
                re.captures(text)
                    .and_then(|caps| caps.get(1))
                    .map(|found| (found.start(), std::cmp::Reverse(name.len()), name))
            })
            .min()
            .map(|(_, _, name)| name.clone())
    }
}

/// Strips Slack mrkdwn so that mentions, links and emphasis do not break word runs.
pub fn normalize_text(text: &str) -> String {
    let without_mentions = cached_regex(&MENTION_RE, r"<[@#!][^<>]*>").replace_all(text, " ");
    let with_labels =
        cached_regex(&LABELED_LINK_RE, r"<[^<>|]*\|([^<>]*)>").replace_all(&without_mentions, "$1");
    let without_links = cached_regex(&BARE_LINK_RE, r"<[^<>]*>").replace_all(&with_labels, " ");
    without_links
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .chars()
        .map(|ch| match ch {
            '*' | '_' | '~' | '`' => ' ',
            other => other,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct VersionMatch {
    number: String,
    build: Option<String>,
    start: usize,
    end: usize,
}

/// Three or more dotted segments, or two with an explicit `v` prefix (`v2.1`).
/// A bare `0.8` or `10.30` is not a version.
fn find_version(text: &str) -> Option<VersionMatch> {
    let re = cached_regex(
        &VERSION_RE,
        r"(?i)\b(?:v(\d+\.\d+(?:\.\d+)*)|(\d+\.\d+(?:\.\d+)+))(?:\+(\d+)|-b(?:uild)?\.?(\d+)|\s*\((?:build\s*#?\s*)?(\d+)\))?",
    );
    re.captures_iter(text).find_map(|caps| {
        let whole = caps.get(0)?;
        let number = caps.get(1).or_else(|| caps.get(2))?;
        if text[number.end()..].starts_with('%') {
            return None;
        }
        Some(VersionMatch {
            number: number.as_str().to_string(),
            build: first_group(&caps, &[3, 4, 5]),
            start: whole.start(),
            end: whole.end(),
        })
    })
}

fn first_group(caps: &Captures<'_>, groups: &[usize]) -> Option<String> {
    groups
        .iter()
        .find_map(|index| caps.get(*index))
        .map(|found| found.as_str().to_string())
}

fn find_build(text: &str) -> Option<String> {
    cached_regex(&BUILD_RE, r"(?i)\bbuild\s*(?:#|no\.?\s*|number\s*)?(\d+)\b")
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|found| found.as_str().to_string())
}

fn find_rollout(text: &str) -> Option<u8> {
    cached_regex(&PERCENT_RE, r"(\d{1,3})%")
        .captures_iter(text)
        .find_map(|caps| {
            let digits = caps.get(1)?;
            let preceded_by_number = text[..digits.start()]
                .chars()
                .next_back()
                .is_some_and(|ch| ch.is_ascii_digit() || ch == '.' || ch == ',');
            if preceded_by_number {
                return None;
            }
            digits.as_str().parse::<u8>().ok().filter(|value| *value <= 100)
        })
}

fn find_date(text: &str) -> Option<NaiveDate> {
    cached_regex(&DATE_RE, r"\b(\d{4})[-/](\d{1,2})[-/](\d{1,2})\b")
        .captures_iter(text)
        .find_map(|caps| {
            let year = caps.get(1)?.as_str().parse::<i32>().ok()?;
            let month = caps.get(2)?.as_str().parse::<u32>().ok()?;
            let day = caps.get(3)?.as_str().parse::<u32>().ok()?;
            NaiveDate::from_ymd_opt(year, month, day)
        })
}

fn find_status(text: &str) -> ReleaseStatus {
    if cached_regex(&ROLLED_BACK_RE, r"(?i)\broll(?:ed|ing)?[\s-]?back\b").is_match(text) {
        ReleaseStatus::RolledBack
    } else if cached_regex(&PRODUCTION_RE, r"(?i)\b(?:production|prod)\b").is_match(text) {
        ReleaseStatus::Production
    } else if cached_regex(&TESTING_RE, r"(?i)\btesting\b").is_match(text) {
        ReleaseStatus::Testing
    } else {
        ReleaseStatus::Unknown
    }
}

fn heuristic_application(text: &str, version_start: usize, version_end: usize) -> Option<String> {
    capitalized_runs(&text[..version_start])
        .into_iter()
        .next_back()
        .or_else(|| capitalized_runs(&text[version_end..]).into_iter().next())
}

/// Runs of capitalized words separated only by spaces, with filler words trimmed.
fn capitalized_runs(segment: &str) -> Vec<String> {
    let mut runs = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut last_end: Option<usize> = None;

    for word in cached_regex(&WORD_RE, r"[\p{L}\p{N}][\p{L}\p{N}'&+-]*").find_iter(segment) {
        let token = word.as_str();
        let adjacent = last_end.is_some_and(|end| {
            segment[end..word.start()]
                .chars()
                .all(|ch| ch == ' ' || ch == '\t')
        });
        let capitalized = token.chars().next().is_some_and(char::is_uppercase);
        let continues = adjacent
            && !current.is_empty()
            && (capitalized || token.chars().next().is_some_and(|ch| ch.is_ascii_digit()));

        if continues {
            current.push(token);
        } else {
            push_run(&mut runs, &current);
            current.clear();
            if capitalized {
                current.push(token);
            }
        }
        last_end = Some(word.end());
    }
    push_run(&mut runs, &current);
    runs
}

fn push_run(runs: &mut Vec<String>, words: &[&str]) {
    let is_filler = |word: &&str| FILLER_WORDS.contains(&word.to_lowercase().as_str());
    let start = words.iter().position(|word| !is_filler(word));
    let end = words.iter().rposition(|word| !is_filler(word));
    if let (Some(start), Some(end)) = (start, end) {
        runs.push(words[start..=end].join(" "));
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};

    use super::{RecordExtractor, normalize_text};
    use crate::model::{RawMessage, ReleaseStatus};

    fn message(text: &str) -> RawMessage {
        RawMessage::new(
            "U01",
            Utc.with_ymd_and_hms(2026, 10, 14, 9, 30, 0).unwrap(),
            text,
        )
    }

    #[test]
    fn extracts_application_version_rollout_and_status() {
        let extractor = RecordExtractor::default();
        let record = extractor
            .extract(&message("App X shipped v1.2.0, 10% rollout, production"))
            .expect("release record");
        assert_eq!(record.application, "App X");
        assert_eq!(record.version, "1.2.0");
        assert_eq!(record.rollout_percent, Some(10));
        assert_eq!(record.status, ReleaseStatus::Production);
        assert_eq!(
            record.publish_date,
            NaiveDate::from_ymd_opt(2026, 10, 14).expect("date")
        );
        assert_eq!(record.build, None);
    }

    #[test]
    fn chatter_is_not_a_release() {
        let extractor = RecordExtractor::default();
        assert!(extractor.extract(&message("good morning team")).is_none());
        assert!(extractor.extract(&message("Deploy went fine, 100% done")).is_none());
    }

    #[test]
    fn version_without_application_is_not_a_release() {
        let extractor = RecordExtractor::default();
        assert!(extractor.extract(&message("bumped to 1.2.0 already")).is_none());
    }

    #[test]
    fn vocabulary_wins_over_capitalized_words() {
        let extractor = RecordExtractor::new(["Puzzle Quest"]);
        let record = extractor
            .extract(&message("FYI: the puzzle quest Android 3.4.1 build is in Testing"))
            .expect("release record");
        assert_eq!(record.application, "Puzzle Quest");
        assert_eq!(record.status, ReleaseStatus::Testing);
    }

    #[test]
    fn longest_vocabulary_name_wins_at_same_position() {
        let extractor = RecordExtractor::new(["Match", "Match Masters"]);
        let record = extractor
            .extract(&message("Match Masters 5.0.0 is live"))
            .expect("release record");
        assert_eq!(record.application, "Match Masters");
    }

    #[test]
    fn filler_words_are_trimmed_from_heuristic_names() {
        let extractor = RecordExtractor::default();
        let record = extractor
            .extract(&message("Released: New Puzzle Quest 2.3.1 to 20% of users"))
            .expect("release record");
        assert_eq!(record.application, "Puzzle Quest");
        assert_eq!(record.rollout_percent, Some(20));
    }

    #[test]
    fn application_may_follow_the_version() {
        let extractor = RecordExtractor::default();
        let record = extractor
            .extract(&message("2.0.1 for Word Blast is rolling out"))
            .expect("release record");
        assert_eq!(record.application, "Word Blast");
        assert_eq!(record.version, "2.0.1");
    }

    #[test]
    fn build_from_suffix_or_keyword() {
        let extractor = RecordExtractor::default();
        let suffixed = extractor
            .extract(&message("Solitaire 4.1.0 (build 812) in production"))
            .expect("release record");
        assert_eq!(suffixed.build.as_deref(), Some("812"));

        let keyword = extractor
            .extract(&message("Solitaire 4.1.0 is out. Build #813, 50% rollout"))
            .expect("release record");
        assert_eq!(keyword.build.as_deref(), Some("813"));
        assert_eq!(keyword.rollout_percent, Some(50));
    }

    #[test]
    fn decimal_percentages_are_not_versions_or_rollouts() {
        let extractor = RecordExtractor::default();
        let record = extractor
            .extract(&message("Crash rate 12.5% on Farm Story 7.2.0, rollout 5%"))
            .expect("release record");
        assert_eq!(record.version, "7.2.0");
        assert_eq!(record.rollout_percent, Some(5));
    }

    #[test]
    fn two_segment_numbers_are_not_versions() {
        let extractor = RecordExtractor::default();
        let metric = extractor
            .extract(&message("Crash rate 0.8 on Farm Story 7.2.0, rollout 20%, production"))
            .expect("release record");
        assert_eq!(metric.application, "Farm Story");
        assert_eq!(metric.version, "7.2.0");
        assert_eq!(metric.rollout_percent, Some(20));

        let clock = extractor
            .extract(&message("At 10.30 Farm Story 7.2.0 went to production"))
            .expect("release record");
        assert_eq!(clock.application, "Farm Story");
        assert_eq!(clock.version, "7.2.0");

        assert!(extractor.extract(&message("Farm Story ARPU at 1.25 today")).is_none());
    }

    #[test]
    fn prefixed_two_segment_versions_are_accepted() {
        let extractor = RecordExtractor::default();
        let record = extractor
            .extract(&message("Word Blast v2.1 (build 77) in testing"))
            .expect("release record");
        assert_eq!(record.version, "2.1");
        assert_eq!(record.build.as_deref(), Some("77"));
    }

    #[test]
    fn rollout_percent_must_touch_its_number() {
        let extractor = RecordExtractor::default();
        let record = extractor
            .extract(&message("Farm Story 7.2.0 at 30 % of users, then 40%"))
            .expect("release record");
        assert_eq!(record.rollout_percent, Some(40));
    }

    #[test]
    fn explicit_date_overrides_message_timestamp() {
        let extractor = RecordExtractor::default();
        let record = extractor
            .extract(&message("Farm Story 7.2.0 published 2026-10-09, production"))
            .expect("release record");
        assert_eq!(
            record.publish_date,
            NaiveDate::from_ymd_opt(2026, 10, 9).expect("date")
        );
    }

    #[test]
    fn invalid_calendar_dates_fall_back_to_timestamp() {
        let extractor = RecordExtractor::default();
        let record = extractor
            .extract(&message("Farm Story 7.2.0 published 2026-13-40"))
            .expect("release record");
        assert_eq!(record.publish_date, message("").timestamp.date_naive());
    }

    #[test]
    fn rollback_takes_precedence_over_production() {
        let extractor = RecordExtractor::default();
        let record = extractor
            .extract(&message("Farm Story 7.2.0 rolled back from production"))
            .expect("release record");
        assert_eq!(record.status, ReleaseStatus::RolledBack);

        let rollback = extractor
            .extract(&message("Rollback of Farm Story 7.2.0"))
            .expect("release record");
        assert_eq!(rollback.status, ReleaseStatus::RolledBack);
        assert_eq!(rollback.application, "Farm Story");
    }

    #[test]
    fn slack_markup_is_stripped() {
        let extractor = RecordExtractor::default();
        let record = extractor
            .extract(&message(
                "<!subteam^S02ABC|@qa-team> *Farm Story* 7.3.0 <https://example.com/notes|notes> _production_",
            ))
            .expect("release record");
        assert_eq!(record.application, "Farm Story");
        assert_eq!(record.status, ReleaseStatus::Production);
        assert_eq!(
            normalize_text("<@U123> hi &amp; <https://x.io>"),
            "  hi &  "
        );
    }
}
