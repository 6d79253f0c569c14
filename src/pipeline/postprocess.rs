//! Post-processing: deterministic cleanup of one page's grading reply.
//!
//! The parser tolerates most drift on its own, but a few model habits leak
//! into field values if left alone:
//!
//! - wrapping the whole reply in a ```` ``` ```` fence, which would glue the
//!   closing fence onto the `Total Marks:` value
//! - `\r\n` line endings from some providers
//! - zero-width characters and BOMs in front of labels, which stop
//!   `Question Number:` from matching
//!
//! Rules run in order: fences first (they are matched on the raw reply),
//! then line endings, then invisible characters, then the outer trim.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply every cleanup rule to a raw model reply.
pub fn clean_transcript(input: &str) -> String {
    let s = strip_outer_fences(input);
    let s = normalise_line_endings(&s);
    let s = remove_invisible_chars(&s);
    s.trim().to_string()
}

/// Join cleaned page replies in page order, one blank line apart.
pub fn join_transcripts<'a>(pages: impl IntoIterator<Item = &'a str>) -> String {
    pages.into_iter().collect::<Vec<_>>().join("\n\n")
}

// ── Rule 1: Strip outer code fences ──────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z]*\r?\n(.*)\r?\n```\s*$").unwrap());

fn strip_outer_fences(input: &str) -> String {
    if let Some(caps) = RE_OUTER_FENCES.captures(input.trim()) {
        caps[1].to_string()
    } else {
        input.to_string()
    }
}

// ── Rule 2: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 3: Strip invisible Unicode ──────────────────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input
        .chars()
        .filter(|c| {
            !matches!(
                c,
                '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}' | '\u{FEFF}' | '\u{00AD}'
            )
        })
        .collect()
}
