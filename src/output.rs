//! Output types returned by a marking request.

use crate::error::PageError;
use crate::parser::ParseResult;
use crate::quota::UsageSnapshot;
use serde::{Deserialize, Serialize};

/// Grading outcome for one student page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageTranscript {
    /// 1-indexed student page number.
    pub page_num: usize,
    /// Cleaned model response; empty when `error` is set.
    pub transcript: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub duration_ms: u64,
    pub retries: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<PageError>,
}

impl PageTranscript {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Counters and timings for a marking request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkingStats {
    pub student_pages: usize,
    pub scheme_pages: usize,
    pub graded_pages: usize,
    pub failed_pages: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub render_duration_ms: u64,
    pub llm_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Everything a caller gets back from [`crate::examiner::Examiner::mark`].
///
/// Serialises as the parse result (`questions`, `total`) with the usage
/// counter and diagnostics alongside it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkingOutput {
    #[serde(flatten)]
    pub result: ParseResult,
    pub usage: UsageSnapshot,
    /// Set when the submission was persisted to history.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submission_id: Option<String>,
    pub pages: Vec<PageTranscript>,
    pub stats: MarkingStats,
}

impl MarkingOutput {
    /// Pages that failed to grade (only non-empty under the partial policy).
    pub fn failed_pages(&self) -> impl Iterator<Item = &PageTranscript> {
        self.pages.iter().filter(|p| !p.is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_transcript;

    #[test]
    fn marking_output_flattens_parse_result() {
        let output = MarkingOutput {
            result: parse_transcript("Question Number: 1\n---\nTotal Marks: 1/1"),
            usage: UsageSnapshot {
                identity: "user:alice".into(),
                used: 1,
                limit: 10,
                remaining: 9,
                period: "2026-10".into(),
            },
            submission_id: None,
            pages: vec![PageTranscript {
                page_num: 1,
                ..Default::default()
            }],
            stats: MarkingStats::default(),
        };
        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(json["total"], "1/1");
        assert_eq!(json["questions"][0]["questionNumber"], "1");
        assert_eq!(json["usage"]["used"], 1);
        assert!(json.get("submissionId").is_none());
        assert!(json["pages"][0].get("error").is_none());
        assert_eq!(output.failed_pages().count(), 0);
    }
}
