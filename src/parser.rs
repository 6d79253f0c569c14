//! Transcript parsing: free-text VLM grading output → structured records.
//!
//! The grading prompt asks the model to emit one block per question,
//! separated by `---` lines, each block made of `Label: value` lines:
//!
//! ```text
//! Question Number: 1.2
//! Question: Name the gas produced.
//! Max Marks: 2
//! Student Answer:
//! Oxygen gas
//! Mark: 1/2
//! Comment: Correct gas but missing explanation
//! ---
//! Total Marks: 14/20
//! ```
//!
//! Models drift from that layout constantly (labels missing, answers
//! wrapped over several lines, stray prose between blocks), so the parser
//! never fails: anything it does not recognise degrades to empty fields.
//! Marks stay display strings because the upstream text is not guaranteed
//! to be numeric ("2/3", "N/A", "1 (partial)").

use serde::{Deserialize, Serialize};

/// Literal separator between blocks.
pub const BLOCK_SEPARATOR: &str = "---";

/// Case-insensitive prefix that classifies a block as the total-marks block.
const TOTAL_BLOCK_PREFIX: &str = "total marks";
/// Exact-case prefix stripped from the total-marks block.
const TOTAL_PREFIX: &str = "Total Marks:";

const QUESTION_NUMBER: &str = "Question Number:";
const QUESTION: &str = "Question:";
const MAX_MARKS: &str = "Max Marks:";
const STUDENT_ANSWER: &str = "Student Answer:";
const MARK: &str = "Mark:";
const COMMENT: &str = "Comment:";

/// Marking result for a single question.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionRecord {
    /// Question label, including sub-parts (`1.2`, `2(b)(ii)`).
    pub question_number: String,
    pub question: String,
    /// Usually a bare number (`"3"`), kept verbatim.
    pub max_marks: String,
    /// Continuation lines joined with single spaces.
    pub student_answer: String,
    /// Usually `X/Y`, kept verbatim.
    pub mark: String,
    pub comment: String,
}

/// All questions found in a transcript plus the reported total.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseResult {
    pub questions: Vec<QuestionRecord>,
    /// Empty when no total-marks block was present.
    pub total: String,
}

impl ParseResult {
    /// Number of question records.
    pub fn len(&self) -> usize {
        self.questions.len()
    }

    /// `true` when no question records were produced.
    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }
}

/// Which multi-line field continuation lines are appended to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Accumulating {
    None,
    StudentAnswer,
    Comment,
}

/// Split a transcript into its trimmed, non-empty `---`-delimited blocks.
pub fn split_blocks(transcript: &str) -> Vec<&str> {
    transcript
        .split(BLOCK_SEPARATOR)
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .collect()
}

/// Parse a full grading transcript.
///
/// Pure and infallible: malformed input yields records with empty fields,
/// never an error. Block order is preserved in `questions`.
pub fn parse_transcript(transcript: &str) -> ParseResult {
    let mut result = ParseResult::default();

    for block in split_blocks(transcript) {
        if is_total_block(block) {
            // Last total block wins.
            result.total = block
                .strip_prefix(TOTAL_PREFIX)
                .unwrap_or(block)
                .trim()
                .to_string();
            continue;
        }
        result.questions.push(parse_block(block));
    }

    result
}

/// `true` if the block starts with "total marks", ignoring ASCII case.
fn is_total_block(block: &str) -> bool {
    block
        .get(..TOTAL_BLOCK_PREFIX.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(TOTAL_BLOCK_PREFIX))
}

/// Run the per-block line state machine.
fn parse_block(block: &str) -> QuestionRecord {
    let mut record = QuestionRecord::default();
    let mut state = Accumulating::None;

    for line in block.lines() {
        // "Question Number:" is checked before "Question:"; the two never
        // overlap literally, but the order keeps intent obvious.
        if let Some(rest) = line.strip_prefix(QUESTION_NUMBER) {
            record.question_number = rest.trim().to_string();
            state = Accumulating::None;
        } else if let Some(rest) = line.strip_prefix(QUESTION) {
            record.question = rest.trim().to_string();
            state = Accumulating::None;
        } else if let Some(rest) = line.strip_prefix(MAX_MARKS) {
            record.max_marks = rest.trim().to_string();
            state = Accumulating::None;
        } else if line.starts_with(STUDENT_ANSWER) {
            // Same-line text after the label is dropped.
            record.student_answer.clear();
            state = Accumulating::StudentAnswer;
        } else if let Some(rest) = line.strip_prefix(MARK) {
            record.mark = rest.trim().to_string();
            state = Accumulating::None;
        } else if let Some(rest) = line.strip_prefix(COMMENT) {
            record.comment = rest.trim().to_string();
            state = Accumulating::Comment;
        } else {
            let field = match state {
                Accumulating::None => continue,
                Accumulating::StudentAnswer => &mut record.student_answer,
                Accumulating::Comment => &mut record.comment,
            };
            field.push(' ');
            field.push_str(line.trim());
        }
    }

    record
}

#[cfg(test)]
mod tests {
    use super::*;

    const GAS_BLOCK: &str = "Question Number: 1.2
Question: Name the gas produced.
Max Marks: 2
Student Answer: Oxygen gas
is released
Mark: 1/2
Comment: Correct gas
but missing explanation";

    #[test]
    fn extracts_every_field() {
        let result = parse_transcript(GAS_BLOCK);
        assert_eq!(result.questions.len(), 1);
        assert_eq!(
            result.questions[0],
            QuestionRecord {
                question_number: "1.2".into(),
                question: "Name the gas produced.".into(),
                max_marks: "2".into(),
                student_answer: " is released".into(),
                mark: "1/2".into(),
                comment: "Correct gas but missing explanation".into(),
            }
        );
        assert_eq!(result.total, "");
    }

    #[test]
    fn student_answer_on_following_lines_keeps_leading_space() {
        let block = "Question Number: 1.2
Student Answer:
Oxygen gas
is released
Mark: 1/2";
        let q = &parse_transcript(block).questions[0];
        assert_eq!(q.student_answer, " Oxygen gas is released");
        assert_eq!(q.mark, "1/2");
    }

    #[test]
    fn total_block_sets_total_and_emits_no_record() {
        let result = parse_transcript("Total Marks: 14/20");
        assert!(result.is_empty());
        assert_eq!(result.total, "14/20");
    }

    #[test]
    fn inline_student_answer_is_dropped() {
        let q = &parse_transcript("Student Answer: inline text ignored").questions[0];
        assert_eq!(q.student_answer, "");
    }

    #[test]
    fn inline_comment_is_kept_as_seed() {
        let q = &parse_transcript("Comment: good start\nneeds more detail").questions[0];
        assert_eq!(q.comment, "good start needs more detail");
    }

    #[test]
    fn garbage_block_yields_empty_record() {
        let result = parse_transcript("Here are the results you asked for.\nHope this helps!");
        assert_eq!(result.questions, vec![QuestionRecord::default()]);
    }

    #[test]
    fn no_total_block_leaves_total_empty() {
        let result = parse_transcript("Question Number: 1\n---\nQuestion Number: 2");
        assert_eq!(result.total, "");
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn empty_and_separator_only_input() {
        assert_eq!(parse_transcript(""), ParseResult::default());
        assert_eq!(parse_transcript("---\n\n---   \n---"), ParseResult::default());
    }

    #[test]
    fn total_detection_ignores_case_but_strip_is_literal() {
        let result = parse_transcript("TOTAL MARKS: 9/10");
        assert!(result.is_empty());
        assert_eq!(result.total, "TOTAL MARKS: 9/10");

        let result = parse_transcript("total marks 9/10");
        assert_eq!(result.total, "total marks 9/10");
    }

    #[test]
    fn last_total_block_wins() {
        let result = parse_transcript("Total Marks: 3/5\n---\nQuestion Number: 1\n---\nTotal Marks: 4/5");
        assert_eq!(result.total, "4/5");
        assert_eq!(result.len(), 1);
    }

    #[test]
    fn total_block_must_start_with_label() {
        // The label is only recognised at the start of the block.
        let result = parse_transcript("Summary\nTotal Marks: 4/5");
        assert_eq!(result.total, "");
        assert_eq!(result.len(), 1);
    }

    #[test]
    fn field_labels_are_case_sensitive() {
        let q = &parse_transcript("question: lower\nmark: 1/1\nQUESTION NUMBER: 3").questions[0];
        assert_eq!(q, &QuestionRecord::default());
    }

    #[test]
    fn question_label_does_not_swallow_question_number() {
        let q = &parse_transcript("Question Number: 4(a)\nQuestion: Define osmosis.").questions[0];
        assert_eq!(q.question_number, "4(a)");
        assert_eq!(q.question, "Define osmosis.");
    }

    #[test]
    fn mark_line_ends_accumulation() {
        let block = "Student Answer:\nfirst\nMark: 2/3\nstray line";
        let q = &parse_transcript(block).questions[0];
        assert_eq!(q.student_answer, " first");
        assert_eq!(q.mark, "2/3");
    }

    #[test]
    fn continuation_lines_are_trimmed_individually() {
        let block = "Comment:   \n    indented   \n\ttabbed\t";
        let q = &parse_transcript(block).questions[0];
        assert_eq!(q.comment, " indented tabbed");
    }

    #[test]
    fn blank_line_inside_accumulation_adds_a_space() {
        let block = "Student Answer:\nline one\n\nline two";
        let q = &parse_transcript(block).questions[0];
        assert_eq!(q.student_answer, " line one  line two");
    }

    #[test]
    fn duplicated_fields_are_last_write_wins() {
        let block = "Mark: 1/3\nQuestion Number: 1\nMark: 2/3\nQuestion Number: 1a";
        let q = &parse_transcript(block).questions[0];
        assert_eq!(q.mark, "2/3");
        assert_eq!(q.question_number, "1a");
    }

    #[test]
    fn repeated_student_answer_label_resets_field() {
        let block = "Student Answer:\nfirst try\nStudent Answer:\nsecond try";
        let q = &parse_transcript(block).questions[0];
        assert_eq!(q.student_answer, " second try");
    }

    #[test]
    fn reordered_fields_still_extract() {
        let block = "Comment: fine\nMark: 3/3\nMax Marks: 3\nQuestion: Q?\nQuestion Number: 7";
        let q = &parse_transcript(block).questions[0];
        assert_eq!(q.question_number, "7");
        assert_eq!(q.question, "Q?");
        assert_eq!(q.max_marks, "3");
        assert_eq!(q.mark, "3/3");
        assert_eq!(q.comment, "fine");
    }

    #[test]
    fn crlf_line_endings_are_tolerated() {
        let block = "Question Number: 2\r\nStudent Answer:\r\nwater\r\nMark: 1/1\r\n";
        let q = &parse_transcript(block).questions[0];
        assert_eq!(q.question_number, "2");
        assert_eq!(q.student_answer, " water");
        assert_eq!(q.mark, "1/1");
    }

    #[test]
    fn separator_inside_a_line_still_splits() {
        // Splitting is on the literal substring, not on whole lines.
        let result = parse_transcript("Comment: good---Question Number: 2");
        assert_eq!(result.len(), 2);
        assert_eq!(result.questions[0].comment, "good");
        assert_eq!(result.questions[1].question_number, "2");
    }

    #[test]
    fn multibyte_text_near_total_prefix_does_not_panic() {
        let result = parse_transcript("totál marks é");
        assert_eq!(result.len(), 1);
        let result = parse_transcript("é");
        assert_eq!(result.len(), 1);
    }

    #[test]
    fn parsing_is_deterministic() {
        let t = format!("{GAS_BLOCK}\n---\nTotal Marks: 1/2");
        assert_eq!(parse_transcript(&t), parse_transcript(&t));
    }

    #[test]
    fn block_count_matches_records_plus_total() {
        let t = "noise\n---\nQuestion Number: 1\n---\n\n---\nTotal Marks: 2/4\n---\nQuestion Number: 2";
        let blocks = split_blocks(t).len();
        let result = parse_transcript(t);
        assert_eq!(blocks, result.len() + 1);
    }

    #[test]
    fn two_questions_and_total_in_source_order() {
        let t = "Question Number: 1
Question: State one use of copper.
Max Marks: 1
Student Answer:
wires
Mark: 1/1
Comment: Correct.
---
Question Number: 2
Question: Explain why copper conducts.
Max Marks: 2
Student Answer:
it has free electrons
Mark: 1/2
Comment: Needs delocalised.
---
Total Marks: 2/3";
        let result = parse_transcript(t);
        assert_eq!(result.len(), 2);
        assert_eq!(result.questions[0].question_number, "1");
        assert_eq!(result.questions[1].question_number, "2");
        assert_eq!(result.questions[1].student_answer, " it has free electrons");
        assert_eq!(result.total, "2/3");
    }

    #[test]
    fn serialises_with_camel_case_keys() {
        let result = parse_transcript("Question Number: 1\nMax Marks: 2\n---\nTotal Marks: 1/2");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["total"], "1/2");
        assert_eq!(json["questions"][0]["questionNumber"], "1");
        assert_eq!(json["questions"][0]["maxMarks"], "2");
        assert_eq!(json["questions"][0]["studentAnswer"], "");
    }
}
