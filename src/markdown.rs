//! Labelled-field fallback for test cases written as Markdown, e.g.
//!
//! ```text
//! **Test_ID:** TC-001
//! Feature: Checkout
//! Steps:
//!   1. Add an item
//!   2. Pay
//! Expected_Result: Order confirmed
//! ```

use regex::Regex;
use std::sync::OnceLock;

use crate::extractor::TestCaseRecord;

const UNKNOWN_SOURCE: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Label {
    TestId,
    Feature,
    Scenario,
    Steps,
    ExpectedResult,
    GroundedIn,
}

impl Label {
    fn from_name(name: &str) -> Option<Self> {
        let normalized: String = name
            .chars()
            .filter(|c| c.is_ascii_alphabetic())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "testid" => Some(Label::TestId),
            "feature" => Some(Label::Feature),
            "scenario" => Some(Label::Scenario),
            "steps" => Some(Label::Steps),
            "expectedresult" | "expectedresults" => Some(Label::ExpectedResult),
            "groundedin" => Some(Label::GroundedIn),
            _ => None,
        }
    }
}

fn label_pattern() -> &'static Regex {
    static LABEL: OnceLock<Regex> = OnceLock::new();
    LABEL.get_or_init(|| {
        Regex::new(
            r"(?i)^[#>\s]*(?:[-*+]\s+)?(?:\*\*)?\s*(test[_ ]?id|feature|scenario|steps|expected[_ ]results?|grounded[_ ]in)\s*(?:\*\*)?\s*:\s*(.*)$",
        )
        .expect("label pattern compiles")
    })
}

fn step_pattern() -> &'static Regex {
    static STEP: OnceLock<Regex> = OnceLock::new();
    STEP.get_or_init(|| Regex::new(r"^(?:\d+[.)]|[-*+])\s*(.*)$").expect("step pattern compiles"))
}

fn strip_bold(text: &str) -> String {
    text.replace("**", "").trim().to_string()
}

fn is_rule(line: &str) -> bool {
    line.len() >= 3 && line.chars().all(|c| matches!(c, '-' | '*' | '_' | '='))
}

fn step_text(line: &str) -> Option<String> {
    let line = strip_bold(line);
    if is_rule(&line) {
        return None;
    }
    let captures = step_pattern().captures(&line)?;
    let step = captures.get(1).map_or("", |m| m.as_str()).trim();
    (!step.is_empty()).then(|| step.to_string())
}

/// Accumulates one record while its lines are being read.
#[derive(Default)]
struct Draft {
    record: TestCaseRecord,
    steps: Vec<String>,
}

struct Parser<'a> {
    sources: &'a [String],
    records: Vec<TestCaseRecord>,
    current: Option<Draft>,
    collecting_steps: bool,
}

impl<'a> Parser<'a> {
    fn new(sources: &'a [String]) -> Self {
        Self {
            sources,
            records: Vec::new(),
            current: None,
            collecting_steps: false,
        }
    }

    fn draft(&mut self) -> &mut Draft {
        self.current.get_or_insert_with(Draft::default)
    }

    fn finish_current(&mut self) {
        let Some(Draft { mut record, steps }) = self.current.take() else {
            return;
        };

        if record.test_id.as_deref().map_or(true, str::is_empty) {
            record.test_id = Some(format!("TC-{:03}", self.records.len() + 1));
        }
        record.steps = Some(steps);
        if record.grounded_in.is_none() {
            let default = self.sources.first().map_or(UNKNOWN_SOURCE, String::as_str);
            record.grounded_in = Some(default.to_string());
        }
        self.records.push(record);
    }

    fn grounding(&self, value: String) -> String {
        let lowered = value.to_lowercase();
        self.sources
            .iter()
            .find(|source| lowered.contains(&source.to_lowercase()))
            .cloned()
            .unwrap_or(value)
    }

    fn label(&mut self, label: Label, value: String) {
        self.collecting_steps = label == Label::Steps;

        match label {
            Label::TestId => {
                self.finish_current();
                let draft = self.draft();
                draft.record.test_id = (!value.is_empty()).then_some(value);
            }
            Label::Feature => self.draft().record.feature = Some(value),
            Label::Scenario => self.draft().record.scenario = Some(value),
            Label::ExpectedResult => self.draft().record.expected_result = Some(value),
            Label::GroundedIn => {
                let grounded = self.grounding(value);
                self.draft().record.grounded_in = Some(grounded);
            }
            Label::Steps => {
                let draft = self.draft();
                draft.steps.clear();
                if let Some(step) = step_text(&value).or_else(|| (!value.is_empty()).then_some(value)) {
                    draft.steps.push(step);
                }
            }
        }
    }

    fn line(&mut self, raw_line: &str) {
        let line = raw_line.trim();
        if line.is_empty() {
            return;
        }

        if let Some(captures) = label_pattern().captures(line) {
            let name = captures.get(1).map_or("", |m| m.as_str());
            if let Some(label) = Label::from_name(name) {
                let value = strip_bold(captures.get(2).map_or("", |m| m.as_str()));
                self.label(label, value);
                return;
            }
        }

        if self.collecting_steps {
            if let Some(step) = step_text(line) {
                self.draft().steps.push(step);
            }
        }
    }

    fn finish(mut self) -> Vec<TestCaseRecord> {
        self.finish_current();
        self.records
    }
}

/// Parses labelled test cases. A `Test_ID` line opens a new record; labels
/// before the first `Test_ID` open an implicit one. Records without an ID
/// get `TC-NNN` by position, and `Steps` defaults to empty.
pub fn parse_test_cases(text: &str, sources: &[String]) -> Vec<TestCaseRecord> {
    let mut parser = Parser::new(sources);
    for line in text.lines() {
        parser.line(line);
    }
    parser.finish()
}
