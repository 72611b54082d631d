//! Recovers test-case records from generated text.
//!
//! Generated output is supposed to be a JSON array of records but often
//! arrives wrapped in prose or code fences, or as a Markdown list. The
//! extractor tries progressively looser strategies and never fails: the last
//! resort is a single pseudo-record carrying the raw text.
//!
//! Stage order:
//! 1. strip the first fenced code block, if any
//! 2. balanced-bracket array from the first `[` (string-literal aware)
//! 3. shortest `[...]` match
//! 4. greedy `{...}` as a single record
//! 5. everything from the first `[` or `{`
//! 6. labelled Markdown fields (see [`crate::markdown`])
//! 7. raw text

use regex::Regex;
use serde::de::Deserializer;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::OnceLock;
use tracing::{debug, warn};

use crate::markdown;

const FENCE: &str = "```";

const TEST_ID: &str = "Test_ID";
const FEATURE: &str = "Feature";
const SCENARIO: &str = "Scenario";
const STEPS: &str = "Steps";
const EXPECTED_RESULT: &str = "Expected_Result";
const GROUNDED_IN: &str = "Grounded_In";

/// One test case. Known fields are typed when they have their usual shape
/// (strings, and a list of strings for `Steps`); any other value, including
/// `null`, stays in `extra` under its original key so records round-trip
/// unchanged.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct TestCaseRecord {
    #[serde(rename = "Test_ID", skip_serializing_if = "Option::is_none")]
    pub test_id: Option<String>,

    #[serde(rename = "Feature", skip_serializing_if = "Option::is_none")]
    pub feature: Option<String>,

    #[serde(rename = "Scenario", skip_serializing_if = "Option::is_none")]
    pub scenario: Option<String>,

    #[serde(rename = "Steps", skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<String>>,

    #[serde(rename = "Expected_Result", skip_serializing_if = "Option::is_none")]
    pub expected_result: Option<String>,

    #[serde(rename = "Grounded_In", skip_serializing_if = "Option::is_none")]
    pub grounded_in: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl<'de> Deserialize<'de> for TestCaseRecord {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let mut extra = Map::<String, Value>::deserialize(deserializer)?;
        Ok(Self {
            test_id: take_string(&mut extra, TEST_ID),
            feature: take_string(&mut extra, FEATURE),
            scenario: take_string(&mut extra, SCENARIO),
            steps: take_steps(&mut extra),
            expected_result: take_string(&mut extra, EXPECTED_RESULT),
            grounded_in: take_string(&mut extra, GROUNDED_IN),
            extra,
        })
    }
}

fn take_string(map: &mut Map<String, Value>, key: &str) -> Option<String> {
    if !matches!(map.get(key), Some(Value::String(_))) {
        return None;
    }
    match map.remove(key) {
        Some(Value::String(s)) => Some(s),
        _ => None,
    }
}

fn take_steps(map: &mut Map<String, Value>) -> Option<Vec<String>> {
    let all_strings = matches!(
        map.get(STEPS),
        Some(Value::Array(items)) if items.iter().all(Value::is_string)
    );
    if !all_strings {
        return None;
    }
    match map.remove(STEPS) {
        Some(Value::Array(items)) => Some(items.into_iter().filter_map(scalar_to_string).collect()),
        _ => None,
    }
}

impl TestCaseRecord {
    /// Pseudo-record used when nothing structured could be recovered.
    pub fn unstructured(raw: &str) -> Self {
        let mut extra = Map::new();
        extra.insert("raw_response".to_string(), Value::String(raw.to_string()));
        extra.insert("format".to_string(), Value::String("markdown".to_string()));
        extra.insert("unstructured".to_string(), Value::Bool(true));
        Self {
            extra,
            ..Self::default()
        }
    }

    pub fn is_unstructured(&self) -> bool {
        matches!(self.extra.get("unstructured"), Some(Value::Bool(true)))
    }

    /// The record's ID as text, also when the generator wrote it as a number.
    pub fn id(&self) -> Option<String> {
        self.test_id
            .clone()
            .or_else(|| self.extra.get(TEST_ID).cloned().and_then(scalar_to_string))
    }

    /// Steps as text. A bare string counts as one step; non-string items are
    /// rendered as JSON.
    pub fn steps(&self) -> Vec<String> {
        if let Some(steps) = &self.steps {
            return steps.clone();
        }
        match self.extra.get(STEPS) {
            Some(Value::Array(items)) => items.iter().cloned().filter_map(scalar_to_string).collect(),
            Some(other) => scalar_to_string(other.clone()).into_iter().collect(),
            None => Vec::new(),
        }
    }
}

fn scalar_to_string(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

/// What the extractor recovered, tagged by how it got there.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractedResponse {
    Json(Vec<TestCaseRecord>),
    Markdown(Vec<TestCaseRecord>),
    RawText(String),
}

impl ExtractedResponse {
    pub fn format(&self) -> &'static str {
        match self {
            ExtractedResponse::Json(_) => "json",
            ExtractedResponse::Markdown(_) => "markdown",
            ExtractedResponse::RawText(_) => "raw",
        }
    }

    /// Never empty: raw text becomes a single unstructured pseudo-record.
    pub fn into_records(self) -> Vec<TestCaseRecord> {
        match self {
            ExtractedResponse::Json(records) | ExtractedResponse::Markdown(records) => records,
            ExtractedResponse::RawText(raw) => vec![TestCaseRecord::unstructured(&raw)],
        }
    }
}

type JsonStage = fn(&str) -> Option<Vec<TestCaseRecord>>;

const JSON_STAGES: [(&str, JsonStage); 4] = [
    ("balanced array", balanced_array),
    ("bracket match", bracket_match),
    ("object", single_object),
    ("whole text", whole_text),
];

#[derive(Debug, Clone, Default)]
pub struct ResponseExtractor {
    sources: Vec<String>,
}

impl ResponseExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retrieval sources used to fill and canonicalize `Grounded_In` on
    /// Markdown records.
    pub fn with_sources(sources: Vec<String>) -> Self {
        Self { sources }
    }

    pub fn extract(&self, raw: &str) -> ExtractedResponse {
        let cleaned = strip_fences(raw);

        for (name, stage) in JSON_STAGES {
            match stage(cleaned) {
                Some(records) => {
                    debug!(stage = name, records = records.len(), "recovered JSON records");
                    return ExtractedResponse::Json(records);
                }
                None => debug!(stage = name, "stage fell through"),
            }
        }

        let records = markdown::parse_test_cases(raw, &self.sources);
        if !records.is_empty() {
            debug!(records = records.len(), "recovered records from markdown");
            return ExtractedResponse::Markdown(records);
        }

        warn!(len = raw.len(), "no structure recognized; returning raw text");
        ExtractedResponse::RawText(raw.to_string())
    }

    pub fn extract_structured(&self, raw: &str) -> Vec<TestCaseRecord> {
        self.extract(raw).into_records()
    }
}

/// Content of the first fenced block (language tag dropped), or the whole
/// text when there is no fence.
pub fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(open) = trimmed.find(FENCE) else {
        return trimmed;
    };

    let after = &trimmed[open + FENCE.len()..];
    let tag_len = after
        .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '+')))
        .unwrap_or(after.len());
    let body = &after[tag_len..];
    let body = match body.find(FENCE) {
        Some(close) => &body[..close],
        None => body,
    };

    body.trim().trim_end_matches('`').trim_end()
}

/// Drops a leading fence line and a trailing fence from generated code.
pub fn clean_script(raw: &str) -> String {
    let mut script = raw.trim();
    if let Some(rest) = script.strip_prefix(FENCE) {
        let tag_len = rest
            .find(|c: char| !c.is_ascii_alphanumeric())
            .unwrap_or(rest.len());
        script = rest[tag_len..].trim_start();
    }
    if let Some(rest) = script.strip_suffix(FENCE) {
        script = rest.trim_end();
    }
    script.to_string()
}

/// The array starting at the first `[`, found by depth counting. Brackets
/// inside string literals (escapes honoured) do not count.
pub fn balanced_array_span(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }

    None
}

fn parse_array(span: &str) -> Option<Vec<TestCaseRecord>> {
    serde_json::from_str::<Vec<TestCaseRecord>>(span.trim())
        .ok()
        .filter(|records| !records.is_empty())
}

fn balanced_array(text: &str) -> Option<Vec<TestCaseRecord>> {
    parse_array(balanced_array_span(text)?)
}

fn bracket_match(text: &str) -> Option<Vec<TestCaseRecord>> {
    static ARRAY: OnceLock<Regex> = OnceLock::new();
    let re = ARRAY.get_or_init(|| Regex::new(r"(?s)\[.*?\]").expect("array pattern compiles"));
    parse_array(re.find(text)?.as_str())
}

fn single_object(text: &str) -> Option<Vec<TestCaseRecord>> {
    static OBJECT: OnceLock<Regex> = OnceLock::new();
    let re = OBJECT.get_or_init(|| Regex::new(r"(?s)\{.*\}").expect("object pattern compiles"));
    let record = serde_json::from_str::<TestCaseRecord>(re.find(text)?.as_str().trim()).ok()?;
    Some(vec![record])
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Payload {
    Many(Vec<TestCaseRecord>),
    One(TestCaseRecord),
}

fn whole_text(text: &str) -> Option<Vec<TestCaseRecord>> {
    let start = text.find(|c: char| c == '[' || c == '{')?;
    match serde_json::from_str::<Payload>(text[start..].trim()).ok()? {
        Payload::Many(records) if !records.is_empty() => Some(records),
        Payload::Many(_) => None,
        Payload::One(record) => Some(vec![record]),
    }
}
