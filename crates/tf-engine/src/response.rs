//! Parsing of reasoning responses into typed step outputs
//!
//! Responses are expected to hold one JSON object, possibly wrapped in a
//! Markdown code fence or preceded by prose. Anything that does not
//! deserialize into the expected shape is a generation error.

use crate::error::EngineError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashSet;
use tf_model::{Analysis, Question, QuestionDraft, TicketSpec};

static FENCED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```[A-Za-z]*[ \t]*\r?\n(.*?)```").expect("fence pattern is valid")
});

/// Locate the first balanced JSON object in `raw`
#[must_use]
pub fn extract_json(raw: &str) -> Option<&str> {
    let candidate = FENCED
        .captures(raw)
        .and_then(|c| c.get(1))
        .map_or(raw, |m| m.as_str());
    balanced_object(candidate).or_else(|| balanced_object(raw))
}

fn balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse<T: DeserializeOwned>(raw: &str, what: &str) -> Result<T, EngineError> {
    let json = extract_json(raw)
        .ok_or_else(|| EngineError::generation(format!("{what} response contains no JSON object")))?;
    serde_json::from_str(json)
        .map_err(|e| EngineError::generation(format!("malformed {what} response: {e}")))
}

pub fn parse_analysis(raw: &str) -> Result<Analysis, EngineError> {
    let analysis: Analysis = parse(raw, "analysis")?;
    if analysis.summary.trim().is_empty() {
        return Err(EngineError::generation("analysis response has an empty summary"));
    }
    Ok(analysis)
}

#[derive(Debug, Deserialize)]
struct QuestionsResponse {
    #[serde(default)]
    questions: Vec<QuestionDraft>,
}

/// Validated questions for round `round_number`; an empty list means the
/// reasoning capability has nothing left to ask.
pub fn parse_questions(raw: &str, round_number: u32) -> Result<Vec<Question>, EngineError> {
    let response: QuestionsResponse = parse(raw, "questions")?;
    let mut seen = HashSet::new();
    let mut questions = Vec::with_capacity(response.questions.len());
    for (index, draft) in response.questions.into_iter().enumerate() {
        let fallback = format!("r{round_number}q{}", index + 1);
        let question = draft
            .validate(&fallback)
            .map_err(|e| EngineError::generation(e.to_string()))?;
        if !seen.insert(question.id.clone()) {
            return Err(EngineError::generation(format!(
                "duplicate question id '{}'",
                question.id
            )));
        }
        questions.push(question);
    }
    Ok(questions)
}

pub fn parse_specification(raw: &str) -> Result<TicketSpec, EngineError> {
    let spec: TicketSpec = parse(raw, "specification")?;
    if spec.title.trim().is_empty() {
        return Err(EngineError::generation("specification response has no title"));
    }
    Ok(spec)
}
