//! Clarification questions, answers and rounds

use crate::error::ModelError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Input control a question is rendered with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    Radio,
    Checkbox,
    Text,
    Multiline,
    Select,
}

impl InputType {
    /// Whether the type carries an option list
    #[inline]
    #[must_use]
    pub fn has_options(self) -> bool {
        matches!(self, InputType::Radio | InputType::Checkbox | InputType::Select)
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "radio" => Some(InputType::Radio),
            "checkbox" => Some(InputType::Checkbox),
            "text" => Some(InputType::Text),
            "multiline" => Some(InputType::Multiline),
            "select" => Some(InputType::Select),
            _ => None,
        }
    }
}

/// Validated input shape, keyed by `inputType`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "inputType", rename_all = "lowercase")]
pub enum QuestionInput {
    Radio { options: Vec<String> },
    Checkbox { options: Vec<String> },
    Select { options: Vec<String> },
    Text,
    Multiline,
}

impl QuestionInput {
    #[must_use]
    pub fn input_type(&self) -> InputType {
        match self {
            QuestionInput::Radio { .. } => InputType::Radio,
            QuestionInput::Checkbox { .. } => InputType::Checkbox,
            QuestionInput::Select { .. } => InputType::Select,
            QuestionInput::Text => InputType::Text,
            QuestionInput::Multiline => InputType::Multiline,
        }
    }

    #[must_use]
    pub fn options(&self) -> &[String] {
        match self {
            QuestionInput::Radio { options }
            | QuestionInput::Checkbox { options }
            | QuestionInput::Select { options } => options,
            QuestionInput::Text | QuestionInput::Multiline => &[],
        }
    }
}

/// A validated clarification question
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    pub text: String,
    #[serde(flatten)]
    pub input: QuestionInput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact: Option<String>,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl Question {
    #[inline]
    #[must_use]
    pub fn input_type(&self) -> InputType {
        self.input.input_type()
    }

    /// Check an answer against this question's input shape
    pub fn check_answer(&self, value: &AnswerValue) -> Result<(), ModelError> {
        let invalid = |reason: &str| ModelError::InvalidAnswer {
            id: self.id.clone(),
            reason: reason.to_string(),
        };

        match (&self.input, value) {
            (QuestionInput::Radio { options } | QuestionInput::Select { options }, AnswerValue::Single(v)) => {
                if options.iter().any(|o| o == v) {
                    Ok(())
                } else {
                    Err(invalid("value is not one of the options"))
                }
            }
            (QuestionInput::Checkbox { options }, AnswerValue::Multiple(values)) => {
                if values.iter().all(|v| options.contains(v)) {
                    Ok(())
                } else {
                    Err(invalid("selection contains an unknown option"))
                }
            }
            (QuestionInput::Checkbox { options }, AnswerValue::Single(v)) => {
                if options.contains(v) {
                    Ok(())
                } else {
                    Err(invalid("selection contains an unknown option"))
                }
            }
            (QuestionInput::Text | QuestionInput::Multiline, AnswerValue::Single(_)) => Ok(()),
            (_, AnswerValue::Multiple(_)) => Err(invalid("multiple values for a single-value question")),
        }
    }
}

/// Unvalidated question as produced by the reasoning capability
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionDraft {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub input_type: String,
    #[serde(default)]
    pub options: Option<Vec<String>>,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub impact: Option<String>,
    #[serde(default)]
    pub required: Option<bool>,
}

impl QuestionDraft {
    /// Validate shape: non-empty text, known input type, options present
    /// iff the type takes options. `fallback_id` is used when no id was given.
    pub fn validate(self, fallback_id: &str) -> Result<Question, ModelError> {
        let id = self
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| fallback_id.to_string());
        let invalid = |reason: String| ModelError::InvalidQuestion {
            id: id.clone(),
            reason,
        };

        if self.text.trim().is_empty() {
            return Err(invalid("empty text".to_string()));
        }
        let input_type = InputType::parse(&self.input_type)
            .ok_or_else(|| invalid(format!("unknown input type '{}'", self.input_type)))?;

        let input = match (input_type.has_options(), self.options) {
            (true, Some(options)) => {
                if options.is_empty() || options.iter().any(|o| o.trim().is_empty()) {
                    return Err(invalid("options must be non-empty".to_string()));
                }
                match input_type {
                    InputType::Radio => QuestionInput::Radio { options },
                    InputType::Checkbox => QuestionInput::Checkbox { options },
                    _ => QuestionInput::Select { options },
                }
            }
            (true, None) => return Err(invalid("options missing".to_string())),
            (false, Some(_)) => {
                return Err(invalid(format!(
                    "options not allowed for {:?}",
                    input_type
                )))
            }
            (false, None) => match input_type {
                InputType::Multiline => QuestionInput::Multiline,
                _ => QuestionInput::Text,
            },
        };

        Ok(Question {
            text: self.text.trim().to_string(),
            input,
            context: self.context,
            impact: self.impact,
            required: self.required.unwrap_or(true),
            id,
        })
    }
}

/// Answer value(s) for one question
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Single(String),
    Multiple(Vec<String>),
}

impl AnswerValue {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            AnswerValue::Single(v) => v.trim().is_empty(),
            AnswerValue::Multiple(values) => values.iter().all(|v| v.trim().is_empty()),
        }
    }

    /// Render for prompts
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            AnswerValue::Single(v) => v.clone(),
            AnswerValue::Multiple(values) => values.join(", "),
        }
    }
}

/// Answers keyed by question id; unanswered questions are absent
pub type Answers = BTreeMap<String, AnswerValue>;

/// One clarification cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionRound {
    /// 1-based, strictly increasing per instance
    pub round_number: u32,
    pub questions: Vec<Question>,
    #[serde(default)]
    pub answers: Answers,
    pub generated_at: DateTime<Utc>,
    /// `None` while the round is open
    #[serde(default)]
    pub answered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub skipped_by_user: bool,
}

impl QuestionRound {
    #[must_use]
    pub fn new(round_number: u32, questions: Vec<Question>) -> Self {
        Self {
            round_number,
            questions,
            answers: Answers::new(),
            generated_at: Utc::now(),
            answered_at: None,
            skipped_by_user: false,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.answered_at.is_none()
    }

    #[must_use]
    pub fn question(&self, id: &str) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == id)
    }

    /// Whether `id` has a non-empty answer
    #[must_use]
    pub fn is_answered(&self, id: &str) -> bool {
        self.answers.get(id).is_some_and(|a| !a.is_empty())
    }

    /// Questions without a non-empty answer
    pub fn unanswered(&self) -> impl Iterator<Item = &Question> {
        self.questions.iter().filter(|q| !self.is_answered(&q.id))
    }

    /// True iff every required question is answered or the round was skipped
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.skipped_by_user
            || self
                .questions
                .iter()
                .filter(|q| q.required)
                .all(|q| self.is_answered(&q.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn draft(input_type: &str, options: Option<Vec<&str>>) -> QuestionDraft {
        QuestionDraft {
            id: Some("q1".to_string()),
            text: "Which database?".to_string(),
            input_type: input_type.to_string(),
            options: options.map(|o| o.into_iter().map(String::from).collect()),
            ..QuestionDraft::default()
        }
    }

    #[test]
    fn radio_requires_options() {
        assert!(draft("radio", None).validate("q").is_err());
        let q = draft("radio", Some(vec!["Postgres", "SQLite"])).validate("q").unwrap();
        assert_eq!(q.input_type(), InputType::Radio);
        assert_eq!(q.input.options().len(), 2);
    }

    #[test]
    fn text_rejects_options() {
        let err = draft("text", Some(vec!["a"])).validate("q").unwrap_err();
        assert!(matches!(err, ModelError::InvalidQuestion { .. }));
        assert!(draft("multiline", None).validate("q").is_ok());
    }

    #[test]
    fn unknown_input_type_rejected() {
        let err = draft("slider", None).validate("q").unwrap_err();
        assert!(err.to_string().contains("unknown input type"));
    }

    #[test]
    fn empty_text_rejected() {
        let mut d = draft("text", None);
        d.text = "   ".to_string();
        assert!(d.validate("q").is_err());
    }

    #[test]
    fn fallback_id_used_when_missing() {
        let mut d = draft("text", None);
        d.id = None;
        assert_eq!(d.validate("r1-q3").unwrap().id, "r1-q3");
    }

    #[test]
    fn question_serializes_with_input_type_tag() {
        let q = draft("select", Some(vec!["a", "b"])).validate("q").unwrap();
        let value = serde_json::to_value(&q).unwrap();
        assert_eq!(value["inputType"], "select");
        assert_eq!(value["options"], serde_json::json!(["a", "b"]));

        let back: Question = serde_json::from_value(value).unwrap();
        assert_eq!(back, q);
    }

    #[test]
    fn check_answer_enforces_options() {
        let q = draft("radio", Some(vec!["yes", "no"])).validate("q").unwrap();
        assert!(q.check_answer(&AnswerValue::Single("yes".into())).is_ok());
        assert!(q.check_answer(&AnswerValue::Single("maybe".into())).is_err());
        assert!(q
            .check_answer(&AnswerValue::Multiple(vec!["yes".into()]))
            .is_err());
    }

    #[test]
    fn round_completion_ignores_optional_questions() {
        let required = draft("text", None).validate("q").unwrap();
        let mut optional = draft("text", None);
        optional.id = Some("q2".to_string());
        optional.required = Some(false);
        let optional = optional.validate("q2").unwrap();

        let mut round = QuestionRound::new(1, vec![required, optional]);
        assert!(!round.is_complete());

        round
            .answers
            .insert("q1".to_string(), AnswerValue::Single("Postgres".into()));
        assert!(round.is_complete());
        assert_eq!(round.unanswered().count(), 1);
    }

    #[test]
    fn blank_answers_do_not_count() {
        let q = draft("text", None).validate("q").unwrap();
        let mut round = QuestionRound::new(1, vec![q]);
        round
            .answers
            .insert("q1".to_string(), AnswerValue::Single("  ".into()));
        assert!(!round.is_complete());

        round.skipped_by_user = true;
        assert!(round.is_complete());
    }
}
