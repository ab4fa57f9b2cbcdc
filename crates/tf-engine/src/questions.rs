//! Question round manager
//!
//! Generates clarification rounds through the reasoning capability, records
//! answers against the open round and synthesizes deterministic defaults
//! when the user skips. A closed round is never modified; every operation
//! returns a new round value.

use crate::capability::{Prompt, PromptTask, ReasoningProvider};
use crate::config::DefaultAnswerPolicy;
use crate::error::EngineError;
use crate::response::parse_questions;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tf_model::{AnswerValue, Answers, QuestionInput, QuestionRound, WorkflowInstance};

/// Neutral value used for free-text questions
pub const NO_PREFERENCE: &str = "no preference";

/// Owns round content from generation to close
#[derive(Clone)]
pub struct QuestionRoundManager {
    reasoning: Arc<dyn ReasoningProvider>,
    max_rounds: u32,
    policy: DefaultAnswerPolicy,
}

impl std::fmt::Debug for QuestionRoundManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuestionRoundManager")
            .field("max_rounds", &self.max_rounds)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl QuestionRoundManager {
    #[must_use]
    pub fn new(
        reasoning: Arc<dyn ReasoningProvider>,
        max_rounds: u32,
        policy: DefaultAnswerPolicy,
    ) -> Self {
        Self {
            reasoning,
            max_rounds,
            policy,
        }
    }

    #[inline]
    #[must_use]
    pub fn policy(&self) -> DefaultAnswerPolicy {
        self.policy
    }

    /// Whether the product cap on rounds has been reached
    #[must_use]
    pub fn cap_reached(&self, instance: &WorkflowInstance) -> bool {
        let closed = instance.rounds.iter().filter(|r| !r.is_open()).count();
        closed >= self.max_rounds as usize
    }

    /// Prompt for the next round; prior rounds' answers are included
    #[must_use]
    pub fn prompt(&self, instance: &WorkflowInstance) -> Prompt {
        let round_number = instance.next_round_number();
        let prior: Vec<_> = instance
            .rounds
            .iter()
            .map(|round| {
                json!({
                    "roundNumber": round.round_number,
                    "skipped": round.skipped_by_user,
                    "questions": round.questions.iter().map(|q| json!({
                        "id": q.id,
                        "text": q.text,
                        "answer": round.answers.get(&q.id).map(AnswerValue::render),
                    })).collect::<Vec<_>>(),
                })
            })
            .collect();

        Prompt {
            task: PromptTask::Questions,
            ticket_id: instance.ticket.id.clone(),
            body: format!(
                "Ask the clarifying questions still needed to specify ticket \"{}\" \
                 (round {round_number} of at most {}). Respond with JSON \
                 {{\"questions\": [{{\"id\", \"text\", \"inputType\": \
                 \"radio|checkbox|text|multiline|select\", \"options\"?, \"context\"?, \
                 \"impact\"?, \"required\"?}}]}}. Return an empty list when nothing \
                 is ambiguous.",
                instance.ticket.title, self.max_rounds
            ),
            context: json!({
                "roundNumber": round_number,
                "ticket": instance.ticket,
                "analysis": instance.outputs.analysis,
                "priorRounds": prior,
            }),
        }
    }

    /// Generate the next round for `instance`
    ///
    /// Malformed output from the reasoning capability is a generation error.
    pub async fn generate_round(
        &self,
        instance: &WorkflowInstance,
    ) -> Result<QuestionRound, EngineError> {
        if instance.open_round().is_some() {
            return Err(EngineError::validation("a question round is already open"));
        }
        let prompt = self.prompt(instance);
        let round_number = instance.next_round_number();
        let raw = self.reasoning.invoke(&prompt).await?;
        tracing::debug!(
            ticket_id = %instance.ticket.id,
            round = round_number,
            bytes = raw.len(),
            "question round response"
        );
        let questions = parse_questions(&raw, round_number)?;
        Ok(QuestionRound::new(round_number, questions))
    }

    /// Close the latest open round with `answers`
    ///
    /// Rejects a round number other than the open round's, unknown question
    /// ids, values that do not fit the question, and missing required
    /// answers. Empty values are treated as unanswered and dropped.
    pub fn record_answers(
        instance: &WorkflowInstance,
        round_number: u32,
        answers: Answers,
    ) -> Result<QuestionRound, EngineError> {
        let open = instance
            .open_round()
            .ok_or_else(|| EngineError::validation("no open question round"))?;
        if open.round_number != round_number {
            return Err(EngineError::validation(format!(
                "round {round_number} is not the open round {}",
                open.round_number
            )));
        }

        let mut round = open.clone();
        for (id, value) in answers {
            let question = round
                .question(&id)
                .ok_or_else(|| EngineError::validation(format!("unknown question '{id}'")))?;
            if value.is_empty() {
                continue;
            }
            question
                .check_answer(&value)
                .map_err(|e| EngineError::validation(e.to_string()))?;
            round.answers.insert(id, value);
        }

        let missing: Vec<&str> = round
            .questions
            .iter()
            .filter(|q| q.required && !round.is_answered(&q.id))
            .map(|q| q.id.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(EngineError::validation(format!(
                "required questions unanswered: {}",
                missing.join(", ")
            )));
        }

        round.answered_at = Some(Utc::now());
        Ok(round)
    }

    #[inline]
    #[must_use]
    pub fn is_complete(round: &QuestionRound) -> bool {
        round.is_complete()
    }

    /// Deterministic defaults for every unanswered question
    #[must_use]
    pub fn synthesize_defaults(&self, round: &QuestionRound) -> Answers {
        let mut answers = round.answers.clone();
        if self.policy == DefaultAnswerPolicy::OmitInfluence {
            return answers;
        }
        for question in round.unanswered() {
            let value = match &question.input {
                QuestionInput::Radio { options } | QuestionInput::Select { options } => {
                    options.first().cloned().map(AnswerValue::Single)
                }
                QuestionInput::Checkbox { .. } => None,
                QuestionInput::Text | QuestionInput::Multiline => {
                    Some(AnswerValue::Single(NO_PREFERENCE.to_string()))
                }
            };
            if let Some(value) = value {
                answers.insert(question.id.clone(), value);
            }
        }
        answers
    }

    /// Close `round` as skipped with synthesized defaults
    ///
    /// A round already closed by a skip is returned unchanged.
    #[must_use]
    pub fn skip(&self, round: &QuestionRound) -> QuestionRound {
        if !round.is_open() && round.skipped_by_user {
            return round.clone();
        }
        let mut skipped = round.clone();
        skipped.answers = self.synthesize_defaults(round);
        skipped.skipped_by_user = true;
        skipped.answered_at = Some(Utc::now());
        skipped
    }

    /// Assumptions to hand to synthesis for questions the user did not answer
    #[must_use]
    pub fn assumptions(rounds: &[QuestionRound]) -> Vec<String> {
        let mut out = Vec::new();
        for round in rounds {
            for question in &round.questions {
                match round.answers.get(&question.id) {
                    Some(value) if round.skipped_by_user && !value.is_empty() => out.push(format!(
                        "Assumed \"{}\" for: {}",
                        value.render(),
                        question.text
                    )),
                    Some(value) if !value.is_empty() => {}
                    _ => out.push(format!(
                        "No preference stated for: {}; choose a reasonable default",
                        question.text
                    )),
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::ProviderError;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use tf_model::{OwnerScope, Question, TicketBrief};

    #[derive(Debug)]
    struct Canned(&'static str);

    #[async_trait]
    impl ReasoningProvider for Canned {
        async fn invoke(&self, _prompt: &Prompt) -> Result<String, ProviderError> {
            Ok(self.0.to_string())
        }
    }

    fn manager(response: &'static str, policy: DefaultAnswerPolicy) -> QuestionRoundManager {
        QuestionRoundManager::new(Arc::new(Canned(response)), 3, policy)
    }

    fn instance() -> WorkflowInstance {
        WorkflowInstance::new(
            TicketBrief::new("T-1", "CSV export", "Export the report as CSV"),
            OwnerScope::new("ws", "u"),
        )
    }

    fn question(id: &str, input: QuestionInput, required: bool) -> Question {
        Question {
            id: id.to_string(),
            text: format!("Question {id}?"),
            input,
            context: None,
            impact: None,
            required,
        }
    }

    fn open_round() -> QuestionRound {
        QuestionRound::new(
            1,
            vec![
                question(
                    "format",
                    QuestionInput::Radio {
                        options: vec!["CSV".into(), "XLSX".into()],
                    },
                    true,
                ),
                question(
                    "columns",
                    QuestionInput::Checkbox {
                        options: vec!["name".into(), "date".into()],
                    },
                    false,
                ),
                question("notes", QuestionInput::Multiline, false),
            ],
        )
    }

    const TWO_QUESTIONS: &str = r#"{"questions": [
        {"id": "format", "text": "Which format?", "inputType": "select", "options": ["CSV", "XLSX"]},
        {"id": "scope", "text": "Which pages?", "inputType": "text"}
    ]}"#;

    #[tokio::test]
    async fn generates_numbered_round() {
        let mut inst = instance();
        let round = manager(TWO_QUESTIONS, DefaultAnswerPolicy::OmitInfluence)
            .generate_round(&inst)
            .await
            .unwrap();
        assert_eq!(round.round_number, 1);
        assert_eq!(round.questions.len(), 2);
        assert!(round.is_open());

        inst.rounds.push(QuestionRound {
            answered_at: Some(Utc::now()),
            ..round
        });
        let next = manager(r#"{"questions": []}"#, DefaultAnswerPolicy::OmitInfluence)
            .generate_round(&inst)
            .await
            .unwrap();
        assert_eq!(next.round_number, 2);
        assert!(next.questions.is_empty());
    }

    #[tokio::test]
    async fn malformed_output_is_generation_error() {
        let err = manager("no json here", DefaultAnswerPolicy::OmitInfluence)
            .generate_round(&instance())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "generation");
    }

    #[tokio::test]
    async fn refuses_second_open_round() {
        let mut inst = instance();
        inst.rounds.push(open_round());
        let err = manager(TWO_QUESTIONS, DefaultAnswerPolicy::OmitInfluence)
            .generate_round(&inst)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn record_answers_closes_round() {
        let mut inst = instance();
        inst.rounds.push(open_round());
        let answers: Answers = [
            ("format".to_string(), AnswerValue::Single("CSV".into())),
            ("notes".to_string(), AnswerValue::Single("  ".into())),
        ]
        .into_iter()
        .collect();

        let round = QuestionRoundManager::record_answers(&inst, 1, answers).unwrap();
        assert!(!round.is_open());
        assert!(QuestionRoundManager::is_complete(&round));
        assert_eq!(round.answers.len(), 1);
        assert!(inst.rounds[0].is_open(), "original round untouched");
    }

    #[test]
    fn record_answers_rejects_wrong_round() {
        let mut inst = instance();
        inst.rounds.push(open_round());
        let err = QuestionRoundManager::record_answers(&inst, 2, Answers::new()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "validation failed: round 2 is not the open round 1"
        );
    }

    #[test]
    fn record_answers_rejects_missing_required_and_bad_values() {
        let mut inst = instance();
        inst.rounds.push(open_round());
        let err = QuestionRoundManager::record_answers(&inst, 1, Answers::new()).unwrap_err();
        assert!(err.to_string().contains("format"));

        let bad: Answers = [("format".to_string(), AnswerValue::Single("PDF".into()))]
            .into_iter()
            .collect();
        assert!(QuestionRoundManager::record_answers(&inst, 1, bad).is_err());

        let unknown: Answers = [("colour".to_string(), AnswerValue::Single("red".into()))]
            .into_iter()
            .collect();
        assert!(QuestionRoundManager::record_answers(&inst, 1, unknown).is_err());
    }

    #[test]
    fn record_answers_without_open_round() {
        let err = QuestionRoundManager::record_answers(&instance(), 1, Answers::new()).unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn neutral_defaults() {
        let answers = manager("", DefaultAnswerPolicy::NeutralDefault).synthesize_defaults(&open_round());
        assert_eq!(answers.get("format"), Some(&AnswerValue::Single("CSV".into())));
        assert_eq!(answers.get("columns"), None);
        assert_eq!(
            answers.get("notes"),
            Some(&AnswerValue::Single(NO_PREFERENCE.into()))
        );
    }

    #[test]
    fn omit_policy_leaves_answers_absent() {
        let answers = manager("", DefaultAnswerPolicy::OmitInfluence).synthesize_defaults(&open_round());
        assert!(answers.is_empty());
    }

    #[test]
    fn skip_is_idempotent() {
        let mgr = manager("", DefaultAnswerPolicy::NeutralDefault);
        let first = mgr.skip(&open_round());
        let second = mgr.skip(&first);
        assert_eq!(first, second);
        assert!(first.skipped_by_user);
        assert!(QuestionRoundManager::is_complete(&first));
    }

    #[test]
    fn cap_counts_closed_rounds() {
        let mgr = QuestionRoundManager::new(Arc::new(Canned("")), 1, DefaultAnswerPolicy::OmitInfluence);
        let mut inst = instance();
        inst.rounds.push(open_round());
        assert!(!mgr.cap_reached(&inst));
        inst.rounds[0].answered_at = Some(Utc::now());
        assert!(mgr.cap_reached(&inst));
    }

    #[test]
    fn assumptions_list_defaults_and_gaps() {
        let mgr = manager("", DefaultAnswerPolicy::NeutralDefault);
        let skipped = mgr.skip(&open_round());
        let assumptions = QuestionRoundManager::assumptions(&[skipped]);
        assert_eq!(
            assumptions,
            vec![
                "Assumed \"CSV\" for: Question format?".to_string(),
                "No preference stated for: Question columns?; choose a reasonable default"
                    .to_string(),
                "Assumed \"no preference\" for: Question notes?".to_string(),
            ]
        );
    }
}
