//! Prompt construction for the analysis and synthesis steps

use crate::capability::{Prompt, PromptTask};
use crate::questions::QuestionRoundManager;
use serde_json::{json, Value};
use tf_model::{ContextBundle, WorkflowInstance};

fn context_files(bundle: Option<&ContextBundle>) -> Value {
    bundle.map_or_else(
        || json!([]),
        |b| {
            Value::Array(
                b.files
                    .iter()
                    .map(|f| json!({ "path": f.path, "content": f.content }))
                    .collect(),
            )
        },
    )
}

#[must_use]
pub fn analysis(instance: &WorkflowInstance) -> Prompt {
    Prompt {
        task: PromptTask::Analysis,
        ticket_id: instance.ticket.id.clone(),
        body: format!(
            "Analyse the change requested by ticket \"{}\" against the repository files \
             provided. Respond with JSON {{\"summary\", \"affectedAreas\": [], \"risks\": [], \
             \"complexity\": \"low|medium|high\"}}.",
            instance.ticket.title
        ),
        context: json!({
            "ticket": instance.ticket,
            "files": context_files(instance.outputs.context.as_ref()),
        }),
    }
}

/// Synthesis prompt; every answered question and every assumption taken
/// for an unanswered one is included.
#[must_use]
pub fn specification(instance: &WorkflowInstance) -> Prompt {
    let answers: Vec<Value> = instance
        .rounds
        .iter()
        .flat_map(|round| {
            round.questions.iter().filter_map(move |q| {
                round
                    .answers
                    .get(&q.id)
                    .filter(|a| !a.is_empty() && !round.skipped_by_user)
                    .map(|a| json!({ "question": q.text, "answer": a.render() }))
            })
        })
        .collect();

    Prompt {
        task: PromptTask::Specification,
        ticket_id: instance.ticket.id.clone(),
        body: format!(
            "Write an implementation-ready specification for ticket \"{}\". Respond with \
             JSON {{\"title\", \"description\", \"acceptanceCriteria\": [], \"apiChanges\": \
             [{{\"method\", \"path\", \"description\"}}], \"fileChanges\": [{{\"path\", \
             \"action\": \"create|modify|delete\", \"summary\"}}], \"testPlan\": [], \
             \"assumptions\": []}}. Carry every listed assumption into \"assumptions\".",
            instance.ticket.title
        ),
        context: json!({
            "ticket": instance.ticket,
            "analysis": instance.outputs.analysis,
            "files": context_files(instance.outputs.context.as_ref()),
            "answers": answers,
            "assumptions": QuestionRoundManager::assumptions(&instance.rounds),
        }),
    }
}
