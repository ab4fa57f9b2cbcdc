//! Testing utilities for the Ticketflow workspace
//!
//! Scripted capabilities, fixed-score validators and fixtures shared by the
//! integration tests.

#![allow(missing_docs)]

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tf_engine::{
    EngineConfig, NoRepository, Prompt, PromptTask, ProviderError, ReasoningProvider,
    RepositoryContext, WorkflowEngine,
};
use tf_model::{
    ChangeAction, FileChange, OwnerScope, RepositoryRef, TicketBrief, TicketId, TicketSpec,
    ValidationResult,
};
use tf_quality::{QualityConfig, QualityEngine, Validator};
use tf_store::MemoryStore;

/// Reasoning capability with canned responses and failure injection
///
/// The first `question_rounds` rounds each ask two questions: a required
/// radio `scope` and an optional text `notes`. Later rounds ask nothing.
#[derive(Debug)]
pub struct ScriptedReasoning {
    failures: DashMap<(TicketId, PromptTask), String>,
    hangs: DashMap<PromptTask, Duration>,
    spec: parking_lot::Mutex<String>,
    question_rounds: u32,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    prompts: parking_lot::Mutex<Vec<Prompt>>,
}

impl Default for ScriptedReasoning {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedReasoning {
    #[must_use]
    pub fn new() -> Self {
        Self {
            failures: DashMap::new(),
            hangs: DashMap::new(),
            spec: parking_lot::Mutex::new(spec_json(&good_spec())),
            question_rounds: 1,
            delay: Duration::from_millis(5),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            prompts: parking_lot::Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn with_question_rounds(mut self, rounds: u32) -> Self {
        self.question_rounds = rounds;
        self
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    #[must_use]
    pub fn with_spec(self, spec: &TicketSpec) -> Self {
        *self.spec.lock() = spec_json(spec);
        self
    }

    /// Make `task` fail for `ticket` until cleared
    pub fn fail(&self, ticket: impl Into<TicketId>, task: PromptTask, message: impl Into<String>) {
        self.failures.insert((ticket.into(), task), message.into());
    }

    pub fn clear_failure(&self, ticket: impl Into<TicketId>, task: PromptTask) {
        self.failures.remove(&(ticket.into(), task));
    }

    /// Make every `task` call sleep for `duration` before answering
    pub fn hang(&self, task: PromptTask, duration: Duration) {
        self.hangs.insert(task, duration);
    }

    pub fn clear_hang(&self, task: PromptTask) {
        self.hangs.remove(&task);
    }

    /// Raw text returned by the next specification call
    pub fn set_spec_response(&self, raw: impl Into<String>) {
        *self.spec.lock() = raw.into();
    }

    /// Highest number of calls observed in flight at once
    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn prompts(&self) -> Vec<Prompt> {
        self.prompts.lock().clone()
    }

    #[must_use]
    pub fn calls(&self, task: PromptTask) -> usize {
        self.prompts.lock().iter().filter(|p| p.task == task).count()
    }

    fn respond(&self, prompt: &Prompt) -> Result<String, ProviderError> {
        if let Some(message) = self.failures.get(&(prompt.ticket_id.clone(), prompt.task)) {
            return Err(ProviderError::new(message.value().clone()));
        }
        match prompt.task {
            PromptTask::Analysis => Ok(serde_json::json!({
                "summary": format!("Change requested by {}", prompt.ticket_id),
                "affectedAreas": ["reports"],
                "complexity": "low",
            })
            .to_string()),
            PromptTask::Questions => {
                let round = prompt.context["roundNumber"].as_u64().unwrap_or(1);
                if round > u64::from(self.question_rounds) {
                    return Ok(r#"{"questions": []}"#.to_string());
                }
                Ok(serde_json::json!({
                    "questions": [
                        {
                            "id": format!("r{round}-scope"),
                            "text": "Export all rows or only the visible ones?",
                            "inputType": "radio",
                            "options": ["all", "visible"],
                            "required": true,
                        },
                        {
                            "id": format!("r{round}-notes"),
                            "text": "Anything else?",
                            "inputType": "text",
                            "required": false,
                        }
                    ]
                })
                .to_string())
            }
            PromptTask::Specification => Ok(self.spec.lock().clone()),
        }
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ReasoningProvider for ScriptedReasoning {
    async fn invoke(&self, prompt: &Prompt) -> Result<String, ProviderError> {
        self.prompts.lock().push(prompt.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let pause = self
            .hangs
            .get(&prompt.task)
            .map_or(self.delay, |d| *d.value());
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
        self.respond(prompt)
    }
}

/// Repository capability over an in-memory file map
#[derive(Debug, Clone, Default)]
pub struct StaticRepository {
    files: BTreeMap<String, String>,
}

impl StaticRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_file(mut self, path: impl Into<String>, content: impl Into<String>) -> Self {
        self.files.insert(path.into(), content.into());
        self
    }
}

#[async_trait]
impl RepositoryContext for StaticRepository {
    async fn file_tree(&self, _repository: &RepositoryRef) -> Result<Vec<String>, ProviderError> {
        Ok(self.files.keys().cloned().collect())
    }

    async fn read_files(
        &self,
        _repository: &RepositoryRef,
        paths: &[String],
    ) -> Result<BTreeMap<String, String>, ProviderError> {
        Ok(paths
            .iter()
            .filter_map(|p| self.files.get(p).map(|c| (p.clone(), c.clone())))
            .collect())
    }
}

/// Validator returning a fixed score, optionally with a blocker
#[derive(Debug, Clone)]
pub struct FixedScoreValidator {
    pub criterion: String,
    /// In `[0, 1]`
    pub score: f64,
    pub blocker: Option<String>,
}

impl FixedScoreValidator {
    #[must_use]
    pub fn new(criterion: impl Into<String>, score: f64) -> Self {
        Self {
            criterion: criterion.into(),
            score,
            blocker: None,
        }
    }

    #[must_use]
    pub fn with_blocker(mut self, blocker: impl Into<String>) -> Self {
        self.blocker = Some(blocker.into());
        self
    }
}

impl Validator for FixedScoreValidator {
    fn criterion(&self) -> &str {
        &self.criterion
    }

    fn validate(&self, _spec: &TicketSpec, weight: f64) -> ValidationResult {
        let result = ValidationResult::new(&self.criterion, self.score, weight);
        match &self.blocker {
            Some(blocker) => result.with_blocker(blocker.clone()),
            None => result,
        }
    }
}

/// Quality engine whose only validator scores `validator`
///
/// # Panics
/// On an invalid default configuration.
#[must_use]
pub fn fixed_quality(validator: FixedScoreValidator) -> Arc<QualityEngine> {
    Arc::new(
        QualityEngine::with_validators(QualityConfig::default(), vec![Arc::new(validator)])
            .expect("default quality config is valid"),
    )
}

/// A specification every built-in validator accepts
#[must_use]
pub fn good_spec() -> TicketSpec {
    TicketSpec {
        title: "Export report as CSV".to_string(),
        description: "Adds a CSV export action to the report page that downloads the rows \
                      currently matching the filters."
            .to_string(),
        acceptance_criteria: vec![
            "Clicking Export should download a file named report.csv".to_string(),
            "The file must contain a header row with the visible column names".to_string(),
            "Given an empty report, the export returns only the header row".to_string(),
        ],
        api_changes: Vec::new(),
        file_changes: vec![FileChange {
            path: "src/report/export.ts".to_string(),
            action: ChangeAction::Create,
            summary: "CSV encoder and download trigger".to_string(),
        }],
        test_plan: vec![
            "Unit test the CSV encoder with quoted values".to_string(),
            "End-to-end test the download from the report page".to_string(),
        ],
        assumptions: Vec::new(),
    }
}

/// Specification as the reasoning capability would return it
///
/// # Panics
/// Never; a `TicketSpec` always serializes.
#[must_use]
pub fn spec_json(spec: &TicketSpec) -> String {
    serde_json::to_string(spec).expect("ticket spec serializes")
}

#[must_use]
pub fn scope() -> OwnerScope {
    OwnerScope::new("ws-test", "user-test")
}

#[must_use]
pub fn brief(id: &str) -> TicketBrief {
    TicketBrief::new(id, format!("CSV export {id}"), "Export the report as CSV")
}

/// Engine over `store` with no repository access
///
/// # Panics
/// On an invalid `config`.
#[must_use]
pub fn engine_with(
    config: EngineConfig,
    store: Arc<MemoryStore>,
    reasoning: Arc<ScriptedReasoning>,
) -> WorkflowEngine {
    WorkflowEngine::new(config, store, reasoning, Arc::new(NoRepository)).expect("valid engine config")
}

/// Default engine over a fresh in-memory store
#[must_use]
pub fn setup_engine(reasoning: Arc<ScriptedReasoning>) -> (Arc<WorkflowEngine>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let engine = engine_with(EngineConfig::default(), Arc::clone(&store), reasoning);
    (Arc::new(engine), store)
}
