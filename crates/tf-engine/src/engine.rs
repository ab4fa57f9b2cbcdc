//! Workflow engine
//!
//! Drives a workflow instance through its step pipeline, one step per
//! `advance`:
//! - The active step is marked `InProgress` and persisted before its action
//!   runs, then `Complete`/`Suspended`/`Failed` is persisted before the call
//!   returns. A crash between calls loses no completed step.
//! - The question step suspends the instance until answers are submitted or
//!   the round is skipped.
//! - Action failures and timeouts are recorded on the step verbatim; the
//!   cursor does not move, so `retry_step` re-runs exactly that step.
//! - Calls on one instance are serialized; a call that finds the instance
//!   busy fails with `ConcurrentModification` instead of waiting. `cancel`
//!   is the exception: it flags the in-flight step and waits for it to end.

use crate::capability::{Prompt, ReasoningProvider, RepositoryContext};
use crate::config::EngineConfig;
use crate::context::ContextSelector;
use crate::error::EngineError;
use crate::prompt;
use crate::questions::QuestionRoundManager;
use crate::response::{parse_analysis, parse_specification};
use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use std::time::Duration;
use tf_model::{
    Analysis, Answers, ContextBundle, InstanceId, InstanceSnapshot, InstanceStatus, OwnerScope,
    QualityReport, QuestionRound, StepKind, StepStatus, TicketBrief, TicketSpec, WorkflowInstance,
};
use tf_quality::QualityEngine;
use tf_store::{
    DocumentDraftStore, DocumentStore, DraftCache, InstanceRepository, ProgressPublisher,
    ProgressSubscription,
};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::Instrument;

/// Result of a step action, applied to the instance afterwards
#[derive(Debug)]
enum StepEffect {
    Context(ContextBundle),
    Analysis(Analysis),
    /// New round with at least one question; suspends the step
    Round(QuestionRound),
    /// Nothing left to ask, or the round cap was reached
    QuestionsDone,
    Specification(TicketSpec),
    Finalized(QualityReport),
}

/// Resumable, single-writer-per-instance workflow engine
pub struct WorkflowEngine {
    config: EngineConfig,
    instances: InstanceRepository,
    progress: ProgressPublisher,
    drafts: DraftCache,
    reasoning: Arc<dyn ReasoningProvider>,
    repository: Arc<dyn RepositoryContext>,
    questions: QuestionRoundManager,
    context: ContextSelector,
    quality: Arc<QualityEngine>,
    /// Only instances with an operation in flight or queued have an entry
    locks: DashMap<InstanceId, Arc<Mutex<()>>>,
    cancel_requests: DashSet<InstanceId>,
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("config", &self.config)
            .field("instances", &self.instances)
            .field("questions", &self.questions)
            .field("active_locks", &self.locks.len())
            .finish_non_exhaustive()
    }
}

impl WorkflowEngine {
    /// Build an engine over `store` with the built-in quality validators
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn DocumentStore>,
        reasoning: Arc<dyn ReasoningProvider>,
        repository: Arc<dyn RepositoryContext>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let quality = Arc::new(QualityEngine::new(config.quality.clone())?);
        let drafts = DocumentDraftStore::new(Arc::clone(&store)).with_ttl(config.draft_ttl());
        Ok(Self {
            instances: InstanceRepository::new(Arc::clone(&store)),
            drafts: DraftCache::new(Arc::new(drafts)),
            progress: ProgressPublisher::new(store, config.progress_grace_period()),
            questions: QuestionRoundManager::new(
                Arc::clone(&reasoning),
                config.max_question_rounds,
                config.default_answer_policy,
            ),
            context: ContextSelector::from_config(&config),
            reasoning,
            repository,
            quality,
            locks: DashMap::new(),
            cancel_requests: DashSet::new(),
            config,
        })
    }

    /// Replace the quality engine, e.g. with custom validators
    #[must_use]
    pub fn with_quality_engine(mut self, quality: Arc<QualityEngine>) -> Self {
        self.quality = quality;
        self
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[inline]
    #[must_use]
    pub fn quality(&self) -> &Arc<QualityEngine> {
        &self.quality
    }

    #[inline]
    #[must_use]
    pub fn progress(&self) -> &ProgressPublisher {
        &self.progress
    }

    /// Breakdown drafts, kept in the instance store with the configured TTL
    #[inline]
    #[must_use]
    pub fn drafts(&self) -> &DraftCache {
        &self.drafts
    }

    /// Create an instance for `ticket`; no step runs yet
    pub async fn start(
        &self,
        scope: &OwnerScope,
        ticket: TicketBrief,
    ) -> Result<InstanceId, EngineError> {
        validate_scope(scope)?;
        if ticket.id.as_str().trim().is_empty() {
            return Err(EngineError::validation("ticket id is empty"));
        }
        if ticket.title.trim().is_empty() && ticket.intent.trim().is_empty() {
            return Err(EngineError::validation("ticket has neither title nor intent"));
        }

        let mut instance = WorkflowInstance::new(ticket, scope.clone());
        self.instances.create(&mut instance).await?;
        self.progress.publish(&instance.snapshot()).await;
        tracing::info!(
            instance_id = %instance.id,
            ticket_id = %instance.ticket.id,
            "workflow instance created"
        );
        Ok(instance.id)
    }

    /// Run the active step with the configured action timeout
    pub async fn advance(
        &self,
        scope: &OwnerScope,
        id: InstanceId,
    ) -> Result<InstanceSnapshot, EngineError> {
        self.advance_with_deadline(scope, id, self.config.action_timeout())
            .await
    }

    /// Run the active step, bounding its action by `deadline`
    ///
    /// Suspended, failed and complete instances are returned unchanged.
    pub async fn advance_with_deadline(
        &self,
        scope: &OwnerScope,
        id: InstanceId,
        deadline: Duration,
    ) -> Result<InstanceSnapshot, EngineError> {
        let _guard = self.try_acquire(id)?;
        let mut instance = self.load_owned(scope, id).await?;
        self.ensure_live(&mut instance).await?;

        match instance.status() {
            InstanceStatus::Pending => {}
            InstanceStatus::Running => {
                // InProgress without a lock holder: the previous attempt died
                tracing::warn!(instance_id = %id, "recovering abandoned in-progress step");
                instance.release_active()?;
            }
            _ => return Ok(instance.snapshot()),
        }

        self.run_active_step(&mut instance, deadline).await?;
        Ok(instance.snapshot())
    }

    /// Advance until the instance stops being runnable, or until the active
    /// step is `stop_before`
    pub async fn drive(
        &self,
        scope: &OwnerScope,
        id: InstanceId,
        stop_before: Option<StepKind>,
    ) -> Result<InstanceSnapshot, EngineError> {
        loop {
            let snapshot = self.advance(scope, id).await?;
            if snapshot.status != InstanceStatus::Pending {
                return Ok(snapshot);
            }
            if stop_before.is_some_and(|stop| snapshot.active_step().is_some_and(|s| s.kind == stop)) {
                return Ok(snapshot);
            }
        }
    }

    /// Close the open round with `answers` and make the question step
    /// runnable again
    pub async fn submit_answers(
        &self,
        scope: &OwnerScope,
        id: InstanceId,
        round_number: u32,
        answers: Answers,
    ) -> Result<InstanceSnapshot, EngineError> {
        let _guard = self.try_acquire(id)?;
        let mut instance = self.load_owned(scope, id).await?;
        self.ensure_live(&mut instance).await?;
        ensure_awaiting_answers(&instance)?;

        let round = QuestionRoundManager::record_answers(&instance, round_number, answers)?;
        let answered = round.answers.len();
        replace_latest_round(&mut instance, round);
        instance.release_active()?;
        self.persist(&mut instance).await?;

        tracing::info!(instance_id = %id, round = round_number, answered, "answers recorded");
        Ok(instance.snapshot())
    }

    /// Skip the open round with synthesized defaults; no further rounds are
    /// generated for this instance. Skipping an already-skipped round
    /// returns the instance unchanged.
    pub async fn skip_questions(
        &self,
        scope: &OwnerScope,
        id: InstanceId,
    ) -> Result<InstanceSnapshot, EngineError> {
        let _guard = self.try_acquire(id)?;
        let mut instance = self.load_owned(scope, id).await?;
        self.ensure_live(&mut instance).await?;

        let Some(open) = instance.open_round() else {
            if instance.latest_round().is_some_and(|r| r.skipped_by_user) {
                return Ok(instance.snapshot());
            }
            return Err(EngineError::validation("no question round to skip"));
        };
        ensure_awaiting_answers(&instance)?;

        let skipped = self.questions.skip(open);
        let round_number = skipped.round_number;
        replace_latest_round(&mut instance, skipped);
        instance.release_active()?;
        self.persist(&mut instance).await?;

        tracing::info!(instance_id = %id, round = round_number, "question round skipped");
        Ok(instance.snapshot())
    }

    /// Reset the failed step and run it again
    pub async fn retry_step(
        &self,
        scope: &OwnerScope,
        id: InstanceId,
        step_id: u32,
    ) -> Result<InstanceSnapshot, EngineError> {
        self.retry_step_with_deadline(scope, id, step_id, self.config.action_timeout())
            .await
    }

    pub async fn retry_step_with_deadline(
        &self,
        scope: &OwnerScope,
        id: InstanceId,
        step_id: u32,
        deadline: Duration,
    ) -> Result<InstanceSnapshot, EngineError> {
        let _guard = self.try_acquire(id)?;
        let mut instance = self.load_owned(scope, id).await?;
        self.ensure_live(&mut instance).await?;

        let step = instance
            .step(step_id)
            .ok_or_else(|| EngineError::validation(format!("unknown step {step_id}")))?;
        if step.status != StepStatus::Failed {
            return Err(EngineError::validation(format!(
                "step {step_id} is {:?}, not failed",
                step.status
            )));
        }
        instance.reset_failed(step_id)?;
        tracing::info!(instance_id = %id, step_id, "retrying step");

        self.run_active_step(&mut instance, deadline).await?;
        Ok(instance.snapshot())
    }

    /// Cooperative cancel
    ///
    /// Takes effect at the next step boundary. A step action already in
    /// flight runs to completion and its result is discarded; this call
    /// returns once that step has ended and the cancel is persisted. An
    /// instance that completes first stays complete and the cancel fails
    /// with a validation error.
    pub async fn cancel(&self, scope: &OwnerScope, id: InstanceId) -> Result<(), EngineError> {
        let instance = self.load_owned(scope, id).await?;
        if instance.cancelled {
            return Ok(());
        }
        if instance.status() == InstanceStatus::Complete {
            return Err(EngineError::validation("instance is already complete"));
        }

        let _guard = match self.try_acquire(id) {
            Ok(guard) => guard,
            Err(_) => {
                self.cancel_requests.insert(id);
                tracing::debug!(instance_id = %id, "cancel requested while a step is in flight");
                self.acquire(id).await
            }
        };
        self.cancel_requests.remove(&id);

        let mut instance = self.instances.load(id).await?;
        if instance.cancelled {
            return Ok(());
        }
        if instance.status() == InstanceStatus::Complete {
            return Err(EngineError::validation("instance completed before the cancel"));
        }
        instance.cancelled = true;
        instance.touch();
        self.persist(&mut instance).await?;
        tracing::info!(instance_id = %id, "instance cancelled");
        Ok(())
    }

    pub async fn snapshot(
        &self,
        scope: &OwnerScope,
        id: InstanceId,
    ) -> Result<InstanceSnapshot, EngineError> {
        Ok(self.load_owned(scope, id).await?.snapshot())
    }

    /// Observe an instance's progress; it need not exist yet
    #[must_use]
    pub fn subscribe(&self, id: InstanceId) -> ProgressSubscription {
        self.progress.subscribe(id)
    }

    /// Instances currently holding or waiting on their write lock
    #[must_use]
    pub fn active_instances(&self) -> usize {
        self.locks.len()
    }

    fn lock_for(&self, id: InstanceId) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.entry(id).or_default().value())
    }

    fn try_acquire(&self, id: InstanceId) -> Result<InstanceGuard<'_>, EngineError> {
        let guard = self
            .lock_for(id)
            .try_lock_owned()
            .map_err(|_| EngineError::ConcurrentModification(InstanceRepository::key(id)))?;
        Ok(InstanceGuard {
            engine: self,
            id,
            guard: Some(guard),
        })
    }

    async fn acquire(&self, id: InstanceId) -> InstanceGuard<'_> {
        let guard = self.lock_for(id).lock_owned().await;
        InstanceGuard {
            engine: self,
            id,
            guard: Some(guard),
        }
    }

    /// Drop the lock entry when nobody holds or waits on it
    fn release_lock(&self, id: InstanceId) {
        self.locks.remove_if(&id, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Consume a pending cancel request for `id`
    fn take_cancel_request(&self, id: InstanceId) -> bool {
        self.cancel_requests.remove(&id).is_some()
    }

    /// Load an instance visible to `scope`; other owners see `NotFound`
    async fn load_owned(
        &self,
        scope: &OwnerScope,
        id: InstanceId,
    ) -> Result<WorkflowInstance, EngineError> {
        let instance = self.instances.load(id).await?;
        if instance.owner != *scope {
            return Err(EngineError::NotFound(InstanceRepository::key(id)));
        }
        Ok(instance)
    }

    async fn persist(&self, instance: &mut WorkflowInstance) -> Result<(), EngineError> {
        instance.check_invariants()?;
        self.instances.save(instance).await?;
        self.progress.publish(&instance.snapshot()).await;
        Ok(())
    }

    /// Fail with `Cancelled` if the instance is or should be cancelled
    ///
    /// A cancel request against a complete instance is dropped.
    async fn ensure_live(&self, instance: &mut WorkflowInstance) -> Result<(), EngineError> {
        if instance.cancelled {
            return Err(EngineError::Cancelled);
        }
        if self.take_cancel_request(instance.id) {
            if instance.status() == InstanceStatus::Complete {
                tracing::debug!(
                    instance_id = %instance.id,
                    "cancel request for a complete instance dropped"
                );
                return Ok(());
            }
            instance.cancelled = true;
            instance.touch();
            self.persist(instance).await?;
            tracing::info!(instance_id = %instance.id, "instance cancelled");
            return Err(EngineError::Cancelled);
        }
        Ok(())
    }

    async fn run_active_step(
        &self,
        instance: &mut WorkflowInstance,
        deadline: Duration,
    ) -> Result<(), EngineError> {
        let kind = instance.begin_active()?;
        let span = tracing::info_span!(
            "step",
            instance_id = %instance.id,
            ticket_id = %instance.ticket.id,
            step = %kind,
        );

        async {
            self.persist(instance).await?;
            tracing::info!("step started");

            let outcome = match tokio::time::timeout(deadline, self.execute(kind, instance)).await {
                Ok(result) => result,
                Err(_) => Err(EngineError::Timeout {
                    duration_ms: u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
                }),
            };

            if self.take_cancel_request(instance.id) {
                tracing::warn!("instance cancelled during step; result discarded");
                instance.release_active()?;
                instance.cancelled = true;
                self.persist(instance).await?;
                return Err(EngineError::Cancelled);
            }

            match outcome {
                Ok(effect) => apply(instance, effect)?,
                Err(err) => {
                    tracing::error!(kind = err.kind(), "step failed: {}", err);
                    instance.fail_active(err.to_string())?;
                }
            }
            self.persist(instance).await?;
            tracing::info!(status = ?instance.status(), "step finished");

            // requested after the result was taken: the boundary is now
            if self.take_cancel_request(instance.id)
                && instance.status() != InstanceStatus::Complete
            {
                instance.cancelled = true;
                instance.touch();
                self.persist(instance).await?;
                tracing::info!("instance cancelled at step boundary");
                return Err(EngineError::Cancelled);
            }
            Ok::<(), EngineError>(())
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        kind: StepKind,
        instance: &WorkflowInstance,
    ) -> Result<StepEffect, EngineError> {
        match kind {
            StepKind::Context => self
                .context
                .gather(self.repository.as_ref(), &instance.ticket)
                .await
                .map(StepEffect::Context),
            StepKind::Analysis => {
                let raw = self.invoke(&prompt::analysis(instance)).await?;
                parse_analysis(&raw).map(StepEffect::Analysis)
            }
            StepKind::Questions => {
                let skipped = instance.latest_round().is_some_and(|r| r.skipped_by_user);
                if skipped || self.questions.cap_reached(instance) {
                    return Ok(StepEffect::QuestionsDone);
                }
                let round = self.questions.generate_round(instance).await?;
                if round.questions.is_empty() {
                    Ok(StepEffect::QuestionsDone)
                } else {
                    Ok(StepEffect::Round(round))
                }
            }
            StepKind::Specification => {
                let raw = self.invoke(&prompt::specification(instance)).await?;
                parse_specification(&raw).map(StepEffect::Specification)
            }
            StepKind::Finalization => {
                let spec = instance
                    .outputs
                    .specification
                    .as_ref()
                    .ok_or_else(|| EngineError::validation("no specification to finalize"))?;
                Ok(StepEffect::Finalized(self.quality.score(spec)))
            }
        }
    }

    async fn invoke(&self, prompt: &Prompt) -> Result<String, EngineError> {
        tracing::debug!(task = prompt.task.as_str(), bytes = prompt.body.len(), "invoking reasoning");
        let raw = self.reasoning.invoke(prompt).await?;
        tracing::debug!(task = prompt.task.as_str(), bytes = raw.len(), "reasoning response");
        Ok(raw)
    }
}

/// Held write lock on one instance; prunes the lock entry on release
struct InstanceGuard<'a> {
    engine: &'a WorkflowEngine,
    id: InstanceId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for InstanceGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.engine.release_lock(self.id);
    }
}

fn validate_scope(scope: &OwnerScope) -> Result<(), EngineError> {
    if scope.workspace_id.trim().is_empty() || scope.user_id.trim().is_empty() {
        return Err(EngineError::validation("owner scope is incomplete"));
    }
    Ok(())
}

fn ensure_awaiting_answers(instance: &WorkflowInstance) -> Result<(), EngineError> {
    match instance.active_step() {
        Some(step) if step.kind.is_question_step() && step.status == StepStatus::Suspended => Ok(()),
        _ => Err(EngineError::validation("instance is not waiting for answers")),
    }
}

fn replace_latest_round(instance: &mut WorkflowInstance, round: QuestionRound) {
    if let Some(last) = instance.rounds.last_mut() {
        *last = round;
    }
}

fn apply(instance: &mut WorkflowInstance, effect: StepEffect) -> Result<(), EngineError> {
    match effect {
        StepEffect::Context(bundle) => {
            let details = format!(
                "{} of {} files selected ({} bytes)",
                bundle.files.len(),
                bundle.tree_size,
                bundle.total_bytes()
            );
            instance.outputs.context = Some(bundle);
            instance.complete_active(Some(details))?;
        }
        StepEffect::Analysis(analysis) => {
            let details = format!(
                "{:?} complexity, {} affected areas",
                analysis.complexity,
                analysis.affected_areas.len()
            );
            instance.outputs.analysis = Some(analysis);
            instance.complete_active(Some(details))?;
        }
        StepEffect::Round(round) => {
            let details = format!(
                "round {}: {} questions awaiting answers",
                round.round_number,
                round.questions.len()
            );
            instance.rounds.push(round);
            instance.suspend_active(Some(details))?;
        }
        StepEffect::QuestionsDone => {
            let details = format!("{} clarification rounds closed", instance.rounds.len());
            instance.complete_active(Some(details))?;
        }
        StepEffect::Specification(spec) => {
            let details = spec.title.clone();
            instance.outputs.specification = Some(spec);
            instance.complete_active(Some(details))?;
        }
        StepEffect::Finalized(report) => {
            let (overall, gate, blockers) = (report.overall, report.gate, report.blockers());
            instance.outputs.quality = Some(report);
            if gate.allows_creation() {
                instance.complete_active(Some(format!("quality score {overall:.0} ({gate:?})")))?;
            } else if blockers.is_empty() {
                instance.fail_active(format!(
                    "quality score {overall:.0} is below the creation threshold"
                ))?;
            } else {
                instance.fail_active(format!(
                    "quality gate blocked creation (score {overall:.0}): {}",
                    blockers.join("; ")
                ))?;
            }
        }
    }
    Ok(())
}
