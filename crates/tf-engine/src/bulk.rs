//! Bulk enrichment coordinator
//!
//! Fans a batch of tickets out over a bounded worker pool in two phases:
//! enrichment runs every ticket up to its specification step (answering
//! questions is left to the user), finalization applies one answer set per
//! ticket and runs the remaining steps. One ticket's failure never stops
//! the others; results are reported per ticket in input order.

use crate::engine::WorkflowEngine;
use crate::error::EngineError;
use dashmap::DashMap;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tf_model::{
    Answers, InstanceId, InstanceSnapshot, InstanceStatus, OwnerScope, StepKind, TaskId,
    TicketBrief, TicketId,
};
use tokio::sync::{broadcast, Semaphore};
use ulid::Ulid;

const EVENT_CAPACITY: usize = 1024;

/// Batch phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkPhase {
    Idle,
    Enriching,
    /// Enrichment done; waiting for the user's answers
    Answering,
    Finalizing,
    Complete,
    /// Every ticket failed
    Error,
}

/// Per-ticket outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Succeeded(Box<InstanceSnapshot>),
    Failed {
        instance_id: Option<InstanceId>,
        error: String,
    },
}

impl Outcome {
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Succeeded(_))
    }

    #[must_use]
    pub fn instance_id(&self) -> Option<InstanceId> {
        match self {
            Outcome::Succeeded(snapshot) => Some(snapshot.id),
            Outcome::Failed { instance_id, .. } => *instance_id,
        }
    }
}

/// A ticket's task identity and the last event sequence it emitted
///
/// Carried from the enrichment report into finalization so one ticket keeps
/// one task id and its sequence keeps increasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCursor {
    pub task_id: TaskId,
    pub last_sequence: u64,
}

/// Result of one bulk phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkReport {
    pub phase: BulkPhase,
    /// Keyed by ticket, in input order
    pub results: IndexMap<TicketId, Outcome>,
    pub succeeded_count: usize,
    pub failed_count: usize,
    #[serde(default)]
    pub tasks: IndexMap<TicketId, TaskCursor>,
}

impl BulkReport {
    fn from_results(
        results: IndexMap<TicketId, Outcome>,
        tasks: IndexMap<TicketId, TaskCursor>,
        success_phase: BulkPhase,
    ) -> Self {
        let succeeded_count = results.values().filter(|o| o.is_success()).count();
        let failed_count = results.len() - succeeded_count;
        let phase = if succeeded_count > 0 {
            success_phase
        } else {
            BulkPhase::Error
        };
        Self {
            phase,
            results,
            succeeded_count,
            failed_count,
            tasks,
        }
    }

    /// Error message per failed ticket
    #[must_use]
    pub fn errors(&self) -> IndexMap<TicketId, String> {
        self.results
            .iter()
            .filter_map(|(ticket, outcome)| match outcome {
                Outcome::Failed { error, .. } => Some((ticket.clone(), error.clone())),
                Outcome::Succeeded(_) => None,
            })
            .collect()
    }

    #[must_use]
    pub fn snapshot(&self, ticket: &TicketId) -> Option<&InstanceSnapshot> {
        match self.results.get(ticket)? {
            Outcome::Succeeded(snapshot) => Some(snapshot),
            Outcome::Failed { .. } => None,
        }
    }
}

/// Stage a task reached, as carried on progress events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStage {
    Queued,
    Running,
    AwaitingAnswers,
    /// Ready for finalization without questions
    Ready,
    Finalized,
    Failed,
}

/// Progress for one ticket inside a batch
///
/// `sequence` is strictly increasing per ticket, across both phases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkProgressEvent {
    pub task_id: TaskId,
    pub ticket_id: TicketId,
    pub instance_id: Option<InstanceId>,
    pub sequence: u64,
    pub stage: TaskStage,
    pub message: String,
}

/// Bounded fan-out of workflow instances
#[derive(Debug, Clone)]
pub struct BulkEnrichmentCoordinator {
    engine: Arc<WorkflowEngine>,
    workers: usize,
    events: broadcast::Sender<BulkProgressEvent>,
}

impl BulkEnrichmentCoordinator {
    /// Pool size comes from the engine configuration
    #[must_use]
    pub fn new(engine: Arc<WorkflowEngine>) -> Self {
        let workers = engine.config().bulk_workers;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            engine,
            workers: workers.max(1),
            events,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    #[inline]
    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    #[inline]
    #[must_use]
    pub fn engine(&self) -> &Arc<WorkflowEngine> {
        &self.engine
    }

    /// Progress events for every batch this coordinator runs
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BulkProgressEvent> {
        self.events.subscribe()
    }

    /// Run every ticket up to its specification step
    ///
    /// Succeeded tickets are either suspended on a question round or ready
    /// for finalization. The phase is `Answering` unless every ticket
    /// failed.
    pub async fn run_enrichment(
        &self,
        scope: &OwnerScope,
        tickets: Vec<TicketBrief>,
    ) -> Result<BulkReport, EngineError> {
        self.run_enrichment_counted(scope, tickets, Arc::new(AtomicUsize::new(0)))
            .await
    }

    /// Apply one answer set per ticket and run the remaining steps
    ///
    /// Tickets without answers have their open round skipped. Rounds raised
    /// after the answers were applied are skipped too. Tickets that failed
    /// enrichment are carried over unchanged.
    pub async fn finalize(
        &self,
        scope: &OwnerScope,
        enrichment: &BulkReport,
        answers: &HashMap<TicketId, Answers>,
    ) -> Result<BulkReport, EngineError> {
        self.finalize_counted(scope, enrichment, answers, Arc::new(AtomicUsize::new(0)))
            .await
    }

    async fn run_enrichment_counted(
        &self,
        scope: &OwnerScope,
        tickets: Vec<TicketBrief>,
        completed: Arc<AtomicUsize>,
    ) -> Result<BulkReport, EngineError> {
        validate_batch(&tickets)?;
        tracing::info!(
            tickets = tickets.len(),
            workers = self.workers,
            "bulk enrichment started"
        );

        let permits = Arc::new(Semaphore::new(self.workers));
        let mut order = Vec::with_capacity(tickets.len());
        let mut handles = Vec::with_capacity(tickets.len());
        for ticket in tickets {
            let task = Task::new(self.clone(), ticket.id.clone(), None);
            task.emit(None, TaskStage::Queued, "queued");
            order.push(task.clone());

            let permits = Arc::clone(&permits);
            let scope = scope.clone();
            let completed = Arc::clone(&completed);
            handles.push(tokio::spawn(async move {
                let outcome = match permits.acquire_owned().await {
                    Ok(_permit) => task.enrich(&scope, ticket).await,
                    Err(_) => Outcome::Failed {
                        instance_id: None,
                        error: "worker pool closed".to_string(),
                    },
                };
                completed.fetch_add(1, Ordering::SeqCst);
                outcome
            }));
        }

        let (results, tasks) = collect(order, handles).await;
        let report = BulkReport::from_results(results, tasks, BulkPhase::Answering);
        tracing::info!(
            succeeded = report.succeeded_count,
            failed = report.failed_count,
            phase = ?report.phase,
            "bulk enrichment finished"
        );
        Ok(report)
    }

    async fn finalize_counted(
        &self,
        scope: &OwnerScope,
        enrichment: &BulkReport,
        answers: &HashMap<TicketId, Answers>,
        completed: Arc<AtomicUsize>,
    ) -> Result<BulkReport, EngineError> {
        if enrichment.results.is_empty() {
            return Err(EngineError::validation("bulk report has no tickets"));
        }
        tracing::info!(
            tickets = enrichment.succeeded_count,
            workers = self.workers,
            "bulk finalization started"
        );

        let permits = Arc::new(Semaphore::new(self.workers));
        let mut carried = IndexMap::new();
        let mut order = Vec::new();
        let mut handles = Vec::new();
        for (ticket_id, outcome) in &enrichment.results {
            let Outcome::Succeeded(snapshot) = outcome else {
                carried.insert(ticket_id.clone(), outcome.clone());
                completed.fetch_add(1, Ordering::SeqCst);
                continue;
            };
            let cursor = enrichment.tasks.get(ticket_id).copied();
            let task = Task::new(self.clone(), ticket_id.clone(), cursor);
            order.push(task.clone());

            let instance_id = snapshot.id;
            let ticket_answers = answers.get(ticket_id).cloned();
            let permits = Arc::clone(&permits);
            let scope = scope.clone();
            let completed = Arc::clone(&completed);
            handles.push(tokio::spawn(async move {
                let outcome = match permits.acquire_owned().await {
                    Ok(_permit) => task.finalize(&scope, instance_id, ticket_answers).await,
                    Err(_) => Outcome::Failed {
                        instance_id: Some(instance_id),
                        error: "worker pool closed".to_string(),
                    },
                };
                completed.fetch_add(1, Ordering::SeqCst);
                outcome
            }));
        }

        let (mut finalized, mut cursors) = collect(order, handles).await;
        // restore input order across carried-over failures
        let results: IndexMap<TicketId, Outcome> = enrichment
            .results
            .keys()
            .filter_map(|id| {
                finalized
                    .swap_remove(id)
                    .or_else(|| carried.swap_remove(id))
                    .map(|o| (id.clone(), o))
            })
            .collect();
        let tasks: IndexMap<TicketId, TaskCursor> = enrichment
            .results
            .keys()
            .filter_map(|id| {
                cursors
                    .swap_remove(id)
                    .or_else(|| enrichment.tasks.get(id).copied())
                    .map(|c| (id.clone(), c))
            })
            .collect();

        let report = BulkReport::from_results(results, tasks, BulkPhase::Complete);
        tracing::info!(
            succeeded = report.succeeded_count,
            failed = report.failed_count,
            phase = ?report.phase,
            "bulk finalization finished"
        );
        Ok(report)
    }
}

fn validate_batch(tickets: &[TicketBrief]) -> Result<(), EngineError> {
    if tickets.is_empty() {
        return Err(EngineError::validation("bulk request has no tickets"));
    }
    let mut seen = HashSet::new();
    for ticket in tickets {
        if !seen.insert(&ticket.id) {
            return Err(EngineError::validation(format!(
                "ticket {} appears more than once",
                ticket.id
            )));
        }
    }
    Ok(())
}

/// Await workers in input order; a panicked worker becomes a failure
async fn collect(
    order: Vec<Task>,
    handles: Vec<tokio::task::JoinHandle<Outcome>>,
) -> (IndexMap<TicketId, Outcome>, IndexMap<TicketId, TaskCursor>) {
    let joined = futures::future::join_all(handles).await;
    let mut results = IndexMap::with_capacity(order.len());
    let mut cursors = IndexMap::with_capacity(order.len());
    for (task, joined) in order.into_iter().zip(joined) {
        let outcome = joined.unwrap_or_else(|e| Outcome::Failed {
            instance_id: None,
            error: format!("worker aborted: {e}"),
        });
        cursors.insert(task.ticket_id.clone(), task.cursor());
        results.insert(task.ticket_id, outcome);
    }
    (results, cursors)
}

/// One ticket's unit of bulk work
///
/// Clones share the event sequence, so the coordinator can read the final
/// cursor even when the worker panicked.
#[derive(Clone)]
struct Task {
    coordinator: BulkEnrichmentCoordinator,
    id: TaskId,
    ticket_id: TicketId,
    sequence: Arc<AtomicU64>,
}

impl Task {
    fn new(
        coordinator: BulkEnrichmentCoordinator,
        ticket_id: TicketId,
        resume: Option<TaskCursor>,
    ) -> Self {
        let (id, last) = resume.map_or_else(|| (TaskId::new(), 0), |c| (c.task_id, c.last_sequence));
        Self {
            coordinator,
            id,
            ticket_id,
            sequence: Arc::new(AtomicU64::new(last)),
        }
    }

    fn cursor(&self) -> TaskCursor {
        TaskCursor {
            task_id: self.id,
            last_sequence: self.sequence.load(Ordering::SeqCst),
        }
    }

    fn emit(&self, instance_id: Option<InstanceId>, stage: TaskStage, message: impl Into<String>) {
        let event = BulkProgressEvent {
            task_id: self.id,
            ticket_id: self.ticket_id.clone(),
            instance_id,
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
            stage,
            message: message.into(),
        };
        // no receivers is fine
        let _ = self.coordinator.events.send(event);
    }

    fn fail(&self, instance_id: Option<InstanceId>, error: String) -> Outcome {
        tracing::warn!(ticket_id = %self.ticket_id, "bulk ticket failed: {}", error);
        self.emit(instance_id, TaskStage::Failed, error.clone());
        Outcome::Failed { instance_id, error }
    }

    async fn enrich(&self, scope: &OwnerScope, ticket: TicketBrief) -> Outcome {
        let engine = &self.coordinator.engine;
        let id = match engine.start(scope, ticket).await {
            Ok(id) => id,
            Err(err) => return self.fail(None, err.to_string()),
        };
        self.emit(Some(id), TaskStage::Running, "instance created");

        loop {
            let snapshot = match engine.advance(scope, id).await {
                Ok(snapshot) => snapshot,
                Err(err) => return self.fail(Some(id), err.to_string()),
            };
            match snapshot.status {
                InstanceStatus::Pending => {
                    let next = snapshot.active_step().map(|s| s.kind);
                    if next == Some(StepKind::Specification) {
                        self.emit(Some(id), TaskStage::Ready, "no questions needed");
                        return Outcome::Succeeded(Box::new(snapshot));
                    }
                    let done = snapshot.current_step_index;
                    self.emit(Some(id), TaskStage::Running, format!("{done} steps complete"));
                }
                InstanceStatus::Suspended => {
                    let asked = snapshot.open_round.as_ref().map_or(0, |r| r.questions.len());
                    self.emit(
                        Some(id),
                        TaskStage::AwaitingAnswers,
                        format!("{asked} questions awaiting answers"),
                    );
                    return Outcome::Succeeded(Box::new(snapshot));
                }
                InstanceStatus::Complete => {
                    self.emit(Some(id), TaskStage::Finalized, "complete");
                    return Outcome::Succeeded(Box::new(snapshot));
                }
                InstanceStatus::Failed => {
                    let error = snapshot
                        .failure()
                        .map_or_else(|| "step failed".to_string(), |(_, e)| e.to_string());
                    return self.fail(Some(id), error);
                }
                InstanceStatus::Cancelled => {
                    return self.fail(Some(id), EngineError::Cancelled.to_string());
                }
                InstanceStatus::Running => {}
            }
        }
    }

    async fn finalize(
        &self,
        scope: &OwnerScope,
        id: InstanceId,
        answers: Option<Answers>,
    ) -> Outcome {
        match self.run_to_end(scope, id, answers).await {
            Ok(snapshot) => match snapshot.status {
                InstanceStatus::Complete => {
                    let score = snapshot.quality.as_ref().map_or(0.0, |q| q.overall);
                    self.emit(Some(id), TaskStage::Finalized, format!("quality score {score:.0}"));
                    Outcome::Succeeded(Box::new(snapshot))
                }
                InstanceStatus::Cancelled => self.fail(Some(id), EngineError::Cancelled.to_string()),
                _ => {
                    let error = snapshot
                        .failure()
                        .map_or_else(|| "step failed".to_string(), |(_, e)| e.to_string());
                    self.fail(Some(id), error)
                }
            },
            Err(err) => self.fail(Some(id), err.to_string()),
        }
    }

    async fn run_to_end(
        &self,
        scope: &OwnerScope,
        id: InstanceId,
        answers: Option<Answers>,
    ) -> Result<InstanceSnapshot, EngineError> {
        let engine = &self.coordinator.engine;
        let current = engine.snapshot(scope, id).await?;
        if let Some(round) = &current.open_round {
            match answers {
                Some(answers) if !answers.is_empty() => {
                    engine
                        .submit_answers(scope, id, round.round_number, answers)
                        .await?;
                }
                _ => {
                    engine.skip_questions(scope, id).await?;
                }
            }
        }
        self.emit(Some(id), TaskStage::Running, "finalizing");

        loop {
            let snapshot = engine.drive(scope, id, None).await?;
            if snapshot.status == InstanceStatus::Suspended {
                engine.skip_questions(scope, id).await?;
                continue;
            }
            return Ok(snapshot);
        }
    }
}

/// Identifier of a background bulk job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BulkJobId(pub Ulid);

impl BulkJobId {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for BulkJobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BulkJobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pollable view of a background bulk job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkJobStatus {
    pub phase: BulkPhase,
    pub total: usize,
    pub completed: usize,
    pub report: Option<BulkReport>,
    pub error: Option<String>,
}

impl BulkJobStatus {
    #[inline]
    #[must_use]
    pub fn is_done(&self) -> bool {
        matches!(self.phase, BulkPhase::Answering | BulkPhase::Complete | BulkPhase::Error)
            && (self.report.is_some() || self.error.is_some())
    }
}

#[derive(Debug)]
struct JobState {
    total: usize,
    completed: Arc<AtomicUsize>,
    phase: parking_lot::Mutex<BulkPhase>,
    report: parking_lot::Mutex<Option<BulkReport>>,
    error: parking_lot::Mutex<Option<String>>,
}

impl JobState {
    fn new(total: usize, phase: BulkPhase) -> Self {
        Self {
            total,
            completed: Arc::new(AtomicUsize::new(0)),
            phase: parking_lot::Mutex::new(phase),
            report: parking_lot::Mutex::new(None),
            error: parking_lot::Mutex::new(None),
        }
    }

    fn finish(&self, result: Result<BulkReport, EngineError>) {
        match result {
            Ok(report) => {
                *self.phase.lock() = report.phase;
                *self.report.lock() = Some(report);
            }
            Err(err) => {
                *self.phase.lock() = BulkPhase::Error;
                *self.error.lock() = Some(err.to_string());
            }
        }
    }

    fn status(&self) -> BulkJobStatus {
        BulkJobStatus {
            phase: *self.phase.lock(),
            total: self.total,
            completed: self.completed.load(Ordering::SeqCst),
            report: self.report.lock().clone(),
            error: self.error.lock().clone(),
        }
    }
}

/// Background bulk jobs, started and then polled by id
#[derive(Debug, Clone)]
pub struct BulkJobs {
    coordinator: BulkEnrichmentCoordinator,
    jobs: Arc<DashMap<BulkJobId, Arc<JobState>>>,
}

impl BulkJobs {
    #[must_use]
    pub fn new(coordinator: BulkEnrichmentCoordinator) -> Self {
        Self {
            coordinator,
            jobs: Arc::new(DashMap::new()),
        }
    }

    #[inline]
    #[must_use]
    pub fn coordinator(&self) -> &BulkEnrichmentCoordinator {
        &self.coordinator
    }

    /// Start enrichment in the background
    pub fn start_enrichment(
        &self,
        scope: OwnerScope,
        tickets: Vec<TicketBrief>,
    ) -> Result<BulkJobId, EngineError> {
        validate_batch(&tickets)?;
        let id = BulkJobId::new();
        let state = Arc::new(JobState::new(tickets.len(), BulkPhase::Enriching));
        self.jobs.insert(id, Arc::clone(&state));

        let coordinator = self.coordinator.clone();
        tokio::spawn(async move {
            let completed = Arc::clone(&state.completed);
            let result = coordinator
                .run_enrichment_counted(&scope, tickets, completed)
                .await;
            state.finish(result);
        });
        tracing::info!(job_id = %id, "bulk enrichment job started");
        Ok(id)
    }

    /// Start finalization of an enrichment report in the background
    pub fn start_finalization(
        &self,
        scope: OwnerScope,
        enrichment: BulkReport,
        answers: HashMap<TicketId, Answers>,
    ) -> Result<BulkJobId, EngineError> {
        if enrichment.results.is_empty() {
            return Err(EngineError::validation("bulk report has no tickets"));
        }
        let id = BulkJobId::new();
        let state = Arc::new(JobState::new(
            enrichment.results.len(),
            BulkPhase::Finalizing,
        ));
        self.jobs.insert(id, Arc::clone(&state));

        let coordinator = self.coordinator.clone();
        tokio::spawn(async move {
            let completed = Arc::clone(&state.completed);
            let result = coordinator
                .finalize_counted(&scope, &enrichment, &answers, completed)
                .await;
            state.finish(result);
        });
        tracing::info!(job_id = %id, "bulk finalization job started");
        Ok(id)
    }

    #[must_use]
    pub fn poll(&self, id: BulkJobId) -> Option<BulkJobStatus> {
        self.jobs.get(&id).map(|state| state.status())
    }

    /// Drop a finished job's record
    pub fn forget(&self, id: BulkJobId) -> bool {
        self.jobs.remove(&id).is_some()
    }
}
