use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tf_engine::{EngineConfig, EngineError, PromptTask, WorkflowEngine};
use tf_model::{
    AnswerValue, Answers, InstanceStatus, QualityGate, RepositoryRef, StepKind, StepStatus,
    TicketBrief,
};
use tf_store::{MemoryStore, ProgressUpdate};
use tf_test_utils::{
    brief, engine_with, fixed_quality, scope, setup_engine, FixedScoreValidator,
    ScriptedReasoning, StaticRepository,
};

fn answers(pairs: &[(&str, &str)]) -> Answers {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), AnswerValue::Single((*v).to_string())))
        .collect()
}

fn engine_scoring(reasoning: Arc<ScriptedReasoning>, validator: FixedScoreValidator) -> WorkflowEngine {
    engine_with(EngineConfig::default(), Arc::new(MemoryStore::new()), reasoning)
        .with_quality_engine(fixed_quality(validator))
}

#[tokio::test]
async fn answered_ticket_completes_with_high_confidence() {
    let reasoning = Arc::new(ScriptedReasoning::new());
    let engine = engine_scoring(Arc::clone(&reasoning), FixedScoreValidator::new("fixed", 0.85));
    let id = engine.start(&scope(), brief("T-1")).await.unwrap();

    let snap = engine.drive(&scope(), id, None).await.unwrap();
    assert_eq!(snap.status, InstanceStatus::Suspended);
    let round = snap.open_round.clone().unwrap();
    assert_eq!(round.round_number, 1);
    assert_eq!(round.questions.len(), 2);

    engine
        .submit_answers(&scope(), id, 1, answers(&[("r1-scope", "visible")]))
        .await
        .unwrap();
    let snap = engine.drive(&scope(), id, None).await.unwrap();

    assert_eq!(snap.status, InstanceStatus::Complete);
    assert!(snap.steps.iter().all(|s| s.status == StepStatus::Complete));
    let report = snap.quality.unwrap();
    assert!((report.overall - 85.0).abs() < 1e-9);
    assert_eq!(report.gate, QualityGate::HighConfidence);
    assert!(report.passed);

    let synthesis = reasoning
        .prompts()
        .into_iter()
        .find(|p| p.task == PromptTask::Specification)
        .unwrap();
    assert_eq!(synthesis.context["answers"][0]["answer"], "visible");
    // the optional question was left unanswered
    assert_eq!(synthesis.context["assumptions"].as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn good_spec_passes_default_validators() {
    let (engine, _) = setup_engine(Arc::new(ScriptedReasoning::new()));
    let id = engine.start(&scope(), brief("T-2")).await.unwrap();
    engine.drive(&scope(), id, None).await.unwrap();
    engine.skip_questions(&scope(), id).await.unwrap();

    let snap = engine.drive(&scope(), id, None).await.unwrap();
    assert_eq!(snap.status, InstanceStatus::Complete);
    let report = snap.quality.unwrap();
    assert!(report.overall >= 80.0, "overall {}", report.overall);
    assert_eq!(report.gate, QualityGate::HighConfidence);
    assert_eq!(snap.specification.unwrap().title, "Export report as CSV");
}

#[tokio::test]
async fn blocker_fails_finalization_with_reason() {
    let engine = engine_scoring(
        Arc::new(ScriptedReasoning::new()),
        FixedScoreValidator::new("acceptance_criteria", 0.42)
            .with_blocker("no acceptance criteria defined"),
    );
    let id = engine.start(&scope(), brief("T-3")).await.unwrap();
    engine.drive(&scope(), id, None).await.unwrap();
    engine.skip_questions(&scope(), id).await.unwrap();

    let snap = engine.drive(&scope(), id, None).await.unwrap();
    assert_eq!(snap.status, InstanceStatus::Failed);
    let (step, error) = snap.failure().unwrap();
    assert_eq!(step.kind, StepKind::Finalization);
    assert_eq!(
        error,
        "quality gate blocked creation (score 42): acceptance_criteria: no acceptance criteria defined"
    );

    let report = snap.quality.unwrap();
    assert!(!report.passed);
    assert_eq!(report.gate, QualityGate::Blocked);
    assert_eq!(report.blockers(), vec!["acceptance_criteria: no acceptance criteria defined"]);
}

#[tokio::test]
async fn new_engine_resumes_from_store() {
    let reasoning = Arc::new(ScriptedReasoning::new());
    let store = Arc::new(MemoryStore::new());

    let first = engine_with(EngineConfig::default(), Arc::clone(&store), Arc::clone(&reasoning));
    let id = first.start(&scope(), brief("T-4")).await.unwrap();
    let snap = first.drive(&scope(), id, None).await.unwrap();
    assert_eq!(snap.status, InstanceStatus::Suspended);
    drop(first);

    let second = engine_with(EngineConfig::default(), store, Arc::clone(&reasoning));
    let resumed = second.snapshot(&scope(), id).await.unwrap();
    assert_eq!(resumed.status, InstanceStatus::Suspended);
    assert_eq!(resumed.current_step_index, 2);

    second
        .submit_answers(&scope(), id, 1, answers(&[("r1-scope", "all")]))
        .await
        .unwrap();
    let snap = second.drive(&scope(), id, None).await.unwrap();
    assert_eq!(snap.status, InstanceStatus::Complete);
    // completed steps were not re-run
    assert_eq!(reasoning.calls(PromptTask::Analysis), 1);
}

#[tokio::test]
async fn skip_is_idempotent_and_ends_questioning() {
    let reasoning = Arc::new(ScriptedReasoning::new().with_question_rounds(3));
    let (engine, _) = setup_engine(Arc::clone(&reasoning));
    let id = engine.start(&scope(), brief("T-5")).await.unwrap();
    engine.drive(&scope(), id, None).await.unwrap();

    let once = engine.skip_questions(&scope(), id).await.unwrap();
    assert_eq!(once.status, InstanceStatus::Pending);
    let twice = engine.skip_questions(&scope(), id).await.unwrap();
    assert_eq!(twice.version, once.version);

    let snap = engine.drive(&scope(), id, None).await.unwrap();
    assert_eq!(snap.status, InstanceStatus::Complete);
    assert_eq!(snap.rounds_completed, 1);
    assert_eq!(reasoning.calls(PromptTask::Questions), 1);

    let synthesis = reasoning
        .prompts()
        .into_iter()
        .find(|p| p.task == PromptTask::Specification)
        .unwrap();
    assert_eq!(synthesis.context["assumptions"].as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn question_rounds_stop_at_cap() {
    let reasoning = Arc::new(ScriptedReasoning::new().with_question_rounds(5));
    let engine = engine_with(
        EngineConfig::default().with_max_question_rounds(2),
        Arc::new(MemoryStore::new()),
        Arc::clone(&reasoning),
    );
    let id = engine.start(&scope(), brief("T-6")).await.unwrap();

    engine.drive(&scope(), id, None).await.unwrap();
    engine
        .submit_answers(&scope(), id, 1, answers(&[("r1-scope", "all")]))
        .await
        .unwrap();
    let snap = engine.drive(&scope(), id, None).await.unwrap();
    assert_eq!(snap.open_round.as_ref().map(|r| r.round_number), Some(2));

    engine
        .submit_answers(&scope(), id, 2, answers(&[("r2-scope", "visible")]))
        .await
        .unwrap();
    let snap = engine.drive(&scope(), id, None).await.unwrap();
    assert_eq!(snap.status, InstanceStatus::Complete);
    assert_eq!(reasoning.calls(PromptTask::Questions), 2);
}

#[tokio::test]
async fn answer_validation() {
    let (engine, _) = setup_engine(Arc::new(ScriptedReasoning::new()));
    let id = engine.start(&scope(), brief("T-7")).await.unwrap();
    engine.drive(&scope(), id, None).await.unwrap();

    let err = engine
        .submit_answers(&scope(), id, 2, answers(&[("r1-scope", "all")]))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let err = engine
        .submit_answers(&scope(), id, 1, answers(&[("r1-notes", "none")]))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "validation failed: required questions unanswered: r1-scope");

    let err = engine
        .submit_answers(&scope(), id, 1, answers(&[("r1-scope", "sideways")]))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    // nothing was mutated by the rejected calls
    let snap = engine.snapshot(&scope(), id).await.unwrap();
    assert_eq!(snap.status, InstanceStatus::Suspended);
    assert!(snap.open_round.unwrap().answers.is_empty());
}

#[tokio::test]
async fn concurrent_advance_is_rejected() {
    let reasoning = Arc::new(ScriptedReasoning::new());
    reasoning.hang(PromptTask::Analysis, Duration::from_millis(300));
    let (engine, _) = setup_engine(Arc::clone(&reasoning));
    let id = engine.start(&scope(), brief("T-8")).await.unwrap();
    engine.advance(&scope(), id).await.unwrap();

    let background = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.advance(&scope(), id).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = engine.advance(&scope(), id).await.unwrap_err();
    assert!(matches!(err, EngineError::ConcurrentModification(_)));
    assert!(err.is_retryable());

    let snap = background.await.unwrap().unwrap();
    assert_eq!(snap.current_step_index, 2);
}

#[tokio::test]
async fn cancel_discards_in_flight_result() {
    let reasoning = Arc::new(ScriptedReasoning::new());
    reasoning.hang(PromptTask::Analysis, Duration::from_millis(300));
    let (engine, _) = setup_engine(Arc::clone(&reasoning));
    let id = engine.start(&scope(), brief("T-9")).await.unwrap();
    engine.advance(&scope(), id).await.unwrap();

    let background = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.advance(&scope(), id).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    engine.cancel(&scope(), id).await.unwrap();

    let err = background.await.unwrap().unwrap_err();
    assert!(matches!(err, EngineError::Cancelled));

    let snap = engine.snapshot(&scope(), id).await.unwrap();
    assert_eq!(snap.status, InstanceStatus::Cancelled);
    assert_eq!(snap.current_step_index, 1);
    assert_eq!(snap.steps[1].status, StepStatus::Pending);

    let err = engine.advance(&scope(), id).await.unwrap_err();
    assert!(matches!(err, EngineError::Cancelled));
}

#[tokio::test]
async fn cancel_during_final_synthesis_is_durable() {
    let reasoning = Arc::new(ScriptedReasoning::new());
    reasoning.hang(PromptTask::Specification, Duration::from_millis(300));
    let (engine, store) = setup_engine(Arc::clone(&reasoning));
    let id = engine.start(&scope(), brief("T-20")).await.unwrap();
    engine.drive(&scope(), id, None).await.unwrap();
    engine.skip_questions(&scope(), id).await.unwrap();
    let ready = engine
        .drive(&scope(), id, Some(StepKind::Specification))
        .await
        .unwrap();
    assert_eq!(ready.active_step().map(|s| s.kind), Some(StepKind::Specification));

    let background = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.advance(&scope(), id).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    engine.cancel(&scope(), id).await.unwrap();
    assert!(matches!(
        background.await.unwrap().unwrap_err(),
        EngineError::Cancelled
    ));

    // visible through the store as soon as cancel returns
    let other = engine_with(EngineConfig::default(), store, Arc::clone(&reasoning));
    let snap = other.snapshot(&scope(), id).await.unwrap();
    assert_eq!(snap.status, InstanceStatus::Cancelled);
    assert!(snap.specification.is_none());
    assert_eq!(snap.steps[3].status, StepStatus::Pending);

    assert!(matches!(
        engine.advance(&scope(), id).await.unwrap_err(),
        EngineError::Cancelled
    ));
    assert_eq!(engine.active_instances(), 0);
}

#[tokio::test]
async fn cancel_after_completion_leaves_instance_complete() {
    let (engine, _) = setup_engine(Arc::new(ScriptedReasoning::new()));
    let id = engine.start(&scope(), brief("T-21")).await.unwrap();
    engine.drive(&scope(), id, None).await.unwrap();
    engine.skip_questions(&scope(), id).await.unwrap();
    let done = engine.drive(&scope(), id, None).await.unwrap();
    assert_eq!(done.status, InstanceStatus::Complete);

    let err = engine.cancel(&scope(), id).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    let snap = engine.advance(&scope(), id).await.unwrap();
    assert_eq!(snap.status, InstanceStatus::Complete);
    assert_eq!(snap.version, done.version);
}

#[tokio::test]
async fn cancel_idle_instance() {
    let (engine, _) = setup_engine(Arc::new(ScriptedReasoning::new()));
    let id = engine.start(&scope(), brief("T-10")).await.unwrap();
    engine.cancel(&scope(), id).await.unwrap();
    assert_eq!(
        engine.snapshot(&scope(), id).await.unwrap().status,
        InstanceStatus::Cancelled
    );
    // repeated cancel is a no-op
    engine.cancel(&scope(), id).await.unwrap();
}

#[tokio::test]
async fn retry_reruns_only_the_failed_step() {
    let reasoning = Arc::new(ScriptedReasoning::new());
    reasoning.fail("T-11", PromptTask::Analysis, "upstream 503: model overloaded");
    let (engine, _) = setup_engine(Arc::clone(&reasoning));
    let id = engine.start(&scope(), brief("T-11")).await.unwrap();

    let snap = engine.drive(&scope(), id, None).await.unwrap();
    assert_eq!(snap.status, InstanceStatus::Failed);
    let (step, error) = snap.failure().unwrap();
    assert_eq!(step.id, 2);
    assert_eq!(error, "upstream 503: model overloaded");

    // still failing: recorded again, nothing else moves
    let snap = engine.retry_step(&scope(), id, 2).await.unwrap();
    assert_eq!(snap.status, InstanceStatus::Failed);
    assert_eq!(snap.current_step_index, 1);

    reasoning.clear_failure("T-11", PromptTask::Analysis);
    let snap = engine.retry_step(&scope(), id, 2).await.unwrap();
    assert_eq!(snap.status, InstanceStatus::Pending);
    assert_eq!(snap.current_step_index, 2);
    assert!(snap.steps[1].error.is_none());
    assert_eq!(reasoning.calls(PromptTask::Analysis), 3);

    let err = engine.retry_step(&scope(), id, 1).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn timeout_is_recorded_as_step_failure() {
    let reasoning = Arc::new(ScriptedReasoning::new());
    reasoning.hang(PromptTask::Analysis, Duration::from_secs(5));
    let (engine, _) = setup_engine(Arc::clone(&reasoning));
    let id = engine.start(&scope(), brief("T-12")).await.unwrap();
    engine.advance(&scope(), id).await.unwrap();

    let snap = engine
        .advance_with_deadline(&scope(), id, Duration::from_millis(50))
        .await
        .unwrap();
    assert_eq!(snap.status, InstanceStatus::Failed);
    assert_eq!(snap.failure().map(|(_, e)| e), Some("action timed out after 50ms"));

    reasoning.clear_hang(PromptTask::Analysis);
    let snap = engine.retry_step(&scope(), id, 2).await.unwrap();
    assert_eq!(snap.current_step_index, 2);
}

#[tokio::test]
async fn progress_subscription_sees_suspension() {
    let (engine, _) = setup_engine(Arc::new(ScriptedReasoning::new()));
    let id = engine.start(&scope(), brief("T-13")).await.unwrap();
    let mut sub = engine.subscribe(id);

    match sub.next_update().await {
        ProgressUpdate::Snapshot(snap) => assert_eq!(snap.status, InstanceStatus::Pending),
        other => panic!("expected snapshot, got {other:?}"),
    }

    let driver = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.drive(&scope(), id, None).await })
    };

    let suspended = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let ProgressUpdate::Snapshot(snap) = sub.next_update().await {
                if snap.status == InstanceStatus::Suspended {
                    return snap;
                }
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(suspended.open_round.map(|r| r.questions.len()), Some(2));
    driver.await.unwrap().unwrap();
}

#[tokio::test]
async fn subscription_to_unknown_instance_times_out() {
    let engine = engine_with(
        EngineConfig::default().with_progress_grace_period(Duration::from_millis(50)),
        Arc::new(MemoryStore::new()),
        Arc::new(ScriptedReasoning::new()),
    );
    let mut sub = engine.subscribe(tf_model::InstanceId::new());
    assert_eq!(sub.next_update().await, ProgressUpdate::Initializing);
    assert_eq!(sub.next_update().await, ProgressUpdate::TimedOut);
}

#[tokio::test]
async fn other_owner_cannot_see_instance() {
    let (engine, _) = setup_engine(Arc::new(ScriptedReasoning::new()));
    let id = engine.start(&scope(), brief("T-14")).await.unwrap();
    let stranger = tf_model::OwnerScope::new("ws-test", "someone-else");

    assert!(matches!(
        engine.snapshot(&stranger, id).await.unwrap_err(),
        EngineError::NotFound(_)
    ));
    assert!(matches!(
        engine.cancel(&stranger, id).await.unwrap_err(),
        EngineError::NotFound(_)
    ));
}

#[tokio::test]
async fn repository_context_reaches_prompts() {
    let reasoning = Arc::new(ScriptedReasoning::new());
    let repository = StaticRepository::new()
        .with_file("src/report/export.ts", "export function toCsv() {}")
        .with_file("node_modules/lib/index.js", "ignored")
        .with_file("package-lock.json", "{}");
    let engine = WorkflowEngine::new(
        EngineConfig::default(),
        Arc::new(MemoryStore::new()),
        Arc::clone(&reasoning) as Arc<dyn tf_engine::ReasoningProvider>,
        Arc::new(repository),
    )
    .unwrap();

    let ticket = TicketBrief::new("T-15", "CSV export", "Export the report")
        .with_repository(RepositoryRef::new("acme", "web", "main"));
    let id = engine.start(&scope(), ticket).await.unwrap();
    let snap = engine.advance(&scope(), id).await.unwrap();
    assert_eq!(
        snap.steps[0].details.as_deref(),
        Some("1 of 3 files selected (26 bytes)")
    );

    engine.advance(&scope(), id).await.unwrap();
    let analysis = reasoning
        .prompts()
        .into_iter()
        .find(|p| p.task == PromptTask::Analysis)
        .unwrap();
    assert_eq!(analysis.context["files"][0]["path"], "src/report/export.ts");
    assert_eq!(analysis.context["files"].as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn malformed_specification_is_generation_failure() {
    let reasoning = Arc::new(ScriptedReasoning::new());
    reasoning.set_spec_response("I could not produce a ticket, sorry.");
    let (engine, _) = setup_engine(Arc::clone(&reasoning));
    let id = engine.start(&scope(), brief("T-16")).await.unwrap();
    engine.drive(&scope(), id, None).await.unwrap();
    engine.skip_questions(&scope(), id).await.unwrap();

    let snap = engine.drive(&scope(), id, None).await.unwrap();
    assert_eq!(snap.status, InstanceStatus::Failed);
    let (step, error) = snap.failure().unwrap();
    assert_eq!(step.kind, StepKind::Specification);
    assert!(error.starts_with("generation failed:"), "{error}");
}
