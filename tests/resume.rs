//! Resume and approval-state tests.
//!
//! Seeds the output directory the way an earlier run would have left it and
//! checks what a resumed run is allowed to do.

mod common;

use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

use common::*;
use labflow::domain::{ApprovalStatus, Phase, PipelineStage, PipelineState};
use labflow::PipelineError;

const DESIGN: [&str; 3] = ["literature_review", "hypothesis", "methodology"];

#[tokio::test]
async fn test_resume_skips_design_calls() {
    let temp = TempDir::new().unwrap();
    let store = open_store(temp.path()).await;
    seed_design(&store, &DESIGN, ApprovalStatus::Approved).await;

    let invoker = RecordingInvoker::new();
    let gate = ScriptedGate::approving();
    let orchestrator = orchestrator(temp.path(), invoker.clone(), gate.clone()).await;

    let outcome = assert_ok!(orchestrator.run(&project(), true).await);

    assert!(outcome.is_done());
    let roles = invoker.roles();
    for role in DESIGN_ROLES {
        assert!(!roles.contains(&role.to_string()), "{} was called", role);
    }
    assert_eq!(roles.first().map(String::as_str), Some("ExperimentDesigner"));
    assert!(roles.contains(&"ExperimentConductor".to_string()));
    assert!(gate.reviewed().is_empty());
    assert_eq!(outcome.artifacts.len(), 5);

    // Design artifacts are untouched
    for name in DESIGN {
        assert_eq!(store.versions(Phase::Design, name).await.unwrap().len(), 1);
    }

    let methodology = store.get(Phase::Design, "methodology").await.unwrap();
    assert!(invoker.calls()[0].prompt.contains(methodology.trim()));
}

#[tokio::test]
async fn test_resume_with_missing_design_artifact() {
    let temp = TempDir::new().unwrap();
    let store = open_store(temp.path()).await;
    seed_design(&store, &DESIGN[..2], ApprovalStatus::Approved).await;

    let invoker = RecordingInvoker::new();
    let orchestrator =
        orchestrator(temp.path(), invoker.clone(), ScriptedGate::approving()).await;

    let err = assert_err!(orchestrator.run(&project(), true).await);

    match err {
        PipelineError::PreconditionNotMet {
            phase,
            artifact,
            reason,
        } => {
            assert_eq!(phase, Phase::Design);
            assert_eq!(artifact, "methodology");
            assert_eq!(reason, "missing");
        }
        other => panic!("expected PreconditionNotMet, got {:?}", other),
    }
    assert!(invoker.calls().is_empty());
}

#[tokio::test]
async fn test_resume_with_unapproved_design_artifact() {
    let temp = TempDir::new().unwrap();
    let store = open_store(temp.path()).await;
    seed_design(&store, &DESIGN[..1], ApprovalStatus::Approved).await;
    seed_design(&store, &DESIGN[1..], ApprovalStatus::Pending).await;

    let invoker = RecordingInvoker::new();
    let orchestrator =
        orchestrator(temp.path(), invoker.clone(), ScriptedGate::approving()).await;

    let err = assert_err!(orchestrator.run(&project(), true).await);

    assert!(matches!(
        err,
        PipelineError::PreconditionNotMet { ref artifact, ref reason, .. }
            if artifact == "hypothesis" && reason == "not approved"
    ));
    assert!(invoker.calls().is_empty());
}

#[tokio::test]
async fn test_resume_after_failure_reuses_completed_phases() {
    let temp = TempDir::new().unwrap();

    // First run dies in execution/analysis
    let failing = RecordingInvoker::failing_on("ExperimentConductor");
    let first = orchestrator(temp.path(), failing.clone(), ScriptedGate::approving()).await;
    let outcome = assert_ok!(first.run(&project(), false).await);
    assert_eq!(outcome.stage, PipelineStage::Failed);
    drop(first);

    let state = PipelineState::scan(&open_store(temp.path()).await, true)
        .await
        .unwrap();
    assert_eq!(state.stage, PipelineStage::ExecutionAnalysis);

    // Second run picks up at the failed phase
    let invoker = RecordingInvoker::new();
    let second = orchestrator(temp.path(), invoker.clone(), ScriptedGate::approving()).await;
    let outcome = assert_ok!(second.run_from(&project(), Phase::ExecutionAnalysis).await);

    assert!(outcome.is_done());
    assert_eq!(
        invoker.roles(),
        vec![
            "ExperimentConductor",
            "DataAnalyzer",
            "Reporter",
            "KnowledgeDisseminator"
        ]
    );
}

#[tokio::test]
async fn test_run_from_reporting_requires_analysis() {
    let temp = TempDir::new().unwrap();
    let store = open_store(temp.path()).await;
    seed_design(&store, &DESIGN, ApprovalStatus::Approved).await;
    store
        .put(Phase::ExperimentDesign, "experiment_protocol", "protocol")
        .await
        .unwrap();
    store
        .put(Phase::ExecutionAnalysis, "raw_observations", "observations")
        .await
        .unwrap();

    let invoker = RecordingInvoker::new();
    let orchestrator =
        orchestrator(temp.path(), invoker.clone(), ScriptedGate::approving()).await;

    let err = assert_err!(orchestrator.run_from(&project(), Phase::Reporting).await);
    assert!(matches!(
        err,
        PipelineError::PreconditionNotMet { phase: Phase::ExecutionAnalysis, ref artifact, .. }
            if artifact == "analysis"
    ));
    assert!(invoker.calls().is_empty());
}

#[tokio::test]
async fn test_double_approval_is_rejected() {
    let temp = TempDir::new().unwrap();
    let store = open_store(temp.path()).await;
    seed_design(&store, &["hypothesis"], ApprovalStatus::Approved).await;
    let before = store.get(Phase::Design, "hypothesis").await.unwrap();

    let err = assert_err!(
        store
            .set_approval_status(Phase::Design, "hypothesis", ApprovalStatus::Approved)
            .await
    );
    assert!(matches!(
        err,
        PipelineError::InvalidApprovalTransition {
            from: ApprovalStatus::Approved,
            to: ApprovalStatus::Approved,
            ..
        }
    ));

    assert_eq!(store.get(Phase::Design, "hypothesis").await.unwrap(), before);
    assert_eq!(store.versions(Phase::Design, "hypothesis").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_concurrent_run_is_refused() {
    let temp = TempDir::new().unwrap();
    let store = open_store(temp.path()).await;
    let _held = store.lock().unwrap();

    let invoker = RecordingInvoker::new();
    let orchestrator =
        orchestrator(temp.path(), invoker.clone(), ScriptedGate::approving()).await;

    let err = assert_err!(orchestrator.run(&project(), false).await);
    assert!(matches!(err, PipelineError::Storage { .. }));
    assert!(invoker.calls().is_empty());
}
