use std::sync::Arc;
use std::time::Duration;

use shadowheal::error::{ApiError, RepairError};
use shadowheal::heal::{
    error_context, FailureReason, HealConfig, HealOrchestrator, HealOutcome, HealServices,
    HealState, HealTarget,
};
use shadowheal::progress::ProgressKind;
use shadowheal::sandbox::FailureKind;
use shadowheal::shadow::{ShadowValidator, ValidationVerdict};
use shadowheal::store::ProjectStore;

use crate::integration::support::{
    executor_with, BrokenHost, DelayedStore, Harness, HostReply, RepairReply, ScriptedHost,
    ScriptedRepair, BROKEN_APP, FIXED_APP, PROJECT, USER, WORKING_APP,
};

#[tokio::test]
async fn passing_candidate_is_saved_without_healing() {
    let harness = Harness::new(ScriptedHost::with_defaults(), ScriptedRepair::fixing());

    let report = harness.orchestrator().run(WORKING_APP).await.unwrap();

    assert!(report.is_success());
    assert_eq!(report.trace, vec![HealState::Testing(0), HealState::Succeeded]);
    assert_eq!(report.heal_attempts, 0);
    assert_eq!(report.validations, 1);
    assert_eq!(harness.repair.call_count(), 0);

    let stored = harness
        .store
        .load_source(PROJECT, "src/App.tsx")
        .await
        .unwrap();
    assert_eq!(stored.as_deref(), Some(WORKING_APP));
    let status = harness.store.load_status(PROJECT).await.unwrap().unwrap();
    assert!(!status.is_broken);
    assert!(status.last_success_at.is_some());

    assert_eq!(
        harness.progress.lines(),
        vec![
            "Shadow testing...".to_string(),
            "Shadow test passed".to_string(),
            "Saved validated code".to_string(),
        ]
    );
}

#[tokio::test]
async fn retries_are_bounded_and_failure_marks_project_broken() {
    let harness = Harness::new(ScriptedHost::with_defaults(), ScriptedRepair::never_fixing());

    let report = harness.orchestrator().run(BROKEN_APP).await.unwrap();

    assert!(!report.is_success());
    assert_eq!(
        report.failure_reason(),
        Some(&FailureReason::ValidationExhausted { attempts: 3 })
    );
    assert_eq!(harness.repair.call_count(), 3);
    assert_eq!(report.heal_attempts, 3);
    assert_eq!(report.validations, 4);
    assert_eq!(
        report.trace,
        vec![
            HealState::Testing(0),
            HealState::Healing(0),
            HealState::Testing(1),
            HealState::Healing(1),
            HealState::Testing(2),
            HealState::Healing(2),
            HealState::Testing(3),
            HealState::ExhaustedFailed,
        ]
    );

    // Nothing unvalidated is ever stored.
    assert_eq!(harness.store.source_count(), 0);
    let status = harness.store.load_status(PROJECT).await.unwrap().unwrap();
    assert!(status.is_broken);
    assert_eq!(status.last_success_at, None);

    let last = harness.progress.last_line().unwrap();
    assert_eq!(
        last,
        "Could not validate the generated code after 3 auto-heal attempts"
    );
    let attempts: Vec<String> = harness
        .progress
        .events()
        .into_iter()
        .filter(|e| e.kind == ProgressKind::HealAttempt)
        .map(|e| e.message)
        .collect();
    assert_eq!(
        attempts,
        vec![
            "Auto-healing attempt 1/3...",
            "Auto-healing attempt 2/3...",
            "Auto-healing attempt 3/3...",
        ]
    );
}

#[tokio::test]
async fn first_usable_repair_ends_the_loop() {
    let harness = Harness::new(ScriptedHost::with_defaults(), ScriptedRepair::fixing());

    let report = harness.orchestrator().run(BROKEN_APP).await.unwrap();

    assert!(report.is_success());
    assert_eq!(harness.repair.call_count(), 1);
    assert_eq!(report.validations, 2);
    assert_eq!(report.artifact.code, FIXED_APP);
    assert_eq!(report.artifact.revision, 1);
    assert_eq!(
        report.trace,
        vec![
            HealState::Testing(0),
            HealState::Healing(0),
            HealState::Testing(1),
            HealState::Succeeded,
        ]
    );

    let request = &harness.repair.requests()[0];
    assert_eq!(request.failed_code, BROKEN_APP);
    assert!(request.runtime_error.starts_with("missingValue is not defined"));
    assert!(request.runtime_error.contains("\n\nStack:\n"));
    assert_eq!(request.user_id.as_deref(), Some("user-1"));

    let stored = harness
        .store
        .load_source(PROJECT, "src/App.tsx")
        .await
        .unwrap();
    assert_eq!(stored.as_deref(), Some(FIXED_APP));
}

#[tokio::test]
async fn unusable_repair_stops_without_spending_retries() {
    let repair = ScriptedRepair::fixing().then(RepairReply::Code("   ".to_string()));
    let harness = Harness::new(ScriptedHost::with_defaults(), repair);

    let report = harness.orchestrator().run(BROKEN_APP).await.unwrap();

    assert_eq!(
        report.failure_reason(),
        Some(&FailureReason::RepairUnavailable {
            reason: "Repair returned no usable code".to_string()
        })
    );
    assert_eq!(harness.repair.call_count(), 1);
    assert_eq!(report.validations, 1);
    assert!(harness
        .progress
        .lines()
        .contains(&"Repair returned no usable code".to_string()));
}

#[tokio::test]
async fn short_repair_candidate_is_rejected() {
    let repair = ScriptedRepair::new(RepairReply::Code("function App() {}".to_string()));
    let harness = Harness::new(ScriptedHost::with_defaults(), repair);

    let report = harness.orchestrator().run(BROKEN_APP).await.unwrap();

    assert!(matches!(
        report.failure_reason(),
        Some(FailureReason::RepairUnavailable { .. })
    ));
    assert_eq!(report.validations, 1);
}

#[tokio::test]
async fn unauthorized_repair_reports_reason() {
    let repair = ScriptedRepair::new(RepairReply::Fail(RepairError::Unauthorized(
        "no user".to_string(),
    )));
    let harness = Harness::new(ScriptedHost::with_defaults(), repair);

    let report = harness.orchestrator().run(BROKEN_APP).await.unwrap();

    match report.failure_reason() {
        Some(FailureReason::RepairUnavailable { reason }) => {
            assert!(reason.contains("not authorized"))
        }
        other => panic!("unexpected failure reason: {:?}", other),
    }
    assert_eq!(report.heal_attempts, 1);
    assert!(harness.store.load_status(PROJECT).await.unwrap().unwrap().is_broken);
}

#[tokio::test]
async fn success_is_reported_only_after_both_writes() {
    let store = DelayedStore::new().with_delay(Duration::from_millis(80));
    let harness = Harness::with_store(ScriptedHost::with_defaults(), ScriptedRepair::fixing(), store);

    let report = harness.orchestrator().run(BROKEN_APP).await.unwrap();

    assert!(report.is_success());
    // Both writes landed before the orchestrator returned, source first.
    let source = harness.journal.position("write:source:project-1").unwrap();
    let status = harness.journal.position("write:status:project-1").unwrap();
    assert!(source < status);

    let events = harness.progress.events();
    let persisted = events
        .iter()
        .position(|e| e.kind == ProgressKind::Persisted)
        .unwrap();
    assert_eq!(persisted, events.len() - 1);
}

#[tokio::test]
async fn store_failure_is_an_error_not_a_success() {
    let store = DelayedStore::new().failing();
    let harness = Harness::with_store(ScriptedHost::with_defaults(), ScriptedRepair::fixing(), store);

    let result = harness.orchestrator().run(WORKING_APP).await;

    assert!(matches!(result, Err(ApiError::StorageError(_))));
    assert!(!harness
        .progress
        .lines()
        .contains(&"Saved validated code".to_string()));
}

#[tokio::test]
async fn observed_failure_heals_without_initial_shadow_test() {
    let harness = Harness::new(ScriptedHost::with_defaults(), ScriptedRepair::fixing());
    let verdict = ValidationVerdict {
        success: false,
        error: Some("Cannot read properties of undefined".to_string()),
        stack: None,
        kind: Some(FailureKind::Runtime),
        run_id: None,
    };

    let report = harness
        .orchestrator()
        .heal_failure(BROKEN_APP, verdict)
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.trace[0], HealState::Healing(0));
    assert_eq!(report.validations, 1);
    assert_eq!(
        harness.repair.requests()[0].runtime_error,
        "Cannot read properties of undefined"
    );
}

#[tokio::test]
async fn zero_attempts_fails_on_first_shadow_failure() {
    let harness = Harness::new(ScriptedHost::with_defaults(), ScriptedRepair::fixing());
    let config = HealConfig {
        max_attempts: 0,
        ..HealConfig::default()
    };

    let report = harness.orchestrator_with(config).run(BROKEN_APP).await.unwrap();

    assert_eq!(
        report.failure_reason(),
        Some(&FailureReason::ValidationExhausted { attempts: 0 })
    );
    assert_eq!(harness.repair.call_count(), 0);
    assert!(matches!(report.outcome, HealOutcome::Failed { .. }));
}

#[tokio::test]
async fn repair_prompt_error_context_is_bounded() {
    let long_stack: String = (0..40)
        .map(|i| format!("    at frame{} (component.js:{}:1)", i, i))
        .collect::<Vec<_>>()
        .join("\n");
    let host = ScriptedHost::new(HostReply::Ready).on(
        "missingValue",
        HostReply::error_with_stack(&"x".repeat(3000), &long_stack),
    );
    let harness = Harness::new(host, ScriptedRepair::fixing());

    harness.orchestrator().run(BROKEN_APP).await.unwrap();

    let context = &harness.repair.requests()[0].runtime_error;
    assert!(context.chars().count() <= 2000);

    let verdict = ValidationVerdict {
        success: false,
        error: Some("boom".to_string()),
        stack: Some(long_stack),
        kind: Some(FailureKind::Runtime),
        run_id: None,
    };
    let bounded = error_context(&verdict, &HealConfig::default());
    let stack_lines = bounded.split("\n\nStack:\n").nth(1).unwrap().lines().count();
    assert_eq!(stack_lines, 5);
}

#[tokio::test]
async fn unavailable_host_skips_repair_and_leaves_status_alone() {
    let harness = Harness::new(ScriptedHost::with_defaults(), ScriptedRepair::fixing());
    let services = HealServices {
        validator: Arc::new(ShadowValidator::new(
            executor_with(Arc::new(BrokenHost)),
            PROJECT,
        )),
        ..harness.services()
    };
    let orchestrator = HealOrchestrator::new(
        services,
        HealTarget {
            project_id: PROJECT.to_string(),
            user_id: Some(USER.to_string()),
        },
        HealConfig::default(),
    );

    let err = orchestrator.run(WORKING_APP).await.unwrap_err();

    assert!(matches!(err, ApiError::Sandbox(ref message) if message.contains("no runner")));
    assert_eq!(harness.repair.call_count(), 0);
    assert!(harness.store.load_status(PROJECT).await.unwrap().is_none());
    assert_eq!(harness.store.source_count(), 0);
    assert!(harness
        .progress
        .events()
        .iter()
        .any(|event| event.kind == ProgressKind::HostUnavailable));
}

#[tokio::test]
async fn host_failure_seen_by_preview_is_not_healed() {
    let harness = Harness::new(ScriptedHost::with_defaults(), ScriptedRepair::fixing());
    let verdict = ValidationVerdict {
        success: false,
        error: Some("Sandbox host not configured: no runner available".to_string()),
        stack: None,
        kind: Some(FailureKind::Host),
        run_id: None,
    };

    let err = harness
        .orchestrator()
        .heal_failure(WORKING_APP, verdict)
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::Sandbox(_)));
    assert_eq!(harness.repair.call_count(), 0);
    assert!(harness.store.load_status(PROJECT).await.unwrap().is_none());
}

#[test]
fn failure_reason_serializes_with_its_own_fields() {
    let unavailable = serde_json::to_value(FailureReason::RepairUnavailable {
        reason: "quota exceeded".to_string(),
    })
    .unwrap();
    assert_eq!(unavailable["kind"], "repair_unavailable");
    assert_eq!(unavailable["reason"], "quota exceeded");

    let exhausted =
        serde_json::to_value(FailureReason::ValidationExhausted { attempts: 3 }).unwrap();
    assert_eq!(exhausted["kind"], "validation_exhausted");
    assert_eq!(exhausted["attempts"], 3);
}
