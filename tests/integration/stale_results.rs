use std::sync::Arc;
use std::time::Duration;

use shadowheal::heal::{HealGate, HealOutcome};
use shadowheal::preview::VisiblePreview;
use shadowheal::preview::PreviewState;
use shadowheal::sandbox::{Dispatch, FailureKind, RunId, RunMode, SandboxMessage};
use shadowheal::store::ProjectStore;

use crate::integration::support::{
    executor_with, DelayedStore, Harness, HostReply, ScriptedHost, ScriptedRepair,
    SlowBrokenHost, BROKEN_APP, PROJECT, WORKING_APP,
};

#[tokio::test]
async fn reply_after_shadow_timeout_is_discarded() {
    let host = ScriptedHost::new(HostReply::late(Duration::from_millis(350), HostReply::Ready));
    let harness = Harness::new(host, ScriptedRepair::fixing());

    let verdict = harness.validator.validate(WORKING_APP).await;
    assert_eq!(verdict.kind, Some(FailureKind::Timeout));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(harness.host.dispatches(), vec![Dispatch::Stale]);
}

#[tokio::test]
async fn newer_preview_render_wins() {
    let host = ScriptedHost::new(HostReply::Ready)
        .then(HostReply::late(
            Duration::from_millis(60),
            HostReply::error("stale render blew up"),
        ))
        .then(HostReply::Ready);
    let harness = Harness::new(host, ScriptedRepair::fixing());
    let preview = harness.preview();

    let (_first, second) = tokio::join!(preview.render(WORKING_APP), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        preview.render(WORKING_APP).await
    });

    let launches = harness.host.launches();
    assert_eq!(launches.len(), 2);
    assert_eq!(
        second,
        PreviewState::Ready {
            run_id: launches[1].run_id,
            assumed: false
        }
    );

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(preview.state(), second);
    assert_eq!(
        harness.host.dispatches(),
        vec![Dispatch::Delivered, Dispatch::Stale]
    );
}

#[tokio::test]
async fn messages_for_replaced_or_foreign_runs_are_dropped() {
    let harness = Harness::new(ScriptedHost::with_defaults(), ScriptedRepair::fixing());
    let preview = harness.preview();

    preview.render(WORKING_APP).await;
    let first = harness.host.launches()[0].run_id;
    preview.render(WORKING_APP).await;

    let registry = harness.executor.registry();
    assert_eq!(
        registry.dispatch(SandboxMessage::error(first, RunMode::Visible, "late")),
        Dispatch::Stale
    );
    assert_eq!(
        registry.dispatch(SandboxMessage::error(RunId::new(), RunMode::Visible, "forged")),
        Dispatch::Unknown
    );
    assert!(preview.state().is_ready());
}

#[tokio::test]
async fn silent_preview_is_assumed_rendered() {
    let harness = Harness::new(ScriptedHost::new(HostReply::Silent), ScriptedRepair::fixing());
    let preview = harness.preview();

    let state = preview.render(WORKING_APP).await;

    assert!(matches!(state, PreviewState::Ready { assumed: true, .. }));
}

#[tokio::test]
async fn cancelling_during_shadow_test_persists_nothing() {
    let harness = Harness::new(ScriptedHost::new(HostReply::Silent), ScriptedRepair::fixing());
    let orchestrator = harness.orchestrator();

    let (report, _) = tokio::join!(orchestrator.run(WORKING_APP), async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        harness.gate.advance();
        harness.validator.cancel();
    });
    let report = report.unwrap();

    assert_eq!(report.outcome, HealOutcome::Cancelled);
    assert_eq!(report.last_verdict.kind, Some(FailureKind::Superseded));
    assert_eq!(harness.store.source_count(), 0);
    assert_eq!(harness.store.load_status(PROJECT).await.unwrap(), None);
}

#[tokio::test]
async fn cancelling_during_repair_discards_the_candidate() {
    let repair = ScriptedRepair::fixing().with_delay(Duration::from_millis(120));
    let harness = Harness::with_store(ScriptedHost::with_defaults(), repair, DelayedStore::new());
    let orchestrator = harness.orchestrator();

    let (report, _) = tokio::join!(orchestrator.run(BROKEN_APP), async {
        tokio::time::sleep(Duration::from_millis(40)).await;
        harness.gate.advance();
    });
    let report = report.unwrap();

    assert_eq!(report.outcome, HealOutcome::Cancelled);
    assert_eq!(harness.repair.call_count(), 1);
    assert_eq!(report.validations, 1);
    assert!(harness
        .journal
        .entries()
        .iter()
        .all(|e| !e.starts_with("write:")));
}

#[tokio::test]
async fn preview_errors_are_suppressed_while_healing() {
    let harness = Harness::new(ScriptedHost::with_defaults(), ScriptedRepair::fixing());
    let preview = harness.preview();

    let guard = harness.gate.enter();
    let state = preview.render(BROKEN_APP).await;
    assert_eq!(state, PreviewState::Idle);
    drop(guard);

    let state = preview.render(BROKEN_APP).await;
    assert_eq!(state.failure().unwrap().kind, FailureKind::Runtime);
}

#[tokio::test]
async fn healing_flag_is_raised_for_the_whole_loop() {
    let gate = shadowheal::heal::HealGate::new();
    let repair = ScriptedRepair::never_fixing().observing(gate.clone());
    let harness = Harness::with_gate(ScriptedHost::with_defaults(), repair, DelayedStore::new(), gate);

    assert!(!harness.gate.is_healing());
    harness.orchestrator().run(BROKEN_APP).await.unwrap();

    assert_eq!(harness.repair.healing_seen(), vec![true, true, true]);
    assert!(!harness.gate.is_healing());
}

#[tokio::test]
async fn errors_after_ready_reach_the_watcher() {
    let harness = Harness::new(ScriptedHost::with_defaults(), ScriptedRepair::fixing());
    let preview = harness.preview();
    let run_id = match preview.render(WORKING_APP).await {
        PreviewState::Ready { run_id, .. } => run_id,
        other => panic!("unexpected preview state: {:?}", other),
    };

    let registry = harness.executor.registry().clone();
    let (failure, dispatched) = tokio::join!(preview.watch_errors(Duration::from_secs(1)), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        registry.dispatch(
            SandboxMessage::error(run_id, RunMode::Visible, "Cannot read properties of null")
                .with_source("window.onerror"),
        )
    });

    assert_eq!(dispatched, Dispatch::Delivered);
    assert_eq!(failure.unwrap().message, "Cannot read properties of null");
    assert!(preview.state().failure().is_some());
}

#[tokio::test]
async fn reset_during_render_is_not_overwritten() {
    let executor = executor_with(Arc::new(SlowBrokenHost(Duration::from_millis(60))));
    let preview = VisiblePreview::new(executor, PROJECT, HealGate::new());

    let (rendered, _) = tokio::join!(preview.render(WORKING_APP), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        preview.reset();
    });

    assert_eq!(rendered, PreviewState::Idle);
    assert_eq!(preview.state(), PreviewState::Idle);
    assert_eq!(preview.code(), None);
}
