mod support;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use lantern_chat::{EventSink, ModelLifecycleManager, SessionEvent, SetupOutcome};
use lantern_core::types::{ModelLoadingState, ModelStatus};
use support::{wait_until, ScriptedRuntime};
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

fn manager(runtime: &Arc<ScriptedRuntime>) -> ModelLifecycleManager {
    ModelLifecycleManager::new(runtime.clone())
}

fn assert_lockstep(manager: &ModelLifecycleManager) {
    assert_eq!(
        manager.borrow_handle().is_some(),
        manager.status() == ModelStatus::Ready
    );
}

#[tokio::test]
async fn test_setup_downloads_then_prepares() {
    let runtime = ScriptedRuntime::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let manager = manager(&runtime).with_events(EventSink::new(tx));

    assert_eq!(manager.setup_model("A").await, SetupOutcome::Ready);

    assert_eq!(manager.status(), ModelStatus::Ready);
    assert_eq!(manager.download_progress(), 100.0);
    assert_eq!(manager.selected_model_id().as_deref(), Some("A"));
    assert_eq!(manager.loading_state(), ModelLoadingState::Idle);
    assert_lockstep(&manager);
    assert_eq!(runtime.state.ops(), vec!["download:A", "prepare:A"]);

    let events = support::drain(&mut rx);
    assert!(events.contains(&SessionEvent::DownloadProgress { percentage: 50.0 }));
    assert!(events.contains(&SessionEvent::ModelStatusChanged {
        status: ModelStatus::Downloading
    }));
    assert_eq!(
        events.last(),
        Some(&SessionEvent::ModelStatusChanged {
            status: ModelStatus::Ready
        })
    );
}

#[tokio::test]
async fn test_duplicate_setup_is_dropped() {
    let runtime = ScriptedRuntime::new();
    let gate = Arc::new(Notify::new());
    *runtime.state.download_gate.lock() = Some(gate.clone());
    let manager = Arc::new(manager(&runtime));

    let first = tokio::spawn({
        let manager = manager.clone();
        async move { manager.setup_model("A").await }
    });
    wait_until(|| manager.status() == ModelStatus::Downloading).await;
    assert!(manager.is_setup_in_progress());

    assert_eq!(manager.setup_model("A").await, SetupOutcome::Skipped);
    assert_eq!(manager.setup_model("B").await, SetupOutcome::Skipped);

    gate.notify_one();
    assert_eq!(first.await.unwrap(), SetupOutcome::Ready);
    assert_eq!(runtime.state.count("download"), 1);
    assert!(!manager.is_setup_in_progress());
}

#[tokio::test]
async fn test_setup_of_ready_model_is_noop() {
    let runtime = ScriptedRuntime::new();
    let manager = manager(&runtime);
    manager.setup_model("A").await;

    assert_eq!(manager.setup_model("A").await, SetupOutcome::AlreadyReady);
    assert_eq!(runtime.state.count("download"), 1);
}

#[tokio::test]
async fn test_switching_models_removes_previous() {
    let runtime = ScriptedRuntime::new();
    let manager = manager(&runtime);
    manager.setup_model("A").await;

    assert_eq!(manager.setup_model("B").await, SetupOutcome::Ready);

    let unload = runtime.state.position("unload:A").unwrap();
    let remove = runtime.state.position("remove:A").unwrap();
    let download = runtime.state.position("download:B").unwrap();
    assert!(unload < remove && remove < download);
    assert_eq!(manager.selected_model_id().as_deref(), Some("B"));
    assert_eq!(manager.borrow_handle().unwrap().handle.model_id(), "B");
}

#[tokio::test]
async fn test_download_failure_alerts_and_cleans_up() {
    let runtime = ScriptedRuntime::new();
    *runtime.state.fail_download.lock() = Some("disk full".to_string());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let manager = manager(&runtime).with_events(EventSink::new(tx));

    let outcome = manager.setup_model("A").await;

    assert_eq!(outcome, SetupOutcome::Failed("disk full".to_string()));
    assert_eq!(manager.status(), ModelStatus::NotSetup);
    assert_eq!(manager.download_progress(), 0.0);
    assert_eq!(runtime.state.count("remove"), 1);
    assert_eq!(runtime.state.count("prepare"), 0);
    assert_lockstep(&manager);
    assert!(support::drain(&mut rx).contains(&SessionEvent::Alert {
        title: "Download Error".to_string(),
        message: "disk full".to_string(),
    }));
    assert!(!manager.is_setup_in_progress());
}

#[tokio::test]
async fn test_prepare_failure_alerts() {
    let runtime = ScriptedRuntime::new();
    *runtime.state.fail_prepare.lock() = Some("bad weights".to_string());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let manager = manager(&runtime).with_events(EventSink::new(tx));

    assert!(matches!(
        manager.setup_model("A").await,
        SetupOutcome::Failed(_)
    ));
    assert_eq!(manager.status(), ModelStatus::NotSetup);
    assert!(manager.selected_model_id().is_none());
    assert!(support::drain(&mut rx).iter().any(|e| matches!(
        e,
        SessionEvent::Alert { title, .. } if title == "Prepare Error"
    )));
}

#[tokio::test]
async fn test_remove_model_resets_even_if_unload_fails() {
    let runtime = ScriptedRuntime::new();
    let manager = manager(&runtime);
    manager.setup_model("A").await;
    runtime.state.fail_unload.store(true, Ordering::SeqCst);

    manager.remove_model().await;

    assert!(runtime.state.position("unload:A").unwrap() < runtime.state.position("remove:A").unwrap());
    assert_eq!(manager.status(), ModelStatus::NotSetup);
    assert_eq!(manager.download_progress(), 0.0);
    assert!(manager.selected_model_id().is_none());
    assert_lockstep(&manager);
}

#[tokio::test]
async fn test_remove_other_model_keeps_selection() {
    let runtime = ScriptedRuntime::new();
    let manager = manager(&runtime);
    manager.setup_model("A").await;

    manager.remove_model_by_id("B").await;

    assert_eq!(runtime.state.count("remove"), 1);
    assert_eq!(runtime.state.count("unload"), 0);
    assert_eq!(manager.status(), ModelStatus::Ready);
    assert_eq!(manager.selected_model_id().as_deref(), Some("A"));
}

#[tokio::test]
async fn test_remove_selected_ready_model_by_id() {
    let runtime = ScriptedRuntime::new();
    let manager = manager(&runtime);
    manager.setup_model("A").await;

    manager.remove_model_by_id("A").await;

    assert_eq!(runtime.state.count("unload"), 1);
    assert!(manager.selected_model_id().is_none());
    assert_lockstep(&manager);
}

#[tokio::test]
async fn test_check_model_exists() {
    let runtime = ScriptedRuntime::new();
    let manager = manager(&runtime);

    assert!(!manager.check_model_exists(None).await);
    assert!(!manager.check_model_exists(Some("A")).await);
    assert_eq!(manager.status(), ModelStatus::NotSetup);
    assert_eq!(runtime.state.count("prepare"), 0);

    runtime.mark_downloaded("A");
    assert!(manager.check_model_exists(Some("A")).await);
    assert_eq!(manager.status(), ModelStatus::Ready);
    assert_eq!(manager.selected_model_id().as_deref(), Some("A"));
    assert_eq!(runtime.state.count("download"), 0);
}

#[tokio::test]
async fn test_check_failure_removes_artifact() {
    let runtime = ScriptedRuntime::new();
    runtime.mark_downloaded("A");
    *runtime.state.fail_prepare.lock() = Some("corrupt".to_string());
    let manager = manager(&runtime);

    assert!(!manager.check_model_exists(Some("A")).await);
    assert_eq!(manager.status(), ModelStatus::NotSetup);
    assert_eq!(runtime.state.count("remove"), 1);
}

#[tokio::test]
async fn test_check_other_model_keeps_or_releases_ready_one() {
    let runtime = ScriptedRuntime::new();
    let manager = manager(&runtime);
    assert_eq!(manager.setup_model("A").await, SetupOutcome::Ready);

    assert!(manager.check_model_exists(Some("A")).await);
    assert!(!manager.check_model_exists(Some("B")).await);
    assert_eq!(manager.status(), ModelStatus::Ready);
    assert_eq!(manager.selected_model_id().as_deref(), Some("A"));
    assert_lockstep(&manager);
    assert_eq!(runtime.state.ops(), vec!["download:A", "prepare:A"]);

    runtime.mark_downloaded("B");
    assert!(manager.check_model_exists(Some("B")).await);
    assert_eq!(manager.selected_model_id().as_deref(), Some("B"));
    assert_lockstep(&manager);
    assert_eq!(
        runtime.state.ops(),
        vec!["download:A", "prepare:A", "unload:A", "remove:A", "prepare:B"]
    );
}

#[tokio::test]
async fn test_teardown_during_download_stops_updates() {
    let runtime = ScriptedRuntime::new();
    let gate = Arc::new(Notify::new());
    *runtime.state.download_gate.lock() = Some(gate.clone());
    let liveness = CancellationToken::new();
    let manager = Arc::new(manager(&runtime).with_liveness(liveness.clone()));

    let setup = tokio::spawn({
        let manager = manager.clone();
        async move { manager.setup_model("A").await }
    });
    wait_until(|| manager.status() == ModelStatus::Downloading).await;

    liveness.cancel();
    gate.notify_one();

    assert_eq!(setup.await.unwrap(), SetupOutcome::Abandoned);
    assert_eq!(manager.status(), ModelStatus::Downloading);
    assert!(manager.borrow_handle().is_none());
    assert_eq!(runtime.state.count("prepare"), 0);
}

#[tokio::test]
async fn test_epoch_changes_when_handle_replaced() {
    let runtime = ScriptedRuntime::new();
    let manager = manager(&runtime);
    manager.setup_model("A").await;
    let borrowed = manager.borrow_handle().unwrap();
    assert!(manager.is_current(borrowed.epoch));

    manager.setup_model("B").await;
    assert!(!manager.is_current(borrowed.epoch));

    manager.shutdown().await;
    assert!(manager.borrow_handle().is_none());
    assert_eq!(runtime.state.count("unload"), 2);
}
