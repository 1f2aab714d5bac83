//! Engine lifecycle against a real index file and a recording provider.

use std::sync::Arc;
use std::time::Duration;

use gitproj_kernel::dispatch::{CommandId, VirtualizationCallbacks};
use gitproj_kernel::state::{ModifiedPathsStore, PlaceholderStore};
use gitproj_kernel::{Engine, EngineConfig, EngineError};
use gitproj_testutil::{IndexBuilder, MemoryGitObjects, ProviderCall, RecordingProvider, TestEnlistment};
use gitproj_types::{CallbackResult, PlaceholderKind, ProjectionError, ProviderResult};

fn two_folders() -> IndexBuilder {
    IndexBuilder::new()
        .file("A/a.txt", b"one")
        .file("B/b.txt", b"bee")
}

fn persistent(enlistment: &TestEnlistment) -> EngineConfig {
    let mut config = EngineConfig::persistent(enlistment.root());
    config.state_db = Some(enlistment.state_db_path());
    config
}

/// Wait for the worker to apply everything queued.
async fn drain(engine: &Engine) {
    for _ in 0..500 {
        if engine.queue().is_empty().unwrap() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task queue did not drain: {:?}", engine.queue().pending().unwrap());
}

async fn enumerate_all(callbacks: &Arc<dyn VirtualizationCallbacks>, paths: &[&str]) {
    for (i, path) in paths.iter().enumerate() {
        assert_eq!(
            callbacks.enumerate_directory(CommandId(i as u64), path).await,
            CallbackResult::Success,
            "enumerating {path:?}"
        );
    }
}

#[tokio::test]
async fn test_start_and_stop() {
    let enlistment = TestEnlistment::new(&two_folders()).unwrap();
    let provider = Arc::new(RecordingProvider::new());
    let engine = Engine::new(
        EngineConfig::transient(enlistment.root()),
        provider.clone(),
        Arc::new(MemoryGitObjects::new()),
    )
    .unwrap();
    assert!(!engine.is_running());

    engine.try_start().await.unwrap();
    assert!(engine.is_running());
    assert!(engine.is_projection_parse_complete());
    assert!(provider.callbacks().is_some());
    assert!(matches!(engine.try_start().await, Err(EngineError::AlreadyRunning)));

    engine.invalidate_projection();
    assert!(!engine.is_projection_parse_complete());

    engine.stop().await;
    assert!(!engine.is_running());
    assert!(provider.callbacks().is_none());
    assert_eq!(provider.calls().last(), Some(&ProviderCall::Stop));

    // Stopping twice is harmless.
    engine.stop().await;
}

#[tokio::test]
async fn test_corrupt_index_degrades_engine() {
    let enlistment = TestEnlistment::new(&two_folders()).unwrap();
    let mut bytes = two_folders().build();
    bytes[40] ^= 0xff;
    enlistment.write_index_bytes(&bytes).unwrap();

    let provider = Arc::new(RecordingProvider::new());
    let engine = Engine::new(
        EngineConfig::transient(enlistment.root()),
        provider.clone(),
        Arc::new(MemoryGitObjects::new()),
    )
    .unwrap();

    let err = engine.try_start().await.unwrap_err();
    assert!(matches!(err, EngineError::Projection(ProjectionError::CorruptIndex { .. })));
    assert!(!err.is_recoverable());
    assert!(engine.is_degraded());
    assert!(!engine.is_running());
    assert!(provider.calls().is_empty());
    assert_eq!(
        engine.dispatcher().notify_new_file_created("x.txt", false).await,
        CallbackResult::IoError
    );
}

#[tokio::test]
async fn test_provider_refusal_leaves_engine_stopped() {
    let enlistment = TestEnlistment::new(&two_folders()).unwrap();
    let provider = Arc::new(RecordingProvider::new());
    provider.fail_start(ProviderResult::AccessDenied);
    let engine = Engine::new(
        EngineConfig::transient(enlistment.root()),
        provider,
        Arc::new(MemoryGitObjects::new()),
    )
    .unwrap();

    let err = engine.try_start().await.unwrap_err();
    assert!(matches!(err, EngineError::ProviderStart(ProviderResult::AccessDenied)));
    assert!(!engine.is_running());
    assert!(!engine.is_degraded());
}

#[tokio::test]
async fn test_index_rewrite_reconciles_placeholders() {
    let enlistment = TestEnlistment::new(&two_folders()).unwrap();
    let provider = Arc::new(RecordingProvider::new());
    let engine = Engine::new(
        EngineConfig::transient(enlistment.root()),
        provider.clone(),
        Arc::new(MemoryGitObjects::new()),
    )
    .unwrap();
    engine.try_start().await.unwrap();
    let callbacks = provider.callbacks().unwrap();
    enumerate_all(&callbacks, &["", "A", "B"]).await;
    assert_eq!(
        engine.state().get("A").unwrap().map(|e| e.kind),
        Some(PlaceholderKind::ExpandedFolder)
    );
    provider.clear_calls();

    // git checkout: B goes away, A/a.txt changes.
    enlistment
        .write_index(&IndexBuilder::new().file("A/a.txt", b"two"))
        .unwrap();
    assert_eq!(
        callbacks.notify_file_renamed(".git/index.lock", ".git/index", false).await,
        CallbackResult::Success
    );
    drain(&engine).await;

    let calls = provider.calls();
    assert!(calls.iter().any(|c| matches!(c, ProviderCall::UpdatePlaceholder { path, .. } if path == "A/a.txt")));
    let deletes: Vec<&ProviderCall> = calls.iter().filter(|c| matches!(c, ProviderCall::Delete { .. })).collect();
    assert_eq!(deletes, vec![&ProviderCall::Delete { path: "B".into() }]);

    let state = engine.state();
    let a = state.get("A/a.txt").unwrap().unwrap();
    assert_eq!(a.content_id, Some(IndexBuilder::blob_id(b"two")));
    assert_eq!(state.get("A").unwrap().map(|e| e.kind), Some(PlaceholderKind::PartialFolder));
    assert!(state.get("B").unwrap().is_none());
    assert!(state.get("B/b.txt").unwrap().is_none());

    engine.stop().await;
}

#[tokio::test]
async fn test_offline_index_change_reconciled_at_start() {
    let enlistment = TestEnlistment::new(&two_folders()).unwrap();

    {
        let provider = Arc::new(RecordingProvider::new());
        let engine = Engine::new(persistent(&enlistment), provider.clone(), Arc::new(MemoryGitObjects::new())).unwrap();
        engine.try_start().await.unwrap();
        enumerate_all(&provider.callbacks().unwrap(), &["", "B"]).await;
        engine.stop().await;
    }

    enlistment
        .write_index(&IndexBuilder::new().file("A/a.txt", b"one"))
        .unwrap();

    let provider = Arc::new(RecordingProvider::new());
    let engine = Engine::new(persistent(&enlistment), provider.clone(), Arc::new(MemoryGitObjects::new())).unwrap();
    engine.try_start().await.unwrap();
    assert!(provider.calls().contains(&ProviderCall::Delete { path: "B".into() }));
    assert!(engine.state().get("B/b.txt").unwrap().is_none());
    engine.stop().await;
}

#[tokio::test]
async fn test_unchanged_index_is_not_reconciled() {
    let enlistment = TestEnlistment::new(&two_folders()).unwrap();
    for _ in 0..2 {
        let provider = Arc::new(RecordingProvider::new());
        let engine = Engine::new(persistent(&enlistment), provider.clone(), Arc::new(MemoryGitObjects::new())).unwrap();
        engine.try_start().await.unwrap();
        assert_eq!(provider.calls(), vec![ProviderCall::Start]);
        engine.stop().await;
    }
}

#[tokio::test]
async fn test_hydration_through_registered_callbacks() {
    let enlistment = TestEnlistment::new(&two_folders()).unwrap();
    let provider = Arc::new(RecordingProvider::new());
    let objects = Arc::new(MemoryGitObjects::new());
    objects.insert(b"one");
    let engine = Engine::new(EngineConfig::transient(enlistment.root()), provider.clone(), objects).unwrap();
    engine.try_start().await.unwrap();

    let callbacks = provider.callbacks().unwrap();
    assert_eq!(callbacks.get_file_stream(CommandId(1), "A/a.txt").await, CallbackResult::Success);
    assert_eq!(provider.content("A/a.txt").unwrap(), b"one");
    engine.stop().await;
}

#[tokio::test]
async fn test_user_edits_are_tracked() {
    let enlistment = TestEnlistment::new(&two_folders()).unwrap();
    let provider = Arc::new(RecordingProvider::new());
    let engine = Engine::new(
        EngineConfig::transient(enlistment.root()),
        provider.clone(),
        Arc::new(MemoryGitObjects::new()),
    )
    .unwrap();
    engine.try_start().await.unwrap();
    let callbacks = provider.callbacks().unwrap();
    enumerate_all(&callbacks, &["", "A"]).await;

    callbacks.notify_file_modified("A/a.txt").await;
    callbacks.notify_new_file_created("A/new", true).await;
    drain(&engine).await;

    let state = engine.state();
    assert!(state.is_modified("A/a.txt").unwrap());
    assert!(state.is_modified("A/new/").unwrap());
    assert!(state.get("A/a.txt").unwrap().is_none());
    assert_eq!(
        state.get("A/new").unwrap().map(|e| e.kind),
        Some(PlaceholderKind::ExpandedFolder)
    );
    engine.stop().await;
}

#[tokio::test]
async fn test_restart_after_stop_serves_again() {
    let enlistment = TestEnlistment::new(&two_folders()).unwrap();
    let provider = Arc::new(RecordingProvider::new());
    let objects = Arc::new(MemoryGitObjects::new());
    objects.insert(b"one");
    let engine = Engine::new(EngineConfig::transient(enlistment.root()), provider.clone(), objects).unwrap();

    engine.try_start().await.unwrap();
    engine.stop().await;
    engine.try_start().await.unwrap();
    assert!(engine.is_running());

    let callbacks = provider.callbacks().unwrap();
    enumerate_all(&callbacks, &["", "A"]).await;
    assert_eq!(callbacks.get_file_stream(CommandId(7), "A/a.txt").await, CallbackResult::Success);
    assert_eq!(provider.content("A/a.txt").unwrap(), b"one");

    callbacks.notify_file_modified("A/a.txt").await;
    drain(&engine).await;
    assert!(engine.state().is_modified("A/a.txt").unwrap());

    engine.stop().await;
    assert!(!engine.is_running());
}
