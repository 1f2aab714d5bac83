//! Callback dispatch against fake providers, object stores and projections.

use std::sync::{Arc, OnceLock};

use gitproj_kernel::dispatch::{
    CommandId, DirectoryEntryBuffer, Dispatcher, EnumerationId, VirtualizationCallbacks,
};
use gitproj_kernel::pool::PoolConfig;
use gitproj_kernel::projection::{GitIndexProjection, Projection, SparseFolders};
use gitproj_kernel::state::PlaceholderStore;
use gitproj_kernel::{EngineHealth, ProjectionMode, SqliteState};
use gitproj_testutil::{
    IndexBuilder, MemoryGitObjects, ProviderCall, RecordingProvider, RecordingTaskSink, StaticProjection,
    TestEnlistment,
};
use gitproj_types::{
    CallbackResult, FileSystemTask, PlaceholderKind, ProjectionError, ProviderResult, TaskOperation,
};
use rstest::rstest;

struct Harness {
    provider: Arc<RecordingProvider>,
    objects: Arc<MemoryGitObjects>,
    state: SqliteState,
    tasks: Arc<RecordingTaskSink>,
    dispatcher: Arc<Dispatcher>,
}

fn harness_with(projection: Arc<dyn Projection>, chunk_size: usize) -> Harness {
    let provider = Arc::new(RecordingProvider::new());
    let objects = Arc::new(MemoryGitObjects::with_chunk_size(1000));
    let state = SqliteState::in_memory().unwrap();
    let tasks = Arc::new(RecordingTaskSink::new());
    let dispatcher = Dispatcher::new(
        projection,
        provider.clone(),
        objects.clone(),
        Arc::new(state.clone()),
        tasks.clone(),
    )
    .with_chunk_size(chunk_size);
    Harness {
        provider,
        objects,
        state,
        tasks,
        dispatcher: Arc::new(dispatcher),
    }
}

fn harness(projection: StaticProjection) -> Harness {
    harness_with(Arc::new(projection), 4096)
}

fn sample() -> StaticProjection {
    StaticProjection::new()
        .file("A/a.txt", b"alpha")
        .file("A/B/b.txt", b"beta")
        .file("C.txt", b"c")
}

fn kind_of(state: &SqliteState, path: &str) -> Option<PlaceholderKind> {
    state.get(path).unwrap().map(|e| e.kind)
}

#[tokio::test]
async fn test_lazy_enumeration_reads_one_level() {
    let enlistment = TestEnlistment::new(
        &IndexBuilder::new()
            .file("A/a.txt", b"alpha")
            .file("A/B/b.txt", b"beta"),
    )
    .unwrap();
    let sparse = Arc::new(SparseFolders::load(Arc::new(SqliteState::in_memory().unwrap())).unwrap());
    let projection = Arc::new(GitIndexProjection::new(
        enlistment.index_path(),
        ProjectionMode::Lazy,
        PoolConfig::default(),
        sparse,
    ));
    let h = harness_with(projection.clone(), 4096);

    let result = h.dispatcher.enumerate_directory(CommandId(1), "A").await;
    assert_eq!(result, CallbackResult::Success);
    assert_eq!(h.provider.placeholder_files(), vec!["A/a.txt"]);
    assert_eq!(h.provider.placeholder_directories(), vec!["A/B"]);
    assert_eq!(kind_of(&h.state, "A"), Some(PlaceholderKind::ExpandedFolder));
    assert_eq!(kind_of(&h.state, "A/B"), Some(PlaceholderKind::PartialFolder));
    assert_eq!(kind_of(&h.state, "A/a.txt"), Some(PlaceholderKind::File));

    let trie = projection.loaded().unwrap();
    let a = trie.contents(trie.root()).unwrap().folder("A").unwrap().clone();
    let b = trie.contents(&a).unwrap().folder("B").unwrap().clone();
    assert!(!b.is_fully_enumerated());

    h.provider.clear_calls();
    let result = h.dispatcher.enumerate_directory(CommandId(2), "a/b").await;
    assert_eq!(result, CallbackResult::Success);
    assert_eq!(h.provider.placeholder_files(), vec!["a/b/b.txt"]);
    assert!(b.is_fully_enumerated());
    assert_eq!(h.dispatcher.in_flight(), 0);
}

#[tokio::test]
async fn test_enumerating_root_records_children_only() {
    let h = harness(sample());
    assert_eq!(h.dispatcher.enumerate_directory(CommandId(1), "").await, CallbackResult::Success);
    assert_eq!(h.provider.placeholder_directories(), vec!["A"]);
    assert_eq!(h.provider.placeholder_files(), vec!["C.txt"]);
    assert_eq!(kind_of(&h.state, ""), None);
}

#[tokio::test]
async fn test_enumeration_write_failure_leaves_folder_partial() {
    let h = harness(sample());
    h.state.add_partial_folder("A").unwrap();
    h.provider.fail_path("A/a.txt", ProviderResult::IoError);

    let result = h.dispatcher.enumerate_directory(CommandId(1), "A").await;
    assert_eq!(result, CallbackResult::IoError);
    assert_eq!(kind_of(&h.state, "A"), Some(PlaceholderKind::PartialFolder));
    assert!(h.tasks.is_empty());
}

#[tokio::test]
async fn test_blocked_placeholder_is_queued() {
    let h = harness(sample());
    h.provider.fail_path("A/B", ProviderResult::AccessDenied);

    let result = h.dispatcher.enumerate_directory(CommandId(1), "A").await;
    assert_eq!(result, CallbackResult::IoError);
    assert_eq!(h.tasks.tasks(), vec![FileSystemTask::placeholder_creation_blocked("A/B")]);
    assert_ne!(kind_of(&h.state, "A"), Some(PlaceholderKind::ExpandedFolder));
}

#[rstest]
#[case(".git")]
#[case(".GIT/refs")]
#[tokio::test]
async fn test_git_directory_is_never_enumerated(#[case] path: &str) {
    let h = harness(sample().folder(".git/refs"));
    assert_eq!(
        h.dispatcher.enumerate_directory(CommandId(1), path).await,
        CallbackResult::PathNotFound
    );
    assert!(h.provider.calls().is_empty());
}

#[tokio::test]
async fn test_missing_folder_is_not_found() {
    let h = harness(sample());
    assert_eq!(
        h.dispatcher.enumerate_directory(CommandId(1), "nope").await,
        CallbackResult::PathNotFound
    );
}

#[tokio::test]
async fn test_corrupt_projection_degrades_every_callback() {
    let health = Arc::new(EngineHealth::new());
    let projection = sample().failing(ProjectionError::corrupt(12, "bad entry"));
    let provider = Arc::new(RecordingProvider::new());
    let dispatcher = Dispatcher::new(
        Arc::new(projection),
        provider.clone(),
        Arc::new(MemoryGitObjects::new()),
        Arc::new(SqliteState::in_memory().unwrap()),
        Arc::new(RecordingTaskSink::new()),
    )
    .with_health(health.clone());

    assert_eq!(dispatcher.enumerate_directory(CommandId(1), "A").await, CallbackResult::IoError);
    assert!(health.is_degraded());
    assert_eq!(dispatcher.notify_new_file_created("new.txt", false).await, CallbackResult::IoError);
    assert_eq!(dispatcher.get_placeholder_info(CommandId(2), "C.txt").await, CallbackResult::IoError);
}

#[tokio::test]
async fn test_placeholder_info() {
    let h = harness(sample());
    assert_eq!(h.dispatcher.get_placeholder_info(CommandId(1), "a/A.TXT").await, CallbackResult::Success);
    assert_eq!(kind_of(&h.state, "a/A.TXT"), Some(PlaceholderKind::File));
    assert_eq!(
        h.dispatcher.get_placeholder_info(CommandId(2), "A/missing").await,
        CallbackResult::PathNotFound
    );
    assert_eq!(
        h.dispatcher.get_placeholder_info(CommandId(3), ".git/index").await,
        CallbackResult::PathNotFound
    );
}

#[tokio::test]
async fn test_hydration_streams_in_chunks() {
    let content: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    let h = harness_with(Arc::new(StaticProjection::new().file("big.bin", &content)), 4096);
    h.objects.insert(&content);

    let result = h.dispatcher.get_file_stream(CommandId(7), "big.bin").await;
    assert_eq!(result, CallbackResult::Success);
    assert_eq!(h.provider.content_writes("big.bin"), 3);
    assert_eq!(h.provider.content("big.bin").unwrap(), content);

    let offsets: Vec<u64> = h
        .provider
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            ProviderCall::FileContents { offset, .. } => Some(offset),
            _ => None,
        })
        .collect();
    assert_eq!(offsets, vec![0, 4096, 8192]);
}

#[tokio::test]
async fn test_empty_file_hydrates() {
    let h = harness(StaticProjection::new().file("empty", b""));
    h.objects.insert(b"");
    assert_eq!(h.dispatcher.get_file_stream(CommandId(1), "empty").await, CallbackResult::Success);
    assert!(h.tasks.is_empty());
}

#[tokio::test]
async fn test_cancelled_hydration_stops_writing() {
    let content = vec![7u8; 20_000];
    let h = harness_with(Arc::new(StaticProjection::new().file("big.bin", &content)), 1000);
    h.objects.insert(&content);

    let slot: Arc<OnceLock<Arc<Dispatcher>>> = Arc::new(OnceLock::new());
    let hook_slot = slot.clone();
    h.provider.on_content_write(move |_, _| {
        if let Some(dispatcher) = hook_slot.get() {
            dispatcher.cancel_command(CommandId(9));
        }
    });
    let _ = slot.set(h.dispatcher.clone());

    let result = h.dispatcher.get_file_stream(CommandId(9), "big.bin").await;
    assert_eq!(result, CallbackResult::Pending);
    assert_eq!(h.provider.content_writes("big.bin"), 1);
    assert!(h.tasks.is_empty());
    assert_eq!(h.dispatcher.in_flight(), 0);
}

#[tokio::test]
async fn test_unreadable_blob_queues_failed_hydration() {
    let content = b"lost".to_vec();
    let h = harness(StaticProjection::new().file("lost.txt", &content));
    let id = h.objects.insert(&content);
    h.objects.break_object(id);

    assert_eq!(h.dispatcher.get_file_stream(CommandId(1), "lost.txt").await, CallbackResult::IoError);
    assert_eq!(h.tasks.tasks(), vec![FileSystemTask::failed_to_hydrate("lost.txt")]);
}

#[tokio::test]
async fn test_shutdown_cancels_future_commands() {
    let content = vec![1u8; 10];
    let h = harness(StaticProjection::new().file("f", &content));
    h.objects.insert(&content);
    h.dispatcher.shutdown();
    assert_eq!(h.dispatcher.get_file_stream(CommandId(1), "f").await, CallbackResult::Pending);
    assert_eq!(h.provider.content_writes("f"), 0);
}

#[tokio::test]
async fn test_enumeration_session() {
    let h = harness(sample().file("A/c.md", b"c").file("A/d.txt", b"d"));
    let id = EnumerationId(0x10);

    assert_eq!(
        h.dispatcher.start_directory_enumeration(CommandId(1), id, "A").await,
        CallbackResult::Success
    );
    assert_eq!(h.dispatcher.open_enumerations(), 1);

    let mut buffer = DirectoryEntryBuffer::with_capacity(200);
    let result = h
        .dispatcher
        .get_directory_enumeration(CommandId(2), id, Some("*.txt"), false, &mut buffer)
        .await;
    assert_eq!(result, CallbackResult::Success);
    assert_eq!(buffer.names(), vec!["a.txt", "d.txt"]);

    buffer.clear();
    h.dispatcher
        .get_directory_enumeration(CommandId(3), id, None, false, &mut buffer)
        .await;
    assert!(buffer.entries().is_empty());

    buffer.clear();
    h.dispatcher
        .get_directory_enumeration(CommandId(4), id, None, true, &mut buffer)
        .await;
    assert_eq!(buffer.names(), vec!["a.txt", "B"]);

    assert_eq!(h.dispatcher.end_directory_enumeration(id).await, CallbackResult::Success);
    assert_eq!(h.dispatcher.end_directory_enumeration(id).await, CallbackResult::InvalidArgs);
    assert_eq!(h.dispatcher.open_enumerations(), 0);
}

#[rstest]
#[case(".git/index")]
#[case(".git/HEAD")]
#[case(".git/refs")]
#[case(".git/objects/pack/pack-1.pack")]
#[tokio::test]
async fn test_protected_git_paths_refuse_delete(#[case] path: &str) {
    let h = harness(sample());
    assert_eq!(h.dispatcher.notify_pre_delete(path, false).await, CallbackResult::AccessDenied);
    assert!(h.tasks.is_empty());
}

#[rstest]
#[case(".git/index.lock")]
#[case(".git/objects/pack/tmp_pack_123")]
#[case("src/main.rs")]
#[tokio::test]
async fn test_ordinary_deletes_are_allowed(#[case] path: &str) {
    let h = harness(sample());
    assert_eq!(h.dispatcher.notify_pre_delete(path, false).await, CallbackResult::Success);
}

#[tokio::test]
async fn test_notifications_queue_tasks() {
    let h = harness(sample());
    let d = &h.dispatcher;
    assert_eq!(d.notify_new_file_created("new.txt", false).await, CallbackResult::Success);
    d.notify_new_file_created("newdir", true).await;
    d.notify_file_renamed("A/a.txt", "A/z.txt", false).await;
    d.notify_file_renamed("A/B", "A/Q", true).await;
    d.notify_file_deleted("C.txt", false).await;
    d.notify_file_modified("A/a.txt").await;
    d.notify_file_superseded("A/z.txt").await;
    d.notify_file_converted_to_full("A/z.txt").await;
    d.notify_hard_link_created("A/z.txt", "link.txt").await;
    d.notify_symlink_created("sym").await;

    let ops: Vec<TaskOperation> = h.tasks.tasks().iter().map(|t| t.operation()).collect();
    assert_eq!(
        ops,
        vec![
            TaskOperation::FileCreated,
            TaskOperation::FolderCreated,
            TaskOperation::FileRenamed,
            TaskOperation::FolderRenamed,
            TaskOperation::FileDeleted,
            TaskOperation::FileOverwritten,
            TaskOperation::FileSuperseded,
            TaskOperation::FileConvertedToFull,
            TaskOperation::HardLinkCreated,
            TaskOperation::SymlinkCreated,
        ]
    );
}

#[tokio::test]
async fn test_git_directory_notifications() {
    let h = harness(sample());
    let d = &h.dispatcher;
    d.notify_new_file_created(".git/objects/ab/cdef", false).await;
    d.notify_file_modified(".git/HEAD").await;
    d.notify_file_deleted(".git/index.lock", false).await;
    assert!(h.tasks.is_empty());

    d.notify_file_renamed(".git/index.lock", ".git/index", false).await;
    d.notify_file_modified(".git/index").await;
    d.notify_file_renamed(".git/stash", "stash", false).await;
    d.notify_file_renamed("out.txt", ".git/out.txt", false).await;
    assert_eq!(
        h.tasks.tasks(),
        vec![
            FileSystemTask::index_write_requiring_validation(".git/index"),
            FileSystemTask::index_write_requiring_validation(".git/index"),
            FileSystemTask::file_created("stash"),
            FileSystemTask::file_deleted("out.txt"),
        ]
    );
}

#[tokio::test]
async fn test_queue_failure_fails_the_notification() {
    let h = harness(sample());
    h.tasks.set_failing(true);
    assert_eq!(h.dispatcher.notify_new_file_created("x", false).await, CallbackResult::IoError);
}

#[tokio::test]
async fn test_invalid_path_is_rejected() {
    let h = harness(sample());
    assert_eq!(
        h.dispatcher.enumerate_directory(CommandId(1), "A/../..").await,
        CallbackResult::InvalidArgs
    );
}
