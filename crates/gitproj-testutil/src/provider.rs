//! A [`VirtualizationInstance`] that records what it was asked to do.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use gitproj_kernel::dispatch::{PlaceholderInfo, VirtualizationCallbacks, VirtualizationInstance};
use gitproj_types::ProviderResult;

/// One call made against the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
    Start,
    Stop,
    PlaceholderFile { path: String, info: PlaceholderInfo },
    PlaceholderDirectory { path: String },
    FileContents { path: String, offset: u64, len: usize },
    UpdatePlaceholder { path: String, info: PlaceholderInfo },
    Delete { path: String },
}

type ContentHook = Box<dyn Fn(&str, u64) + Send + Sync>;

/// Fake OS provider.
///
/// Writes succeed unless a failure was injected for the path. Hydrated
/// bytes are assembled per path so tests can compare them.
#[derive(Default)]
pub struct RecordingProvider {
    calls: Mutex<Vec<ProviderCall>>,
    contents: Mutex<HashMap<String, Vec<u8>>>,
    failures: Mutex<HashMap<String, ProviderResult>>,
    start_result: Mutex<Option<ProviderResult>>,
    callbacks: Mutex<Option<Arc<dyn VirtualizationCallbacks>>>,
    on_content: Mutex<Option<ContentHook>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RecordingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every write touching `path` answers `result`.
    pub fn fail_path(&self, path: &str, result: ProviderResult) {
        lock(&self.failures).insert(path.to_string(), result);
    }

    pub fn clear_failures(&self) {
        lock(&self.failures).clear();
    }

    /// `start_virtualizing` answers `result`.
    pub fn fail_start(&self, result: ProviderResult) {
        *lock(&self.start_result) = Some(result);
    }

    /// Run `hook(path, offset)` after each successful content write.
    pub fn on_content_write(&self, hook: impl Fn(&str, u64) + Send + Sync + 'static) {
        *lock(&self.on_content) = Some(Box::new(hook));
    }

    pub fn calls(&self) -> Vec<ProviderCall> {
        lock(&self.calls).clone()
    }

    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    /// Paths written as file placeholders, in call order.
    pub fn placeholder_files(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ProviderCall::PlaceholderFile { path, .. } => Some(path),
                _ => None,
            })
            .collect()
    }

    /// Paths written as directory placeholders, in call order.
    pub fn placeholder_directories(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ProviderCall::PlaceholderDirectory { path } => Some(path),
                _ => None,
            })
            .collect()
    }

    /// Number of `write_file_contents` calls for `path`.
    pub fn content_writes(&self, path: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, ProviderCall::FileContents { path: p, .. } if p == path))
            .count()
    }

    pub fn content(&self, path: &str) -> Option<Vec<u8>> {
        lock(&self.contents).get(path).cloned()
    }

    /// The callbacks registered by `start_virtualizing`, if running.
    pub fn callbacks(&self) -> Option<Arc<dyn VirtualizationCallbacks>> {
        lock(&self.callbacks).clone()
    }

    fn record(&self, call: ProviderCall) {
        lock(&self.calls).push(call);
    }

    fn injected(&self, path: &str) -> ProviderResult {
        lock(&self.failures)
            .get(path)
            .copied()
            .unwrap_or(ProviderResult::Success)
    }
}

#[async_trait]
impl VirtualizationInstance for RecordingProvider {
    async fn start_virtualizing(&self, callbacks: Arc<dyn VirtualizationCallbacks>) -> ProviderResult {
        self.record(ProviderCall::Start);
        let result = lock(&self.start_result).unwrap_or(ProviderResult::Success);
        if result.is_success() {
            *lock(&self.callbacks) = Some(callbacks);
        }
        result
    }

    async fn stop_virtualizing(&self) {
        self.record(ProviderCall::Stop);
        lock(&self.callbacks).take();
    }

    async fn write_placeholder_file(&self, path: &str, info: &PlaceholderInfo) -> ProviderResult {
        self.record(ProviderCall::PlaceholderFile {
            path: path.to_string(),
            info: info.clone(),
        });
        self.injected(path)
    }

    async fn write_placeholder_directory(&self, path: &str) -> ProviderResult {
        self.record(ProviderCall::PlaceholderDirectory {
            path: path.to_string(),
        });
        self.injected(path)
    }

    async fn write_file_contents(&self, path: &str, offset: u64, bytes: &[u8]) -> ProviderResult {
        self.record(ProviderCall::FileContents {
            path: path.to_string(),
            offset,
            len: bytes.len(),
        });
        let result = self.injected(path);
        if result.is_success() {
            {
                let mut contents = lock(&self.contents);
                let content = contents.entry(path.to_string()).or_default();
                content.truncate(offset as usize);
                content.extend_from_slice(bytes);
            }
            if let Some(hook) = lock(&self.on_content).as_ref() {
                hook(path, offset);
            }
        }
        result
    }

    async fn update_placeholder_if_needed(&self, path: &str, info: &PlaceholderInfo) -> ProviderResult {
        self.record(ProviderCall::UpdatePlaceholder {
            path: path.to_string(),
            info: info.clone(),
        });
        self.injected(path)
    }

    async fn delete_file(&self, path: &str) -> ProviderResult {
        self.record(ProviderCall::Delete {
            path: path.to_string(),
        });
        self.injected(path)
    }
}
