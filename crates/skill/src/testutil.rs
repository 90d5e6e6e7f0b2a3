//! Shared fixtures for the in-crate tests.

use crate::context::SkillContext;
use serde_json::Value;
use skylark_core::{
    DialogRenderer, Message, MessageBus, MetricsSink, NullLocator, NullMetrics, NullRenderer,
    NullSettings, NullSpeechGate, ResourceLocator, SettingsStore,
};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Collect every message emitted under `name`.
pub fn probe(bus: &MessageBus, name: &str) -> Arc<Mutex<Vec<Message>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    bus.on(
        name,
        Arc::new(move |msg| {
            sink.lock().unwrap().push(msg);
        }),
    );
    seen
}

fn build_context(
    name: &str,
    skill_id: &str,
    locator: Arc<dyn ResourceLocator>,
    dialog: Arc<dyn DialogRenderer>,
    settings: Arc<dyn SettingsStore>,
    metrics: Arc<dyn MetricsSink>,
) -> Arc<SkillContext> {
    Arc::new(SkillContext::new(
        name.to_string(),
        skill_id.to_string(),
        "en-us".to_string(),
        locator,
        dialog,
        settings,
        metrics,
        Arc::new(NullSpeechGate),
    ))
}

/// An unbound context with inert collaborators.
pub fn test_context(name: &str, skill_id: &str) -> Arc<SkillContext> {
    build_context(
        name,
        skill_id,
        Arc::new(NullLocator),
        Arc::new(NullRenderer),
        Arc::new(NullSettings),
        Arc::new(NullMetrics),
    )
}

fn bind(ctx: Arc<SkillContext>) -> (Arc<SkillContext>, MessageBus) {
    let bus = MessageBus::new();
    ctx.bind_bus(bus.clone()).unwrap();
    (ctx, bus)
}

/// A context bound to a fresh bus, with inert collaborators.
pub fn bound_context(name: &str, skill_id: &str) -> (Arc<SkillContext>, MessageBus) {
    bind(test_context(name, skill_id))
}

pub fn bound_context_with(
    name: &str,
    skill_id: &str,
    settings: Arc<CountingSettings>,
) -> (Arc<SkillContext>, MessageBus) {
    bind(build_context(
        name,
        skill_id,
        Arc::new(NullLocator),
        Arc::new(NullRenderer),
        settings,
        Arc::new(NullMetrics),
    ))
}

pub fn bound_context_with_metrics(
    name: &str,
    skill_id: &str,
    metrics: Arc<RecordingMetrics>,
) -> (Arc<SkillContext>, MessageBus) {
    bind(build_context(
        name,
        skill_id,
        Arc::new(NullLocator),
        Arc::new(NullRenderer),
        Arc::new(NullSettings),
        metrics,
    ))
}

/// Bound context with real on-disk resources and a renderer that serves
/// prompt templates (any "ask." key) while leaving everything else
/// missing.
pub fn bound_context_with_locator(
    name: &str,
    skill_id: &str,
    locator: Arc<FileLocator>,
) -> (Arc<SkillContext>, MessageBus) {
    bind(build_context(
        name,
        skill_id,
        locator,
        Arc::new(PromptDialog),
        Arc::new(NullSettings),
        Arc::new(NullMetrics),
    ))
}

struct PromptDialog;

impl DialogRenderer for PromptDialog {
    fn render(&self, key: &str, _data: &Value) -> Option<String> {
        key.starts_with("ask.").then(|| format!("{key} prompt"))
    }
}

/// Counts persistence and poll requests.
#[derive(Default)]
pub struct CountingSettings {
    stores: Mutex<usize>,
    polls: Mutex<usize>,
}

impl CountingSettings {
    pub fn stores(&self) -> usize {
        *self.stores.lock().unwrap()
    }

    pub fn polls(&self) -> usize {
        *self.polls.lock().unwrap()
    }
}

impl SettingsStore for CountingSettings {
    fn store(&self) {
        *self.stores.lock().unwrap() += 1;
    }

    fn run_poll(&self) {
        *self.polls.lock().unwrap() += 1;
    }

    fn stop_polling(&self) {}
}

/// Records every timing report as (ident, label, tags).
#[derive(Default)]
pub struct RecordingMetrics {
    reports: Mutex<Vec<(String, String, Value)>>,
}

impl RecordingMetrics {
    pub fn reports(&self) -> Vec<(String, String, Value)> {
        self.reports.lock().unwrap().clone()
    }
}

impl MetricsSink for RecordingMetrics {
    fn report_timing(&self, ident: &str, label: &str, _elapsed: Duration, tags: Value) {
        self.reports
            .lock()
            .unwrap()
            .push((ident.to_string(), label.to_string(), tags));
    }
}

/// Locator backed by real temporary files, counting skill-resource
/// lookups by file name.
pub struct FileLocator {
    dir: TempDir,
    skill_files: Vec<String>,
    shared_files: Vec<String>,
    lookups: Mutex<HashMap<String, usize>>,
}

impl FileLocator {
    pub fn empty() -> Arc<Self> {
        Self::with_files(&[])
    }

    /// Files resolvable as skill resources, regardless of subdirectory.
    pub fn with_files(files: &[(&str, &str)]) -> Arc<Self> {
        let dir = TempDir::new().unwrap();
        for (name, content) in files {
            fs::write(dir.path().join(name), content).unwrap();
        }
        Arc::new(Self {
            dir,
            skill_files: files.iter().map(|(n, _)| n.to_string()).collect(),
            shared_files: Vec::new(),
            lookups: Mutex::new(HashMap::new()),
        })
    }

    /// Files resolvable only through the shared fallback tree, keyed by
    /// relative path.
    pub fn with_shared_files(files: &[(&str, &str)]) -> Arc<Self> {
        let dir = TempDir::new().unwrap();
        for (relpath, content) in files {
            let path = dir.path().join("shared").join(relpath);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        Arc::new(Self {
            dir,
            skill_files: Vec::new(),
            shared_files: files.iter().map(|(p, _)| p.to_string()).collect(),
            lookups: Mutex::new(HashMap::new()),
        })
    }

    /// How many times `find_resource` was asked for this file name.
    pub fn lookups(&self, name: &str) -> usize {
        self.lookups.lock().unwrap().get(name).copied().unwrap_or(0)
    }
}

impl ResourceLocator for FileLocator {
    fn find_resource(&self, name: &str, _subdir: Option<&str>) -> Option<PathBuf> {
        *self.lookups.lock().unwrap().entry(name.to_string()).or_insert(0) += 1;
        self.skill_files
            .iter()
            .any(|f| f == name)
            .then(|| self.dir.path().join(name))
    }

    fn find_shared_resource(&self, relpath: &str) -> Option<PathBuf> {
        self.shared_files
            .iter()
            .any(|f| f == relpath)
            .then(|| self.dir.path().join("shared").join(relpath))
    }
}
