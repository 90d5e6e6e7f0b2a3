//! Contracts for the external services a skill consumes.
//!
//! The skill core only calls fixed interfaces on these collaborators;
//! their implementations (file discovery, template rendering, settings
//! persistence, metrics upload, audio output) live elsewhere.

use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

/// Resolves resource names (vocabulary, intent and entity files) to paths.
pub trait ResourceLocator: Send + Sync {
    /// Locate a resource belonging to the skill, optionally within a
    /// resource subdirectory such as "vocab" or "dialog".
    fn find_resource(&self, name: &str, subdir: Option<&str>) -> Option<PathBuf>;

    /// Locate a resource in the shared assistant-wide resource tree,
    /// used as a fallback when the skill does not ship its own copy.
    fn find_shared_resource(&self, relpath: &str) -> Option<PathBuf>;
}

/// Renders a dialog template key plus data into spoken text.
/// Returns None when the template is missing.
pub trait DialogRenderer: Send + Sync {
    fn render(&self, key: &str, data: &Value) -> Option<String>;
}

/// Skill settings persistence.
pub trait SettingsStore: Send + Sync {
    /// Persist settings if they have changed.
    fn store(&self);
    /// Trigger an immediate poll of the remote settings backend.
    fn run_poll(&self);
    /// Stop background polling during shutdown.
    fn stop_polling(&self);
}

/// Sink for per-handler timing reports, keyed by correlation id.
pub trait MetricsSink: Send + Sync {
    fn report_timing(&self, ident: &str, label: &str, elapsed: Duration, tags: Value);
}

/// Gate on the speech output pipeline.
#[async_trait]
pub trait SpeechGate: Send + Sync {
    /// Resolve once any in-flight speech output has finished.
    async fn wait_while_speaking(&self);
}

/// No-op locator: every lookup misses.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullLocator;

impl ResourceLocator for NullLocator {
    fn find_resource(&self, _name: &str, _subdir: Option<&str>) -> Option<PathBuf> {
        None
    }

    fn find_shared_resource(&self, _relpath: &str) -> Option<PathBuf> {
        None
    }
}

/// No-op renderer: every template is missing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullRenderer;

impl DialogRenderer for NullRenderer {
    fn render(&self, _key: &str, _data: &Value) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullSettings;

impl SettingsStore for NullSettings {
    fn store(&self) {}
    fn run_poll(&self) {}
    fn stop_polling(&self) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullMetrics;

impl MetricsSink for NullMetrics {
    fn report_timing(&self, _ident: &str, _label: &str, _elapsed: Duration, _tags: Value) {}
}

/// Speech gate that never blocks.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSpeechGate;

#[async_trait]
impl SpeechGate for NullSpeechGate {
    async fn wait_while_speaking(&self) {}
}
