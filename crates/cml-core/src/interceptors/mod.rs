//! Ingest Interceptor Registry (C9): before/after hooks run around every
//! ingested event (spec.md §4.9). Grounded in the teacher's plugin-registry
//! pattern: registration-ordered, hook failures are logged and swallowed so
//! one misbehaving hook never blocks ingestion.

use crate::config::MemoryConfig;
use crate::memory::Event;
use crate::metadata::MetaValue;

/// Mutable view of an event before it is appended. Hooks may enrich or
/// redact `metadata`; they cannot change `content` or `event_type`.
pub struct IngestContext<'a> {
    pub event_type: &'a str,
    pub session_id: &'a str,
    pub content: &'a str,
    pub metadata: &'a mut MetaValue,
}

pub trait BeforeIngestHook: Send + Sync {
    fn name(&self) -> &'static str;
    fn before_ingest(&self, ctx: &mut IngestContext<'_>) -> Result<(), String>;
}

pub trait AfterIngestHook: Send + Sync {
    fn name(&self) -> &'static str;
    fn after_ingest(&self, event: &Event) -> Result<(), String>;
}

#[derive(Default)]
pub struct InterceptorRegistry {
    before: Vec<Box<dyn BeforeIngestHook>>,
    after: Vec<Box<dyn AfterIngestHook>>,
}

impl InterceptorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_before(&mut self, hook: Box<dyn BeforeIngestHook>) {
        self.before.push(hook);
    }

    pub fn register_after(&mut self, hook: Box<dyn AfterIngestHook>) {
        self.after.push(hook);
    }

    /// Runs all before-hooks in registration order. A hook that errors is
    /// logged and skipped; later hooks still run.
    pub fn run_before(&self, ctx: &mut IngestContext<'_>) {
        for hook in &self.before {
            if let Err(err) = hook.before_ingest(ctx) {
                tracing::warn!(hook = hook.name(), error = %err, "before-ingest hook failed, skipping");
            }
        }
    }

    pub fn run_after(&self, event: &Event) {
        for hook in &self.after {
            if let Err(err) = hook.after_ingest(event) {
                tracing::warn!(hook = hook.name(), error = %err, "after-ingest hook failed, skipping");
            }
        }
    }
}

/// Stamps `scope.project.id` / `scope.project.env` onto every ingested
/// event's metadata, derived from the running process's configuration.
pub struct ProjectScopeHook {
    project_id: String,
    project_env: String,
}

impl ProjectScopeHook {
    pub fn new(project_id: impl Into<String>, project_env: impl Into<String>) -> Self {
        Self { project_id: project_id.into(), project_env: project_env.into() }
    }
}

impl BeforeIngestHook for ProjectScopeHook {
    fn name(&self) -> &'static str {
        "project_scope"
    }

    fn before_ingest(&self, ctx: &mut IngestContext<'_>) -> Result<(), String> {
        ctx.metadata.set_path("scope.project.id", MetaValue::scalar(self.project_id.clone()));
        ctx.metadata.set_path("scope.project.env", MetaValue::scalar(self.project_env.clone()));
        Ok(())
    }
}

/// Redacts metadata paths named in `MemoryConfig` before the event is
/// persisted, e.g. secrets accidentally captured in tool output.
pub struct PrivacyFilterHook {
    redact_paths: Vec<String>,
}

impl PrivacyFilterHook {
    pub fn new(config: &MemoryConfig) -> Self {
        Self { redact_paths: config.redact_metadata_paths.clone() }
    }
}

impl BeforeIngestHook for PrivacyFilterHook {
    fn name(&self) -> &'static str {
        "privacy_filter"
    }

    fn before_ingest(&self, ctx: &mut IngestContext<'_>) -> Result<(), String> {
        for path in &self.redact_paths {
            if ctx.metadata.get_path(path).is_some() {
                ctx.metadata.set_path(path, MetaValue::scalar("[redacted]"));
            }
        }
        Ok(())
    }
}
