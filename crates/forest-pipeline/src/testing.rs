//! Test doubles for running the pipeline without the raster toolchain.
//!
//! Compiled for this crate's unit tests and for dependents that enable the
//! `testing` feature.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::context::RequestContext;
use crate::error::PipelineResult;
use crate::executor::{CommandExecutor, ExecError, Tool, ToolInvocation, ToolOutput};
use crate::tile_index::{TileIndex, TileIndexSource};
use crate::workspace::Workspace;

struct Failure {
    tool: Tool,
    /// Only invocations with an argument containing this text fail.
    matching: Option<String>,
    stderr: String,
}

/// A [`CommandExecutor`] that records invocations instead of running them.
///
/// Successful invocations create their declared output file so later stages
/// and the missing-output check behave as with real tools.
#[derive(Default)]
pub struct ScriptedExecutor {
    calls: Mutex<Vec<ToolInvocation>>,
    failures: Vec<Failure>,
    hang: Vec<Tool>,
    stdout: HashMap<Tool, String>,
    delay: Option<Duration>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: AtomicUsize,
    started: tokio::sync::Notify,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every invocation of `tool` with `stderr`.
    pub fn fail_on(mut self, tool: Tool, stderr: &str) -> Self {
        self.failures.push(Failure {
            tool,
            matching: None,
            stderr: stderr.to_string(),
        });
        self
    }

    /// Fail invocations of `tool` that have an argument containing `matching`.
    pub fn fail_when(mut self, tool: Tool, matching: &str, stderr: &str) -> Self {
        self.failures.push(Failure {
            tool,
            matching: Some(matching.to_string()),
            stderr: stderr.to_string(),
        });
        self
    }

    /// Block invocations of `tool` until cancelled.
    pub fn hang_on(mut self, tool: Tool) -> Self {
        self.hang.push(tool);
        self
    }

    /// Print `stdout` from every invocation of `tool`.
    pub fn with_stdout(mut self, tool: Tool, stdout: impl Into<String>) -> Self {
        self.stdout.insert(tool, stdout.into());
        self
    }

    /// Canned `gdalinfo` output.
    pub fn with_info(self, info: &Value) -> Self {
        self.with_stdout(Tool::Info, info.to_string())
    }

    /// Sleep this long inside every invocation.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Invocations received so far, in arrival order.
    pub fn calls(&self) -> Vec<ToolInvocation> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Invocations currently running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of invocations observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` invocations are running.
    pub async fn wait_for_in_flight(&self, count: usize) {
        loop {
            let notified = self.started.notified();
            if self.in_flight() >= count {
                return;
            }
            notified.await;
        }
    }
}

/// Decrements the in-flight count when an invocation ends or is dropped.
struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl CommandExecutor for ScriptedExecutor {
    async fn run(
        &self,
        invocation: &ToolInvocation,
        cancel: &CancellationToken,
    ) -> Result<ToolOutput, ExecError> {
        let tool = invocation.tool;
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(invocation.clone());
        }
        if cancel.is_cancelled() {
            return Err(ExecError::Cancelled { tool });
        }

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(self.in_flight.clone());
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        self.started.notify_waiters();

        if self.hang.contains(&tool) {
            cancel.cancelled().await;
            return Err(ExecError::Cancelled { tool });
        }

        if let Some(delay) = self.delay {
            tokio::select! {
                _ = cancel.cancelled() => return Err(ExecError::Cancelled { tool }),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let failure = self.failures.iter().find(|f| {
            f.tool == tool
                && f.matching
                    .as_ref()
                    .map_or(true, |m| invocation.args.iter().any(|a| a.contains(m.as_str())))
        });
        if let Some(failure) = failure {
            return Err(ExecError::Failed {
                tool,
                code: Some(1),
                stderr: failure.stderr.clone(),
            });
        }

        if let Some(path) = &invocation.output {
            tokio::fs::write(path, format!("{tool} output"))
                .await
                .map_err(|source| ExecError::Spawn {
                    program: tool.to_string(),
                    source,
                })?;
        }

        Ok(ToolOutput {
            stdout: self.stdout.get(&tool).cloned().unwrap_or_default(),
            stderr: String::new(),
        })
    }
}

/// A tile index source that serves a fixed document.
pub struct StaticIndexSource {
    document: Value,
}

impl StaticIndexSource {
    pub fn new(document: Value) -> Self {
        Self { document }
    }
}

#[async_trait]
impl TileIndexSource for StaticIndexSource {
    async fn fetch(&self) -> PipelineResult<TileIndex> {
        TileIndex::from_geojson(&self.document)
    }

    fn location(&self) -> String {
        "static".to_string()
    }
}

/// A request context with a fresh workspace under `root`.
///
/// # Panics
///
/// Panics when the workspace cannot be created.
pub async fn test_context(root: &Path, executor: Arc<dyn CommandExecutor>) -> RequestContext {
    let request_id = Uuid::new_v4();
    let workspace = Workspace::create(root, request_id)
        .await
        .expect("failed to create test workspace");
    RequestContext::new(request_id, workspace, CancellationToken::new(), executor)
}
