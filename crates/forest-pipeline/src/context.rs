//! Request context threaded through every pipeline stage.

use std::fmt;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::executor::{CommandExecutor, ExecError, ToolInvocation, ToolOutput};
use crate::workspace::Workspace;

/// Progress of one request through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Created,
    TilesResolved,
    MosaicsBuilt,
    Warped,
    Masked,
    Colorized,
    WarpedPair,
    YearSweepComputed,
    Stacked,
    StatisticsComputed,
    Finalized,
    Failed,
}

impl PipelineState {
    /// Whether the pipeline may move from `self` to `next`.
    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;

        if next == Failed {
            return !matches!(self, Finalized | Failed);
        }
        matches!(
            (self, next),
            (Created, TilesResolved)
                // Tile image path
                | (TilesResolved, MosaicsBuilt)
                | (MosaicsBuilt, Warped)
                | (Warped, Masked)
                | (Warped, Colorized)
                | (Masked, Colorized)
                | (Colorized, Stacked)
                // Analysis path
                | (TilesResolved, WarpedPair)
                | (WarpedPair, YearSweepComputed)
                | (YearSweepComputed, Stacked)
                | (Stacked, StatisticsComputed)
                // Either path
                | (Stacked, Finalized)
                | (StatisticsComputed, Finalized)
        )
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Everything a stage needs to know about the request it serves.
pub struct RequestContext {
    pub request_id: Uuid,
    pub workspace: Workspace,
    pub cancel: CancellationToken,
    executor: Arc<dyn CommandExecutor>,
    trail: Mutex<Vec<PipelineState>>,
}

impl RequestContext {
    pub fn new(
        request_id: Uuid,
        workspace: Workspace,
        cancel: CancellationToken,
        executor: Arc<dyn CommandExecutor>,
    ) -> Self {
        Self {
            request_id,
            workspace,
            cancel,
            executor,
            trail: Mutex::new(vec![PipelineState::Created]),
        }
    }

    /// Run one toolchain invocation under this request's cancellation token.
    pub async fn run(&self, invocation: ToolInvocation) -> Result<ToolOutput, ExecError> {
        self.executor.run(&invocation, &self.cancel).await
    }

    /// Current state.
    pub fn state(&self) -> PipelineState {
        self.trail
            .lock()
            .map(|trail| trail.last().copied().unwrap_or(PipelineState::Created))
            .unwrap_or(PipelineState::Failed)
    }

    /// Record a transition. Illegal transitions are logged and ignored.
    pub fn advance(&self, next: PipelineState) {
        let Ok(mut trail) = self.trail.lock() else {
            return;
        };
        let current = trail.last().copied().unwrap_or(PipelineState::Created);
        if current.can_transition_to(next) {
            debug!(request_id = %self.request_id, from = %current, to = %next, "Pipeline state");
            trail.push(next);
        } else {
            debug!(request_id = %self.request_id, from = %current, to = %next, "Ignoring illegal transition");
        }
    }

    /// States visited so far, in order.
    pub fn trail(&self) -> Vec<PipelineState> {
        self.trail.lock().map(|t| t.clone()).unwrap_or_default()
    }

    /// Give up the workspace for cleanup.
    pub fn into_workspace(self) -> Workspace {
        self.workspace
    }
}
