//! Application state shared by the handlers.

use std::sync::Arc;

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusHandle;

use forest_pipeline::Pipeline;

use crate::config::ServiceArgs;

/// Shared application state.
pub struct AppState {
    /// Tile and analysis pipeline; owns the process-wide tile index cache.
    pub pipeline: Arc<Pipeline>,

    /// Renders the installed Prometheus recorder, when one is installed.
    pub prometheus: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>, prometheus: Option<PrometheusHandle>) -> Self {
        Self {
            pipeline,
            prometheus,
        }
    }

    /// State running the real toolchain as configured by `args`.
    pub fn from_args(args: &ServiceArgs, prometheus: Option<PrometheusHandle>) -> Result<Self> {
        let pipeline = Pipeline::from_config(args.pipeline_config())?;
        Ok(Self::new(Arc::new(pipeline), prometheus))
    }
}
