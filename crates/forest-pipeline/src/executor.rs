//! External raster toolchain invocation.
//!
//! Every pipeline stage reaches the toolchain through [`CommandExecutor`]. The
//! production implementation spawns the configured binary directly (no shell),
//! captures stdout/stderr, and kills the child when the request's
//! cancellation token fires or the calling future is dropped.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::counter;
use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A command of the raster toolchain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    /// Virtual mosaic / band stacking (`gdalbuildvrt`).
    BuildVrt,
    /// Reprojection and cutline clipping (`gdalwarp`).
    Warp,
    /// Band algebra (`gdal_calc.py`).
    Calc,
    /// Color relief (`gdaldem color-relief`).
    ColorRelief,
    /// Format conversion and rescaling (`gdal_translate`).
    Translate,
    /// Metadata and histograms (`gdalinfo`).
    Info,
}

impl Tool {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tool::BuildVrt => "buildvrt",
            Tool::Warp => "warp",
            Tool::Calc => "calc",
            Tool::ColorRelief => "color_relief",
            Tool::Translate => "translate",
            Tool::Info => "info",
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Program names for each tool.
#[derive(Debug, Clone)]
pub struct Toolchain {
    pub buildvrt: String,
    pub warp: String,
    pub calc: String,
    pub dem: String,
    pub translate: String,
    pub info: String,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            buildvrt: "gdalbuildvrt".to_string(),
            warp: "gdalwarp".to_string(),
            calc: "gdal_calc.py".to_string(),
            dem: "gdaldem".to_string(),
            translate: "gdal_translate".to_string(),
            info: "gdalinfo".to_string(),
        }
    }
}

impl Toolchain {
    pub fn program(&self, tool: Tool) -> &str {
        match tool {
            Tool::BuildVrt => &self.buildvrt,
            Tool::Warp => &self.warp,
            Tool::Calc => &self.calc,
            Tool::ColorRelief => &self.dem,
            Tool::Translate => &self.translate,
            Tool::Info => &self.info,
        }
    }
}

/// One call into the toolchain.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub tool: Tool,
    pub args: Vec<String>,
    /// File the tool must have created when it exits successfully.
    pub output: Option<PathBuf>,
}

impl ToolInvocation {
    pub fn new(tool: Tool) -> Self {
        Self {
            tool,
            args: Vec::new(),
            output: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Pass a path argument.
    pub fn path(self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        self.arg(path.to_string_lossy().into_owned())
    }

    /// Pass the output path as an argument and expect the tool to create it.
    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        self.args.push(path.to_string_lossy().into_owned());
        self.output = Some(path);
        self
    }

    /// Expect the tool to create `path` without adding an argument.
    pub fn expects(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }
}

/// Captured output of a successful invocation.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Failure of a toolchain invocation.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited with status {code:?}: {stderr}")]
    Failed {
        tool: Tool,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{tool} succeeded but did not create {}", .path.display())]
    MissingOutput { tool: Tool, path: PathBuf },

    #[error("{tool} timed out after {timeout:?}")]
    TimedOut { tool: Tool, timeout: Duration },

    #[error("{tool} cancelled")]
    Cancelled { tool: Tool },
}

/// Runs toolchain invocations.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run one invocation to completion.
    ///
    /// Implementations must stop the underlying work and return
    /// `ExecError::Cancelled` once `cancel` fires.
    async fn run(
        &self,
        invocation: &ToolInvocation,
        cancel: &CancellationToken,
    ) -> Result<ToolOutput, ExecError>;
}

/// Executes the toolchain as child processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor {
    toolchain: Toolchain,
    timeout: Option<Duration>,
}

impl ProcessExecutor {
    pub fn new(toolchain: Toolchain, timeout: Option<Duration>) -> Self {
        Self { toolchain, timeout }
    }

    async fn spawn_and_wait(
        &self,
        invocation: &ToolInvocation,
    ) -> Result<std::process::Output, ExecError> {
        let program = self.toolchain.program(invocation.tool);
        let child = Command::new(program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExecError::Spawn {
                program: program.to_string(),
                source,
            })?;

        // Dropping this future drops the child, which kills it.
        let wait = child.wait_with_output();
        let result = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, wait)
                .await
                .map_err(|_| ExecError::TimedOut {
                    tool: invocation.tool,
                    timeout,
                })?,
            None => wait.await,
        };

        result.map_err(|source| ExecError::Spawn {
            program: program.to_string(),
            source,
        })
    }
}

#[async_trait]
impl CommandExecutor for ProcessExecutor {
    async fn run(
        &self,
        invocation: &ToolInvocation,
        cancel: &CancellationToken,
    ) -> Result<ToolOutput, ExecError> {
        let tool = invocation.tool;
        if cancel.is_cancelled() {
            return Err(ExecError::Cancelled { tool });
        }

        let start = Instant::now();
        debug!(
            tool = %tool,
            program = self.toolchain.program(tool),
            args = ?invocation.args,
            "Running tool"
        );

        let output = tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!(tool = %tool, "Tool cancelled, child killed");
                counter!("forest_tool_invocations_total", "tool" => tool.as_str(), "outcome" => "cancelled").increment(1);
                return Err(ExecError::Cancelled { tool });
            }

            output = self.spawn_and_wait(invocation) => output,
        };

        let output = match output {
            Ok(output) => output,
            Err(err) => {
                counter!("forest_tool_invocations_total", "tool" => tool.as_str(), "outcome" => "error").increment(1);
                return Err(err);
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let elapsed_ms = start.elapsed().as_millis() as u64;

        if !output.status.success() {
            warn!(
                tool = %tool,
                code = ?output.status.code(),
                elapsed_ms,
                stderr = %stderr.trim(),
                "Tool failed"
            );
            counter!("forest_tool_invocations_total", "tool" => tool.as_str(), "outcome" => "error").increment(1);
            return Err(ExecError::Failed {
                tool,
                code: output.status.code(),
                stderr: stderr.trim().to_string(),
            });
        }

        if let Some(path) = &invocation.output {
            if tokio::fs::metadata(path).await.is_err() {
                counter!("forest_tool_invocations_total", "tool" => tool.as_str(), "outcome" => "error").increment(1);
                return Err(ExecError::MissingOutput {
                    tool,
                    path: path.clone(),
                });
            }
        }

        if !stderr.trim().is_empty() {
            debug!(tool = %tool, stderr = %stderr.trim(), "Tool stderr");
        }
        debug!(tool = %tool, elapsed_ms, "Tool finished");
        counter!("forest_tool_invocations_total", "tool" => tool.as_str(), "outcome" => "ok").increment(1);

        Ok(ToolOutput { stdout, stderr })
    }
}
