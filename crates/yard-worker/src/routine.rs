//! # Training Routines
//!
//! The seam between orchestration and actual model fitting. A routine
//! receives its staged dataset and hyperparameters, reports progress
//! through a sink, and hands back whatever accuracy it measured.
//!
//! Built-in routines live in a [`RoutineRegistry`]; submitted scripts run
//! through [`SubprocessRoutine`], which speaks a line protocol on stdout:
//!
//! ```text
//! PROGRESS 45 fitting fold 3
//! ACCURACY 0.93
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use yard_core::{ProgressBoard, ProgressUpdate, RunId};

/// Interpreter for submitted scripts when none is configured.
pub const DEFAULT_INTERPRETER: &str = "python3";

/// Progress values a routine may report; the job body owns everything
/// outside this band.
const ROUTINE_PROGRESS_MIN: u8 = 30;
const ROUTINE_PROGRESS_MAX: u8 = 90;

/// How much stderr to keep for failure messages.
const STDERR_TAIL_LINES: usize = 20;

#[derive(Error, Debug)]
pub enum RoutineError {
    #[error("unknown training routine `{name}`")]
    UnknownRoutine { name: String },

    #[error("failed to launch training process: {0}")]
    Launch(#[source] std::io::Error),

    #[error("reading training process output failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("training process exited with code {code:?}: {stderr_tail}")]
    Failed {
        code: Option<i32>,
        stderr_tail: String,
    },
}

/// What a finished routine reports back.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutineOutcome {
    pub accuracy: Option<f64>,
}

/// Publishes a routine's progress under its run, clamped to the band
/// the routine owns.
#[derive(Clone)]
pub struct ProgressSink {
    board: ProgressBoard,
    run_id: RunId,
}

impl ProgressSink {
    pub fn new(board: ProgressBoard, run_id: RunId) -> Self {
        Self { board, run_id }
    }

    pub fn report(&self, progress: u8, message: impl Into<String>) {
        let clamped = progress.clamp(ROUTINE_PROGRESS_MIN, ROUTINE_PROGRESS_MAX);
        self.board
            .publish(ProgressUpdate::new(self.run_id.clone(), clamped, message));
    }
}

/// Everything a routine gets to work with.
pub struct RoutineContext {
    pub run_id: RunId,
    pub dataset_path: PathBuf,
    pub hyperparams: Map<String, Value>,
    pub progress: ProgressSink,
}

/// One way of training a model.
#[async_trait]
pub trait TrainingRoutine: Send + Sync {
    async fn run(&self, ctx: RoutineContext) -> Result<RoutineOutcome, RoutineError>;
}

/// Named built-in routines.
#[derive(Default)]
pub struct RoutineRegistry {
    routines: HashMap<String, Arc<dyn TrainingRoutine>>,
}

impl RoutineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, routine: Arc<dyn TrainingRoutine>) {
        self.routines.insert(name.into(), routine);
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn TrainingRoutine>, RoutineError> {
        self.routines
            .get(name)
            .cloned()
            .ok_or_else(|| RoutineError::UnknownRoutine { name: name.to_string() })
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.routines.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for RoutineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutineRegistry")
            .field("routines", &self.names())
            .finish()
    }
}

/// Runs a submitted script as a child process.
///
/// Argv: `{interpreter} {script} --dataset {path} --run-id {id}` plus one
/// `--key value` pair per hyperparameter. Stdout is scanned for the
/// progress protocol; everything else passes through to the debug log.
pub struct SubprocessRoutine {
    interpreter: String,
    script: PathBuf,
}

impl SubprocessRoutine {
    pub fn new(script: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: DEFAULT_INTERPRETER.to_string(),
            script: script.into(),
        }
    }

    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = interpreter.into();
        self
    }

    pub fn script(&self) -> &Path {
        &self.script
    }
}

#[async_trait]
impl TrainingRoutine for SubprocessRoutine {
    async fn run(&self, ctx: RoutineContext) -> Result<RoutineOutcome, RoutineError> {
        let mut command = Command::new(&self.interpreter);
        command
            .arg(&self.script)
            .arg("--dataset")
            .arg(&ctx.dataset_path)
            .arg("--run-id")
            .arg(ctx.run_id.to_string());
        for (key, value) in &ctx.hyperparams {
            command.arg(format!("--{key}")).arg(argument_text(value));
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::info!(
            run_id = %ctx.run_id,
            script = %self.script.display(),
            interpreter = %self.interpreter,
            "launching training process"
        );
        let mut child = command.spawn().map_err(RoutineError::Launch)?;

        // Drain stderr concurrently; a blocked stderr pipe would wedge
        // the child once the buffer fills.
        let stderr_tail = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut tail: Vec<String> = Vec::new();
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.remove(0);
                    }
                    tail.push(line);
                }
                tail.join("\n")
            })
        });

        let mut accuracy = None;
        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                match parse_protocol_line(&line) {
                    Some(ProtocolLine::Progress { value, message }) => {
                        ctx.progress.report(value, message);
                    }
                    Some(ProtocolLine::Accuracy(value)) => accuracy = Some(value),
                    None => tracing::debug!(run_id = %ctx.run_id, line, "training output"),
                }
            }
        }

        let status = child.wait().await?;
        let stderr_tail = match stderr_tail {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if !status.success() {
            return Err(RoutineError::Failed { code: status.code(), stderr_tail });
        }
        if !stderr_tail.is_empty() {
            tracing::warn!(run_id = %ctx.run_id, stderr = %stderr_tail, "training process wrote to stderr");
        }
        Ok(RoutineOutcome { accuracy })
    }
}

impl std::fmt::Debug for SubprocessRoutine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubprocessRoutine")
            .field("interpreter", &self.interpreter)
            .field("script", &self.script)
            .finish()
    }
}

enum ProtocolLine {
    Progress { value: u8, message: String },
    Accuracy(f64),
}

/// Lines that do not match the protocol are plain output, not errors.
fn parse_protocol_line(line: &str) -> Option<ProtocolLine> {
    let line = line.trim();
    if let Some(rest) = line.strip_prefix("PROGRESS ") {
        let (value, message) = match rest.split_once(' ') {
            Some((value, message)) => (value, message.trim()),
            None => (rest, ""),
        };
        let value = value.parse().ok()?;
        return Some(ProtocolLine::Progress { value, message: message.to_string() });
    }
    if let Some(rest) = line.strip_prefix("ACCURACY ") {
        return rest.trim().parse().ok().map(ProtocolLine::Accuracy);
    }
    None
}

/// Hyperparameter values become bare argv text; JSON strings lose their
/// quotes, everything else keeps its JSON rendering.
fn argument_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
