//! Presence detection collaborators
//!
//! The sampling loop only needs a person count per frame. Frames come from a
//! `FrameSource`, counts from a `Detector`; neither cares how the other works.
//!
//! Shipped implementations:
//! - `SnapshotSource`: the image file a capture process keeps overwriting
//! - `CommandDetector`: an external inference command fed the frame on stdin

use crate::error::StayError;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::Deserialize;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, SystemTime};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Default score threshold below which a detection is ignored.
pub const DEFAULT_MIN_SCORE: f32 = 0.5;

/// COCO label id for "person".
pub const PERSON_CLASS: u32 = 0;

#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub captured_at: DateTime<Local>,
}

#[async_trait]
pub trait FrameSource: Send {
    /// Next frame, or `None` when nothing is available right now.
    async fn next_frame(&mut self) -> Result<Option<Frame>, StayError>;
}

#[async_trait]
pub trait Detector: Send {
    async fn detect(&mut self, frame: &Frame) -> Result<u32, StayError>;
}

/// One object reported by the inference command.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Detection {
    pub class_id: u32,
    pub score: f32,
}

pub fn count_persons(detections: &[Detection], min_score: f32, person_class: u32) -> u32 {
    detections
        .iter()
        .filter(|d| d.class_id == person_class && d.score >= min_score)
        .count() as u32
}

/// Accepts either a bare integer count or a JSON array of detections.
pub fn parse_detector_output(
    output: &str,
    min_score: f32,
    person_class: u32,
) -> Result<u32, StayError> {
    let output = output.trim();
    if output.is_empty() {
        return Err(StayError::DetectorUnavailable(
            "detector produced no output".into(),
        ));
    }
    if let Ok(count) = output.parse::<u32>() {
        return Ok(count);
    }
    let detections: Vec<Detection> = serde_json::from_str(output).map_err(|e| {
        StayError::DetectorUnavailable(format!("unrecognized detector output: {e}"))
    })?;
    Ok(count_persons(&detections, min_score, person_class))
}

pub struct SnapshotSource {
    path: PathBuf,
    max_age: Duration,
}

impl SnapshotSource {
    pub fn new(path: impl Into<PathBuf>, max_age: Duration) -> Self {
        Self {
            path: path.into(),
            max_age,
        }
    }
}

#[async_trait]
impl FrameSource for SnapshotSource {
    async fn next_frame(&mut self) -> Result<Option<Frame>, StayError> {
        let unavailable =
            |e: std::io::Error| StayError::DetectorUnavailable(format!("{}: {e}", self.path.display()));

        let meta = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(target: "stayd", "no snapshot at {}", self.path.display());
                return Ok(None);
            }
            Err(e) => return Err(unavailable(e)),
        };
        let modified = meta.modified().map_err(unavailable)?;
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO);
        if age > self.max_age {
            debug!(target: "stayd", "snapshot {} is stale ({}s old)", self.path.display(), age.as_secs());
            return Ok(None);
        }

        let data = tokio::fs::read(&self.path).await.map_err(unavailable)?;
        if data.is_empty() {
            return Ok(None);
        }
        Ok(Some(Frame {
            data,
            captured_at: DateTime::<Local>::from(modified),
        }))
    }
}

pub struct CommandDetector {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    min_score: f32,
    person_class: u32,
}

impl CommandDetector {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
            min_score: DEFAULT_MIN_SCORE,
            person_class: PERSON_CLASS,
        }
    }

    pub fn with_person_filter(mut self, min_score: f32, person_class: u32) -> Self {
        self.min_score = min_score;
        self.person_class = person_class;
        self
    }
}

#[async_trait]
impl Detector for CommandDetector {
    async fn detect(&mut self, frame: &Frame) -> Result<u32, StayError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| StayError::DetectorUnavailable(format!("spawn {}: {e}", self.program)))?;
        let mut stdin = child.stdin.take().ok_or_else(|| {
            StayError::DetectorUnavailable(format!("{}: stdin not captured", self.program))
        })?;

        let run = async move {
            // A detector that grabs its own frame may never read stdin.
            if let Err(e) = stdin.write_all(&frame.data).await {
                if e.kind() != ErrorKind::BrokenPipe {
                    return Err(e);
                }
            }
            drop(stdin);
            child.wait_with_output().await
        };

        let output = match tokio::time::timeout(self.timeout, run).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(StayError::DetectorUnavailable(format!("{}: {e}", self.program)))
            }
            Err(_) => {
                return Err(StayError::DetectorUnavailable(format!(
                    "{} timed out after {}ms",
                    self.program,
                    self.timeout.as_millis()
                )))
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(StayError::DetectorUnavailable(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_detector_output(&stdout, self.min_score, self.person_class)
    }
}
