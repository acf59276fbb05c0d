//! Per-job working directory and the append-only attempt history.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::error::{ErrorKind, JobFailure};
use super::payload::ScenePayload;
use crate::common::text::tail_chars;

pub const RENDER_LOG: &str = "render.log";
pub const ERROR_FILE: &str = "error.txt";
pub const CAPTIONS_FILE: &str = "captions.vtt";
pub const MANIFEST_FILE: &str = "job.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    SyntaxCheck,
    Render,
}

impl Stage {
    pub fn label(self) -> &'static str {
        match self {
            Stage::SyntaxCheck => "syntax check",
            Stage::Render => "render",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Failure { kind: ErrorKind, log: String },
}

/// One syntax check or render, exactly as it was tried
#[derive(Debug, Clone, Serialize)]
pub struct RenderAttempt {
    pub payload: ScenePayload,
    pub sanitized_code: Option<String>,
    pub stage: Stage,
    pub outcome: AttemptOutcome,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct RenderJob {
    pub job_id: String,
    pub workdir: PathBuf,
    attempts: Vec<RenderAttempt>,
}

impl RenderJob {
    /// Create `<renders_dir>/<random id>`
    pub fn create(renders_dir: &Path) -> Result<Self> {
        loop {
            let job_id = new_job_id();
            let workdir = renders_dir.join(&job_id);
            if workdir.exists() {
                continue;
            }
            fs::create_dir_all(&workdir)
                .with_context(|| format!("creating job directory {}", workdir.display()))?;
            return Ok(Self::at(job_id, workdir));
        }
    }

    pub fn at(job_id: String, workdir: PathBuf) -> Self {
        Self {
            job_id,
            workdir,
            attempts: Vec::new(),
        }
    }

    pub fn attempts(&self) -> &[RenderAttempt] {
        &self.attempts
    }

    pub fn record(
        &mut self,
        payload: &ScenePayload,
        sanitized_code: Option<&str>,
        stage: Stage,
        outcome: AttemptOutcome,
    ) {
        self.attempts.push(RenderAttempt {
            payload: payload.clone(),
            sanitized_code: sanitized_code.map(str::to_string),
            stage,
            outcome,
            recorded_at: Utc::now(),
        });
    }

    pub fn renders(&self) -> usize {
        self.attempts
            .iter()
            .filter(|attempt| attempt.stage == Stage::Render)
            .count()
    }

    pub fn path(&self, file: &str) -> PathBuf {
        self.workdir.join(file)
    }

    /// Append `log` to `render.log` under a header naming the attempt
    pub fn append_log(&self, header: &str, log: &str) -> Result<()> {
        let path = self.path(RENDER_LOG);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening {}", path.display()))?;
        writeln!(file, "\n[{}]", header)?;
        file.write_all(log.as_bytes())?;
        Ok(())
    }

    /// Copy the full render log to `error.txt` for postmortems
    pub fn write_error_file(&self, failure: &JobFailure) -> Result<()> {
        let log = fs::read_to_string(self.path(RENDER_LOG)).unwrap_or_default();
        let contents = if log.is_empty() {
            failure.to_string()
        } else {
            log
        };
        fs::write(self.path(ERROR_FILE), contents)
            .with_context(|| format!("writing {}", self.path(ERROR_FILE).display()))
    }

    pub fn write_manifest(
        &self,
        prompt: &str,
        outcome: Result<(), &JobFailure>,
        excerpt_chars: usize,
    ) -> Result<()> {
        let attempts: Vec<RenderAttempt> = self
            .attempts
            .iter()
            .cloned()
            .map(|mut attempt| {
                if let AttemptOutcome::Failure { log, .. } = &mut attempt.outcome {
                    *log = tail_chars(log, excerpt_chars).to_string();
                }
                attempt
            })
            .collect();

        let manifest = JobManifest {
            job_id: &self.job_id,
            prompt,
            written_at: Utc::now(),
            failure: outcome.err(),
            attempts,
        };
        let path = self.path(MANIFEST_FILE);
        let json = serde_json::to_string_pretty(&manifest).context("serializing job manifest")?;
        fs::write(&path, json).with_context(|| format!("writing {}", path.display()))
    }
}

#[derive(Serialize)]
struct JobManifest<'a> {
    job_id: &'a str,
    prompt: &'a str,
    written_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure: Option<&'a JobFailure>,
    attempts: Vec<RenderAttempt>,
}

/// 8 lowercase hex characters
pub fn new_job_id() -> String {
    format!("{:08x}", rand::random::<u32>())
}
