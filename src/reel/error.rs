use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::common::text::tail_chars;

/// How a failed render was diagnosed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureClass {
    /// The log matches a known LaTeX/markup defect
    Markup,
    Generic,
}

/// Machine-readable reason a job ended without a video
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    PreflightMissing,
    TransportError,
    JsonParseError,
    SchemaValidationError,
    ForbiddenCapabilityError,
    SyntaxError,
    RenderError(FailureClass),
    /// A repair round-trip produced nothing usable
    RenderFailed,
    OutputMissing,
    AudioSynthesisFailed,
    MuxFailed,
    Timeout,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::PreflightMissing => "preflight_missing",
            ErrorKind::TransportError => "transport_error",
            ErrorKind::JsonParseError => "json_parse_error",
            ErrorKind::SchemaValidationError => "schema_validation_error",
            ErrorKind::ForbiddenCapabilityError => "forbidden_capability",
            ErrorKind::SyntaxError => "syntax_error",
            ErrorKind::RenderError(FailureClass::Markup) => "render_error.markup",
            ErrorKind::RenderError(FailureClass::Generic) => "render_error.generic",
            ErrorKind::RenderFailed => "render_failed",
            ErrorKind::OutputMissing => "output_missing",
            ErrorKind::AudioSynthesisFailed => "audio_synthesis_failed",
            ErrorKind::MuxFailed => "mux_failed",
            ErrorKind::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

impl Serialize for ErrorKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}

/// Terminal outcome of a job that did not produce a video
#[derive(Debug, Clone, Error, Serialize)]
#[error("{kind}: {message}")]
pub struct JobFailure {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl JobFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    /// Attach the tail of a diagnostic log, capped at `budget` characters
    pub fn with_details(mut self, log: &str, budget: usize) -> Self {
        let excerpt = tail_chars(log, budget);
        if !excerpt.trim().is_empty() {
            self.details = Some(excerpt.to_string());
        }
        self
    }
}
