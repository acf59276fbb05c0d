//! Shape validation of the model's JSON answer into a [`ScenePayload`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use thiserror::Error;

use super::cues::{SubtitleCue, normalize_cues};
use super::error::ErrorKind;
use crate::common::text::head_chars;

pub const DEFAULT_FILE_NAME: &str = "explainer.py";
const RAW_ECHO_CHARS: usize = 4000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenePayload {
    pub file_name: String,
    pub scene_name: String,
    pub code: String,
    pub subtitle_cues: Vec<SubtitleCue>,
}

impl ScenePayload {
    /// Module name the renderer derives from the file name
    pub fn module_name(&self) -> &str {
        Path::new(&self.file_name)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("explainer")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("response is not valid JSON: {source}")]
    Json {
        #[source]
        source: serde_json::Error,
        raw: String,
    },

    #[error("response failed validation after normalization ({} error(s))", .errors.len())]
    Schema { errors: Vec<FieldError>, raw: String },
}

impl PayloadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PayloadError::Json { .. } => ErrorKind::JsonParseError,
            PayloadError::Schema { .. } => ErrorKind::SchemaValidationError,
        }
    }

    /// Field errors followed by the truncated raw input
    pub fn details(&self) -> String {
        match self {
            PayloadError::Json { raw, .. } => raw.clone(),
            PayloadError::Schema { errors, raw } => {
                let mut out: Vec<String> = errors.iter().map(ToString::to_string).collect();
                out.push(String::new());
                out.push(raw.clone());
                out.join("\n")
            }
        }
    }
}

/// Parse model output text and validate it.
pub fn parse_payload_json(raw: &str) -> Result<ScenePayload, PayloadError> {
    let text = strip_code_fence(raw.trim());
    let value: Value = serde_json::from_str(text).map_err(|source| PayloadError::Json {
        source,
        raw: head_chars(text, RAW_ECHO_CHARS).to_string(),
    })?;
    validate(value)
}

/// Normalize cues, then check every field, reporting all problems at once.
pub fn validate(mut value: Value) -> Result<ScenePayload, PayloadError> {
    if let Some(cues) = value
        .get_mut("subtitle_cues")
        .and_then(Value::as_array_mut)
    {
        normalize_cues(cues);
    }

    let raw_echo = || head_chars(&value.to_string(), RAW_ECHO_CHARS).to_string();

    let Some(object) = value.as_object() else {
        return Err(PayloadError::Schema {
            errors: vec![field_error("", "expected a JSON object")],
            raw: raw_echo(),
        });
    };

    let mut errors = Vec::new();
    let file_name = string_field(object, "file_name", &mut errors);
    let scene_name = string_field(object, "scene_name", &mut errors);
    let code = string_field(object, "code", &mut errors);
    let cues = cue_list(object, &mut errors);

    if let Some(scene) = &scene_name
        && scene.trim().is_empty()
    {
        errors.push(field_error("scene_name", "must not be empty"));
    }
    if let Some(code) = &code
        && code.trim().is_empty()
    {
        errors.push(field_error("code", "must not be empty"));
    }

    match (file_name, scene_name, code, cues) {
        (Some(file_name), Some(scene_name), Some(code), Some(cues)) if errors.is_empty() => {
            Ok(ScenePayload {
                file_name: clean_file_name(&file_name),
                scene_name: scene_name.trim().to_string(),
                code: unescape_flattened_newlines(code),
                subtitle_cues: cues.iter().map(SubtitleCue::clamped).collect(),
            })
        }
        _ => Err(PayloadError::Schema {
            errors,
            raw: raw_echo(),
        }),
    }
}

fn field_error(path: impl Into<String>, message: impl Into<String>) -> FieldError {
    FieldError {
        path: path.into(),
        message: message.into(),
    }
}

fn string_field(
    object: &Map<String, Value>,
    key: &str,
    errors: &mut Vec<FieldError>,
) -> Option<String> {
    match object.get(key) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => {
            errors.push(field_error(key, "expected a string"));
            None
        }
        None => {
            errors.push(field_error(key, "field required"));
            None
        }
    }
}

fn cue_list(object: &Map<String, Value>, errors: &mut Vec<FieldError>) -> Option<Vec<SubtitleCue>> {
    let items = match object.get("subtitle_cues") {
        Some(Value::Array(items)) => items,
        Some(_) => {
            errors.push(field_error("subtitle_cues", "expected an array"));
            return None;
        }
        None => {
            errors.push(field_error("subtitle_cues", "field required"));
            return None;
        }
    };

    let before = errors.len();
    let mut cues = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let path = format!("subtitle_cues.{}", i);
        let Some(cue) = item.as_object() else {
            errors.push(field_error(path, "expected an object"));
            continue;
        };

        let start = seconds_field(cue, &path, "start", errors);
        let end = seconds_field(cue, &path, "end", errors);
        let text = match cue.get("text") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => {
                errors.push(field_error(format!("{}.text", path), "expected a string"));
                None
            }
            None => {
                errors.push(field_error(format!("{}.text", path), "field required"));
                None
            }
        };

        if let (Some(start), Some(end), Some(text)) = (start, end, text) {
            cues.push(SubtitleCue::new(start, end, text));
        }
    }

    (errors.len() == before).then_some(cues)
}

fn seconds_field(
    cue: &Map<String, Value>,
    path: &str,
    key: &str,
    errors: &mut Vec<FieldError>,
) -> Option<f64> {
    let field_path = format!("{}.{}", path, key);
    match cue.get(key) {
        Some(Value::Number(n)) => match n.as_f64() {
            Some(seconds) if seconds >= 0.0 => Some(seconds),
            Some(_) => {
                errors.push(field_error(field_path, "must be greater than or equal to 0"));
                None
            }
            None => {
                errors.push(field_error(field_path, "expected a number"));
                None
            }
        },
        Some(_) => {
            errors.push(field_error(field_path, "expected a number"));
            None
        }
        None => {
            errors.push(field_error(field_path, "field required"));
            None
        }
    }
}

/// Reduce a model-chosen file name to a bare `.py` file inside the job directory
fn clean_file_name(raw: &str) -> String {
    let base = Path::new(raw.trim())
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::trim)
        .unwrap_or_default();

    if base.is_empty() || base.starts_with('.') {
        return DEFAULT_FILE_NAME.to_string();
    }
    if base.ends_with(".py") {
        base.to_string()
    } else {
        format!("{}.py", base)
    }
}

/// Code that arrives on one line with literal `\n` sequences was escaped twice
fn unescape_flattened_newlines(code: String) -> String {
    if !code.contains('\n') && code.contains("\\n") {
        code.replace("\\n", "\n")
    } else {
        code
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
