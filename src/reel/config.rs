use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::common::config::{DocumentedConfig, FieldDoc};
use crate::common::paths;

/// Everything a job needs to know about models, tools and limits.
///
/// Loaded once per invocation and passed by reference; nothing mutates it
/// while a job runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReelConfig {
    /// Chat model used for generation, critique and repair
    pub model: String,
    /// Text-to-speech model for narration
    pub voice_model: String,
    pub voice: String,
    /// Base URL of the OpenAI-compatible API
    pub api_base: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    /// Request timeout for model calls; unset waits indefinitely
    pub model_timeout_secs: Option<u64>,
    /// Root for per-job directories; defaults to the data directory
    pub renders_dir: Option<PathBuf>,
    /// URL prefix under which job directories are served
    pub public_prefix: String,
    /// Run the critique-and-regenerate pass after the first generation
    pub critique: bool,
    pub renderer: String,
    pub python: String,
    pub ffmpeg: String,
    pub ffprobe: String,
    pub render_timeout_secs: u64,
    /// Timeout for renders of repaired code
    pub repair_render_timeout_secs: u64,
    pub syntax_timeout_secs: u64,
    pub media_timeout_secs: u64,
    pub speech_timeout_secs: u64,
    /// Characters of log kept in failure details
    pub log_excerpt_chars: usize,
}

impl Default for ReelConfig {
    fn default() -> Self {
        Self {
            model: "gpt-5".to_string(),
            voice_model: "tts-1".to_string(),
            voice: "alloy".to_string(),
            api_base: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            model_timeout_secs: None,
            renders_dir: None,
            public_prefix: "/renders".to_string(),
            critique: true,
            renderer: "manim".to_string(),
            python: "python3".to_string(),
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
            render_timeout_secs: 480,
            repair_render_timeout_secs: 900,
            syntax_timeout_secs: 60,
            media_timeout_secs: 600,
            speech_timeout_secs: 120,
            log_excerpt_chars: 8000,
        }
    }
}

const FIELD_DOCS: &[FieldDoc] = &[
    FieldDoc::new("model", "Chat model used for generation, critique and repair"),
    FieldDoc::new("voice_model", "Text-to-speech model for narration"),
    FieldDoc::new("voice", "Voice name passed to the speech endpoint"),
    FieldDoc::new("api_base", "Base URL of the OpenAI-compatible API"),
    FieldDoc::new("api_key_env", "Environment variable holding the API key"),
    FieldDoc::optional(
        "model_timeout_secs",
        "Timeout for model requests in seconds (unset: no timeout)",
        "300",
    ),
    FieldDoc::optional(
        "renders_dir",
        "Directory holding one subdirectory per job",
        "\"/srv/mathreel/renders\"",
    ),
    FieldDoc::new("public_prefix", "URL prefix used in the returned video/caption URLs"),
    FieldDoc::new("critique", "Ask the model to critique and regenerate its first answer"),
    FieldDoc::new("renderer", "Manim executable"),
    FieldDoc::new("python", "Python interpreter used for the compile-only syntax check"),
    FieldDoc::new("ffmpeg", "ffmpeg executable"),
    FieldDoc::new("ffprobe", "ffprobe executable"),
    FieldDoc::new("render_timeout_secs", "Timeout for the first render"),
    FieldDoc::new("repair_render_timeout_secs", "Timeout for renders after a repair"),
    FieldDoc::new("syntax_timeout_secs", "Timeout for the syntax check"),
    FieldDoc::new("media_timeout_secs", "Timeout for each ffmpeg/ffprobe run"),
    FieldDoc::new("speech_timeout_secs", "Timeout for each text-to-speech request"),
    FieldDoc::new("log_excerpt_chars", "Characters of log kept in failure details"),
];

impl DocumentedConfig for ReelConfig {
    fn field_docs() -> &'static [FieldDoc] {
        FIELD_DOCS
    }
}

impl ReelConfig {
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_path(paths::config_file()?)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        <Self as DocumentedConfig>::load_or_create(path.as_ref())
    }

    /// `OPENAI_MODEL`, `OPENAI_VOICE_MODEL` and `OPENAI_VOICE` win over the file
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        if let Some(model) = non_empty("OPENAI_MODEL") {
            self.model = model;
        }
        if let Some(voice_model) = non_empty("OPENAI_VOICE_MODEL") {
            self.voice_model = voice_model;
        }
        if let Some(voice) = non_empty("OPENAI_VOICE") {
            self.voice = voice;
        }
    }

    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }

    pub fn renders_dir(&self) -> Result<PathBuf> {
        match &self.renders_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("creating renders directory {}", dir.display()))?;
                Ok(dir.clone())
            }
            None => paths::default_renders_dir(),
        }
    }

    pub fn model_timeout(&self) -> Option<Duration> {
        self.model_timeout_secs.map(Duration::from_secs)
    }

    pub fn render_timeout(&self, after_repair: bool) -> Duration {
        if after_repair {
            Duration::from_secs(self.repair_render_timeout_secs)
        } else {
            Duration::from_secs(self.render_timeout_secs)
        }
    }

    pub fn syntax_timeout(&self) -> Duration {
        Duration::from_secs(self.syntax_timeout_secs)
    }

    pub fn media_timeout(&self) -> Duration {
        Duration::from_secs(self.media_timeout_secs)
    }

    pub fn speech_timeout(&self) -> Duration {
        Duration::from_secs(self.speech_timeout_secs)
    }

    pub fn public_url(&self, job_id: &str, file: &str) -> String {
        format!(
            "{}/{}/{}",
            self.public_prefix.trim_end_matches('/'),
            job_id,
            file
        )
    }
}
