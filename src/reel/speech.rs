//! Text-to-speech transport for narration clips.

use reqwest::blocking::Client;
use reqwest::header::AUTHORIZATION;
use serde_json::json;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::config::ReelConfig;
use crate::ui::progress::Spinner;

#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("speech request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("speech API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("speech API returned no audio")]
    Empty,

    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub trait SpeechSynthesizer {
    /// Speak `text` into an mp3 file at `output`
    fn speak(&self, text: &str, output: &Path) -> Result<(), SpeechError>;
}

pub struct OpenAiSpeech {
    client: Client,
    api_base: String,
    api_key: String,
    model: String,
    voice: String,
}

impl OpenAiSpeech {
    pub fn new(config: &ReelConfig, api_key: String) -> Result<Self, SpeechError> {
        let client = Client::builder()
            .timeout(config.speech_timeout())
            .build()?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            model: config.voice_model.clone(),
            voice: config.voice.clone(),
        })
    }
}

impl SpeechSynthesizer for OpenAiSpeech {
    fn speak(&self, text: &str, output: &Path) -> Result<(), SpeechError> {
        let _spinner = Spinner::start("Synthesizing narration");
        let resp = self
            .client
            .post(format!("{}/audio/speech", self.api_base))
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .json(&json!({
                "model": self.model,
                "voice": self.voice,
                "input": text,
                "response_format": "mp3",
            }))
            .send()?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().unwrap_or_default();
            return Err(SpeechError::Api { status, body });
        }

        let audio = resp.bytes()?;
        if audio.is_empty() {
            return Err(SpeechError::Empty);
        }

        fs::write(output, &audio).map_err(|source| SpeechError::Write {
            path: output.to_path_buf(),
            source,
        })
    }
}
