//! In-memory stand-ins for the model, tools and speech service.

use serde_json::json;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::Path;
use std::time::Duration;

use super::media::{MediaError, MediaToolkit};
use super::model::{CompletionRequest, ModelError, SceneModel};
use super::narration::AudioTrack;
use super::render::{CheckError, SceneRenderer, SyntaxChecker, SyntaxVerdict};
use super::sanitize::SanitizedSource;
use super::speech::{SpeechError, SpeechSynthesizer};
use crate::common::process::{CapturedRun, ProcessError};

/// Model answer for a scene in `explainer.py` with two cues
pub fn scene_json(scene_name: &str, code: &str) -> String {
    json!({
        "file_name": "explainer.py",
        "scene_name": scene_name,
        "code": code,
        "subtitle_cues": [
            {"start": 0.0, "end": 3.0, "text": "one"},
            {"start": 5.0, "end": 7.0, "text": "two"}
        ]
    })
    .to_string()
}

pub struct FakeModel {
    responses: RefCell<VecDeque<Result<String, ModelError>>>,
    requests: RefCell<Vec<CompletionRequest>>,
}

impl FakeModel {
    pub fn new(responses: Vec<Result<String, ModelError>>) -> Self {
        Self {
            responses: RefCell::new(responses.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.borrow().clone()
    }
}

impl SceneModel for FakeModel {
    fn complete(&self, request: &CompletionRequest) -> Result<String, ModelError> {
        self.requests.borrow_mut().push(request.clone());
        self.responses
            .borrow_mut()
            .pop_front()
            .unwrap_or(Err(ModelError::Empty))
    }
}

pub enum RenderScript {
    Succeed,
    SucceedWithoutOutput,
    AlwaysFail(String),
    FailThenSucceed(String),
    TimeOut,
}

pub struct FakeRenderer {
    script: RenderScript,
    timeouts: RefCell<Vec<Duration>>,
}

impl FakeRenderer {
    pub fn new(script: RenderScript) -> Self {
        Self {
            script,
            timeouts: RefCell::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.timeouts.borrow().len()
    }

    pub fn timeouts(&self) -> Vec<Duration> {
        self.timeouts.borrow().clone()
    }

    fn succeed(workdir: &Path, file_name: &str) -> CapturedRun {
        let stem = Path::new(file_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("explainer");
        let dir = workdir.join("media/videos").join(stem).join("480p15");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("out.mp4"), b"video").unwrap();
        Self::finished(true, "File ready at out.mp4")
    }

    fn finished(success: bool, log: &str) -> CapturedRun {
        CapturedRun {
            success,
            code: Some(if success { 0 } else { 1 }),
            log: log.to_string(),
        }
    }
}

impl SceneRenderer for FakeRenderer {
    fn render(
        &self,
        workdir: &Path,
        file_name: &str,
        _scene_name: &str,
        timeout: Duration,
    ) -> Result<CapturedRun, ProcessError> {
        self.timeouts.borrow_mut().push(timeout);
        let call = self.calls();
        match &self.script {
            RenderScript::Succeed => Ok(Self::succeed(workdir, file_name)),
            RenderScript::SucceedWithoutOutput => Ok(Self::finished(true, "done")),
            RenderScript::AlwaysFail(log) => Ok(Self::finished(false, log)),
            RenderScript::FailThenSucceed(log) if call == 1 => Ok(Self::finished(false, log)),
            RenderScript::FailThenSucceed(_) => Ok(Self::succeed(workdir, file_name)),
            RenderScript::TimeOut => Err(ProcessError::Timeout {
                program: "manim".into(),
                timeout,
            }),
        }
    }
}

pub struct FakeChecker {
    invalid_calls: usize,
    calls: Cell<usize>,
}

impl FakeChecker {
    pub fn valid() -> Self {
        Self::invalid_for(0)
    }

    pub fn invalid_once() -> Self {
        Self::invalid_for(1)
    }

    pub fn always_invalid() -> Self {
        Self::invalid_for(usize::MAX)
    }

    fn invalid_for(invalid_calls: usize) -> Self {
        Self {
            invalid_calls,
            calls: Cell::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl SyntaxChecker for FakeChecker {
    fn check(
        &self,
        file_name: &str,
        _source: &SanitizedSource,
        _timeout: Duration,
    ) -> Result<SyntaxVerdict, CheckError> {
        let call = self.calls.get() + 1;
        self.calls.set(call);
        if call <= self.invalid_calls {
            Ok(SyntaxVerdict::Invalid(format!(
                "Traceback (most recent call last):\n  File \"{}\", line 1\nSyntaxError: invalid syntax\n",
                file_name
            )))
        } else {
            Ok(SyntaxVerdict::Valid)
        }
    }
}

/// Writes the spoken text into the clip so [`FakeMedia`] can measure it
#[derive(Default)]
pub struct FakeSpeech {
    fail: bool,
    calls: Cell<usize>,
}

impl FakeSpeech {
    pub fn failing() -> Self {
        Self {
            fail: true,
            calls: Cell::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl SpeechSynthesizer for FakeSpeech {
    fn speak(&self, text: &str, output: &Path) -> Result<(), SpeechError> {
        self.calls.set(self.calls.get() + 1);
        if self.fail {
            return Err(SpeechError::Api {
                status: 500,
                body: "voice unavailable".into(),
            });
        }
        fs::write(output, text).map_err(|source| SpeechError::Write {
            path: output.to_path_buf(),
            source,
        })
    }
}

#[derive(Default)]
pub struct FakeMedia {
    clips: HashMap<String, f64>,
    video_duration: Option<f64>,
    fail_mux: bool,
    assembled: RefCell<Vec<AudioTrack>>,
}

impl FakeMedia {
    pub fn with_clips(clips: &[(&str, f64)]) -> Self {
        Self {
            clips: clips
                .iter()
                .map(|(text, seconds)| (text.to_string(), *seconds))
                .collect(),
            ..Self::default()
        }
    }

    pub fn video_duration(mut self, seconds: f64) -> Self {
        self.video_duration = Some(seconds);
        self
    }

    pub fn failing_mux(mut self) -> Self {
        self.fail_mux = true;
        self
    }

    pub fn assembled(&self) -> Vec<AudioTrack> {
        self.assembled.borrow().clone()
    }
}

impl MediaToolkit for FakeMedia {
    fn probe_video_duration(&self, _video: &Path) -> Result<f64, MediaError> {
        self.video_duration.ok_or_else(|| MediaError::Duration {
            tool: "ffprobe".into(),
            output: "N/A".into(),
        })
    }

    fn probe_clip_duration(&self, clip: &Path) -> Result<f64, MediaError> {
        let text = fs::read_to_string(clip).unwrap_or_default();
        Ok(self.clips.get(&text).copied().unwrap_or(1.0))
    }

    fn assemble_narration(&self, track: &AudioTrack, output: &Path) -> Result<(), MediaError> {
        if track.segments.is_empty() {
            return Err(MediaError::EmptyTrack);
        }
        self.assembled.borrow_mut().push(track.clone());
        fs::write(output, b"narration").unwrap();
        Ok(())
    }

    fn mux(&self, _video: &Path, _audio: &Path, output: &Path) -> Result<(), MediaError> {
        if self.fail_mux {
            return Err(MediaError::Failed {
                tool: "ffmpeg".into(),
                code: Some(1),
                log: "Invalid data found when processing input".into(),
            });
        }
        fs::write(output, b"video+audio").unwrap();
        Ok(())
    }
}
