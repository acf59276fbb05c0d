//! ffprobe/ffmpeg adapter: duration probes, narration assembly, muxing.

use duct::cmd;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use super::config::ReelConfig;
use super::narration::{AudioSegment, AudioTrack};
use crate::common::process::{ProcessError, run_captured};

const NARRATION_SAMPLE_RATE: u32 = 24_000;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("{tool} failed with exit code {code:?}")]
    Failed {
        tool: String,
        code: Option<i32>,
        log: String,
    },

    #[error("{tool} returned an unreadable duration: {output:?}")]
    Duration { tool: String, output: String },

    #[error("narration track has no segments")]
    EmptyTrack,
}

impl MediaError {
    /// Tool output worth showing to the user
    pub fn log(&self) -> Option<&str> {
        match self {
            MediaError::Failed { log, .. } => Some(log),
            MediaError::Duration { output, .. } => Some(output),
            _ => None,
        }
    }
}

pub trait MediaToolkit {
    /// Duration of the first video stream in seconds
    fn probe_video_duration(&self, video: &Path) -> Result<f64, MediaError>;
    /// Container duration of an audio clip in seconds
    fn probe_clip_duration(&self, clip: &Path) -> Result<f64, MediaError>;
    fn assemble_narration(&self, track: &AudioTrack, output: &Path) -> Result<(), MediaError>;
    fn mux(&self, video: &Path, audio: &Path, output: &Path) -> Result<(), MediaError>;
}

pub struct Ffmpeg {
    ffmpeg: String,
    ffprobe: String,
    timeout: Duration,
}

impl Ffmpeg {
    pub fn new(config: &ReelConfig) -> Self {
        Self {
            ffmpeg: config.ffmpeg.clone(),
            ffprobe: config.ffprobe.clone(),
            timeout: config.media_timeout(),
        }
    }

    fn run(&self, program: &str, args: Vec<String>) -> Result<String, MediaError> {
        let run = run_captured(program, cmd(program, args), self.timeout)?;
        if !run.success {
            return Err(MediaError::Failed {
                tool: program.to_string(),
                code: run.code,
                log: run.log,
            });
        }
        Ok(run.log)
    }

    fn probe(&self, args: Vec<String>) -> Result<f64, MediaError> {
        let output = self.run(&self.ffprobe, args)?;
        parse_duration(&output).ok_or_else(|| MediaError::Duration {
            tool: self.ffprobe.clone(),
            output: output.trim().to_string(),
        })
    }
}

impl MediaToolkit for Ffmpeg {
    fn probe_video_duration(&self, video: &Path) -> Result<f64, MediaError> {
        self.probe(video_probe_args(video))
    }

    fn probe_clip_duration(&self, clip: &Path) -> Result<f64, MediaError> {
        self.probe(clip_probe_args(clip))
    }

    fn assemble_narration(&self, track: &AudioTrack, output: &Path) -> Result<(), MediaError> {
        let args = narration_args(track, output).ok_or(MediaError::EmptyTrack)?;
        self.run(&self.ffmpeg, args).map(|_| ())
    }

    fn mux(&self, video: &Path, audio: &Path, output: &Path) -> Result<(), MediaError> {
        self.run(&self.ffmpeg, mux_args(video, audio, output))
            .map(|_| ())
    }
}

fn parse_duration(output: &str) -> Option<f64> {
    output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .and_then(|line| line.parse::<f64>().ok())
        .filter(|seconds| seconds.is_finite() && *seconds >= 0.0)
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

pub fn video_probe_args(video: &Path) -> Vec<String> {
    let mut args = strings(&[
        "-v",
        "error",
        "-select_streams",
        "v:0",
        "-show_entries",
        "stream=duration",
        "-of",
        "csv=p=0",
    ]);
    args.push(path_arg(video));
    args
}

pub fn clip_probe_args(clip: &Path) -> Vec<String> {
    let mut args = strings(&[
        "-v",
        "error",
        "-show_entries",
        "format=duration",
        "-of",
        "default=noprint_wrappers=1:nokey=1",
    ]);
    args.push(path_arg(clip));
    args
}

/// One concat graph over all segments; `None` for an empty track
pub fn narration_args(track: &AudioTrack, output: &Path) -> Option<Vec<String>> {
    if track.segments.is_empty() {
        return None;
    }

    let format = format!(
        "aresample={rate},aformat=sample_fmts=fltp:sample_rates={rate}:channel_layouts=mono,asetpts=PTS-STARTPTS",
        rate = NARRATION_SAMPLE_RATE
    );

    let mut args = strings(&["-y"]);
    let mut chains = Vec::with_capacity(track.segments.len() + 1);
    let mut labels = String::new();
    let mut input_index = 0;

    for (i, segment) in track.segments.iter().enumerate() {
        match segment {
            AudioSegment::Speech { path, .. } => {
                args.push("-i".to_string());
                args.push(path_arg(path));
                chains.push(format!("[{}:a]{}[s{}]", input_index, format, i));
                input_index += 1;
            }
            AudioSegment::Silence { duration } => {
                chains.push(format!(
                    "anullsrc=r={}:cl=mono,atrim=duration={:.3},{}[s{}]",
                    NARRATION_SAMPLE_RATE, duration, format, i
                ));
            }
        }
        labels.push_str(&format!("[s{}]", i));
    }

    chains.push(format!(
        "{}concat=n={}:v=0:a=1[narration]",
        labels,
        track.segments.len()
    ));

    args.push("-filter_complex".to_string());
    args.push(chains.join(";"));
    args.extend(strings(&[
        "-map",
        "[narration]",
        "-c:a",
        "libmp3lame",
        "-q:a",
        "2",
    ]));
    args.push(path_arg(output));
    Some(args)
}

pub fn mux_args(video: &Path, audio: &Path, output: &Path) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-i".to_string(),
        path_arg(video),
        "-i".to_string(),
        path_arg(audio),
        "-c:v".to_string(),
        "copy".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-map".to_string(),
        "0:v:0".to_string(),
        "-map".to_string(),
        "1:a:0".to_string(),
        path_arg(output),
    ]
}
