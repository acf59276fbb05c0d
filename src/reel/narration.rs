//! Narration track assembly from subtitle cues.
//!
//! Cues are voiced in list order. Silence is always measured against the
//! audio already laid down, not against nominal cue times: a clip shorter
//! than its cue is padded out to the cue's end, a clip that overruns eats
//! into the following gap, and the tail is padded up to the rendered
//! video's length so the narration never ends before the picture does.

use std::path::{Path, PathBuf};
use thiserror::Error;

use super::cues::SubtitleCue;
use super::media::{MediaError, MediaToolkit};
use super::speech::{SpeechError, SpeechSynthesizer};
use crate::ui::prelude::{Level, emit};

#[derive(Debug, Clone, PartialEq)]
pub enum AudioSegment {
    Speech { path: PathBuf, duration: f64 },
    Silence { duration: f64 },
}

impl AudioSegment {
    pub fn duration(&self) -> f64 {
        match self {
            AudioSegment::Speech { duration, .. } | AudioSegment::Silence { duration } => {
                *duration
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioTrack {
    pub segments: Vec<AudioSegment>,
}

impl AudioTrack {
    pub fn total_duration(&self) -> f64 {
        self.segments.iter().map(AudioSegment::duration).sum()
    }

    /// Append silence until the track reaches `target` seconds.
    ///
    /// Millisecond resolution, rounded up so the track is never short of
    /// `target`; a track already at or past it is left alone.
    fn pad_to(&mut self, target: f64) {
        let missing = target - self.total_duration();
        let millis = (missing * 1000.0 - 1e-6).ceil();
        if millis >= 1.0 {
            self.segments.push(AudioSegment::Silence {
                duration: millis / 1000.0,
            });
        }
    }
}

#[derive(Debug, Error)]
pub enum NarrationError {
    #[error("speech for cue {index} failed: {source}")]
    Speech {
        index: usize,
        #[source]
        source: SpeechError,
    },

    #[error("could not measure speech clip for cue {index}: {source}")]
    Clip {
        index: usize,
        #[source]
        source: MediaError,
    },
}

pub fn chunk_path(workdir: &Path, index: usize) -> PathBuf {
    workdir.join(format!("speech_chunk_{}.mp3", index))
}

/// Build the narration track for `cues`.
///
/// `video_duration` is the probed length of the rendered video; when it is
/// unknown the end of the last cue is used. The result is never shorter
/// than either.
pub fn synthesize(
    cues: &[SubtitleCue],
    video_duration: Option<f64>,
    workdir: &Path,
    speech: &dyn SpeechSynthesizer,
    media: &dyn MediaToolkit,
) -> Result<AudioTrack, NarrationError> {
    let mut track = AudioTrack::default();
    let mut last_end = 0.0_f64;

    for (i, cue) in cues.iter().enumerate() {
        let index = i + 1;
        track.pad_to(cue.start);

        let text = cue.text.trim();
        if !text.is_empty() {
            emit(
                Level::Debug,
                "reel.narration.cue",
                &format!("Speaking cue {}/{}: {}", index, cues.len(), text),
                None,
            );
            let path = chunk_path(workdir, index);
            speech
                .speak(text, &path)
                .map_err(|source| NarrationError::Speech { index, source })?;
            let duration = media
                .probe_clip_duration(&path)
                .map_err(|source| NarrationError::Clip { index, source })?;
            track.segments.push(AudioSegment::Speech { path, duration });
        }
        track.pad_to(cue.end);

        last_end = last_end.max(cue.end);
    }

    track.pad_to(video_duration.unwrap_or(last_end).max(last_end));

    Ok(track)
}
