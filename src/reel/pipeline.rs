//! End-to-end job: render, narrate, mux, publish.

use serde::Serialize;
use std::fs;
use std::path::Path;

use super::config::ReelConfig;
use super::error::{ErrorKind, JobFailure};
use super::job::{CAPTIONS_FILE, RENDER_LOG, RenderJob};
use super::media::{MediaError, MediaToolkit};
use super::model::SceneModel;
use super::narration::{self, NarrationError};
use super::orchestrator::{Orchestrator, RenderedScene};
use super::render::{OUTPUT_FILE, SceneRenderer, SyntaxChecker};
use super::speech::SpeechSynthesizer;
use crate::ui::prelude::{Level, emit};

pub const NARRATION_FILE: &str = "narration.mp3";
pub const MERGED_FILE: &str = "merged.mp4";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobOutput {
    pub job_id: String,
    pub video_url: String,
    pub subs_url: String,
}

/// External collaborators of one job
pub struct Services<'a> {
    pub model: &'a dyn SceneModel,
    pub checker: &'a dyn SyntaxChecker,
    pub renderer: &'a dyn SceneRenderer,
    pub speech: &'a dyn SpeechSynthesizer,
    pub media: &'a dyn MediaToolkit,
}

/// Run one prompt to a narrated video under `<renders_dir>/<job_id>`.
///
/// The job directory and everything written into it are kept whatever the
/// outcome; `job.json` records the attempts either way.
pub fn run_job(
    config: &ReelConfig,
    services: &Services<'_>,
    renders_dir: &Path,
    prompt: &str,
) -> Result<JobOutput, JobFailure> {
    let mut job = RenderJob::create(renders_dir).map_err(|err| {
        JobFailure::new(
            ErrorKind::PreflightMissing,
            format!("could not create job directory: {:#}", err),
        )
    })?;
    emit(
        Level::Info,
        "reel.job.start",
        &format!("Job {} in {}", job.job_id, job.workdir.display()),
        None,
    );

    let result = produce(config, services, &mut job, prompt);

    if let Err(failure) = &result
        && job.path(RENDER_LOG).exists()
        && let Err(err) = job.write_error_file(failure)
    {
        emit(
            Level::Warn,
            "reel.job.error_file",
            &format!("Could not write error.txt: {:#}", err),
            None,
        );
    }
    if let Err(err) = job.write_manifest(
        prompt,
        result.as_ref().map(|_| ()),
        config.log_excerpt_chars,
    ) {
        emit(
            Level::Warn,
            "reel.job.manifest",
            &format!("Could not write job manifest: {:#}", err),
            None,
        );
    }

    result
}

fn produce(
    config: &ReelConfig,
    services: &Services<'_>,
    job: &mut RenderJob,
    prompt: &str,
) -> Result<JobOutput, JobFailure> {
    let orchestrator = Orchestrator::new(
        config,
        services.model,
        services.checker,
        services.renderer,
    );
    let rendered = orchestrator.run(job, prompt)?;

    add_narration(config, services, job, &rendered)?;

    let output = JobOutput {
        job_id: job.job_id.clone(),
        video_url: config.public_url(&job.job_id, OUTPUT_FILE),
        subs_url: config.public_url(&job.job_id, CAPTIONS_FILE),
    };
    emit(
        Level::Success,
        "reel.job.done",
        &format!("Video ready: {}", output.video_url),
        serde_json::to_value(&output).ok(),
    );
    Ok(output)
}

/// Voice the cues, then replace the silent `out.mp4` with the muxed video
fn add_narration(
    config: &ReelConfig,
    services: &Services<'_>,
    job: &RenderJob,
    rendered: &RenderedScene,
) -> Result<(), JobFailure> {
    let video_duration = match services.media.probe_video_duration(&rendered.video) {
        Ok(seconds) => Some(seconds),
        Err(err) => {
            emit(
                Level::Warn,
                "reel.narration.probe",
                &format!("Could not probe video duration, using cue timing: {}", err),
                None,
            );
            None
        }
    };

    emit(
        Level::Info,
        "reel.narration.start",
        &format!(
            "Generating narration for {} cues",
            rendered.payload.subtitle_cues.len()
        ),
        None,
    );
    let track = narration::synthesize(
        &rendered.payload.subtitle_cues,
        video_duration,
        &job.workdir,
        services.speech,
        services.media,
    )
    .map_err(|err| narration_failure(err, config))?;

    let narration_path = job.path(NARRATION_FILE);
    services
        .media
        .assemble_narration(&track, &narration_path)
        .map_err(|err| media_failure(ErrorKind::AudioSynthesisFailed, err, config))?;
    emit(
        Level::Info,
        "reel.narration.done",
        &format!(
            "Narration saved to {} ({:.2}s)",
            narration_path.display(),
            track.total_duration()
        ),
        None,
    );

    let merged = job.path(MERGED_FILE);
    services
        .media
        .mux(&rendered.video, &narration_path, &merged)
        .map_err(|err| media_failure(ErrorKind::MuxFailed, err, config))?;
    fs::rename(&merged, &rendered.video).map_err(|err| {
        JobFailure::new(
            ErrorKind::MuxFailed,
            format!("could not replace {}: {}", rendered.video.display(), err),
        )
    })
}

fn narration_failure(err: NarrationError, config: &ReelConfig) -> JobFailure {
    let failure = JobFailure::new(ErrorKind::AudioSynthesisFailed, err.to_string());
    match &err {
        NarrationError::Clip { source, .. } => match source.log() {
            Some(log) => failure.with_details(log, config.log_excerpt_chars),
            None => failure,
        },
        NarrationError::Speech { .. } => failure,
    }
}

fn media_failure(kind: ErrorKind, err: MediaError, config: &ReelConfig) -> JobFailure {
    let failure = JobFailure::new(kind, err.to_string());
    match err.log() {
        Some(log) => failure.with_details(log, config.log_excerpt_chars),
        None => failure,
    }
}
