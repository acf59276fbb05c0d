//! The bounded generate → check → render → repair state machine.
//!
//! Each stage (syntax check, render) may spend exactly one repair round-trip
//! through the model. Every check and render is recorded on the job, and
//! every path ends in either a rendered video or a classified [`JobFailure`].

use std::fs;
use std::path::PathBuf;

use super::config::ReelConfig;
use super::cues::write_vtt;
use super::error::{ErrorKind, FailureClass, JobFailure};
use super::job::{AttemptOutcome, CAPTIONS_FILE, RenderJob, Stage};
use super::model::{CompletionRequest, ModelError, SceneModel};
use super::payload::{PayloadError, ScenePayload, parse_payload_json};
use super::prompts;
use super::render::{
    CheckError, SceneRenderer, SyntaxChecker, SyntaxVerdict, classify_failure, locate_output,
    promote_output,
};
use super::sanitize::{SanitizeError, SanitizedSource, sanitize};
use crate::common::process::ProcessError;
use crate::ui::prelude::{Level, emit};

/// A scene whose video now sits at `<workdir>/out.mp4`
#[derive(Debug, Clone)]
pub struct RenderedScene {
    pub payload: ScenePayload,
    pub video: PathBuf,
}

/// One repair per stage
#[derive(Debug, Default, Clone, Copy)]
struct RepairBudget {
    syntax_spent: bool,
    render_spent: bool,
}

impl RepairBudget {
    /// Spend the stage's repair; false when it is already gone
    fn spend(&mut self, stage: Stage) -> bool {
        let slot = match stage {
            Stage::SyntaxCheck => &mut self.syntax_spent,
            Stage::Render => &mut self.render_spent,
        };
        !std::mem::replace(slot, true)
    }

    fn any_spent(&self) -> bool {
        self.syntax_spent || self.render_spent
    }
}

pub struct Orchestrator<'a> {
    config: &'a ReelConfig,
    model: &'a dyn SceneModel,
    checker: &'a dyn SyntaxChecker,
    renderer: &'a dyn SceneRenderer,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        config: &'a ReelConfig,
        model: &'a dyn SceneModel,
        checker: &'a dyn SyntaxChecker,
        renderer: &'a dyn SceneRenderer,
    ) -> Self {
        Self {
            config,
            model,
            checker,
            renderer,
        }
    }

    /// Generate a scene for `prompt` and drive it to a rendered video
    pub fn run(&self, job: &mut RenderJob, prompt: &str) -> Result<RenderedScene, JobFailure> {
        let payload = self.generate(prompt)?;
        self.render_payload(job, payload)
    }

    /// First generation plus the optional critique pass
    pub fn generate(&self, prompt: &str) -> Result<ScenePayload, JobFailure> {
        emit(
            Level::Info,
            "reel.generate.start",
            "Asking the model for a scene...",
            None,
        );
        let raw = self
            .model
            .complete(&CompletionRequest::json(
                prompts::SYSTEM_PROMPT,
                prompts::user_prompt(prompt),
            ))
            .map_err(transport_failure)?;
        let payload = parse_payload_json(&raw).map_err(|err| self.payload_failure(err))?;

        emit(
            Level::Info,
            "reel.generate.done",
            &format!(
                "Model proposed {} ({}, {} cues)",
                payload.scene_name,
                payload.file_name,
                payload.subtitle_cues.len()
            ),
            None,
        );

        if self.config.critique {
            Ok(self.critique(payload))
        } else {
            Ok(payload)
        }
    }

    /// Critique-and-regenerate; any failure keeps `payload`
    fn critique(&self, payload: ScenePayload) -> ScenePayload {
        emit(
            Level::Info,
            "reel.critique.start",
            "Asking the model to critique its code...",
            None,
        );

        let critique = match self
            .model
            .complete(&CompletionRequest::free_text(prompts::critique_prompt(
                &payload.code,
            ))) {
            Ok(text) => text,
            Err(err) => {
                emit(
                    Level::Warn,
                    "reel.critique.failed",
                    &format!("Critique request failed, keeping first draft: {}", err),
                    None,
                );
                return payload;
            }
        };

        let regenerated = self
            .model
            .complete(&CompletionRequest::json(
                prompts::SYSTEM_PROMPT,
                prompts::regeneration_prompt(&critique, &payload.code),
            ))
            .map_err(|err| err.to_string())
            .and_then(|raw| parse_payload_json(&raw).map_err(|err| err.to_string()));

        match regenerated {
            Ok(improved) => {
                emit(
                    Level::Info,
                    "reel.critique.applied",
                    "Applied critique to the scene",
                    None,
                );
                improved
            }
            Err(reason) => {
                emit(
                    Level::Warn,
                    "reel.critique.failed",
                    &format!("Regeneration failed, keeping first draft: {}", reason),
                    None,
                );
                payload
            }
        }
    }

    /// Syntax check then render `payload`, repairing at most once per stage
    pub fn render_payload(
        &self,
        job: &mut RenderJob,
        payload: ScenePayload,
    ) -> Result<RenderedScene, JobFailure> {
        let mut budget = RepairBudget::default();
        let (payload, sanitized) = self.syntax_stage(job, payload, &mut budget)?;
        self.render_stage(job, payload, sanitized, &mut budget)
    }

    fn syntax_stage(
        &self,
        job: &mut RenderJob,
        mut payload: ScenePayload,
        budget: &mut RepairBudget,
    ) -> Result<(ScenePayload, SanitizedSource), JobFailure> {
        loop {
            let sanitized = sanitize(&payload.code).map_err(forbidden_failure)?;

            let verdict = self.checker.check(
                &payload.file_name,
                &sanitized,
                self.config.syntax_timeout(),
            );
            match verdict {
                Ok(SyntaxVerdict::Valid) => {
                    job.record(
                        &payload,
                        Some(sanitized.as_str()),
                        Stage::SyntaxCheck,
                        AttemptOutcome::Success,
                    );
                    return Ok((payload, sanitized));
                }
                Ok(SyntaxVerdict::Invalid(diagnostic)) => {
                    job.record(
                        &payload,
                        Some(sanitized.as_str()),
                        Stage::SyntaxCheck,
                        AttemptOutcome::Failure {
                            kind: ErrorKind::SyntaxError,
                            log: diagnostic.clone(),
                        },
                    );
                    self.append_log(job, "Syntax check", &diagnostic);
                    emit(
                        Level::Warn,
                        "reel.syntax.failed",
                        &format!("{} does not compile", payload.file_name),
                        None,
                    );

                    match self.attempt_repair(budget, Stage::SyntaxCheck, &diagnostic, None, &payload)? {
                        Some(repaired) => payload = repaired,
                        None => {
                            return Err(JobFailure::new(
                                ErrorKind::SyntaxError,
                                "generated code still does not compile after repair",
                            )
                            .with_details(&diagnostic, self.config.log_excerpt_chars));
                        }
                    }
                }
                Err(err) => return Err(self.checker_failure(err)),
            }
        }
    }

    fn render_stage(
        &self,
        job: &mut RenderJob,
        mut payload: ScenePayload,
        mut sanitized: SanitizedSource,
        budget: &mut RepairBudget,
    ) -> Result<RenderedScene, JobFailure> {
        loop {
            if let Err(failure) = self.write_scene_files(job, &payload, &sanitized) {
                job.record(
                    &payload,
                    Some(sanitized.as_str()),
                    Stage::Render,
                    AttemptOutcome::Failure {
                        kind: failure.kind,
                        log: failure.message.clone(),
                    },
                );
                return Err(failure);
            }

            let attempt = job.renders() + 1;
            let timeout = self.config.render_timeout(budget.any_spent());
            emit(
                Level::Info,
                "reel.render.start",
                &format!(
                    "Rendering {} (attempt {}, timeout {}s)",
                    payload.scene_name,
                    attempt,
                    timeout.as_secs()
                ),
                None,
            );

            let result = self.renderer.render(
                &job.workdir,
                &payload.file_name,
                &payload.scene_name,
                timeout,
            );
            let run = match result {
                Ok(run) => run,
                Err(err) => {
                    let failure = render_process_failure(&err);
                    job.record(
                        &payload,
                        Some(sanitized.as_str()),
                        Stage::Render,
                        AttemptOutcome::Failure {
                            kind: failure.kind,
                            log: err.to_string(),
                        },
                    );
                    self.append_log(job, &format!("Render attempt {}", attempt), &err.to_string());
                    return Err(failure);
                }
            };

            self.append_log(job, &format!("Render attempt {}", attempt), &run.log);

            if run.success {
                let video = match self.collect_output(job, &payload, &run.log) {
                    Ok(video) => video,
                    Err(failure) => {
                        job.record(
                            &payload,
                            Some(sanitized.as_str()),
                            Stage::Render,
                            AttemptOutcome::Failure {
                                kind: failure.kind,
                                log: run.log.clone(),
                            },
                        );
                        return Err(failure);
                    }
                };
                job.record(
                    &payload,
                    Some(sanitized.as_str()),
                    Stage::Render,
                    AttemptOutcome::Success,
                );
                emit(
                    Level::Success,
                    "reel.render.done",
                    &format!("Rendered {}", video.display()),
                    None,
                );
                return Ok(RenderedScene { payload, video });
            }

            let class = classify_failure(&run.log);
            job.record(
                &payload,
                Some(sanitized.as_str()),
                Stage::Render,
                AttemptOutcome::Failure {
                    kind: ErrorKind::RenderError(class),
                    log: run.log.clone(),
                },
            );
            emit(
                Level::Warn,
                "reel.render.failed",
                &format!(
                    "Render attempt {} failed ({})",
                    attempt,
                    ErrorKind::RenderError(class)
                ),
                None,
            );

            match self.attempt_repair(budget, Stage::Render, &run.log, Some(class), &payload)? {
                Some(repaired) => {
                    sanitized = sanitize(&repaired.code).map_err(forbidden_failure)?;
                    payload = repaired;
                }
                None => {
                    return Err(JobFailure::new(
                        ErrorKind::RenderError(class),
                        "render failed after repair",
                    )
                    .with_details(&run.log, self.config.log_excerpt_chars));
                }
            }
        }
    }

    /// Spend `stage`'s repair and ask the model for a fixed payload.
    ///
    /// `Ok(None)` means the stage has no repair left. A transport failure or
    /// an unusable answer ends the job as [`ErrorKind::RenderFailed`], carrying
    /// the diagnostic that prompted the repair.
    fn attempt_repair(
        &self,
        budget: &mut RepairBudget,
        stage: Stage,
        diagnostic: &str,
        class: Option<FailureClass>,
        previous: &ScenePayload,
    ) -> Result<Option<ScenePayload>, JobFailure> {
        if !budget.spend(stage) {
            return Ok(None);
        }

        let prompt = match (stage, class) {
            (Stage::SyntaxCheck, _) => prompts::syntax_repair_prompt(diagnostic, &previous.code),
            (Stage::Render, Some(FailureClass::Markup)) => {
                prompts::markup_repair_prompt(diagnostic, &previous.code)
            }
            (Stage::Render, _) => prompts::render_repair_prompt(diagnostic, &previous.code),
        };

        emit(
            Level::Info,
            "reel.repair.request",
            &format!("Asking the model to repair the failed {}...", stage.label()),
            None,
        );

        let unusable = |message: String| {
            emit(Level::Error, "reel.repair.failed", &message, None);
            JobFailure::new(ErrorKind::RenderFailed, message)
                .with_details(diagnostic, self.config.log_excerpt_chars)
        };

        let raw = self
            .model
            .complete(&CompletionRequest::json(prompts::SYSTEM_PROMPT, prompt))
            .map_err(|err| unusable(format!("repair request failed: {}", err)))?;
        let repaired = parse_payload_json(&raw)
            .map_err(|err| unusable(format!("repair response unusable: {}", err)))?;

        Ok(Some(repaired))
    }

    fn write_scene_files(
        &self,
        job: &RenderJob,
        payload: &ScenePayload,
        sanitized: &SanitizedSource,
    ) -> Result<(), JobFailure> {
        let code_path = job.path(&payload.file_name);
        fs::write(&code_path, sanitized.as_str()).map_err(|err| {
            JobFailure::new(
                ErrorKind::RenderError(FailureClass::Generic),
                format!("could not write {}: {}", code_path.display(), err),
            )
        })?;
        write_vtt(&job.path(CAPTIONS_FILE), &payload.subtitle_cues).map_err(|err| {
            JobFailure::new(
                ErrorKind::RenderError(FailureClass::Generic),
                format!("{:#}", err),
            )
        })
    }

    fn collect_output(
        &self,
        job: &RenderJob,
        payload: &ScenePayload,
        log: &str,
    ) -> Result<PathBuf, JobFailure> {
        let missing = |message: String| {
            JobFailure::new(ErrorKind::OutputMissing, message)
                .with_details(log, self.config.log_excerpt_chars)
        };

        let found = locate_output(&job.workdir, payload.module_name()).ok_or_else(|| {
            missing(format!(
                "render finished but out.mp4 was not found under {}",
                job.workdir.display()
            ))
        })?;
        promote_output(&found, &job.workdir)
            .map_err(|err| missing(format!("could not copy {}: {}", found.display(), err)))
    }

    fn append_log(&self, job: &RenderJob, header: &str, log: &str) {
        if let Err(err) = job.append_log(header, log) {
            emit(
                Level::Warn,
                "reel.log.write_failed",
                &format!("Could not write render log: {:#}", err),
                None,
            );
        }
    }

    fn checker_failure(&self, err: CheckError) -> JobFailure {
        match err {
            CheckError::Process(ProcessError::Timeout { timeout, .. }) => JobFailure::new(
                ErrorKind::Timeout,
                format!("syntax check timed out after {}s", timeout.as_secs()),
            ),
            CheckError::Crashed { ref log, .. } => {
                JobFailure::new(ErrorKind::PreflightMissing, err.to_string())
                    .with_details(log, self.config.log_excerpt_chars)
            }
            other => JobFailure::new(ErrorKind::PreflightMissing, other.to_string()),
        }
    }

    fn payload_failure(&self, err: PayloadError) -> JobFailure {
        JobFailure::new(err.kind(), err.to_string())
            .with_details(&err.details(), self.config.log_excerpt_chars)
    }
}

fn transport_failure(err: ModelError) -> JobFailure {
    JobFailure::new(ErrorKind::TransportError, err.to_string())
}

fn forbidden_failure(err: SanitizeError) -> JobFailure {
    JobFailure::new(ErrorKind::ForbiddenCapabilityError, err.to_string())
}

fn render_process_failure(err: &ProcessError) -> JobFailure {
    match err {
        ProcessError::Timeout { timeout, .. } => JobFailure::new(
            ErrorKind::Timeout,
            format!("render timed out after {}s", timeout.as_secs()),
        ),
        ProcessError::Spawn { .. } => JobFailure::new(ErrorKind::PreflightMissing, err.to_string()),
        ProcessError::Wait { .. } => {
            JobFailure::new(ErrorKind::RenderError(FailureClass::Generic), err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reel::fakes::{FakeChecker, FakeModel, FakeRenderer, RenderScript, scene_json};
    use crate::reel::job::MANIFEST_FILE;
    use tempfile::TempDir;

    fn config() -> ReelConfig {
        ReelConfig {
            critique: false,
            ..ReelConfig::default()
        }
    }

    fn job(root: &TempDir) -> RenderJob {
        RenderJob::create(root.path()).unwrap()
    }

    #[test]
    fn always_failing_renderer_is_bounded() {
        let root = TempDir::new().unwrap();
        let mut job = job(&root);
        let config = config();
        let model = FakeModel::new(vec![
            Ok(scene_json("Demo", "x = 1")),
            Ok(scene_json("Demo", "x = 2")),
        ]);
        let renderer = FakeRenderer::new(RenderScript::AlwaysFail("NameError: name 'Foo'".into()));
        let checker = FakeChecker::valid();

        let failure = Orchestrator::new(&config, &model, &checker, &renderer)
            .run(&mut job, "pythagoras")
            .unwrap_err();

        assert_eq!(failure.kind, ErrorKind::RenderError(FailureClass::Generic));
        assert_eq!(renderer.calls(), 2);
        // one generation plus one repair
        assert_eq!(model.requests().len(), 2);
        assert!(failure.details.unwrap().contains("NameError"));
        assert_eq!(job.renders(), 2);
    }

    #[test]
    fn markup_failures_get_the_latex_repair_prompt() {
        let root = TempDir::new().unwrap();
        let mut job = job(&root);
        let config = config();
        let model = FakeModel::new(vec![
            Ok(scene_json("Demo", "x = 1")),
            Ok(scene_json("Demo", "x = 2")),
        ]);
        let renderer = FakeRenderer::new(RenderScript::FailThenSucceed(
            "! Missing } inserted.".into(),
        ));
        let checker = FakeChecker::valid();

        let rendered = Orchestrator::new(&config, &model, &checker, &renderer)
            .run(&mut job, "euler")
            .unwrap();

        let repair = &model.requests()[1];
        assert!(repair.user.contains("LaTeX syntax error"));
        assert!(repair.json_mode);
        assert!(rendered.payload.code.contains("x = 2"));
        assert_eq!(rendered.video, job.workdir.join("out.mp4"));
        assert!(rendered.video.exists());
        // the second render ran with the post-repair timeout
        assert_eq!(renderer.timeouts()[1].as_secs(), 900);
        assert_eq!(renderer.timeouts()[0].as_secs(), 480);
    }

    #[test]
    fn forbidden_code_never_reaches_the_filesystem() {
        let root = TempDir::new().unwrap();
        let mut job = job(&root);
        let config = config();
        let model = FakeModel::new(vec![Ok(scene_json("Demo", "import subprocess"))]);
        let renderer = FakeRenderer::new(RenderScript::Succeed);
        let checker = FakeChecker::valid();

        let failure = Orchestrator::new(&config, &model, &checker, &renderer)
            .run(&mut job, "anything")
            .unwrap_err();

        assert_eq!(failure.kind, ErrorKind::ForbiddenCapabilityError);
        assert_eq!(checker.calls(), 0);
        assert_eq!(renderer.calls(), 0);
        assert_eq!(fs::read_dir(&job.workdir).unwrap().count(), 0);
    }

    #[test]
    fn second_syntax_failure_is_terminal() {
        let root = TempDir::new().unwrap();
        let mut job = job(&root);
        let config = config();
        let model = FakeModel::new(vec![
            Ok(scene_json("Demo", "def (")),
            Ok(scene_json("Demo", "def )")),
        ]);
        let renderer = FakeRenderer::new(RenderScript::Succeed);
        let checker = FakeChecker::always_invalid();

        let failure = Orchestrator::new(&config, &model, &checker, &renderer)
            .run(&mut job, "anything")
            .unwrap_err();

        assert_eq!(failure.kind, ErrorKind::SyntaxError);
        assert_eq!(checker.calls(), 2);
        assert_eq!(renderer.calls(), 0);
        assert!(job.path("render.log").exists());
    }

    #[test]
    fn unusable_repair_response_is_render_failed() {
        let root = TempDir::new().unwrap();
        let mut job = job(&root);
        let config = config();
        let model = FakeModel::new(vec![
            Ok(scene_json("Demo", "def (")),
            Ok("{\"file_name\": 3}".to_string()),
        ]);
        let renderer = FakeRenderer::new(RenderScript::Succeed);
        let checker = FakeChecker::always_invalid();

        let failure = Orchestrator::new(&config, &model, &checker, &renderer)
            .run(&mut job, "anything")
            .unwrap_err();

        assert_eq!(failure.kind, ErrorKind::RenderFailed);
        assert!(failure.details.unwrap().contains("SyntaxError"));
    }

    #[test]
    fn syntax_repair_then_clean_render() {
        let root = TempDir::new().unwrap();
        let mut job = job(&root);
        let config = config();
        let model = FakeModel::new(vec![
            Ok(scene_json("Demo", "def (")),
            Ok(scene_json("Demo", "x = 1")),
        ]);
        let renderer = FakeRenderer::new(RenderScript::Succeed);
        let checker = FakeChecker::invalid_once();

        let rendered = Orchestrator::new(&config, &model, &checker, &renderer)
            .run(&mut job, "anything")
            .unwrap();

        assert_eq!(rendered.payload.code, "x = 1");
        assert_eq!(renderer.calls(), 1);
        assert_eq!(renderer.timeouts()[0].as_secs(), 900);
        let stages: Vec<Stage> = job.attempts().iter().map(|a| a.stage).collect();
        assert_eq!(
            stages,
            vec![Stage::SyntaxCheck, Stage::SyntaxCheck, Stage::Render]
        );
        assert!(job.path("captions.vtt").exists());
        assert!(job.path("explainer.py").exists());
        assert!(!job.path(MANIFEST_FILE).exists());
    }

    #[test]
    fn render_timeout_is_not_retried() {
        let root = TempDir::new().unwrap();
        let mut job = job(&root);
        let config = config();
        let model = FakeModel::new(vec![Ok(scene_json("Demo", "x = 1"))]);
        let renderer = FakeRenderer::new(RenderScript::TimeOut);
        let checker = FakeChecker::valid();

        let failure = Orchestrator::new(&config, &model, &checker, &renderer)
            .run(&mut job, "anything")
            .unwrap_err();

        assert_eq!(failure.kind, ErrorKind::Timeout);
        assert_eq!(renderer.calls(), 1);
        assert_eq!(model.requests().len(), 1);
    }

    #[test]
    fn missing_output_is_reported() {
        let root = TempDir::new().unwrap();
        let mut job = job(&root);
        let config = config();
        let model = FakeModel::new(vec![Ok(scene_json("Demo", "x = 1"))]);
        let renderer = FakeRenderer::new(RenderScript::SucceedWithoutOutput);
        let checker = FakeChecker::valid();

        let failure = Orchestrator::new(&config, &model, &checker, &renderer)
            .run(&mut job, "anything")
            .unwrap_err();
        assert_eq!(failure.kind, ErrorKind::OutputMissing);

        let last = job.attempts().last().unwrap();
        assert_eq!(last.stage, Stage::Render);
        assert!(matches!(
            last.outcome,
            AttemptOutcome::Failure { kind: ErrorKind::OutputMissing, .. }
        ));
        assert!(
            !job.attempts()
                .iter()
                .any(|attempt| attempt.stage == Stage::Render
                    && attempt.outcome == AttemptOutcome::Success)
        );
    }

    #[test]
    fn unwritable_scene_file_is_recorded_as_a_failed_render() {
        let root = TempDir::new().unwrap();
        let mut job = job(&root);
        fs::create_dir(job.path("explainer.py")).unwrap();
        let config = config();
        let model = FakeModel::new(vec![Ok(scene_json("Demo", "x = 1"))]);
        let renderer = FakeRenderer::new(RenderScript::Succeed);
        let checker = FakeChecker::valid();

        let failure = Orchestrator::new(&config, &model, &checker, &renderer)
            .run(&mut job, "anything")
            .unwrap_err();

        assert_eq!(failure.kind, ErrorKind::RenderError(FailureClass::Generic));
        assert_eq!(renderer.calls(), 0);
        assert_eq!(job.renders(), 1);
        match &job.attempts().last().unwrap().outcome {
            AttemptOutcome::Failure { kind, log } => {
                assert_eq!(*kind, ErrorKind::RenderError(FailureClass::Generic));
                assert!(log.contains("explainer.py"));
            }
            other => panic!("expected a failed render, got {:?}", other),
        }
    }

    #[test]
    fn critique_failures_keep_the_first_draft() {
        let root = TempDir::new().unwrap();
        let mut job = job(&root);
        let config = ReelConfig::default();
        let model = FakeModel::new(vec![
            Ok(scene_json("Demo", "x = 1")),
            Ok("Looks fine, but label the axes.".to_string()),
            Ok("not json".to_string()),
        ]);
        let renderer = FakeRenderer::new(RenderScript::Succeed);
        let checker = FakeChecker::valid();

        let rendered = Orchestrator::new(&config, &model, &checker, &renderer)
            .run(&mut job, "anything")
            .unwrap();

        assert_eq!(rendered.payload.code, "x = 1");
        let requests = model.requests();
        assert_eq!(requests.len(), 3);
        assert!(!requests[1].json_mode);
        assert!(requests[1].system.is_none());
        assert!(requests[2].user.contains("label the axes"));
    }

    #[test]
    fn transport_failure_aborts_generation() {
        let config = config();
        let model = FakeModel::new(vec![Err(ModelError::Empty)]);
        let renderer = FakeRenderer::new(RenderScript::Succeed);
        let checker = FakeChecker::valid();

        let failure = Orchestrator::new(&config, &model, &checker, &renderer)
            .generate("anything")
            .unwrap_err();
        assert_eq!(failure.kind, ErrorKind::TransportError);
    }
}
