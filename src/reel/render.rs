//! External renderer and syntax checker invocations.

use duct::cmd;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use walkdir::WalkDir;

use super::config::ReelConfig;
use super::error::FailureClass;
use super::sanitize::SanitizedSource;
use crate::common::process::{CapturedRun, ProcessError, run_captured};
use crate::ui::progress::Spinner;

/// Name the renderer is told to give its output
pub const OUTPUT_FILE: &str = "out.mp4";

const MARKUP_MARKERS: &[&str] = &[
    "latex error",
    "latex compilation error",
    "missing }",
    "missing {",
    "undefined control",
    "missing $",
    "extra }",
];

/// Compiles without executing; stdin is the source, argv[1] the file name
const COMPILE_ONLY_SCRIPT: &str = r#"import sys, traceback
source = sys.stdin.read()
try:
    compile(source, sys.argv[1], "exec")
except (SyntaxError, ValueError) as exc:
    sys.stdout.write("Traceback (most recent call last):\n")
    sys.stdout.write("".join(traceback.format_exception_only(type(exc), exc)))
    sys.exit(1)
"#;

pub trait SceneRenderer {
    /// Render `scene_name` from `file_name` inside `workdir`
    fn render(
        &self,
        workdir: &Path,
        file_name: &str,
        scene_name: &str,
        timeout: Duration,
    ) -> Result<CapturedRun, ProcessError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyntaxVerdict {
    Valid,
    /// Traceback-formatted diagnostic
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum CheckError {
    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("syntax checker exited with {code:?}: {log}")]
    Crashed { code: Option<i32>, log: String },
}

pub trait SyntaxChecker {
    fn check(
        &self,
        file_name: &str,
        source: &SanitizedSource,
        timeout: Duration,
    ) -> Result<SyntaxVerdict, CheckError>;
}

pub struct ManimRenderer {
    program: String,
}

impl ManimRenderer {
    pub fn new(config: &ReelConfig) -> Self {
        Self {
            program: config.renderer.clone(),
        }
    }

    pub fn args(file_name: &str, scene_name: &str) -> Vec<String> {
        [
            "-ql",
            "--disable_caching",
            "--media_dir",
            ".",
            "--output_file",
            "out",
            file_name,
            scene_name,
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }
}

impl SceneRenderer for ManimRenderer {
    fn render(
        &self,
        workdir: &Path,
        file_name: &str,
        scene_name: &str,
        timeout: Duration,
    ) -> Result<CapturedRun, ProcessError> {
        let spinner = Spinner::start(format!("Rendering {}", scene_name));
        let expression = cmd(self.program.as_str(), Self::args(file_name, scene_name)).dir(workdir);
        let result = run_captured(&self.program, expression, timeout);
        spinner.finish();
        result
    }
}

pub struct PythonSyntaxChecker {
    program: String,
}

impl PythonSyntaxChecker {
    pub fn new(config: &ReelConfig) -> Self {
        Self {
            program: config.python.clone(),
        }
    }
}

impl SyntaxChecker for PythonSyntaxChecker {
    fn check(
        &self,
        file_name: &str,
        source: &SanitizedSource,
        timeout: Duration,
    ) -> Result<SyntaxVerdict, CheckError> {
        let expression = cmd!(self.program.as_str(), "-c", COMPILE_ONLY_SCRIPT, file_name)
            .stdin_bytes(source.as_str().as_bytes().to_vec());
        let run = run_captured(&self.program, expression, timeout)?;

        match run.code {
            Some(0) => Ok(SyntaxVerdict::Valid),
            Some(1) if run.log.contains("Traceback") => Ok(SyntaxVerdict::Invalid(run.log)),
            code => Err(CheckError::Crashed { code, log: run.log }),
        }
    }
}

/// Markup-class when the log names a known LaTeX failure
pub fn classify_failure(log: &str) -> FailureClass {
    let lowered = log.to_lowercase();
    if MARKUP_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        FailureClass::Markup
    } else {
        FailureClass::Generic
    }
}

/// Newest rendered `out.mp4`, preferring the module's own media directory.
///
/// `<workdir>/out.mp4` itself is never a candidate.
pub fn locate_output(workdir: &Path, module_name: &str) -> Option<PathBuf> {
    let final_path = workdir.join(OUTPUT_FILE);
    let module_dir = workdir.join("media").join("videos").join(module_name);

    newest_named(&module_dir, &final_path).or_else(|| newest_named(workdir, &final_path))
}

fn newest_named(root: &Path, exclude: &Path) -> Option<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.file_name() == OUTPUT_FILE && entry.path() != exclude)
        .map(|entry| {
            let modified = entry
                .metadata()
                .ok()
                .and_then(|meta| meta.modified().ok())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, entry.into_path())
        })
        .max_by_key(|(modified, _)| *modified)
        .map(|(_, path)| path)
}

/// Copy the located render to `<workdir>/out.mp4`
pub fn promote_output(found: &Path, workdir: &Path) -> std::io::Result<PathBuf> {
    let target = workdir.join(OUTPUT_FILE);
    fs::copy(found, &target)?;
    Ok(target)
}
