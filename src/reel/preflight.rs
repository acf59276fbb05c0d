//! Tool and credential checks run before a job and by `mathreel diag`.

use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color, ContentArrangement, Table};
use serde::Serialize;
use std::path::PathBuf;

use super::config::ReelConfig;
use super::error::{ErrorKind, JobFailure};
use crate::ui::prelude::{Level, OutputFormat, emit, get_output_format};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "message", rename_all = "lowercase")]
pub enum CheckStatus {
    Pass(String),
    Fail(String),
    Warning(String),
}

impl CheckStatus {
    pub fn message(&self) -> &str {
        match self {
            CheckStatus::Pass(msg) | CheckStatus::Fail(msg) | CheckStatus::Warning(msg) => msg,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, CheckStatus::Fail(_))
    }

    fn label(&self) -> &'static str {
        match self {
            CheckStatus::Pass(_) => "PASS",
            CheckStatus::Fail(_) => "FAIL",
            CheckStatus::Warning(_) => "WARN",
        }
    }

    fn color(&self) -> Color {
        match self {
            CheckStatus::Pass(_) => Color::Green,
            CheckStatus::Fail(_) => Color::Red,
            CheckStatus::Warning(_) => Color::Yellow,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub name: &'static str,
    #[serde(flatten)]
    pub status: CheckStatus,
}

/// Outcome of all checks against one configuration
#[derive(Debug, Clone, Serialize)]
pub struct Preflight {
    pub model: String,
    pub voice_model: String,
    pub checks: Vec<CheckResult>,
    #[serde(skip)]
    api_key: Option<String>,
}

impl Preflight {
    /// Check the configured tools on `PATH` and the API key in the environment
    pub fn run(config: &ReelConfig) -> Self {
        Self::with(config, |program| which::which(program).ok(), config.api_key())
    }

    pub fn with(
        config: &ReelConfig,
        find: impl Fn(&str) -> Option<PathBuf>,
        api_key: Option<String>,
    ) -> Self {
        let tool = |name: &'static str, program: &str| CheckResult {
            name,
            status: match find(program) {
                Some(path) => CheckStatus::Pass(path.display().to_string()),
                None => CheckStatus::Fail(format!("`{}` not found on PATH", program)),
            },
        };

        let mut checks = vec![
            tool("renderer", &config.renderer),
            tool("python", &config.python),
            tool("ffmpeg", &config.ffmpeg),
            tool("ffprobe", &config.ffprobe),
        ];
        checks.push(CheckResult {
            name: "api key",
            status: if api_key.is_some() {
                CheckStatus::Pass(format!("${} is set", config.api_key_env))
            } else {
                CheckStatus::Fail(format!("${} is not set", config.api_key_env))
            },
        });
        checks.push(CheckResult {
            name: "model timeout",
            status: match config.model_timeout_secs {
                Some(secs) => CheckStatus::Pass(format!("{}s", secs)),
                None => CheckStatus::Warning("unset, model calls wait indefinitely".to_string()),
            },
        });

        Self {
            model: config.model.clone(),
            voice_model: config.voice_model.clone(),
            checks,
            api_key,
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks.iter().filter(|check| check.status.is_failure())
    }

    /// The API key, or a `PreflightMissing` failure naming everything missing
    pub fn require(self) -> Result<String, JobFailure> {
        let missing: Vec<String> = self
            .failures()
            .map(|check| format!("{} ({})", check.name, check.status.message()))
            .collect();
        if !missing.is_empty() {
            return Err(JobFailure::new(
                ErrorKind::PreflightMissing,
                format!("missing prerequisites: {}", missing.join(", ")),
            ));
        }
        self.api_key.ok_or_else(|| {
            JobFailure::new(ErrorKind::PreflightMissing, "API key is not set")
        })
    }

    pub fn print(&self) {
        if get_output_format() == OutputFormat::Json {
            emit(
                Level::Info,
                "reel.diag",
                "Diagnostics",
                serde_json::to_value(self).ok(),
            );
            return;
        }

        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec!["Check", "Status", "Detail"]);
        table.add_row(vec![
            Cell::new("model"),
            Cell::new("INFO"),
            Cell::new(format!("{} / voice {}", self.model, self.voice_model)),
        ]);
        for check in &self.checks {
            table.add_row(vec![
                Cell::new(check.name),
                Cell::new(check.status.label()).fg(check.status.color()),
                Cell::new(check.status.message()),
            ]);
        }
        println!("{}", table);

        let failed = self.failures().count();
        if failed == 0 {
            emit(Level::Success, "reel.diag.ok", "Ready to render", None);
        } else {
            emit(
                Level::Warn,
                "reel.diag.missing",
                &format!("{} prerequisite(s) missing", failed),
                None,
            );
        }
    }
}
