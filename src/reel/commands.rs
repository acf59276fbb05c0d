use anyhow::{Context, Result, bail};
use serde_json::json;
use std::fs;

use super::cli::{ConfigArgs, GenerateArgs, ReelCommands, SanitizeArgs, ValidateArgs};
use super::config::ReelConfig;
use super::cues::write_vtt;
use super::media::Ffmpeg;
use super::model::OpenAiChat;
use super::payload::parse_payload_json;
use super::pipeline::{self, Services};
use super::preflight::Preflight;
use super::render::{ManimRenderer, PythonSyntaxChecker};
use super::sanitize::sanitize;
use super::speech::OpenAiSpeech;
use crate::common::config::DocumentedConfig;
use crate::common::paths;
use crate::ui::prelude::*;

pub fn handle_reel_command(command: ReelCommands) -> Result<()> {
    match command {
        ReelCommands::Generate(args) => handle_generate(args),
        ReelCommands::Sanitize(args) => handle_sanitize(args),
        ReelCommands::Validate(args) => handle_validate(args),
        ReelCommands::Diag => handle_diag(),
        ReelCommands::Config(args) => handle_config(args),
    }
}

fn handle_generate(args: GenerateArgs) -> Result<()> {
    let prompt = args.prompt.trim();
    if prompt.is_empty() {
        bail!("prompt must not be empty");
    }

    let mut config = ReelConfig::load()?;
    if let Some(model) = args.model {
        config.model = model;
    }
    if let Some(dir) = args.renders_dir {
        config.renders_dir = Some(dir);
    }
    if args.no_critique {
        config.critique = false;
    }

    let api_key = Preflight::run(&config).require()?;
    let renders_dir = config.renders_dir()?;

    let model = OpenAiChat::new(&config, api_key.clone()).context("building model client")?;
    let speech = OpenAiSpeech::new(&config, api_key).context("building speech client")?;
    let checker = PythonSyntaxChecker::new(&config);
    let renderer = ManimRenderer::new(&config);
    let media = Ffmpeg::new(&config);
    let services = Services {
        model: &model,
        checker: &checker,
        renderer: &renderer,
        speech: &speech,
        media: &media,
    };

    let output = pipeline::run_job(&config, &services, &renders_dir, prompt)?;
    if get_output_format() == OutputFormat::Text {
        println!("video:    {}", output.video_url);
        println!("captions: {}", output.subs_url);
    }
    Ok(())
}

fn handle_sanitize(args: SanitizeArgs) -> Result<()> {
    let source = fs::read_to_string(&args.file)
        .with_context(|| format!("reading {}", args.file.display()))?;
    let sanitized =
        sanitize(&source).with_context(|| format!("sanitizing {}", args.file.display()))?;

    match args.out_file {
        Some(out) => {
            fs::write(&out, sanitized.as_str())
                .with_context(|| format!("writing {}", out.display()))?;
            emit(
                Level::Success,
                "reel.sanitize.written",
                &format!("Sanitized source written to {}", out.display()),
                None,
            );
        }
        None => print!("{}", sanitized),
    }
    Ok(())
}

fn handle_validate(args: ValidateArgs) -> Result<()> {
    let raw = fs::read_to_string(&args.json)
        .with_context(|| format!("reading {}", args.json.display()))?;

    let payload = match parse_payload_json(&raw) {
        Ok(payload) => payload,
        Err(err) => {
            emit(
                Level::Error,
                "reel.validate.failed",
                &err.details(),
                Some(json!({ "kind": err.kind().code() })),
            );
            return Err(err).with_context(|| format!("validating {}", args.json.display()));
        }
    };

    if let Some(captions) = &args.captions {
        write_vtt(captions, &payload.subtitle_cues)?;
    }

    emit(
        Level::Success,
        "reel.validate.ok",
        &format!(
            "{} / {}: {} cues, last ends at {:.2}s",
            payload.file_name,
            payload.scene_name,
            payload.subtitle_cues.len(),
            payload.subtitle_cues.last().map(|cue| cue.end).unwrap_or(0.0)
        ),
        serde_json::to_value(&payload).ok(),
    );
    Ok(())
}

fn handle_diag() -> Result<()> {
    let config = ReelConfig::load()?;
    Preflight::run(&config).print();
    Ok(())
}

fn handle_config(args: ConfigArgs) -> Result<()> {
    let path = paths::config_file()?;
    if args.path {
        println!("{}", path.display());
        return Ok(());
    }

    let config = ReelConfig::load()?;
    match get_output_format() {
        OutputFormat::Json => emit(
            Level::Info,
            "reel.config",
            &path.display().to_string(),
            serde_json::to_value(&config).ok(),
        ),
        OutputFormat::Text => {
            println!("# {}", path.display());
            print!("{}", config.to_documented_toml()?);
        }
    }
    Ok(())
}
