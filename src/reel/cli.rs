use clap::{Args, Subcommand, ValueHint};
use std::path::PathBuf;

#[derive(Subcommand, Debug, Clone)]
pub enum ReelCommands {
    /// Generate a narrated, captioned video explaining a math prompt
    Generate(GenerateArgs),
    /// Harden a scene file the same way generated code is hardened before rendering
    Sanitize(SanitizeArgs),
    /// Validate a model response and optionally write its captions
    Validate(ValidateArgs),
    /// Check required tools, API key and configuration
    Diag,
    /// Show the effective configuration
    Config(ConfigArgs),
}

#[derive(Args, Debug, Clone)]
pub struct GenerateArgs {
    /// The concept, theorem or process to explain
    pub prompt: String,

    /// Override the chat model for this run
    #[arg(long)]
    pub model: Option<String>,

    /// Root directory for job directories
    #[arg(long, value_hint = ValueHint::DirPath)]
    pub renders_dir: Option<PathBuf>,

    /// Skip the critique-and-regenerate pass
    #[arg(long)]
    pub no_critique: bool,
}

#[derive(Args, Debug, Clone)]
pub struct SanitizeArgs {
    /// Python scene file to sanitize
    #[arg(value_hint = ValueHint::FilePath)]
    pub file: PathBuf,

    /// Write the result here instead of stdout
    #[arg(short = 'o', long = "out-file", value_hint = ValueHint::FilePath)]
    pub out_file: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ValidateArgs {
    /// JSON file holding a model response
    #[arg(value_hint = ValueHint::FilePath)]
    pub json: PathBuf,

    /// Write the normalized cues as WebVTT captions
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub captions: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Only print the config file location
    #[arg(long)]
    pub path: bool,
}
