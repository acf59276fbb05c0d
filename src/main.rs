mod common;
mod reel;
mod ui;

use clap::Parser;
use std::io::IsTerminal;

use crate::reel::error::JobFailure;
use crate::reel::{ReelCommands, handle_reel_command};
use crate::ui::prelude::*;

/// mathreel: turn a math prompt into a narrated Manim video
#[derive(Parser, Debug)]
#[command(name = "mathreel", author, version, about, long_about = None)]
struct Cli {
    /// Activate debug mode
    #[arg(short, long, global = true)]
    debug: bool,

    /// Output format for messages
    #[arg(long, value_enum, default_value = "text", global = true)]
    output: OutputFormat,

    /// Disable coloured output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: ReelCommands,
}

fn main() {
    let cli = Cli::parse();

    ui::init(cli.output, !cli.no_color && std::io::stdout().is_terminal());
    ui::set_debug_mode(cli.debug);

    if let Err(err) = handle_reel_command(cli.command) {
        match err.downcast_ref::<JobFailure>() {
            Some(failure) => {
                emit(
                    Level::Error,
                    "reel.job.failed",
                    &failure.to_string(),
                    serde_json::to_value(failure).ok(),
                );
                if let Some(details) = &failure.details
                    && get_output_format() == OutputFormat::Text
                {
                    emit(Level::Debug, "reel.job.details", details, None);
                }
                std::process::exit(2);
            }
            None => {
                emit(Level::Error, "error", &format!("Error: {:#}", err), None);
                std::process::exit(1);
            }
        }
    }
}
