use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use super::{OutputFormat, get_output_format};

/// Spinner shown while waiting on a long external call.
///
/// In JSON mode nothing is drawn so stdout stays machine-readable.
pub struct Spinner {
    bar: Option<ProgressBar>,
}

impl Spinner {
    pub fn start(message: impl Into<String>) -> Self {
        if get_output_format() == OutputFormat::Json {
            return Self { bar: None };
        }

        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner} {msg} ({elapsed})") {
            pb.set_style(style.tick_chars("⠁⠉⠙⠚⠒⠂⠲⠴⠤⠄⠦⠖⠐⠓⠋ "));
        }
        pb.set_message(message.into());
        pb.enable_steady_tick(Duration::from_millis(100));
        Self { bar: Some(pb) }
    }

    pub fn finish(self) {}
}

impl Drop for Spinner {
    fn drop(&mut self) {
        if let Some(pb) = self.bar.take() {
            pb.finish_and_clear();
        }
    }
}
