//! Subtitle cues: normalization of loosely-shaped model output and WebVTT
//! serialization.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::fs;
use std::path::Path;

/// Smallest span a cue may have after clamping
pub const CUE_EPSILON: f64 = 0.01;
/// Span given to a cue that only says when it starts
pub const DEFAULT_CUE_SPAN: f64 = 2.0;
/// Gap kept before the next cue, and the minimum span, for `{time, text}` cues
pub const CUE_MARGIN: f64 = 0.2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleCue {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

impl SubtitleCue {
    pub fn new(start: f64, end: f64, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
        }
    }

    /// Copy with `start >= 0` and `end >= start + CUE_EPSILON`
    pub fn clamped(&self) -> Self {
        let start = self.start.max(0.0);
        let end = self.end.max(start + CUE_EPSILON);
        Self {
            start,
            end,
            text: self.text.clone(),
        }
    }
}

/// Bring model-produced cue objects into `{start, end, text}` shape.
///
/// Accepts `{time, text}` cues (end derived from the next cue's time),
/// `{start, text}` cues (end defaults to `start + 2s`) and numeric strings.
/// Anything that still does not fit is left for schema validation to report.
pub fn normalize_cues(cues: &mut [Value]) {
    for i in 0..cues.len() {
        let next_time = cues
            .get(i + 1)
            .and_then(|next| next.get("time"))
            .map(lenient_f64);

        let Some(cue) = cues[i].as_object_mut() else {
            continue;
        };

        if !cue.contains_key("start")
            && let Some(time) = cue.remove("time")
        {
            let start = lenient_f64(&time).unwrap_or(0.0);
            let end = match next_time {
                Some(Some(next)) => (start + CUE_MARGIN).max(next - CUE_MARGIN),
                _ => start + DEFAULT_CUE_SPAN,
            };
            cue.insert("start".to_string(), json!(start));
            cue.insert("end".to_string(), json!(end));
        }

        if cue.contains_key("start") && !cue.contains_key("end") {
            let start = cue.get("start").and_then(lenient_f64).unwrap_or(0.0);
            cue.insert("end".to_string(), json!(start + DEFAULT_CUE_SPAN));
        }

        coerce_numeric(cue, "start");
        coerce_numeric(cue, "end");
    }
}

fn coerce_numeric(cue: &mut Map<String, Value>, key: &str) {
    if let Some(value) = cue.get_mut(key)
        && let Some(number) = lenient_f64(value)
    {
        *value = json!(number);
    }
}

/// Numbers and numeric strings as f64
pub(crate) fn lenient_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Format seconds as `HH:MM:SS.mmm`; milliseconds are truncated, not rounded.
pub fn to_vtt_time(seconds: f64) -> String {
    let seconds = seconds.max(0.0);
    let whole = seconds.trunc() as u64;
    let millis = ((seconds - seconds.trunc()) * 1000.0) as u64;
    let s = whole % 60;
    let m = (whole / 60) % 60;
    let h = whole / 3600;
    format!("{:02}:{:02}:{:02}.{:03}", h, m, s, millis)
}

pub fn render_vtt(cues: &[SubtitleCue]) -> String {
    let mut lines = vec!["WEBVTT".to_string(), String::new()];
    for (i, cue) in cues.iter().enumerate() {
        let cue = cue.clamped();
        lines.push((i + 1).to_string());
        lines.push(format!(
            "{} --> {}",
            to_vtt_time(cue.start),
            to_vtt_time(cue.end)
        ));
        lines.push(cue.text.replace('\n', " "));
        lines.push(String::new());
    }
    lines.join("\n")
}

pub fn write_vtt(path: &Path, cues: &[SubtitleCue]) -> Result<()> {
    fs::write(path, render_vtt(cues))
        .with_context(|| format!("writing captions to {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn starts_and_ends(cues: &[Value]) -> Vec<(f64, f64)> {
        cues.iter()
            .map(|c| (c["start"].as_f64().unwrap(), c["end"].as_f64().unwrap()))
            .collect()
    }

    #[test]
    fn vtt_time_decomposes_hours_minutes_seconds() {
        assert_eq!(to_vtt_time(3661.25), "01:01:01.250");
        assert_eq!(to_vtt_time(0.0), "00:00:00.000");
        assert_eq!(to_vtt_time(59.5), "00:00:59.500");
    }

    #[test]
    fn time_only_cues_get_start_and_end() {
        let mut cues = vec![
            json!({"time": 0.0, "text": "a"}),
            json!({"time": 3.0, "text": "b"}),
            json!({"time": 3.1, "text": "c"}),
        ];
        normalize_cues(&mut cues);

        let spans = starts_and_ends(&cues);
        assert_eq!(spans[0].0, 0.0);
        assert!((spans[0].1 - 2.8).abs() < 1e-9);
        // next cue is too close, so the minimum span wins
        assert!((spans[1].1 - 3.2).abs() < 1e-9);
        // last cue falls back to the default span
        assert!((spans[2].1 - 5.1).abs() < 1e-9);
        assert!(cues.iter().all(|c| c.get("time").is_none()));
    }

    #[test]
    fn time_only_cues_stay_within_margin_of_next_start() {
        let times = [0.0, 0.1, 0.5, 1.0, 4.0, 4.3, 9.75, 20.0];
        let mut cues: Vec<Value> = times
            .iter()
            .map(|t| json!({"time": t, "text": "x"}))
            .collect();
        normalize_cues(&mut cues);

        let spans = starts_and_ends(&cues);
        for pair in spans.windows(2) {
            let (start, end) = pair[0];
            let (next_start, _) = pair[1];
            assert!(end >= start + CUE_MARGIN - 1e-9);
            assert!(end <= next_start + CUE_MARGIN + 1e-9);
        }
    }

    #[test]
    fn start_without_end_defaults_to_two_seconds() {
        let mut cues = vec![json!({"start": "1.5", "text": "a"})];
        normalize_cues(&mut cues);
        assert_eq!(cues[0]["start"], json!(1.5));
        assert_eq!(cues[0]["end"], json!(3.5));
    }

    #[test]
    fn unparseable_time_starts_at_zero() {
        let mut cues = vec![json!({"time": "soon", "text": "a"})];
        normalize_cues(&mut cues);
        assert_eq!(cues[0]["start"], json!(0.0));
        assert_eq!(cues[0]["end"], json!(2.0));
    }

    #[test]
    fn vtt_clamps_and_flattens() {
        let cues = vec![
            SubtitleCue::new(-1.0, -1.0, "line one\nline two"),
            SubtitleCue::new(2.0, 4.0, "next"),
        ];
        let vtt = render_vtt(&cues);
        assert_eq!(
            vtt,
            "WEBVTT\n\n1\n00:00:00.000 --> 00:00:00.010\nline one line two\n\n2\n00:00:02.000 --> 00:00:04.000\nnext\n"
        );
    }
}
