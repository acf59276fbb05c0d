//! Hardening of model-written scene code before anything executes it.
//!
//! [`sanitize`] is pure and deterministic. Running it on its own output is a
//! no-op, so the orchestrator can re-sanitize repaired code freely.

pub mod markup;

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use std::fmt;
use thiserror::Error;

/// Lower-cased tokens that reject a source outright
pub const FORBIDDEN_TOKENS: &[&str] = &[
    "import os",
    "from os",
    "import subprocess",
    "from subprocess",
    "import sys",
    "from sys",
    "import pathlib",
    "from pathlib",
    "import requests",
    "from requests",
    "import pickle",
    "from pickle",
    "import shutil",
    "from shutil",
];

/// Injected ahead of every scene so the names it relies on always exist
pub const PRELUDE: &str = r#"from manim import *
import numpy as np
import math
# Optional utilities (guarded against missing)
try:
    from manim.utils.color import Color
except Exception:
    def Color(x): return x
try:
    from manim.utils.space_ops import rotate_vector
except Exception:
    pass
try:
    from manim.utils.bezier import bezier
except Exception:
    pass
try:
    from manim.utils.rate_functions import smooth
except Exception:
    pass
# ParametricSurface fallback for compatibility
try:
    ParametricSurface
except NameError:
    ParametricSurface = Surface
"#;

lazy_static! {
    static ref DUPLICATE_IMPORTS: Vec<Regex> = [
        r"(?m)^[ \t]*from[ \t]+manim[ \t]+import[ \t]+\*[ \t]*$",
        r"(?m)^[ \t]*import[ \t]+numpy[ \t]+as[ \t]+np[ \t]*$",
        r"(?m)^[ \t]*import[ \t]+math[ \t]*$",
        r"(?m)^[ \t]*from[ \t]+manim\.utils\.color[ \t]+import[ \t]+Color[ \t]*$",
        r"(?m)^[ \t]*from[ \t]+manim\.utils\.space_ops[ \t]+import[ \t]+rotate_vector[ \t]*$",
        r"(?m)^[ \t]*from[ \t]+manim\.utils\.bezier[ \t]+import[ \t]+bezier[ \t]*$",
        r"(?m)^[ \t]*from[ \t]+manim\.utils\.rate_functions[ \t]+import[ \t]+smooth[ \t]*$",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("valid import pattern"))
    .collect();
    static ref INTERPOLATE_COLOR: Regex =
        Regex::new(r"interpolate_color\(\s*([^,]+)\s*,\s*([^,]+)\s*,")
            .expect("valid interpolate_color pattern");
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SanitizeError {
    #[error("generated code contains forbidden capability `{token}`")]
    ForbiddenCapability { token: &'static str },
}

/// Source that has passed [`sanitize`]; the only thing the renderer accepts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizedSource(String);

impl SanitizedSource {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SanitizedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn sanitize(source: &str) -> Result<SanitizedSource, SanitizeError> {
    let normalized = source.replace("\r\n", "\n");
    check_forbidden(&normalized)?;

    let body = normalized
        .trim_start()
        .strip_prefix(PRELUDE)
        .unwrap_or(normalized.as_str());

    let mut s = body.to_string();
    for pattern in DUPLICATE_IMPORTS.iter() {
        s = pattern.replace_all(&s, "").into_owned();
    }

    let s = force_raw_tex(&s);
    let s = wrap_interpolated_colors(&s);
    let s = markup::repair_tex_literals(&s);

    Ok(SanitizedSource(format!("{}\n{}\n", PRELUDE, s.trim())))
}

fn check_forbidden(source: &str) -> Result<(), SanitizeError> {
    let lowered = source.to_lowercase();
    match FORBIDDEN_TOKENS
        .iter()
        .copied()
        .find(|token| lowered.contains(*token))
    {
        Some(token) => Err(SanitizeError::ForbiddenCapability { token }),
        None => Ok(()),
    }
}

/// `MathTex("..")`/`Tex("..")` become raw strings so backslashes survive
fn force_raw_tex(source: &str) -> String {
    source
        .replace("MathTex(\"", "MathTex(r\"")
        .replace("MathTex('", "MathTex(r'")
        .replace("Tex(\"", "Tex(r\"")
        .replace("Tex('", "Tex(r'")
}

fn wrap_interpolated_colors(source: &str) -> String {
    INTERPOLATE_COLOR
        .replace_all(source, |caps: &Captures| {
            format!(
                "interpolate_color({}, {},",
                wrap_color(&caps[1]),
                wrap_color(&caps[2])
            )
        })
        .into_owned()
}

fn wrap_color(arg: &str) -> String {
    let arg = arg.trim();
    if arg.starts_with("Color(") {
        arg.to_string()
    } else {
        format!("Color({})", arg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENE: &str = "from manim import *\r\nimport numpy as np\r\n\r\nclass Demo(Scene):\r\n    def construct(self):\r\n        t = MathTex(\"\\frac{1}{2\")\r\n        c = interpolate_color(BLUE, RED, 0.5)\r\n        self.play(Write(t))\r\n";

    #[test]
    fn sanitizing_twice_changes_nothing() {
        let once = sanitize(SCENE).expect("scene is allowed");
        let twice = sanitize(once.as_str()).expect("sanitized scene is allowed");
        assert_eq!(once, twice);
        assert_eq!(once.as_str().matches("from manim import *").count(), 1);
        assert_eq!(once.as_str().matches("import numpy as np").count(), 1);
    }

    #[test]
    fn sanitizing_is_idempotent_for_malformed_markup_and_wrapped_colors() {
        let exprs = [
            "",
            "}",
            "{{{",
            "}{",
            r"\frac{1}{2}}}",
            r"x^{2 + \{y}",
            "e^(x}+{",
            r"\sqrt{a}{b}}{{c",
            "e^ab{(c)",
            "e^12 + e^(x",
        ];
        let mut sources: Vec<String> = exprs
            .iter()
            .flat_map(|expr| {
                [
                    format!("class A(Scene):\n    def construct(self):\n        t = MathTex(\"{expr}\")\n"),
                    format!("class A(Scene):\n    def construct(self):\n        t = Tex('{expr}')\n"),
                ]
            })
            .collect();
        sources.push(
            "class A(Scene):\n    def construct(self):\n        c = interpolate_color(Color(RED), BLUE, t)\n"
                .to_string(),
        );
        sources.push(
            "c = interpolate_color(Color(\"#ffaa00\"), Color(BLUE), alpha)\n".to_string(),
        );

        for source in &sources {
            let once = sanitize(source).unwrap();
            let twice = sanitize(once.as_str()).unwrap();
            assert_eq!(once, twice, "second pass changed {source:?}");
            assert!(!once.as_str().contains("Color(Color("), "double wrap in {source:?}");
        }
    }

    #[test]
    fn output_starts_with_prelude_and_ends_with_newline() {
        let out = sanitize("class A(Scene):\n    pass").unwrap();
        assert!(out.as_str().starts_with(PRELUDE));
        assert!(out.as_str().ends_with("    pass\n"));
        assert!(!out.as_str().contains('\r'));
    }

    #[test]
    fn tex_literals_become_raw_and_repaired() {
        let out = sanitize(SCENE).unwrap();
        assert!(out.as_str().contains("MathTex(r\"\\frac{1}{2}\")"));
    }

    #[test]
    fn interpolate_color_arguments_are_wrapped_once() {
        let out = sanitize(SCENE).unwrap();
        assert!(
            out.as_str()
                .contains("interpolate_color(Color(BLUE), Color(RED), 0.5)")
        );
        assert!(!out.as_str().contains("Color(Color("));
    }

    #[test]
    fn forbidden_imports_are_rejected_case_insensitively() {
        let err = sanitize("IMPORT OS\nclass A(Scene): pass").unwrap_err();
        assert_eq!(err, SanitizeError::ForbiddenCapability { token: "import os" });

        let err = sanitize("from subprocess import run").unwrap_err();
        assert_eq!(
            err,
            SanitizeError::ForbiddenCapability {
                token: "from subprocess"
            }
        );
    }

    #[test]
    fn indented_duplicate_imports_are_removed() {
        let out = sanitize("  import math\nclass A(Scene):\n    pass\n").unwrap();
        assert_eq!(out.as_str().matches("import math").count(), 1);
    }
}
