//! Best-effort repair of LaTeX strings passed to `Tex`/`MathTex`.
//!
//! Nothing here can fail: malformed input is passed through as unchanged as
//! the rules allow.

use lazy_static::lazy_static;
use regex::{Captures, Regex};

lazy_static! {
    static ref DOUBLE_QUOTED_TEX: Regex =
        Regex::new(r#"((?:MathTex|Tex)\(r?")([^"]*)""#).expect("valid tex pattern");
    static ref SINGLE_QUOTED_TEX: Regex =
        Regex::new(r#"((?:MathTex|Tex)\(r?')([^']*)'"#).expect("valid tex pattern");
    static ref BARE_EXPONENT: Regex =
        Regex::new(r"e\^((?:[A-Za-z0-9]|\\[A-Za-z]+)+)").expect("valid exponent pattern");
}

/// Apply [`repair_markup`] to every Tex/MathTex string literal in `source`
pub fn repair_tex_literals(source: &str) -> String {
    let pass = DOUBLE_QUOTED_TEX.replace_all(source, |caps: &Captures| {
        format!("{}{}\"", &caps[1], repair_markup(&caps[2]))
    });
    SINGLE_QUOTED_TEX
        .replace_all(&pass, |caps: &Captures| {
            format!("{}{}'", &caps[1], repair_markup(&caps[2]))
        })
        .into_owned()
}

pub fn repair_markup(expr: &str) -> String {
    let balanced = balance_braces(expr);
    let braced = BARE_EXPONENT
        .replace_all(&balanced, |caps: &Captures| format!("e^{{{}}}", &caps[1]))
        .into_owned();
    brace_paren_exponents(braced)
}

/// Balance unescaped braces.
///
/// A stray `}` with nothing open is dropped; every `{` still open at the end
/// gets a `}` appended. Escaped braces are copied and never counted.
pub fn balance_braces(expr: &str) -> String {
    let chars: Vec<char> = expr.chars().collect();
    let mut out = String::with_capacity(expr.len() + 4);
    let mut depth = 0usize;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' => match chars.get(i + 1).copied() {
                Some(brace @ ('{' | '}')) => {
                    out.push('\\');
                    out.push(brace);
                    i += 2;
                    continue;
                }
                Some('\\') => {
                    let ends_line = match chars.get(i + 2) {
                        None => true,
                        Some(after) => after.is_whitespace(),
                    };
                    if ends_line {
                        out.push_str("\\\\");
                        i += 2;
                        continue;
                    }
                    out.push('\\');
                }
                _ => out.push('\\'),
            },
            '{' => {
                depth += 1;
                out.push('{');
            }
            '}' => {
                if depth > 0 {
                    depth -= 1;
                    out.push('}');
                }
            }
            other => out.push(other),
        }
        i += 1;
    }

    out.extend(std::iter::repeat_n('}', depth));
    out
}

/// Rewrite `e^(...)` as `e^{(...)}`, honouring nested parentheses.
///
/// Stops at the first `e^(` without a matching `)`, leaving it and anything
/// after it untouched.
pub fn brace_paren_exponents(mut s: String) -> String {
    while let Some(idx) = s.find("e^(") {
        let open = idx + 2;
        let mut depth = 0usize;
        let mut close = None;
        for (offset, b) in s.as_bytes()[open..].iter().enumerate() {
            match b {
                b'(' => depth += 1,
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        close = Some(open + offset);
                        break;
                    }
                }
                _ => {}
            }
        }

        let Some(close) = close else {
            break;
        };
        s = format!(
            "{}{{{}}}{}",
            &s[..open],
            &s[open..=close],
            &s[close + 1..]
        );
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unescaped_brace_counts(s: &str) -> (usize, usize) {
        let chars: Vec<char> = s.chars().collect();
        let (mut open, mut close) = (0, 0);
        let mut i = 0;
        while i < chars.len() {
            match chars[i] {
                '\\' if matches!(chars.get(i + 1), Some('{' | '}')) => i += 1,
                '{' => open += 1,
                '}' => close += 1,
                _ => {}
            }
            i += 1;
        }
        (open, close)
    }

    #[test]
    fn exponent_digits_are_braced() {
        assert_eq!(repair_markup("e^12"), "e^{12}");
        assert_eq!(repair_markup(r"e^\pi"), r"e^{\pi}");
    }

    #[test]
    fn parenthesized_exponent_keeps_parens_inside_braces() {
        assert_eq!(repair_markup("e^(x)"), "e^{(x)}");
        assert_eq!(repair_markup("e^((a+b)c) + 1"), "e^{((a+b)c)} + 1");
    }

    #[test]
    fn unmatched_paren_exponent_is_left_alone() {
        assert_eq!(repair_markup("e^(x"), "e^(x");
        assert_eq!(brace_paren_exponents("e^(x e^(y)".to_string()), "e^(x e^(y)");
    }

    #[test]
    fn open_braces_are_closed_and_stray_closers_dropped() {
        assert_eq!(balance_braces(r"\frac{a}{b"), r"\frac{a}{b}");
        assert_eq!(balance_braces("a}}b{"), "ab{}");
        assert_eq!(balance_braces(r"\{x\}}"), r"\{x\}");
    }

    #[test]
    fn double_backslash_line_breaks_are_kept() {
        assert_eq!(balance_braces(r"a \\ b"), r"a \\ b");
        assert_eq!(balance_braces(r"a\\"), r"a\\");
    }

    #[test]
    fn repaired_markup_is_always_balanced() {
        let inputs = [
            "",
            "}",
            "{{{",
            "}{",
            r"\frac{1}{2}}}",
            r"x^{2 + \{y}",
            "e^(x}+{",
            r"\sqrt{a}{b}}{{c",
            "e^ab{(c)",
        ];
        for input in inputs {
            let (open, close) = unescaped_brace_counts(&repair_markup(input));
            assert_eq!(open, close, "unbalanced output for {input:?}");
        }
    }

    #[test]
    fn literals_in_source_are_repaired_in_place() {
        let src = "a = MathTex(r\"\\frac{1}{2\")\nb = Tex('e^(x)')\nc = Text(\"{\")";
        assert_eq!(
            repair_tex_literals(src),
            "a = MathTex(r\"\\frac{1}{2}\")\nb = Tex('e^{(x)}')\nc = Text(\"{\")"
        );
    }
}
