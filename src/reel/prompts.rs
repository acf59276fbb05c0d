//! Prompt text sent to the generative model.

use crate::common::text::tail_chars;

const DIAGNOSTIC_TAIL_CHARS: usize = 2000;

const RETURN_SHAPE: &str =
    "Return a JSON object with keys file_name, scene_name, subtitle_cues, code.";

/// System message shared by generation, regeneration and repair calls
pub const SYSTEM_PROMPT: &str = r##"You are a senior math educator and Manim engineer.
Given a user's math prompt, return a SINGLE JSON object (strict schema) containing:
- file_name: Python file name to write (e.g. "explainer.py")
- scene_name: name of ONE Scene or ThreeDScene subclass to render (e.g. "ExplainerScene")
- subtitle_cues: array of {start: number, end: number, text: string}
- code: complete Manim code that runs without modification

== PRIMARY GOAL ==
Produce a clear, creative and mathematically accurate visual explanation.
Favor geometric and spatial intuition and smooth, readable motion.
Parametric curves and surfaces, 3D camera motion, vector fields, level sets and
projections are all welcome. Target total runtime: 20-45 seconds.

== ALLOWED IMPORTS ==
from manim import *
import numpy as np
import math
from sympy import *       (optional, for symbolic math)

DO NOT import os, subprocess, sys, pathlib, json, requests, pickle, shutil, PIL,
skimage, or any other network/IO module. DO NOT perform file IO or network requests.

== LATEX ==
Tex and MathTex are allowed but keep expressions short and stable.

== GEOMETRY & COORDINATES ==
All 2D objects use 3D-safe coordinates: [x, y, 0].
Use Line([x1,y1,0],[x2,y2,0]), Arrow([x1,y1,0],[x2,y2,0]), Dot().move_to([x,y,0]).
Use mobject.apply_matrix([[a,b],[c,d]]) for linear transforms.
For 3D scenes subclass ThreeDScene and set the camera with self.set_camera_orientation(...).

== PERFORMANCE ==
Keep complexity moderate: no massive point clouds, no OpenGL-only features, no custom shaders.

== DETERMINISM ==
If randomness is used: import random; random.seed(7); np.random.seed(7)

== SCENE CONTRACT ==
Exactly ONE Scene or ThreeDScene class named scene_name. No undefined names, no external assets.

== SUBTITLES ==
Narration aligned with beats of 1-4 seconds each, covering the whole runtime:
"subtitle_cues": [
    {"start": 0.0, "end": 3.0, "text": "Hook the viewer with the core idea."},
    {"start": 3.0, "end": 7.0, "text": "Introduce the structure and camera motion."}
]

== VALIDATION CHECKLIST ==
[ ] Exactly one Scene/ThreeDScene class named scene_name
[ ] Only allowed imports used
[ ] All 2D coordinates are [x, y, 0]
[ ] LaTeX only if minimal and stable
[ ] Subtitle cues strictly increasing, required fields only
[ ] Renders with: manim -ql <file_name> <scene_name>
[ ] interpolate_color arguments wrapped with Color(...), e.g. interpolate_color(Color("#ffaa00"), Color(BLUE), alpha)
[ ] No self.camera.frame; for 3D camera movement use set_camera_orientation, move_camera,
    begin_ambient_camera_rotation and stop_ambient_camera_rotation only
[ ] Never run_time=0; the minimum run_time is 0.2s"##;

pub fn user_prompt(prompt: &str) -> String {
    format!(
        "USER PROMPT:\n{}\n\n\
         The user has described a mathematical concept, process, theorem, structure or object.\n\
         Design an advanced Manim visual explanation (20-35 seconds) showing geometric intuition, \
         with engaging narration (subtitles) that follows the scene transitions.\n\n\
         Return ONLY valid JSON. No prose.",
        prompt.trim()
    )
}

/// Free-text review request; sent without the system message
pub fn critique_prompt(code: &str) -> String {
    format!(
        "Please critique the following Manim code for any syntax or design issues, focusing on \
         Manim compatibility. Provide constructive feedback and do NOT simplify the content:\n\
         ```python\n{}\n```",
        code
    )
}

pub fn regeneration_prompt(critique: &str, code: &str) -> String {
    format!(
        "The assistant provided the following critique of the Manim code:\n{}\n\n\
         The code was:\n```python\n{}\n```\n\
         Please incorporate these suggestions into the code without changing the scene's purpose \
         or length. {}",
        critique, code, RETURN_SHAPE
    )
}

pub fn syntax_repair_prompt(diagnostic: &str, code: &str) -> String {
    format!(
        "The Manim code failed to compile with the following syntax error:\n```text\n{}\n```\n\
         The original code was:\n```python\n{}\n```\n\
         Please fix the syntax errors while preserving the code's purpose and complexity. \
         Do not remove features or simplify the content to avoid errors. \
         Keep the same file_name and scene_name unless a change is required to fix the issue. {}",
        diagnostic_excerpt(diagnostic),
        code,
        RETURN_SHAPE
    )
}

pub fn markup_repair_prompt(diagnostic: &str, code: &str) -> String {
    format!(
        "The Manim code failed to render due to a LaTeX syntax error. The error was:\n```text\n{}\n```\n\
         The original code was:\n```python\n{}\n```\n\
         Identify and fix the LaTeX issues that caused this error (unmatched braces, missing braces \
         around exponents, incorrect backslashes, undefined control sequences). \
         Do not simplify or change other parts of the code. \
         Keep the same file_name and scene_name unless absolutely necessary. {}",
        diagnostic_excerpt(diagnostic),
        code,
        RETURN_SHAPE
    )
}

pub fn render_repair_prompt(diagnostic: &str, code: &str) -> String {
    format!(
        "The Manim code failed to render with the following error:\n```text\n{}\n```\n\
         The original code was:\n```python\n{}\n```\n\
         Please fix the code to resolve the error while preserving its purpose and complexity. \
         Do not remove features or simplify the content to avoid errors. \
         Keep the same file_name and scene_name unless a change is required to fix the issue. {}",
        diagnostic_excerpt(diagnostic),
        code,
        RETURN_SHAPE
    )
}

/// The last traceback in `log`, or its tail when there is none
pub fn diagnostic_excerpt(log: &str) -> &str {
    match log.rfind("Traceback") {
        Some(idx) => &log[idx..],
        None => tail_chars(log, DIAGNOSTIC_TAIL_CHARS),
    }
}
