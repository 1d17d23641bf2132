//! Scene segmentation: profile-driven partition of normalized text.
//!
//! A single left-to-right pass over lines (terminators preserved) tracks the
//! current scene start and emits `[start, end)` spans at heading, extra-split,
//! and blank-line boundaries. All offsets are codepoint offsets into the
//! normalized text.

use crate::profile::Profile;

/// One scene: a half-open codepoint interval of the normalized text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneSpan {
    /// Dense 0-based index within the work.
    pub idx: usize,
    pub start: usize,
    pub end: usize,
    /// Reserved; boundary rules leave this unset.
    pub heading: Option<String>,
}

/// Emit a span, suppressing runts.
///
/// Spans shorter than `min_chars` are discarded unless they would be the very
/// first scene. Whether the discarded region reappears in a later span depends
/// on which boundary rule fires next (blank/heading/extra rules each reset the
/// scene start; the tail flush does not).
fn emit(scenes: &mut Vec<SceneSpan>, cur_start: usize, end_pos: usize, min_chars: usize) {
    if end_pos <= cur_start {
        return;
    }
    if end_pos - cur_start < min_chars && !scenes.is_empty() {
        return;
    }
    scenes.push(SceneSpan {
        idx: scenes.len(),
        start: cur_start,
        end: end_pos,
        heading: None,
    });
}

/// Partition `text` into ordered, non-overlapping scenes under `profile`.
///
/// Deterministic and pure. The result always contains at least one scene:
/// if no boundary rule produced output, the whole text is one scene.
pub fn segment_to_scenes(text: &str, profile: &Profile) -> Vec<SceneSpan> {
    let rules = &profile.scene;
    let mut scenes: Vec<SceneSpan> = Vec::new();

    let mut pos = 0usize;
    let mut cur_start = 0usize;
    let mut in_fence = false;

    for line in text.split_inclusive('\n') {
        let line_start = pos;
        pos += line.chars().count();
        let stripped = line.strip_suffix('\n').unwrap_or(line);

        // Fenced-code tracking (markdown-like profiles). Fence lines are not
        // themselves boundaries.
        if rules.ignore_fenced_code {
            if !in_fence {
                if let Some(open) = &rules.fence_open_regex {
                    if open.is_match(stripped) {
                        in_fence = true;
                    }
                }
            } else if let Some(close) = &rules.fence_close_regex {
                if close.is_match(stripped) {
                    in_fence = false;
                }
            }
        }

        // Heading boundary.
        if !in_fence {
            if let Some(heading) = &rules.heading_regex {
                if heading.is_match(stripped) {
                    if line_start > cur_start {
                        emit(&mut scenes, cur_start, line_start, rules.min_scene_chars);
                    }
                    // Next scene starts either at the heading line or after it.
                    cur_start = if rules.heading_consumes_line {
                        pos
                    } else {
                        line_start
                    };
                    continue;
                }
            }
        }

        // Extra splitters (screenplay cues, transitions). First match wins;
        // the matching line opens the new scene.
        if !in_fence {
            for splitter in &rules.extra_split_regexes {
                if splitter.is_match(stripped) {
                    if line_start > cur_start {
                        emit(&mut scenes, cur_start, line_start, rules.min_scene_chars);
                    }
                    cur_start = line_start;
                    break;
                }
            }
        }

        // Blank-line boundary.
        if rules.break_on_blank && !in_fence && stripped.trim().is_empty() {
            emit(&mut scenes, cur_start, line_start, rules.min_scene_chars);
            cur_start = pos;
        }
    }

    // Flush the tail.
    if pos > cur_start {
        emit(&mut scenes, cur_start, pos, rules.min_scene_chars);
    }

    // Whole text as a single scene when no rule produced output.
    if scenes.is_empty() {
        scenes.push(SceneSpan {
            idx: 0,
            start: 0,
            end: pos,
            heading: None,
        });
    }

    for (i, scene) in scenes.iter_mut().enumerate() {
        scene.idx = i;
    }
    scenes
}
