//! Segmentation profiles: named rule bundles for scene and chunk boundaries.
//!
//! A profile is an immutable record of `SceneRules` (where scenes break) and
//! `ChunkRules` (sliding-window geometry). All regexes are compiled once when
//! the built-in table is first touched; lookup is case-insensitive and unknown
//! names fall back to `default`.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

/// Rules governing where scene boundaries fall.
#[derive(Debug, Clone)]
pub struct SceneRules {
    /// Split on blank lines.
    pub break_on_blank: bool,
    /// Lines matching this start a new scene.
    pub heading_regex: Option<Regex>,
    /// Emitted spans shorter than this are suppressed (except the first).
    pub min_scene_chars: usize,
    /// Declared ceiling for scene length. Carried for parity with the rule
    /// record; no built-in profile enforces it.
    pub max_scene_chars: usize,
    /// Whether the heading line belongs to the previous gap (true) or to the
    /// scene it opens (false).
    pub heading_consumes_line: bool,
    /// Additional boundary patterns (first match wins); never consume the line.
    pub extra_split_regexes: Vec<Regex>,
    /// Suppress all boundary rules inside fenced code blocks.
    pub ignore_fenced_code: bool,
    pub fence_open_regex: Option<Regex>,
    pub fence_close_regex: Option<Regex>,
}

impl Default for SceneRules {
    fn default() -> Self {
        Self {
            break_on_blank: true,
            heading_regex: None,
            min_scene_chars: 40,
            max_scene_chars: 100_000,
            heading_consumes_line: false,
            extra_split_regexes: Vec::new(),
            ignore_fenced_code: false,
            fence_open_regex: None,
            fence_close_regex: None,
        }
    }
}

/// Sliding-window chunk geometry.
#[derive(Debug, Clone, Copy)]
pub struct ChunkRules {
    /// Window width in characters.
    pub window_chars: usize,
    /// Advance between window starts. May exceed the window (gaps) or
    /// undercut it (overlap).
    pub stride_chars: usize,
}

impl Default for ChunkRules {
    fn default() -> Self {
        Self {
            window_chars: 512,
            stride_chars: 384,
        }
    }
}

/// A named, immutable segmentation profile.
#[derive(Debug, Clone)]
pub struct Profile {
    pub name: &'static str,
    pub scene: SceneRules,
    pub chunk: ChunkRules,
}

fn rx(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap()
}

static PROFILES: LazyLock<BTreeMap<&'static str, Profile>> = LazyLock::new(|| {
    let mut table = BTreeMap::new();

    table.insert(
        "default",
        Profile {
            name: "default",
            scene: SceneRules::default(),
            chunk: ChunkRules::default(),
        },
    );

    table.insert(
        "dense",
        Profile {
            name: "dense",
            scene: SceneRules {
                min_scene_chars: 20,
                ..SceneRules::default()
            },
            chunk: ChunkRules {
                window_chars: 384,
                stride_chars: 256,
            },
        },
    );

    table.insert(
        "sparse",
        Profile {
            name: "sparse",
            scene: SceneRules {
                min_scene_chars: 80,
                ..SceneRules::default()
            },
            chunk: ChunkRules {
                window_chars: 1024,
                stride_chars: 768,
            },
        },
    );

    // Markdown: split on ATX headings, never inside fenced code blocks.
    // min_scene_chars of 1 keeps short sections that follow a fence.
    table.insert(
        "markdown",
        Profile {
            name: "markdown",
            scene: SceneRules {
                break_on_blank: false,
                heading_regex: Some(rx(r"^\s*#{1,6}\s+.+$")),
                min_scene_chars: 1,
                ignore_fenced_code: true,
                fence_open_regex: Some(rx(r"^\s*(```|~~~)")),
                fence_close_regex: Some(rx(r"^\s*(```|~~~)\s*$")),
                ..SceneRules::default()
            },
            chunk: ChunkRules::default(),
        },
    );

    // Screenplay: sluglines consume their line; character cues and
    // transitions open a scene that includes the cue itself.
    table.insert(
        "screenplay",
        Profile {
            name: "screenplay",
            scene: SceneRules {
                heading_regex: Some(rx(r"^\s*(INT\.|EXT\.|EST\.|INT/EXT\.)\s+.+$")),
                min_scene_chars: 5,
                heading_consumes_line: true,
                extra_split_regexes: vec![
                    rx(r"^\s{0,20}[A-Z][A-Z0-9 .'\-()]{2,}$"),
                    rx(r"^\s*(CUT TO:|FADE (IN|OUT):|DISSOLVE TO:)\s*$"),
                ],
                ..SceneRules::default()
            },
            chunk: ChunkRules::default(),
        },
    );

    // pdf_pages: one scene per [[PAGE_BREAK]] sentinel from the PDF parser.
    table.insert(
        "pdf_pages",
        Profile {
            name: "pdf_pages",
            scene: SceneRules {
                break_on_blank: false,
                heading_regex: Some(rx(r"^\s*\[\[PAGE_BREAK\]\]\s*$")),
                min_scene_chars: 1,
                heading_consumes_line: true,
                ..SceneRules::default()
            },
            chunk: ChunkRules::default(),
        },
    );

    table
});

/// Look up a profile by name, case-insensitively.
///
/// `None`, the empty string, and unknown names all resolve to `default`.
pub fn get_profile(name: Option<&str>) -> &'static Profile {
    let key = match name {
        Some(n) if !n.trim().is_empty() => n.trim().to_lowercase(),
        _ => return &PROFILES["default"],
    };
    PROFILES
        .get(key.as_str())
        .unwrap_or_else(|| &PROFILES["default"])
}

/// Names of all built-in profiles, sorted.
pub fn profile_names() -> Vec<&'static str> {
    PROFILES.keys().copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        assert_eq!(get_profile(Some("MARKDOWN")).name, "markdown");
        assert_eq!(get_profile(Some("Screenplay")).name, "screenplay");
    }

    #[test]
    fn unknown_and_none_fall_back_to_default() {
        assert_eq!(get_profile(None).name, "default");
        assert_eq!(get_profile(Some("")).name, "default");
        assert_eq!(get_profile(Some("nope")).name, "default");
    }

    #[test]
    fn builtin_geometry() {
        let dense = get_profile(Some("dense"));
        assert_eq!(dense.chunk.window_chars, 384);
        assert_eq!(dense.chunk.stride_chars, 256);
        assert_eq!(dense.scene.min_scene_chars, 20);

        let sparse = get_profile(Some("sparse"));
        assert_eq!(sparse.chunk.window_chars, 1024);
        assert_eq!(sparse.chunk.stride_chars, 768);
    }

    #[test]
    fn profile_names_sorted() {
        let names = profile_names();
        assert_eq!(
            names,
            vec![
                "default",
                "dense",
                "markdown",
                "pdf_pages",
                "screenplay",
                "sparse"
            ]
        );
    }

    #[test]
    fn heading_regexes_match_expected_lines() {
        let md = get_profile(Some("markdown"));
        let h = md.scene.heading_regex.as_ref().unwrap();
        assert!(h.is_match("## Section"));
        assert!(!h.is_match("####### seven hashes is not a heading"));

        let sp = get_profile(Some("screenplay"));
        let slug = sp.scene.heading_regex.as_ref().unwrap();
        assert!(slug.is_match("INT. HOUSE - NIGHT"));
        assert!(slug.is_match("  EXT. STREET - DAY"));
        assert!(!slug.is_match("INTERIOR HOUSE"));
    }
}
