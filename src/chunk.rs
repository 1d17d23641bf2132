//! Sliding-window chunking within scene boundaries.
//!
//! Windows never cross a scene edge. The stride may undercut the window
//! (overlapping chunks) or exceed it (gaps); neither case is special.

use crate::profile::Profile;
use crate::segment::SceneSpan;

/// One chunk: a half-open codepoint interval inside a single scene.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSpan {
    /// Dense 0-based index, global across the work.
    pub idx: usize,
    pub start: usize,
    pub end: usize,
    /// Index of the owning scene.
    pub scene_idx: Option<usize>,
}

/// Build sliding-window chunks for every scene in order.
///
/// Explicit `window`/`stride` override the profile's chunk rules. Within a
/// scene the window starts at the scene start, emits `[start, min(start+W,
/// end))`, stops once a window reaches the scene end, and otherwise advances
/// by the stride (clamped to the scene end).
pub fn make_chunks(
    scenes: &[SceneSpan],
    window: Option<usize>,
    stride: Option<usize>,
    profile: &Profile,
) -> Vec<ChunkSpan> {
    let w = window.unwrap_or(profile.chunk.window_chars);
    let s = stride.unwrap_or(profile.chunk.stride_chars);

    let mut chunks: Vec<ChunkSpan> = Vec::new();

    for scene in scenes {
        let mut start = scene.start;
        while start < scene.end {
            let end = (start + w).min(scene.end);
            if end <= start {
                break;
            }
            chunks.push(ChunkSpan {
                idx: chunks.len(),
                start,
                end,
                scene_idx: Some(scene.idx),
            });
            if end == scene.end {
                break;
            }
            start = (start + s).min(scene.end);
        }
    }

    // Degenerate input (zero window or empty scenes): fall back to one chunk
    // covering the first scene so every work has a chunk layer.
    if chunks.is_empty() {
        if let Some(first) = scenes.first() {
            chunks.push(ChunkSpan {
                idx: 0,
                start: first.start,
                end: first.end,
                scene_idx: Some(first.idx),
            });
        }
    }

    for (i, chunk) in chunks.iter_mut().enumerate() {
        chunk.idx = i;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::get_profile;

    fn scene(idx: usize, start: usize, end: usize) -> SceneSpan {
        SceneSpan {
            idx,
            start,
            end,
            heading: None,
        }
    }

    /// Expected chunk count for a scene of length `len`: 1 if it fits the
    /// window, otherwise ceil((len - w) / s) + 1.
    fn expected_count(len: usize, w: usize, s: usize) -> usize {
        if len <= w { 1 } else { (len - w).div_ceil(s) + 1 }
    }

    #[test]
    fn single_window_covers_short_scene() {
        let chunks = make_chunks(&[scene(0, 0, 100)], Some(512), Some(384), get_profile(None));
        assert_eq!(chunks.len(), 1);
        assert_eq!((chunks[0].start, chunks[0].end), (0, 100));
    }

    #[test]
    fn overlapping_windows_when_stride_undercuts() {
        let chunks = make_chunks(&[scene(0, 0, 1000)], Some(512), Some(384), get_profile(None));
        assert_eq!(chunks.len(), expected_count(1000, 512, 384));
        assert_eq!((chunks[0].start, chunks[0].end), (0, 512));
        assert_eq!((chunks[1].start, chunks[1].end), (384, 896));
        assert_eq!(chunks.last().unwrap().end, 1000);
        // Consecutive windows overlap by window - stride.
        assert!(chunks[1].start < chunks[0].end);
    }

    #[test]
    fn gapped_windows_when_stride_exceeds_window() {
        let chunks = make_chunks(&[scene(0, 0, 100)], Some(10), Some(30), get_profile(None));
        assert_eq!((chunks[0].start, chunks[0].end), (0, 10));
        assert_eq!((chunks[1].start, chunks[1].end), (30, 40));
        for pair in chunks.windows(2) {
            assert!(pair[1].start >= pair[0].end);
        }
    }

    #[test]
    fn windows_never_cross_scene_edges() {
        let scenes = vec![scene(0, 0, 700), scene(1, 710, 900)];
        let chunks = make_chunks(&scenes, Some(512), Some(384), get_profile(None));
        for chunk in &chunks {
            let owner = &scenes[chunk.scene_idx.unwrap()];
            assert!(owner.start <= chunk.start && chunk.end <= owner.end);
        }
        // Last chunk of each scene lands exactly on the scene end.
        assert!(chunks.iter().any(|c| c.end == 700));
        assert_eq!(chunks.last().unwrap().end, 900);
    }

    #[test]
    fn indices_are_globally_dense_and_ordered() {
        let scenes = vec![scene(0, 0, 1200), scene(1, 1200, 2600), scene(2, 2600, 2700)];
        let chunks = make_chunks(&scenes, None, None, get_profile(None));
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.idx, i);
            if i > 0 {
                let prev = &chunks[i - 1];
                assert!(
                    prev.scene_idx < chunk.scene_idx
                        || (prev.scene_idx == chunk.scene_idx && prev.start < chunk.start)
                );
            }
        }
        let per_scene: usize = scenes
            .iter()
            .map(|s| expected_count(s.end - s.start, 512, 384))
            .sum();
        assert_eq!(chunks.len(), per_scene);
    }

    #[test]
    fn zero_window_falls_back_to_first_scene() {
        let scenes = vec![scene(0, 0, 50), scene(1, 50, 80)];
        let chunks = make_chunks(&scenes, Some(0), Some(10), get_profile(None));
        assert_eq!(chunks.len(), 1);
        assert_eq!((chunks[0].start, chunks[0].end), (0, 50));
        assert_eq!(chunks[0].scene_idx, Some(0));
    }

    #[test]
    fn empty_scene_list_yields_no_chunks() {
        let chunks = make_chunks(&[], None, None, get_profile(None));
        assert!(chunks.is_empty());
    }

    #[test]
    fn empty_scene_yields_its_fallback_chunk() {
        // An empty document segments to a single [0, 0) scene.
        let chunks = make_chunks(&[scene(0, 0, 0)], None, None, get_profile(None));
        assert_eq!(chunks.len(), 1);
        assert_eq!((chunks[0].start, chunks[0].end), (0, 0));
    }
}
