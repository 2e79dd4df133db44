//! Boundary-aware text chunker with overlap.
//!
//! Splits normalized document text into retrieval units bounded by a target
//! character length, with a configurable overlap window between adjacent
//! units. Splitting prefers paragraph (`\n\n`) then sentence boundaries and
//! falls back to a hard cut when no boundary exists within tolerance.
//!
//! Offsets are byte offsets into the normalized text and are stable:
//! concatenating each chunk's non-overlapping span (`start` of this chunk
//! to `start` of the next) reconstructs the source text exactly. Chunk ids
//! are derived from the document id and sequence index, so re-chunking an
//! unchanged document reproduces the same ids.

use sha2::{Digest, Sha256};

use crate::models::Chunk;

/// How far back from the target length the boundary search may reach,
/// as a divisor of the chunk length.
const BOUNDARY_TOLERANCE_DIV: usize = 4;

/// Split `text` into chunks of at most `max_chars` bytes with `overlap_chars`
/// bytes of overlap between neighbours. Requires `overlap_chars < max_chars`
/// (enforced at config load).
///
/// Deterministic for a given `(text, max_chars, overlap_chars)`. Segments
/// that would contain only whitespace are absorbed into their neighbour
/// instead of being emitted, so every produced chunk has visible content
/// and the span chain still covers the whole text.
pub fn chunk_text(
    document_id: &str,
    text: &str,
    max_chars: usize,
    overlap_chars: usize,
) -> Vec<Chunk> {
    if text.is_empty() || max_chars == 0 {
        return Vec::new();
    }

    let spans = split_spans(text, max_chars, overlap_chars);
    let spans = absorb_blank_spans(text, spans);

    spans
        .into_iter()
        .enumerate()
        .map(|(index, (start, end))| make_chunk(document_id, index, text, start, end))
        .collect()
}

/// Produce raw `(start, end)` spans walking the text left to right.
fn split_spans(text: &str, max_chars: usize, overlap_chars: usize) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = 0usize;

    loop {
        if text.len() - start <= max_chars {
            spans.push((start, text.len()));
            break;
        }

        let end = find_cut(text, start, max_chars);
        spans.push((start, end));

        // Step back by the overlap for the next span, but always advance.
        let mut next = floor_char_boundary(text, end.saturating_sub(overlap_chars));
        if next <= start {
            next = end;
        }
        start = next;
    }

    spans
}

/// Pick the cut position for a chunk starting at `start`: the latest
/// paragraph break, sentence end, or whitespace inside the tolerance
/// window, else a hard cut at the length limit.
fn find_cut(text: &str, start: usize, max_chars: usize) -> usize {
    let ideal = floor_char_boundary(text, start + max_chars);
    let tolerance = max_chars / BOUNDARY_TOLERANCE_DIV;
    let window_start = ceil_char_boundary(text, (start + max_chars).saturating_sub(tolerance));

    if window_start < ideal {
        let window = &text[window_start..ideal];

        if let Some(pos) = window.rfind("\n\n") {
            return window_start + pos + 2;
        }
        let sentence = ["。", ". ", ".\n", "! ", "? "]
            .iter()
            .filter_map(|sep| window.rfind(sep).map(|pos| pos + sep.len()))
            .max();
        if let Some(cut) = sentence {
            return window_start + cut;
        }
        if let Some(pos) = window.rfind(char::is_whitespace) {
            // cut after the whitespace char
            let after = window_start + pos;
            return ceil_char_boundary(text, after + 1);
        }
    }

    if ideal > start {
        ideal
    } else {
        // A single multi-byte char wider than the limit; take it whole.
        ceil_char_boundary(text, start + 1)
    }
}

/// Merge whitespace-only spans into their predecessor (or successor for a
/// leading run) so no emitted chunk is blank.
fn absorb_blank_spans(text: &str, spans: Vec<(usize, usize)>) -> Vec<(usize, usize)> {
    let mut merged: Vec<(usize, usize)> = Vec::new();
    let mut carry_start: Option<usize> = None;

    for (start, end) in spans {
        if text[start..end].trim().is_empty() {
            match merged.last_mut() {
                Some(last) => last.1 = last.1.max(end),
                None => {
                    carry_start.get_or_insert(start);
                }
            }
        } else {
            let start = carry_start.take().unwrap_or(start);
            merged.push((start, end));
        }
    }

    merged
}

fn make_chunk(document_id: &str, index: usize, text: &str, start: usize, end: usize) -> Chunk {
    let chunk_text = &text[start..end];
    let mut hasher = Sha256::new();
    hasher.update(chunk_text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: format!("{document_id}:{index}"),
        document_id: document_id.to_string(),
        sequence_index: index,
        text: chunk_text.to_string(),
        start,
        end,
        hash,
        embedding: Vec::new(),
    }
}

fn floor_char_boundary(s: &str, mut i: usize) -> usize {
    if i >= s.len() {
        return s.len();
    }
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn ceil_char_boundary(s: &str, mut i: usize) -> usize {
    if i >= s.len() {
        return s.len();
    }
    while i < s.len() && !s.is_char_boundary(i) {
        i += 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Concatenate each chunk's non-overlapping span.
    fn reconstruct(text: &str, chunks: &[Chunk]) -> String {
        let mut out = String::new();
        for (i, c) in chunks.iter().enumerate() {
            let end = if i + 1 < chunks.len() {
                chunks[i + 1].start
            } else {
                c.end
            };
            out.push_str(&text[c.start..end]);
        }
        out
    }

    #[test]
    fn small_text_single_chunk() {
        let chunks = chunk_text("doc1", "Hello, world!", 700, 80);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].sequence_index, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!((chunks[0].start, chunks[0].end), (0, 13));
    }

    #[test]
    fn empty_text_no_chunks() {
        assert!(chunk_text("doc1", "", 700, 80).is_empty());
    }

    #[test]
    fn round_trip_reconstructs_exactly() {
        let texts = [
            "Revenue grew 12% year over year. Margins expanded.\n\nGuidance was raised for Q2. The board approved a buyback.".to_string(),
            "word ".repeat(500),
            "no spaces at all".replace(' ', "").repeat(40),
            "Ünïcode — naïve café 株式会社 décidé. ".repeat(30),
        ];
        for text in &texts {
            for (max, overlap) in [(40, 10), (64, 0), (100, 50), (17, 5)] {
                let chunks = chunk_text("d", text, max, overlap);
                assert_eq!(
                    &reconstruct(text, &chunks),
                    text,
                    "round-trip failed for max={max} overlap={overlap}"
                );
            }
        }
    }

    #[test]
    fn offsets_monotonic_and_overlap_bounded() {
        let text = "Sentence one here. Sentence two follows. ".repeat(40);
        let overlap = 24;
        let chunks = chunk_text("d", &text, 120, overlap);
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            assert!(pair[1].start > pair[0].start, "starts must increase");
            assert!(pair[1].start >= pair[0].end.saturating_sub(overlap));
            assert!(pair[1].start <= pair[0].end, "spans must stay contiguous");
        }
    }

    #[test]
    fn deterministic_ids_and_hashes() {
        let text = "Alpha.\n\nBeta.\n\nGamma.\n\nDelta.";
        let a = chunk_text("doc1", text, 12, 4);
        let b = chunk_text("doc1", text, 12, 4);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.id, y.id);
            assert_eq!(x.hash, y.hash);
            assert_eq!((x.start, x.end), (y.start, y.end));
        }
        assert_eq!(a[0].id, "doc1:0");
    }

    #[test]
    fn prefers_paragraph_boundary() {
        let text = format!("{}\n\n{}", "a".repeat(90), "b".repeat(90));
        let chunks = chunk_text("d", &text, 100, 0);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].text.ends_with("\n\n"));
        assert!(chunks[1].text.starts_with('b'));
    }

    #[test]
    fn hard_cut_when_no_boundary() {
        let text = "x".repeat(250);
        let chunks = chunk_text("d", &text, 100, 0);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].text.len(), 100);
    }

    #[test]
    fn no_blank_chunks() {
        let text = format!("{}\n\n \n \n\n{}", "intro".repeat(10), "outro".repeat(10));
        for (max, overlap) in [(30, 8), (12, 3)] {
            let chunks = chunk_text("d", &text, max, overlap);
            for c in &chunks {
                assert!(!c.text.trim().is_empty(), "blank chunk emitted");
            }
            assert_eq!(&reconstruct(&text, &chunks), &text);
        }
    }

    #[test]
    fn chunk_count_deterministic() {
        let text = "Paragraph number one.\n\nParagraph number two.\n\nParagraph number three.";
        let n1 = chunk_text("a", text, 30, 6).len();
        let n2 = chunk_text("b", text, 30, 6).len();
        assert_eq!(n1, n2);
    }
}
