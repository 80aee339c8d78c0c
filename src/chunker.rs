use once_cell::sync::Lazy;
use regex::Regex;

/// Candidate split points: the start of every blank line and every ATX
/// heading line (1-6 `#` followed by whitespace).
static BOUNDARY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^(?:\s*$|#{1,6}\s.*$)").expect("valid regex"));

/// Minimum share of `max_chars` a boundary cut must cover; closer boundaries
/// would produce degenerate tiny chunks, so a hard cut is used instead.
const MIN_BOUNDARY_RATIO: f64 = 0.3;

/// Splits `text` into overlapping chunks of at most `max_chars` bytes,
/// preferring to break on blank lines or headings.
///
/// Line endings are normalized to `\n` first. The function is pure and
/// deterministic: identical input always yields the identical sequence.
/// Offsets are byte-based and snapped to UTF-8 character boundaries, so a
/// hard cut never lands inside a multi-byte character.
///
/// Termination holds for any parameter combination: every iteration cuts
/// strictly past the cursor, and an overlap that would move the cursor
/// backwards (or hold it still) is forced forward to the cut instead.
pub fn split_with_overlap(text: &str, max_chars: usize, overlap: usize) -> Vec<String> {
    if max_chars == 0 {
        return Vec::new();
    }

    let text = normalize_newlines(text);
    let len = text.len();
    if len == 0 {
        return Vec::new();
    }

    let mut boundaries: Vec<usize> = vec![0];
    for m in BOUNDARY_RE.find_iter(&text) {
        boundaries.push(m.start());
    }
    boundaries.push(len);
    boundaries.sort_unstable();
    boundaries.dedup();

    let mut chunks = Vec::new();
    let mut i = 0usize;

    while i < len {
        let mut target_end = (i + max_chars).min(len);
        while !text.is_char_boundary(target_end) {
            target_end -= 1;
        }

        // Latest boundary b with i < b <= target_end.
        let boundary = boundaries
            .iter()
            .copied()
            .filter(|&b| b > i && b <= target_end)
            .next_back();

        let mut cut = match boundary {
            Some(b) if (b - i) as f64 >= max_chars as f64 * MIN_BOUNDARY_RATIO => b,
            _ => target_end,
        };
        if cut <= i {
            // A multi-byte character wider than max_chars; step over it.
            cut = (i + 1..=len)
                .find(|&j| text.is_char_boundary(j))
                .unwrap_or(len);
        }

        let piece = text[i..cut].trim();
        if !piece.is_empty() {
            chunks.push(piece.to_string());
        }

        if cut >= len {
            break;
        }

        let mut next = cut.saturating_sub(overlap);
        while !text.is_char_boundary(next) {
            next -= 1;
        }
        if next <= i {
            // Overlap at least as large as the chunk: advancing to the cut
            // is the only way forward.
            next = cut;
        }
        i = next;
    }

    chunks
}

fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}
