//! Break-point detection for chunk boundaries

/// Priority of a potential break point
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BreakPriority {
    Sentence = 1,
    Paragraph = 2,
}

/// A potential break point in the text
#[derive(Debug, Clone, Copy)]
pub struct BreakPoint {
    pub position: usize,
    pub priority: BreakPriority,
}

/// Find potential break points in page text, sorted by position
pub fn find_break_points(text: &str) -> Vec<BreakPoint> {
    let mut points = Vec::new();

    // Paragraph breaks (blank line)
    for (i, _) in text.match_indices("\n\n") {
        let pos = i + 2;
        if text.is_char_boundary(pos) {
            points.push(BreakPoint {
                position: pos,
                priority: BreakPriority::Paragraph,
            });
        }
    }

    // Sentence boundaries
    for pattern in [". ", ".\n", "? ", "! "] {
        for (i, _) in text.match_indices(pattern) {
            let pos = i + 2;
            if pos <= text.len() && text.is_char_boundary(pos) {
                points.push(BreakPoint {
                    position: pos,
                    priority: BreakPriority::Sentence,
                });
            }
        }
    }

    // Position order; at equal positions keep the stronger break
    points.sort_by(|a, b| {
        a.position
            .cmp(&b.position)
            .then(b.priority.cmp(&a.priority))
    });
    points.dedup_by_key(|p| p.position);
    points
}

/// Ensure a position is on a valid UTF-8 character boundary
pub fn ensure_char_boundary(text: &str, pos: usize) -> usize {
    if pos >= text.len() {
        return text.len();
    }
    if text.is_char_boundary(pos) {
        return pos;
    }
    let mut adjusted = pos;
    while adjusted > 0 && !text.is_char_boundary(adjusted) {
        adjusted -= 1;
    }
    adjusted
}

/// Find the best break point near the target position.
///
/// Returns the chosen end position and whether it landed on a structural
/// boundary (as opposed to a forced window split).
pub fn find_best_break(
    text: &str,
    start: usize,
    max_chars: usize,
    break_points: &[BreakPoint],
) -> (usize, bool) {
    let target = start + max_chars;

    // Search window: 50% to 100% of the chunk budget
    let min_pos = ensure_char_boundary(text, start + max_chars / 2);
    let max_pos = ensure_char_boundary(text, std::cmp::min(target, text.len()));

    let best = break_points
        .iter()
        .filter(|p| p.position > start && p.position >= min_pos && p.position <= max_pos)
        .max_by_key(|p| (p.priority, p.position));

    if let Some(point) = best {
        return (point.position, true);
    }

    // No structural boundary inside the budget: force-split at the budget on
    // a char boundary (window fallback, overlap applies)
    (ensure_char_boundary(text, std::cmp::min(target, text.len())), false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paragraph_beats_sentence() {
        let text = "One sentence. More text here.\n\nNew paragraph starts.";
        let points = find_break_points(text);

        let para = points
            .iter()
            .find(|p| p.priority == BreakPriority::Paragraph)
            .unwrap();
        assert_eq!(&text[..para.position], "One sentence. More text here.\n\n");

        let (pos, structural) = find_best_break(text, 0, 40, &points);
        assert!(structural);
        assert_eq!(pos, para.position);
    }

    #[test]
    fn test_forced_split_without_boundaries() {
        let text = "x".repeat(100);
        let points = find_break_points(&text);
        let (pos, structural) = find_best_break(&text, 0, 40, &points);
        assert!(!structural);
        assert_eq!(pos, 40);
    }

    #[test]
    fn test_char_boundary_adjustment() {
        let text = "héllo wörld";
        // position 2 falls inside the two-byte 'é'
        assert_eq!(ensure_char_boundary(text, 2), 1);
        assert_eq!(ensure_char_boundary(text, 100), text.len());
    }
}
