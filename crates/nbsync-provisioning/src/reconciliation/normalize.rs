//! Free-text normalization applied before field comparison.

/// Canonicalize free text for comparison.
///
/// Missing or blank input becomes the empty string. Otherwise the text is
/// trimmed, split into lines, each line trimmed, and the lines rejoined with
/// a single `\n`. Case, punctuation and spacing inside a line are kept.
#[must_use]
pub fn normalize(text: Option<&str>) -> String {
    let Some(text) = text else {
        return String::new();
    };

    text.trim()
        .lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Compare two free-text values after normalizing both sides.
#[must_use]
pub fn text_eq(left: Option<&str>, right: Option<&str>) -> bool {
    normalize(left) == normalize(right)
}
