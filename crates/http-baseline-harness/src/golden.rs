use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use similar::TextDiff;

const CONTEXT_LINES: usize = 2;

/// Compare `actual` with the golden file at `path`.
///
/// Returns `None` when they match byte for byte, otherwise a line diff.
///
/// # Errors
/// Returns an error when the golden file cannot be read.
pub fn compare_golden(path: &Path, actual: &str) -> Result<Option<String>> {
    let expected = fs::read_to_string(path)
        .with_context(|| format!("failed to read baseline {}", path.display()))?;
    if expected == actual {
        return Ok(None);
    }
    Ok(Some(line_diff(&expected, actual, &format!("{} (expected)", path.display()), "actual")))
}

/// # Errors
/// Returns an error when the parent directory or the file cannot be written.
pub fn write_golden(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create baseline directory {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("failed to write baseline {}", path.display()))?;
    tracing::info!(path = %path.display(), "baseline written");
    Ok(())
}

/// Unified line diff of `expected` against `actual` with a little context
/// around each hunk.
#[must_use]
pub fn line_diff(expected: &str, actual: &str, from_label: &str, to_label: &str) -> String {
    TextDiff::from_lines(expected, actual)
        .unified_diff()
        .context_radius(CONTEXT_LINES)
        .header(from_label, to_label)
        .to_string()
}
