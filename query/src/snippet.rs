//! Renders a `CodeNode`'s source range into the line-numbered, caret-marked
//! text shown in a `RetrievalResult`'s `code` field.

use std::path::Path;

/// Render `[line_start - context_lines, line_end + context_lines]` of
/// `file_path`, 1-indexed inclusive, prefixing each line with a 4-char
/// line-number column and marking the `[line_start, line_end]` range with
/// `>>> `. Read failures degrade to a diagnostic string rather than erroring.
pub fn render_snippet(
    file_path: &str,
    line_start: u32,
    line_end: u32,
    context_lines: usize,
) -> String {
    match std::fs::read_to_string(Path::new(file_path)) {
        Ok(contents) => render_from_source(&contents, line_start, line_end, context_lines),
        Err(err) => format!("# Could not fetch: {err}"),
    }
}

fn render_from_source(contents: &str, line_start: u32, line_end: u32, context_lines: usize) -> String {
    let lines: Vec<&str> = contents.lines().collect();
    let total = lines.len() as u32;
    if total == 0 {
        return String::new();
    }

    let from = line_start.saturating_sub(context_lines as u32).max(1);
    let to = line_end.saturating_add(context_lines as u32).min(total);

    let mut rendered = String::new();
    for line_no in from..=to {
        let text = lines[(line_no - 1) as usize];
        let marker = if line_no >= line_start && line_no <= line_end { ">>> " } else { "    " };
        rendered.push_str(&format!("{line_no:>4}{marker}{text}\n"));
    }
    rendered
}
