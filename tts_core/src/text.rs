//! Text normalization applied before synthesis.
//!
//! Chat models answer in markdown. Read aloud verbatim, that produces
//! "asterisk" and URL noise, so the synthesizer speaks a cleaned copy while
//! the client still receives the original reply.

/// Strip markdown markup and collapse whitespace.
///
/// Returns the trimmed original text if nothing speakable remains.
pub fn speech_text(text: &str) -> String {
    let cleaned = strip_code_fences(text);
    let cleaned = cleaned.replace('`', "");
    let cleaned = strip_links(&cleaned);
    let cleaned = cleaned
        .lines()
        .map(strip_line_markers)
        .collect::<Vec<_>>()
        .join("\n");
    let cleaned = cleaned
        .replace("**", "")
        .replace("__", "")
        .replace("~~", "")
        .replace('*', "");

    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        text.trim().to_string()
    } else {
        collapsed
    }
}

fn strip_code_fences(text: &str) -> String {
    let mut out = text.to_string();
    while let Some(start) = out.find("```") {
        match out[start + 3..].find("```") {
            Some(end) => out.replace_range(start..start + end + 6, ""),
            None => break,
        }
    }
    out
}

/// `[label](target)` -> `label`
fn strip_links(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find('[') {
        let after = &rest[open + 1..];
        let Some(close) = after.find("](") else { break };
        let target = &after[close + 2..];
        let Some(end) = target.find(')') else { break };
        out.push_str(&rest[..open]);
        out.push_str(&after[..close]);
        rest = &target[end + 1..];
    }
    out.push_str(rest);
    out
}

fn strip_line_markers(line: &str) -> &str {
    let trimmed = line.trim_start();
    if trimmed.starts_with('#') {
        return trimmed.trim_start_matches('#').trim_start();
    }
    for marker in ["- ", "* ", "+ "] {
        if let Some(rest) = trimmed.strip_prefix(marker) {
            return rest;
        }
    }
    if let Some(dot) = trimmed.find(". ") {
        if dot > 0 && trimmed[..dot].chars().all(|c| c.is_ascii_digit()) {
            return &trimmed[dot + 2..];
        }
    }
    line
}
