use regex::Regex;
use std::sync::OnceLock;

/// Maximum number of lines kept when an output payload is attached to a result
pub const MAX_PAYLOAD_LINES: usize = 50;

/// Maximum number of characters kept when an output payload is attached to a result
pub const MAX_PAYLOAD_CHARS: usize = 4096;

/// Normalize program output: trim trailing whitespace on each line and drop
/// trailing empty lines
pub fn normalize_output(s: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = s.lines().map(|line| line.trim_end()).collect();
    while lines.last().map(|s| s.is_empty()).unwrap_or(false) {
        lines.pop();
    }
    lines
}

/// Compare program output with expected output, ignoring trailing whitespace
pub fn compare_output(actual: &str, expected: &str) -> bool {
    normalize_output(actual) == normalize_output(expected)
}

/// Whether the normalized expected text appears in the normalized actual output
pub fn output_contains(actual: &str, expected: &str) -> bool {
    let actual = normalize_output(actual).join("\n");
    let expected = normalize_output(expected).join("\n");
    actual.contains(&expected)
}

/// Keep the tail of `output`, bounded by lines and characters
pub fn truncate_output(output: &str, max_lines: usize, max_chars: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();

    let relevant_lines: &[&str] = if lines.len() > max_lines {
        &lines[lines.len() - max_lines..]
    } else {
        &lines
    };

    let mut result = relevant_lines.join("\n");

    if result.len() > max_chars {
        let mut cut = result.len() - max_chars;
        while !result.is_char_boundary(cut) {
            cut += 1;
        }
        result = format!("...(truncated)...\n{}", &result[cut..]);
    }

    result
}

/// Keep the first and last `max_lines / 2` lines of a long listing
pub fn head_tail_lines(output: &str, max_lines: usize) -> Vec<String> {
    let lines: Vec<&str> = output.lines().collect();
    if lines.len() <= max_lines {
        return lines.into_iter().map(str::to_string).collect();
    }
    let half = max_lines / 2;
    lines[..half]
        .iter()
        .chain(lines[lines.len() - half..].iter())
        .map(|s| s.to_string())
        .collect()
}

/// Remove ANSI colour sequences (compiler diagnostics)
pub fn strip_ansi(s: &str) -> String {
    static ANSI: OnceLock<Regex> = OnceLock::new();
    let re = ANSI.get_or_init(|| {
        Regex::new(r"\x1B\[[0-?]*[ -/]*[@-~]").expect("ANSI escape pattern is valid")
    });
    re.replace_all(s, "").into_owned()
}
