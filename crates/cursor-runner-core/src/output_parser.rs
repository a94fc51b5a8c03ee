//! Output Parser (spec §4.C): two stateless extractors over accumulated
//! Agent CLI output.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

/// Parsed review envelope (spec §4.C, §4.E).
#[derive(Debug, Clone, Deserialize)]
pub struct ReviewEnvelope {
    pub code_complete: bool,
    #[serde(default)]
    pub break_iteration: bool,
    #[serde(default)]
    pub justification: Option<String>,
}

/// Scan `output` (case-insensitive) for lines of the form
/// `created|modified|updated: <path>` and return the paths in order of
/// first occurrence, deduplicated. Paths may contain spaces; only
/// incidental leading/trailing whitespace around the path is trimmed.
pub fn extract_touched_files(output: &str) -> Vec<String> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let re = PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^\s*(?:created|modified|updated)\s*:\s*(.+?)\s*$").unwrap()
    });

    let mut seen = HashSet::new();
    let mut files = Vec::new();
    for line in output.lines() {
        let Some(caps) = re.captures(line) else {
            continue;
        };
        let Some(path) = caps.get(1) else { continue };
        let path = path.as_str().to_string();
        if seen.insert(path.clone()) {
            files.push(path);
        }
    }
    files
}

/// Strip ANSI escape sequences and carriage returns, locate the first
/// complete top-level `{...}` object, and parse it as a [`ReviewEnvelope`].
/// Returns `None` if no balanced object is found or it fails to validate.
pub fn extract_review_envelope(output: &str) -> Option<ReviewEnvelope> {
    let cleaned = strip_ansi(output);
    let candidate = find_first_balanced_object(&cleaned)?;
    serde_json::from_str(candidate).ok()
}

fn strip_ansi(input: &str) -> String {
    static ANSI: OnceLock<Regex> = OnceLock::new();
    let re = ANSI.get_or_init(|| Regex::new(r"\x1b\[[0-9;]*[a-zA-Z]").unwrap());
    re.replace_all(input, "").replace('\r', "")
}

/// Brace-balanced scan for the first complete top-level `{...}` object,
/// respecting quoted strings so braces inside string values don't throw
/// off the depth count.
fn find_first_balanced_object(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut escape = false;

    for (i, c) in s.char_indices().skip_while(|&(i, _)| i < start) {
        if in_string {
            if escape {
                escape = false;
            } else if c == '\\' {
                escape = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[start..i + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}
