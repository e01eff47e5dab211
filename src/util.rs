//! Shared utility functions for the runr crate.

use std::time::Duration;

/// Extract a JSON object from text that may contain other content.
/// Uses brace-counting to find the outermost JSON object.
pub fn extract_json_object(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let mut depth = 0;
    let mut in_string = false;
    let mut escaped = false;
    let mut end = start;

    for (i, ch) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    end = start + i + 1;
                    break;
                }
            }
            _ => {}
        }
    }

    if depth == 0 && end > start {
        Some(text[start..end].to_string())
    } else {
        None
    }
}

/// Turn an arbitrary label into a filesystem-safe slug.
/// Lowercase alphanumerics, runs of anything else collapse to one dash.
pub fn slugify(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_dash = true;
    for ch in s.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    if out.is_empty() {
        out.push_str("untitled");
    }
    out
}

/// Resolve a timeout from paired env overrides, milliseconds winning over
/// minutes. Returns `default` when neither is set or parsable.
pub fn env_timeout(ms_var: &str, minutes_var: &str, default: Duration) -> Duration {
    if let Ok(raw) = std::env::var(ms_var) {
        if let Ok(ms) = raw.trim().parse::<u64>() {
            return Duration::from_millis(ms);
        }
    }
    if let Ok(raw) = std::env::var(minutes_var) {
        if let Ok(minutes) = raw.trim().parse::<u64>() {
            return Duration::from_secs(minutes * 60);
        }
    }
    default
}

/// Reject commands containing shell metacharacters that compose or
/// redirect. Suggested auto-fix commands must pass this filter.
pub fn is_safe_command(cmd: &str) -> bool {
    const FORBIDDEN: &[char] = &[';', '&', '|', '>', '<', '`'];
    if cmd.chars().any(|c| FORBIDDEN.contains(&c)) {
        return false;
    }
    !cmd.contains("$(")
}

/// Truncate a string to at most `max_bytes`, cutting on a char boundary.
pub fn truncate_bytes(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
