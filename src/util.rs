// src/util.rs — Shared text helpers for logs and diagnostics

/// Longest prefix of `s` that fits in `max_len` bytes (UTF-8 safe).
pub fn truncate_str(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        return s;
    }
    let mut end = max_len;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Longest suffix of `s` that fits in `max_len` bytes (UTF-8 safe).
///
/// Simulators print the fatal error last, so diagnostics keep the tail.
pub fn tail_str(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        return s;
    }
    let mut start = s.len() - max_len;
    while start < s.len() && !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

/// Collapse all runs of whitespace (newlines included) to single spaces.
pub fn single_line(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
