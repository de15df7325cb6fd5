//! Knowledge-base interpolation of artifact paths, keys and queries.
//!
//! Two syntaxes are handled:
//! - `%%attribute%%` placeholders in definitions, resolved against the
//!   knowledge base. `%%users.<attr>%%` is multi-valued and expands once per
//!   user that has the attribute.
//! - Windows-style `%VAR%` references found in collected data (for example a
//!   run key value), resolved against the client's environment.

use lazy_static::lazy_static;
use log::debug;
use regex::Regex;

use crate::knowledge_base::{KnowledgeBase, KnowledgeBaseUser};

lazy_static! {
    static ref KB_PLACEHOLDER: Regex = Regex::new(r"%%([A-Za-z0-9_.]+)%%").unwrap();
}

/// Expand every `%%...%%` placeholder in `pattern`.
///
/// Returns no values when a referenced attribute is missing from the
/// knowledge base. Results are deduplicated, first occurrence wins.
pub fn interpolate(pattern: &str, kb: &KnowledgeBase) -> Vec<String> {
    if !KB_PLACEHOLDER.is_match(pattern) {
        return vec![pattern.to_string()];
    }

    let per_user = KB_PLACEHOLDER
        .captures_iter(pattern)
        .any(|c| c[1].starts_with("users."));

    let mut results: Vec<String> = Vec::new();
    if per_user {
        for user in &kb.users {
            if let Some(expanded) = substitute(pattern, kb, Some(user)) {
                if !results.contains(&expanded) {
                    results.push(expanded);
                }
            }
        }
    } else if let Some(expanded) = substitute(pattern, kb, None) {
        results.push(expanded);
    }

    if results.is_empty() {
        debug!("Interpolation of {} produced no values", pattern);
    }
    results
}

/// Expand each pattern and concatenate the results, preserving order.
pub fn interpolate_all(patterns: &[String], kb: &KnowledgeBase) -> Vec<String> {
    let mut results = Vec::new();
    for pattern in patterns {
        for expanded in interpolate(pattern, kb) {
            if !results.contains(&expanded) {
                results.push(expanded);
            }
        }
    }
    results
}

fn substitute(pattern: &str, kb: &KnowledgeBase, user: Option<&KnowledgeBaseUser>) -> Option<String> {
    let mut result = String::with_capacity(pattern.len());
    let mut last = 0;

    for caps in KB_PLACEHOLDER.captures_iter(pattern) {
        let whole = caps.get(0)?;
        let name = &caps[1];

        let value = match name.strip_prefix("users.") {
            Some(attr) => user.and_then(|u| u.attribute(attr)).map(str::to_string),
            None => kb.attribute(name),
        };
        let value = value.filter(|v| !v.is_empty())?;

        result.push_str(&pattern[last..whole.start()]);
        result.push_str(&value);
        last = whole.end();
    }
    result.push_str(&pattern[last..]);
    Some(result)
}

/// Expand Windows-style environment variables (`%VAR%`) using the client's
/// environment. Unknown variables are left in place.
pub fn expand_windows_env(path: &str, kb: &KnowledgeBase) -> String {
    let mut result = path.to_string();

    let mut i = 0;
    while let Some(start) = result[i..].find('%') {
        let real_start = i + start;
        if let Some(end) = result[real_start + 1..].find('%') {
            let real_end = real_start + 1 + end;
            let var_name = result[real_start + 1..real_end].to_string();

            match kb.environ_var(&var_name) {
                Some(value) if !var_name.is_empty() => {
                    let value = value.to_string();
                    result.replace_range(real_start..=real_end, &value);
                    i = real_start + value.len();
                }
                _ => {
                    // Leave it and continue from the closing %
                    i = real_end;
                }
            }
        } else {
            break;
        }
    }

    result
}
