//! Detection of file paths inside collected data.
//!
//! Used by ARTIFACT_FILES sources to turn registry values, command lines and
//! similar free-form strings into files worth fetching. Handles quoted paths,
//! unquoted paths followed by arguments (`C:\x\svc.exe -k netsvcs`), DLLs
//! passed to loaders (`rundll32.exe C:\x\y.dll,Entry`) and `%VAR%`
//! environment references.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

use crate::config::interpolation::expand_windows_env;
use crate::constants::EXECUTABLE_EXTENSIONS;
use crate::knowledge_base::KnowledgeBase;

lazy_static! {
    static ref QUOTED: Regex = Regex::new(r#""([^"]+)""#).unwrap();
    static ref WINDOWS_EXECUTABLE: Regex = Regex::new(&format!(
        r#"(?i)(?:[a-z]:\\|\\\\|%[a-z0-9_()]+%\\)[^"<>|*?\r\n]*?\.(?:{})\b"#,
        EXECUTABLE_EXTENSIONS.join("|")
    ))
    .unwrap();
    static ref PATH_START: Regex = Regex::new(r"(?i)^(?:[a-z]:\\|\\\\|%[a-z0-9_()]+%\\|/)").unwrap();
}

fn looks_like_path(candidate: &str) -> bool {
    PATH_START.is_match(candidate)
}

/// Extract candidate file paths from a free-form string.
///
/// Environment references are expanded from the knowledge base. Candidates
/// that still contain an unresolved `%VAR%` are dropped.
pub fn detect_paths(text: &str, kb: &KnowledgeBase) -> Vec<String> {
    let text = text.trim();
    let mut raw: Vec<String> = Vec::new();

    for caps in QUOTED.captures_iter(text) {
        let inner = caps[1].trim();
        if looks_like_path(inner) {
            raw.push(inner.to_string());
        }
    }

    let unquoted = QUOTED.replace_all(text, " ");
    for m in WINDOWS_EXECUTABLE.find_iter(&unquoted) {
        raw.push(m.as_str().to_string());
    }

    if raw.is_empty() && looks_like_path(text) {
        // A bare path without a recognised extension, e.g. a data file.
        // Unix paths stop at the first whitespace.
        let candidate = if text.starts_with('/') {
            text.split_whitespace().next().unwrap_or(text)
        } else {
            text
        };
        raw.push(candidate.to_string());
    }

    let mut paths: Vec<String> = Vec::new();
    for candidate in raw {
        let expanded = expand_windows_env(&candidate, kb);
        if expanded.contains('%') {
            continue;
        }
        if !paths.contains(&expanded) {
            paths.push(expanded);
        }
    }
    paths
}

/// Extract file paths from one collected record.
///
/// Records with a `data` field (registry values) are scanned by content,
/// records with a `path` or `exe` field (file listings, processes) name the
/// file directly, anything else has every string scanned.
pub fn paths_from_record(record: &Value, kb: &KnowledgeBase) -> Vec<String> {
    let mut paths = Vec::new();
    collect_record_paths(record, kb, &mut paths);
    paths
}

fn collect_record_paths(record: &Value, kb: &KnowledgeBase, out: &mut Vec<String>) {
    let push = |found: Vec<String>, out: &mut Vec<String>| {
        for path in found {
            if !out.contains(&path) {
                out.push(path);
            }
        }
    };

    match record {
        Value::String(text) => push(detect_paths(text, kb), out),
        Value::Array(items) => {
            for item in items {
                collect_record_paths(item, kb, out);
            }
        }
        Value::Object(map) => {
            if let Some(Value::String(data)) = map.get("data") {
                push(detect_paths(data, kb), out);
            } else if let Some(Value::String(path)) = map.get("path").or_else(|| map.get("exe")) {
                if !path.is_empty() {
                    push(vec![expand_windows_env(path, kb)], out);
                }
            } else {
                for value in map.values() {
                    collect_record_paths(value, kb, out);
                }
            }
        }
        _ => {}
    }
}
