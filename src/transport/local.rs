//! Transport that runs operations on the local host.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use log::{debug, warn};
use regex::Regex;
use serde_json::{json, Value};
use sysinfo::{PidExt, ProcessExt, System, SystemExt};
use tokio::process::Command;
use walkdir::WalkDir;

use crate::constants::{MAX_GREP_FILE_SIZE, MAX_GREP_MATCHES_PER_FILE};
use crate::transport::{RemoteOperation, RemoteTransport};

/// Runs every operation against the machine the collector runs on,
/// regardless of the requested client id.
#[derive(Debug, Default, Clone)]
pub struct LocalTransport;

impl LocalTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RemoteTransport for LocalTransport {
    async fn invoke(&self, client_id: &str, operation: &RemoteOperation) -> Result<Vec<Value>> {
        debug!("Running {} locally for {}", operation.name(), client_id);

        match operation {
            RemoteOperation::ExecuteCommand { cmd, args } => execute_command(cmd, args).await,
            RemoteOperation::ListDirectory { path } => list_directory(path).await,
            RemoteOperation::Glob { pattern } => {
                let pattern = pattern.clone();
                tokio::task::spawn_blocking(move || glob(&pattern))
                    .await
                    .context("Glob task failed")?
            }
            RemoteOperation::Grep { paths, patterns } => {
                let (paths, patterns) = (paths.clone(), patterns.clone());
                tokio::task::spawn_blocking(move || grep(&paths, &patterns))
                    .await
                    .context("Grep task failed")?
            }
            RemoteOperation::ListProcesses => tokio::task::spawn_blocking(list_processes)
                .await
                .context("Process listing task failed"),
            RemoteOperation::ReadRegistryKey { key } => registry::read_key(key),
            RemoteOperation::ReadRegistryValue { key, value } => registry::read_value(key, value),
            RemoteOperation::WmiQuery { query } => {
                bail!("WMI is not available to the local transport (query: {})", query)
            }
        }
    }
}

async fn execute_command(cmd: &str, args: &[String]) -> Result<Vec<Value>> {
    let output = Command::new(cmd)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .context(format!("Failed to execute {}", cmd))?;

    if !output.status.success() {
        warn!("{} exited with {}", cmd, output.status);
    }

    Ok(vec![json!({
        "cmd": cmd,
        "args": args,
        "exit_status": output.status.code(),
        "stdout": String::from_utf8_lossy(&output.stdout),
        "stderr": String::from_utf8_lossy(&output.stderr),
    })])
}

async fn list_directory(path: &str) -> Result<Vec<Value>> {
    let mut entries = tokio::fs::read_dir(path)
        .await
        .context(format!("Failed to read directory: {}", path))?;

    let mut records = Vec::new();
    while let Some(entry) = entries.next_entry().await.context("Failed to read directory entry")? {
        let metadata = entry.metadata().await.ok();
        let modified = metadata
            .as_ref()
            .and_then(|m| m.modified().ok())
            .map(|time| chrono::DateTime::<chrono::Utc>::from(time).to_rfc3339());

        records.push(json!({
            "path": entry.path().to_string_lossy(),
            "name": entry.file_name().to_string_lossy(),
            "is_dir": metadata.as_ref().map(|m| m.is_dir()).unwrap_or(false),
            "size": metadata.as_ref().map(|m| m.len()),
            "modified": modified,
        }));
    }

    records.sort_by(|a, b| a["path"].as_str().cmp(&b["path"].as_str()));
    Ok(records)
}

fn has_wildcard(component: &str) -> bool {
    component.contains(['*', '?', '['])
}

/// Translate a shell-style glob into an anchored regex. `**` crosses
/// directory boundaries, `*` and `?` do not.
pub(crate) fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut regex = String::from("^");
    let mut chars = pattern.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                regex.push_str(".*");
            }
            '*' => regex.push_str(r"[^/\\]*"),
            '?' => regex.push_str(r"[^/\\]"),
            '/' | '\\' => regex.push_str(r"[/\\]"),
            other => regex.push_str(&regex::escape(&other.to_string())),
        }
    }
    regex.push('$');

    let case_insensitive = cfg!(windows);
    regex::RegexBuilder::new(&regex)
        .case_insensitive(case_insensitive)
        .build()
        .context(format!("Invalid glob pattern: {}", pattern))
}

/// The longest leading directory of `pattern` without wildcards, and how
/// many path components below it the pattern can reach (`None` if `**`).
fn glob_root(pattern: &str) -> (PathBuf, Option<usize>) {
    let components: Vec<&str> = pattern.split(['/', '\\']).collect();
    let first_wild = components
        .iter()
        .position(|c| has_wildcard(c))
        .unwrap_or(components.len());

    let mut root = components[..first_wild].join(std::path::MAIN_SEPARATOR_STR);
    if root.is_empty() {
        root = std::path::MAIN_SEPARATOR_STR.to_string();
    } else if root.ends_with(':') {
        root.push(std::path::MAIN_SEPARATOR);
    }

    let depth = if components[first_wild..].iter().any(|c| c.contains("**")) {
        None
    } else {
        Some(components.len() - first_wild)
    };
    (PathBuf::from(root), depth)
}

fn glob(pattern: &str) -> Result<Vec<Value>> {
    let matcher = glob_to_regex(pattern)?;
    let (root, depth) = glob_root(pattern);

    let mut walker = WalkDir::new(&root).follow_links(false);
    if let Some(depth) = depth {
        walker = walker.max_depth(depth);
    }

    let mut matches: Vec<String> = walker
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.path().to_string_lossy().to_string())
        .filter(|path| matcher.is_match(path))
        .collect();
    matches.sort();

    debug!("Glob {} matched {} file(s)", pattern, matches.len());
    Ok(matches.into_iter().map(|path| json!({ "path": path })).collect())
}

fn grep(paths: &[String], patterns: &[String]) -> Result<Vec<Value>> {
    let regexes = patterns
        .iter()
        .map(|p| Regex::new(p).context(format!("Invalid content regex: {}", p)))
        .collect::<Result<Vec<_>>>()?;

    let mut files: Vec<PathBuf> = Vec::new();
    for path in paths {
        if path.contains(['*', '?']) {
            for record in glob(path)? {
                if let Some(p) = record["path"].as_str() {
                    files.push(PathBuf::from(p));
                }
            }
        } else {
            files.push(PathBuf::from(path));
        }
    }

    let mut records = Vec::new();
    for file in files {
        match grep_file(&file, &regexes) {
            Ok(mut found) => records.append(&mut found),
            Err(e) => debug!("Skipping {}: {:#}", file.display(), e),
        }
    }
    Ok(records)
}

fn grep_file(path: &Path, regexes: &[Regex]) -> Result<Vec<Value>> {
    let metadata = std::fs::metadata(path).context(format!("Failed to stat {}", path.display()))?;
    if !metadata.is_file() {
        bail!("not a regular file");
    }
    if metadata.len() > MAX_GREP_FILE_SIZE {
        bail!("file too large ({} bytes)", metadata.len());
    }

    let bytes = std::fs::read(path).context(format!("Failed to read {}", path.display()))?;
    let text = String::from_utf8_lossy(&bytes);

    let mut records = Vec::new();
    'lines: for (line_number, line) in text.lines().enumerate() {
        for regex in regexes {
            if let Some(m) = regex.find(line) {
                records.push(json!({
                    "path": path.to_string_lossy(),
                    "line": line_number + 1,
                    "offset": m.start(),
                    "match": m.as_str(),
                    "content": line,
                }));
                if records.len() >= MAX_GREP_MATCHES_PER_FILE {
                    break 'lines;
                }
                break;
            }
        }
    }
    Ok(records)
}

fn list_processes() -> Vec<Value> {
    let mut system = System::new();
    system.refresh_processes();

    let mut records: Vec<Value> = system
        .processes()
        .iter()
        .map(|(pid, process)| {
            json!({
                "pid": pid.as_u32(),
                "ppid": process.parent().map(|p| p.as_u32()),
                "name": process.name(),
                "exe": process.exe().to_string_lossy(),
                "cmdline": process.cmd(),
                "start_time": process.start_time(),
                "memory": process.memory(),
            })
        })
        .collect();
    records.sort_by_key(|r| r["pid"].as_u64());
    records
}

#[cfg(target_os = "windows")]
mod registry {
    use super::*;
    use winreg::enums::{HKEY_CLASSES_ROOT, HKEY_CURRENT_USER, HKEY_LOCAL_MACHINE, HKEY_USERS};
    use winreg::{RegKey, RegValue};

    fn open(key: &str) -> Result<RegKey> {
        let (hive, subkey) = key.split_once('\\').unwrap_or((key, ""));
        let root = match hive.to_ascii_uppercase().as_str() {
            "HKEY_LOCAL_MACHINE" | "HKLM" => RegKey::predef(HKEY_LOCAL_MACHINE),
            "HKEY_USERS" | "HKU" => RegKey::predef(HKEY_USERS),
            "HKEY_CURRENT_USER" | "HKCU" => RegKey::predef(HKEY_CURRENT_USER),
            "HKEY_CLASSES_ROOT" | "HKCR" => RegKey::predef(HKEY_CLASSES_ROOT),
            other => return Err(anyhow!("Unknown registry hive: {}", other)),
        };
        root.open_subkey(subkey)
            .context(format!("Failed to open registry key {}", key))
    }

    fn render(key: &RegKey, name: &str, value: &RegValue) -> String {
        key.get_value::<String, _>(name)
            .unwrap_or_else(|_| value.bytes.iter().map(|b| format!("{:02x}", b)).collect())
    }

    /// A trailing `\*` reads every value of the key; otherwise the last
    /// component names one value.
    pub fn read_key(key: &str) -> Result<Vec<Value>> {
        if let Some(parent) = key.strip_suffix("\\*") {
            let handle = open(parent)?;
            let mut records = Vec::new();
            for item in handle.enum_values() {
                let (name, value) = item.context(format!("Failed to enumerate {}", parent))?;
                records.push(json!({
                    "key": parent,
                    "name": name,
                    "data": render(&handle, &name, &value),
                }));
            }
            return Ok(records);
        }

        let (parent, name) = key
            .rsplit_once('\\')
            .ok_or_else(|| anyhow!("Registry path has no value component: {}", key))?;
        read_value(parent, name)
    }

    pub fn read_value(key: &str, name: &str) -> Result<Vec<Value>> {
        let handle = open(key)?;
        let value = handle
            .get_raw_value(name)
            .context(format!("Failed to read {}\\{}", key, name))?;
        Ok(vec![json!({
            "key": key,
            "name": name,
            "data": render(&handle, name, &value),
        })])
    }
}

#[cfg(not(target_os = "windows"))]
mod registry {
    use super::*;

    pub fn read_key(key: &str) -> Result<Vec<Value>> {
        Err(anyhow!("Registry access requires a Windows client: {}", key))
    }

    pub fn read_value(key: &str, name: &str) -> Result<Vec<Value>> {
        Err(anyhow!("Registry access requires a Windows client: {}\\{}", key, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_glob_to_regex() {
        let regex = glob_to_regex("/etc/cron.d/*").unwrap();
        assert!(regex.is_match("/etc/cron.d/daily"));
        assert!(!regex.is_match("/etc/cron.d/sub/daily"));

        let regex = glob_to_regex("/var/**/log?.txt").unwrap();
        assert!(regex.is_match("/var/a/b/log1.txt"));
        assert!(!regex.is_match("/var/a/b/log12.txt"));
    }

    #[test]
    fn test_glob_root() {
        let (root, depth) = glob_root("/etc/cron.d/*");
        assert_eq!(root, PathBuf::from("/etc/cron.d"));
        assert_eq!(depth, Some(1));

        let (_, depth) = glob_root("/var/**/x");
        assert_eq!(depth, None);
    }

    #[tokio::test]
    async fn test_glob_and_grep_on_disk() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.conf"), "user=root\nport=22\n").unwrap();
        fs::write(dir.path().join("b.conf"), "port=2222\n").unwrap();
        fs::write(dir.path().join("c.txt"), "user=nobody\n").unwrap();

        let transport = LocalTransport::new();
        let pattern = format!("{}/*.conf", dir.path().display());
        let found = transport
            .invoke("local", &RemoteOperation::Glob { pattern: pattern.clone() })
            .await
            .unwrap();
        assert_eq!(found.len(), 2);

        let hits = transport
            .invoke(
                "local",
                &RemoteOperation::Grep {
                    paths: vec![pattern],
                    patterns: vec!["user=\\w+".into()],
                },
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0]["match"], "user=root");
        assert_eq!(hits[0]["line"], 1);
    }

    #[tokio::test]
    async fn test_list_directory() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("file"), "x").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();

        let records = LocalTransport::new()
            .invoke(
                "local",
                &RemoteOperation::ListDirectory {
                    path: dir.path().to_string_lossy().to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["name"], "file");
        assert_eq!(records[1]["is_dir"], true);
    }

    #[tokio::test]
    async fn test_wmi_is_unavailable() {
        let err = LocalTransport::new()
            .invoke("local", &RemoteOperation::WmiQuery { query: "SELECT * FROM Win32_Product".into() })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("WMI"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_execute_command() {
        let records = LocalTransport::new()
            .invoke(
                "local",
                &RemoteOperation::ExecuteCommand {
                    cmd: "echo".into(),
                    args: vec!["hello".into()],
                },
            )
            .await
            .unwrap();
        assert_eq!(records[0]["stdout"], "hello\n");
        assert_eq!(records[0]["exit_status"], 0);
    }

    #[tokio::test]
    async fn test_missing_command_fails() {
        let result = LocalTransport::new()
            .invoke(
                "local",
                &RemoteOperation::ExecuteCommand {
                    cmd: "/nonexistent/definitely-not-here".into(),
                    args: vec![],
                },
            )
            .await;
        assert!(result.is_err());
    }
}
