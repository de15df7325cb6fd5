//! Path helpers for writing collected data under a local base directory.

use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Result};

/// Join `relative` onto `base`, refusing anything that could leave `base`.
///
/// `..`, absolute paths, drive prefixes and null bytes are rejected. The
/// path does not need to exist.
pub fn resolve_within(base: &Path, relative: &Path) -> Result<PathBuf> {
    if relative.to_string_lossy().contains('\0') {
        bail!("Path contains null bytes");
    }

    let mut resolved = base.to_path_buf();
    let mut pushed = 0;
    for component in relative.components() {
        match component {
            Component::Normal(name) => {
                resolved.push(name);
                pushed += 1;
            }
            Component::CurDir => {}
            Component::ParentDir => bail!("Path traversal attempt detected: path contains '..'"),
            Component::RootDir | Component::Prefix(_) => {
                bail!("Absolute paths not allowed under {}", base.display())
            }
        }
    }

    if pushed == 0 {
        bail!("Path {} resolves to the base directory itself", relative.display());
    }
    Ok(resolved)
}

/// Turn a path reported by a client into a relative path that keeps its
/// structure: `C:\Windows\TEMP\A.exe` becomes `C/Windows/TEMP/A.exe` and
/// `/etc/passwd` becomes `etc/passwd`. Empty, `.` and `..` components are
/// dropped.
pub fn client_path_to_relative(path: &str) -> PathBuf {
    let mut relative = PathBuf::new();
    for part in path.split(['/', '\\']) {
        let part = part.trim_end_matches(':');
        if part.is_empty() || part == "." || part == ".." {
            continue;
        }
        relative.push(sanitize_filename(part));
    }
    relative
}

/// Replace characters that are unsafe in a file name on any platform.
pub fn sanitize_filename(filename: &str) -> String {
    let mut sanitized: String = filename
        .chars()
        .filter(|&c| c != '\0')
        .map(|c| match c {
            '/' | '\\' | '<' | '>' | ':' | '"' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.chars().all(|c| c == '.') {
        sanitized = format!("_{}", sanitized);
    }

    let trimmed = sanitized.trim_matches(|c| c == ' ').to_string();
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_within() {
        let base = Path::new("/out");
        assert_eq!(
            resolve_within(base, Path::new("analysis/C.1/alice")).unwrap(),
            PathBuf::from("/out/analysis/C.1/alice")
        );
        assert!(resolve_within(base, Path::new("../etc/passwd")).is_err());
        assert!(resolve_within(base, Path::new("a/../../b")).is_err());
        assert!(resolve_within(base, Path::new("/etc/passwd")).is_err());
        assert!(resolve_within(base, Path::new(".")).is_err());
    }

    #[test]
    fn test_client_path_to_relative() {
        assert_eq!(
            client_path_to_relative("C:\\Windows\\TEMP\\A.exe"),
            PathBuf::from("C").join("Windows").join("TEMP").join("A.exe")
        );
        assert_eq!(client_path_to_relative("/etc/passwd"), PathBuf::from("etc").join("passwd"));
        assert_eq!(client_path_to_relative("/a/../../b"), PathBuf::from("a").join("b"));
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("C.1234"), "C.1234");
        assert_eq!(sanitize_filename("a:b*c"), "a_b_c");
        assert_eq!(sanitize_filename(".."), "_..");
        assert_eq!(sanitize_filename("   "), "unnamed");
    }
}
