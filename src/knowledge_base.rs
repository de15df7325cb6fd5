//! Per-client facts used for applicability checks and path interpolation.

use std::collections::BTreeMap;

use log::debug;
use serde::{Deserialize, Serialize};
use sysinfo::{System, SystemExt};

/// A user account known on the client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeBaseUser {
    pub username: String,
    #[serde(default)]
    pub sid: Option<String>,
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(default)]
    pub homedir: Option<String>,
    #[serde(default)]
    pub userprofile: Option<String>,
    #[serde(default)]
    pub appdata: Option<String>,
    #[serde(default)]
    pub localappdata: Option<String>,
    #[serde(default)]
    pub temp: Option<String>,
}

impl KnowledgeBaseUser {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ..Default::default()
        }
    }

    /// Look up a `users.<name>` attribute.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        match name {
            "username" => Some(self.username.as_str()),
            "sid" => self.sid.as_deref(),
            "uid" => self.uid.as_deref(),
            "homedir" => self.homedir.as_deref(),
            "userprofile" => self.userprofile.as_deref().or(self.homedir.as_deref()),
            "appdata" => self.appdata.as_deref(),
            "localappdata" => self.localappdata.as_deref(),
            "temp" => self.temp.as_deref(),
            _ => None,
        }
    }
}

/// Facts about one client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeBase {
    /// `Windows`, `Linux` or `Darwin`.
    pub os: String,
    #[serde(default)]
    pub os_major_version: u32,
    #[serde(default)]
    pub os_minor_version: u32,
    #[serde(default)]
    pub fqdn: String,
    #[serde(default)]
    pub hostname: String,
    /// Environment values keyed by lower-case variable name.
    #[serde(default)]
    pub environ: BTreeMap<String, String>,
    #[serde(default)]
    pub users: Vec<KnowledgeBaseUser>,
}

impl KnowledgeBase {
    pub fn new(os: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            ..Default::default()
        }
    }

    pub fn with_version(mut self, major: u32, minor: u32) -> Self {
        self.os_major_version = major;
        self.os_minor_version = minor;
        self
    }

    pub fn with_environ(mut self, name: &str, value: impl Into<String>) -> Self {
        self.environ.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_user(mut self, user: KnowledgeBaseUser) -> Self {
        self.users.push(user);
        self
    }

    /// Look up a scalar attribute such as `os`, `os_major_version` or
    /// `environ_systemroot`.
    pub fn attribute(&self, name: &str) -> Option<String> {
        match name {
            "os" => Some(self.os.clone()),
            "os_major_version" => Some(self.os_major_version.to_string()),
            "os_minor_version" => Some(self.os_minor_version.to_string()),
            "fqdn" if !self.fqdn.is_empty() => Some(self.fqdn.clone()),
            "hostname" if !self.hostname.is_empty() => Some(self.hostname.clone()),
            _ => name
                .strip_prefix("environ_")
                .and_then(|var| self.environ.get(&var.to_ascii_lowercase()))
                .cloned(),
        }
    }

    /// Value of an environment variable, case-insensitive.
    pub fn environ_var(&self, name: &str) -> Option<&str> {
        self.environ.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Whether an artifact or source restricted to `supported_os` applies.
    /// An empty list means every OS.
    pub fn os_matches<'a, I>(&self, supported_os: I) -> bool
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut supported = supported_os.into_iter().peekable();
        if supported.peek().is_none() {
            return true;
        }
        let own = canonical_os(&self.os);
        supported.any(|os| canonical_os(os) == own)
    }

    /// Build a knowledge base describing the host this process runs on.
    pub fn from_local_host() -> Self {
        let system = System::new();

        let os = match std::env::consts::OS {
            "windows" => "Windows",
            "macos" => "Darwin",
            "linux" => "Linux",
            other => other,
        }
        .to_string();

        let (os_major_version, os_minor_version) = system
            .os_version()
            .map(|version| parse_version(&version))
            .unwrap_or((0, 0));

        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_default();

        let environ: BTreeMap<String, String> = std::env::vars()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect();

        let username = environ
            .get("username")
            .or_else(|| environ.get("user"))
            .cloned()
            .unwrap_or_else(|| "unknown".to_string());

        let user = KnowledgeBaseUser {
            username,
            homedir: environ.get("home").or_else(|| environ.get("userprofile")).cloned(),
            userprofile: environ.get("userprofile").cloned(),
            appdata: environ.get("appdata").cloned(),
            localappdata: environ.get("localappdata").cloned(),
            temp: environ.get("temp").or_else(|| environ.get("tmpdir")).cloned(),
            ..Default::default()
        };

        debug!(
            "Local knowledge base: {} {}.{} on {}",
            os, os_major_version, os_minor_version, hostname
        );

        KnowledgeBase {
            os,
            os_major_version,
            os_minor_version,
            fqdn: hostname.clone(),
            hostname,
            environ,
            users: vec![user],
        }
    }
}

fn canonical_os(os: &str) -> String {
    match os.to_ascii_lowercase().as_str() {
        "macos" | "osx" | "darwin" => "darwin".to_string(),
        other => other.to_string(),
    }
}

fn parse_version(version: &str) -> (u32, u32) {
    let mut parts = version
        .split(|c: char| !c.is_ascii_digit())
        .filter(|p| !p.is_empty())
        .map(|p| p.parse::<u32>().unwrap_or(0));
    (parts.next().unwrap_or(0), parts.next().unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_attributes() {
        let kb = KnowledgeBase::new("Windows")
            .with_version(6, 2)
            .with_environ("SystemRoot", "C:\\Windows");

        assert_eq!(kb.attribute("os").as_deref(), Some("Windows"));
        assert_eq!(kb.attribute("os_major_version").as_deref(), Some("6"));
        assert_eq!(kb.attribute("environ_systemroot").as_deref(), Some("C:\\Windows"));
        assert_eq!(kb.attribute("environ_SYSTEMROOT").as_deref(), Some("C:\\Windows"));
        assert_eq!(kb.attribute("fqdn"), None);
        assert_eq!(kb.environ_var("SYSTEMROOT"), Some("C:\\Windows"));
    }

    #[test]
    fn test_user_profile_falls_back_to_homedir() {
        let mut user = KnowledgeBaseUser::new("alice");
        user.homedir = Some("C:\\Users\\alice".into());
        assert_eq!(user.attribute("userprofile"), Some("C:\\Users\\alice"));
        assert_eq!(user.attribute("sid"), None);
        assert_eq!(user.attribute("username"), Some("alice"));
    }

    #[test]
    fn test_os_matching() {
        let kb = KnowledgeBase::new("Darwin");
        assert!(kb.os_matches(&Vec::<String>::new()));
        assert!(kb.os_matches(&vec!["MacOS".to_string()]));
        assert!(!kb.os_matches(&vec!["Windows".to_string(), "Linux".to_string()]));

        let linux = KnowledgeBase::new("Linux");
        assert!(linux.os_matches(&vec!["linux".to_string()]));
    }

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("10.0.19045"), (10, 0));
        assert_eq!(parse_version("22.04"), (22, 4));
        assert_eq!(parse_version("rolling"), (0, 0));
    }

    #[test]
    fn test_local_host_has_one_user() {
        let kb = KnowledgeBase::from_local_host();
        assert!(!kb.os.is_empty());
        assert_eq!(kb.users.len(), 1);
    }
}
