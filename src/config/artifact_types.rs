use serde::{Deserialize, Serialize};
use std::fmt;

/// Collection method of a single artifact source.
///
/// Unrecognised type strings are preserved as [`SourceType::Unknown`] so that
/// a definition using them still loads; the source itself is rejected at
/// dispatch time.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(from = "String", into = "String")]
pub enum SourceType {
    Command,
    File,
    Directory,
    Path,
    Grep,
    RegistryKey,
    RegistryValue,
    Wmi,
    ArtifactGroup,
    ArtifactFiles,
    ListProcesses,
    Unknown(String),
}

impl SourceType {
    /// Every type with a built-in collector.
    pub const KNOWN: [SourceType; 11] = [
        SourceType::Command,
        SourceType::File,
        SourceType::Directory,
        SourceType::Path,
        SourceType::Grep,
        SourceType::RegistryKey,
        SourceType::RegistryValue,
        SourceType::Wmi,
        SourceType::ArtifactGroup,
        SourceType::ArtifactFiles,
        SourceType::ListProcesses,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            SourceType::Command => "COMMAND",
            SourceType::File => "FILE",
            SourceType::Directory => "DIRECTORY",
            SourceType::Path => "PATH",
            SourceType::Grep => "GREP",
            SourceType::RegistryKey => "REGISTRY_KEY",
            SourceType::RegistryValue => "REGISTRY_VALUE",
            SourceType::Wmi => "WMI",
            SourceType::ArtifactGroup => "ARTIFACT_GROUP",
            SourceType::ArtifactFiles => "ARTIFACT_FILES",
            SourceType::ListProcesses => "LIST_PROCESSES",
            SourceType::Unknown(name) => name,
        }
    }

    /// Sources that reference other artifacts instead of collecting directly.
    pub fn is_aggregate(&self) -> bool {
        matches!(self, SourceType::ArtifactGroup | SourceType::ArtifactFiles)
    }
}

impl From<String> for SourceType {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "COMMAND" => SourceType::Command,
            "FILE" => SourceType::File,
            "DIRECTORY" => SourceType::Directory,
            "PATH" => SourceType::Path,
            "GREP" => SourceType::Grep,
            "REGISTRY_KEY" => SourceType::RegistryKey,
            "REGISTRY_VALUE" => SourceType::RegistryValue,
            "WMI" => SourceType::Wmi,
            "ARTIFACT_GROUP" | "ARTIFACT" => SourceType::ArtifactGroup,
            "ARTIFACT_FILES" => SourceType::ArtifactFiles,
            "LIST_PROCESSES" => SourceType::ListProcesses,
            _ => SourceType::Unknown(value),
        }
    }
}

impl From<&str> for SourceType {
    fn from(value: &str) -> Self {
        SourceType::from(value.to_string())
    }
}

impl From<SourceType> for String {
    fn from(value: SourceType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_type_yaml() {
        let parsed: SourceType = serde_yaml::from_str("REGISTRY_VALUE").unwrap();
        assert_eq!(parsed, SourceType::RegistryValue);

        let yaml = serde_yaml::to_string(&SourceType::ArtifactFiles).unwrap();
        assert_eq!(yaml.trim(), "ARTIFACT_FILES");
    }

    #[test]
    fn test_legacy_artifact_alias() {
        assert_eq!(SourceType::from("ARTIFACT"), SourceType::ArtifactGroup);
        assert_eq!(SourceType::from("command"), SourceType::Command);
    }

    #[test]
    fn test_unknown_type_is_preserved() {
        let parsed: SourceType = serde_json::from_str("\"REKALL_PLUGIN\"").unwrap();
        assert_eq!(parsed, SourceType::Unknown("REKALL_PLUGIN".to_string()));
        assert_eq!(parsed.to_string(), "REKALL_PLUGIN");
        assert!(!SourceType::KNOWN.contains(&parsed));
    }

    #[test]
    fn test_aggregate_types() {
        assert!(SourceType::ArtifactGroup.is_aggregate());
        assert!(SourceType::ArtifactFiles.is_aggregate());
        assert!(!SourceType::File.is_aggregate());
    }
}
