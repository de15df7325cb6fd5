use std::collections::{BTreeMap, BTreeSet};

use log::warn;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::config::artifact_types::SourceType;
use crate::error::{ArtifactError, Result};

/// One collection method inside an artifact.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ArtifactSource {
    #[serde(rename = "type")]
    pub source_type: SourceType,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supported_os: Vec<String>,
    /// Set when the source entry itself could not be read. The source is
    /// kept so it is reported as invalid when collected.
    #[serde(skip)]
    pub invalid: Option<String>,
}

impl ArtifactSource {
    pub fn new(source_type: SourceType) -> Self {
        Self {
            source_type,
            attributes: BTreeMap::new(),
            conditions: Vec::new(),
            supported_os: Vec::new(),
            invalid: None,
        }
    }

    /// Read one source entry. A malformed entry becomes an invalid source
    /// instead of failing the whole definition.
    fn from_value(value: serde_yaml::Value) -> Self {
        match serde_yaml::from_value::<ArtifactSource>(value.clone()) {
            Ok(source) => source,
            Err(e) => {
                let source_type = value
                    .get("type")
                    .and_then(serde_yaml::Value::as_str)
                    .map(SourceType::from)
                    .unwrap_or_else(|| SourceType::Unknown("UNSPECIFIED".to_string()));
                let mut source = ArtifactSource::new(source_type);
                source.invalid = Some(e.to_string());
                source
            }
        }
    }

    pub fn with_attribute(mut self, key: &str, value: Value) -> Self {
        self.attributes.insert(key.to_string(), value);
        self
    }

    /// A required string attribute.
    pub fn required_str(&self, key: &str) -> std::result::Result<&str, String> {
        match self.attributes.get(key) {
            None => Err(format!("missing required attribute `{}`", key)),
            Some(Value::String(s)) if !s.trim().is_empty() => Ok(s),
            Some(_) => Err(format!("attribute `{}` must be a non-empty string", key)),
        }
    }

    /// A required, non-empty list of strings.
    pub fn required_list(&self, key: &str) -> std::result::Result<Vec<String>, String> {
        if !self.attributes.contains_key(key) {
            return Err(format!("missing required attribute `{}`", key));
        }
        let list = self.optional_list(key)?;
        if list.is_empty() {
            return Err(format!("attribute `{}` must not be empty", key));
        }
        Ok(list)
    }

    /// An optional list of strings; absent means empty.
    pub fn optional_list(&self, key: &str) -> std::result::Result<Vec<String>, String> {
        match self.attributes.get(key) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.clone()),
                    Value::Number(n) => Ok(n.to_string()),
                    _ => Err(format!("attribute `{}` must be a list of strings", key)),
                })
                .collect(),
            Some(_) => Err(format!("attribute `{}` must be a list of strings", key)),
        }
    }
}

/// Immutable description of one artifact.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ArtifactDefinition {
    pub name: String,
    #[serde(default)]
    pub doc: String,
    #[serde(default, deserialize_with = "deserialize_sources")]
    pub sources: Vec<ArtifactSource>,
    #[serde(default)]
    pub labels: BTreeSet<String>,
    #[serde(default)]
    pub supported_os: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<String>,
}

impl ArtifactDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            doc: String::new(),
            sources: Vec::new(),
            labels: BTreeSet::new(),
            supported_os: BTreeSet::new(),
            conditions: Vec::new(),
            urls: Vec::new(),
        }
    }

    pub fn with_source(mut self, source: ArtifactSource) -> Self {
        self.sources.push(source);
        self
    }

    pub fn with_supported_os(mut self, os: &str) -> Self {
        self.supported_os.insert(os.to_string());
        self
    }

    /// Structural checks that make the definition unusable as a whole.
    /// Source attributes are checked when the source is collected.
    fn validate(&self) -> std::result::Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("artifact name must not be empty".to_string());
        }
        if self.name.chars().any(char::is_whitespace) {
            return Err(format!("artifact name '{}' contains whitespace", self.name));
        }
        Ok(())
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| ArtifactError::parse(&self.name, e))
    }
}

fn deserialize_sources<'de, D>(deserializer: D) -> std::result::Result<Vec<ArtifactSource>, D::Error>
where
    D: Deserializer<'de>,
{
    let entries = Option::<Vec<serde_yaml::Value>>::deserialize(deserializer)?;
    Ok(entries
        .unwrap_or_default()
        .into_iter()
        .map(ArtifactSource::from_value)
        .collect())
}

/// Outcome of a lenient parse: definitions that loaded plus one error per
/// rejected document or list entry.
#[derive(Debug, Default)]
pub struct ParsedDefinitions {
    pub definitions: Vec<ArtifactDefinition>,
    pub errors: Vec<ArtifactError>,
}

/// Parse one or more definitions, skipping malformed ones.
///
/// The text may hold several `---` separated documents, each either a
/// single definition or a list of definitions. JSON is accepted as well.
/// Only a YAML syntax error fails the whole text.
pub fn parse_definitions(text: &str, context: &str) -> Result<ParsedDefinitions> {
    let mut parsed = ParsedDefinitions::default();

    for (doc_index, document) in serde_yaml::Deserializer::from_str(text).enumerate() {
        let value = serde_yaml::Value::deserialize(document)
            .map_err(|e| ArtifactError::parse(context, e))?;

        let entries = match value {
            serde_yaml::Value::Null => continue,
            serde_yaml::Value::Sequence(items) => items,
            mapping @ serde_yaml::Value::Mapping(_) => vec![mapping],
            _ => {
                parsed.errors.push(ArtifactError::parse(
                    format!("{} document {}", context, doc_index),
                    "expected a definition or a list of definitions",
                ));
                continue;
            }
        };

        for (entry_index, entry) in entries.into_iter().enumerate() {
            let entry_context = format!("{} document {} entry {}", context, doc_index, entry_index);
            match serde_yaml::from_value::<ArtifactDefinition>(entry) {
                Ok(definition) => match definition.validate() {
                    Ok(()) => {
                        for (index, source) in definition.sources.iter().enumerate() {
                            if let Some(reason) = &source.invalid {
                                warn!("{}: source #{} of {} is malformed: {}", entry_context, index, definition.name, reason);
                            }
                        }
                        parsed.definitions.push(definition)
                    }
                    Err(reason) => parsed.errors.push(ArtifactError::parse(entry_context, reason)),
                },
                Err(e) => parsed.errors.push(ArtifactError::parse(entry_context, e)),
            }
        }
    }

    for error in &parsed.errors {
        warn!("Skipping artifact definition: {}", error);
    }

    Ok(parsed)
}

/// Strict parse: any malformed definition fails the call.
pub fn artifacts_from_yaml(text: &str) -> Result<Vec<ArtifactDefinition>> {
    let mut parsed = parse_definitions(text, "inline")?;
    if !parsed.errors.is_empty() {
        return Err(parsed.errors.remove(0));
    }
    Ok(parsed.definitions)
}
