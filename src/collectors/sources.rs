//! Built-in collectors, one per source type.

use regex::Regex;
use serde_json::{json, Value};

use crate::collectors::{CollectContext, Dispatch, ResultRoute, SourceCollector};
use crate::config::artifact_types::SourceType;
use crate::config::definition::ArtifactSource;
use crate::config::interpolation::{interpolate, interpolate_all};
use crate::transport::RemoteOperation;

type CollectResult = Result<Vec<Dispatch>, String>;

pub fn builtin_collectors() -> Vec<Box<dyn SourceCollector>> {
    vec![
        Box::new(CommandCollector),
        Box::new(FileCollector),
        Box::new(DirectoryCollector),
        Box::new(PathCollector),
        Box::new(GrepCollector),
        Box::new(RegistryKeyCollector),
        Box::new(RegistryValueCollector),
        Box::new(WmiCollector),
        Box::new(ProcessListCollector),
        Box::new(ArtifactGroupCollector),
        Box::new(ArtifactFilesCollector),
    ]
}

fn is_glob(path: &str) -> bool {
    path.contains(['*', '?', '['])
}

fn remote(operation: RemoteOperation) -> Dispatch {
    Dispatch::Remote {
        operation,
        route: ResultRoute::Collect,
    }
}

pub struct CommandCollector;

impl SourceCollector for CommandCollector {
    fn source_type(&self) -> SourceType {
        SourceType::Command
    }

    fn collect(&self, source: &ArtifactSource, ctx: &CollectContext<'_>) -> CollectResult {
        let cmd = source.required_str("cmd")?;
        let args = source.optional_list("args")?;

        // One command per expansion of the executable path; args are passed as-is.
        Ok(interpolate(cmd, ctx.kb)
            .into_iter()
            .map(|cmd| remote(RemoteOperation::ExecuteCommand { cmd, args: args.clone() }))
            .collect())
    }
}

/// Literal paths are fetched directly, wildcard paths are globbed on the
/// client first.
pub struct FileCollector;

impl SourceCollector for FileCollector {
    fn source_type(&self) -> SourceType {
        SourceType::File
    }

    fn collect(&self, source: &ArtifactSource, ctx: &CollectContext<'_>) -> CollectResult {
        let paths = source.required_list("paths")?;

        Ok(interpolate_all(&paths, ctx.kb)
            .into_iter()
            .map(|path| {
                if is_glob(&path) {
                    Dispatch::Remote {
                        operation: RemoteOperation::Glob { pattern: path },
                        route: ResultRoute::Retrieve,
                    }
                } else {
                    Dispatch::Retrieve(path)
                }
            })
            .collect())
    }
}

pub struct DirectoryCollector;

impl SourceCollector for DirectoryCollector {
    fn source_type(&self) -> SourceType {
        SourceType::Directory
    }

    fn collect(&self, source: &ArtifactSource, ctx: &CollectContext<'_>) -> CollectResult {
        let paths = source.required_list("paths")?;
        Ok(interpolate_all(&paths, ctx.kb)
            .into_iter()
            .map(|path| remote(RemoteOperation::ListDirectory { path }))
            .collect())
    }
}

/// Reports the interpolated paths themselves, nothing is fetched.
pub struct PathCollector;

impl SourceCollector for PathCollector {
    fn source_type(&self) -> SourceType {
        SourceType::Path
    }

    fn collect(&self, source: &ArtifactSource, ctx: &CollectContext<'_>) -> CollectResult {
        let paths = source.required_list("paths")?;
        Ok(interpolate_all(&paths, ctx.kb)
            .into_iter()
            .map(|path| Dispatch::Immediate(json!({ "path": path })))
            .collect())
    }
}

pub struct GrepCollector;

impl SourceCollector for GrepCollector {
    fn source_type(&self) -> SourceType {
        SourceType::Grep
    }

    fn collect(&self, source: &ArtifactSource, ctx: &CollectContext<'_>) -> CollectResult {
        let paths = source.required_list("paths")?;
        let patterns = source.required_list("content_regex_list")?;

        for pattern in &patterns {
            Regex::new(pattern).map_err(|e| format!("invalid content regex '{}': {}", pattern, e))?;
        }

        let paths = interpolate_all(&paths, ctx.kb);
        if paths.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![remote(RemoteOperation::Grep { paths, patterns })])
    }
}

pub struct RegistryKeyCollector;

impl SourceCollector for RegistryKeyCollector {
    fn source_type(&self) -> SourceType {
        SourceType::RegistryKey
    }

    fn collect(&self, source: &ArtifactSource, ctx: &CollectContext<'_>) -> CollectResult {
        let keys = source.required_list("keys")?;
        Ok(interpolate_all(&keys, ctx.kb)
            .into_iter()
            .map(|key| remote(RemoteOperation::ReadRegistryKey { key }))
            .collect())
    }
}

pub struct RegistryValueCollector;

impl RegistryValueCollector {
    fn pairs(source: &ArtifactSource) -> Result<Vec<(String, String)>, String> {
        let invalid = || "attribute `key_value_pairs` must be a list of {key, value} mappings".to_string();

        let items = match source.attributes.get("key_value_pairs") {
            None => return Err("missing required attribute `key_value_pairs`".to_string()),
            Some(Value::Array(items)) if !items.is_empty() => items,
            Some(Value::Array(_)) => return Err("attribute `key_value_pairs` must not be empty".to_string()),
            Some(_) => return Err(invalid()),
        };

        items
            .iter()
            .map(|item| {
                let key = item.get("key").and_then(Value::as_str).ok_or_else(invalid)?;
                let value = item.get("value").and_then(Value::as_str).unwrap_or("");
                Ok((key.to_string(), value.to_string()))
            })
            .collect()
    }
}

impl SourceCollector for RegistryValueCollector {
    fn source_type(&self) -> SourceType {
        SourceType::RegistryValue
    }

    fn collect(&self, source: &ArtifactSource, ctx: &CollectContext<'_>) -> CollectResult {
        let mut dispatches = Vec::new();
        for (key, value) in Self::pairs(source)? {
            for key in interpolate(&key, ctx.kb) {
                dispatches.push(remote(RemoteOperation::ReadRegistryValue {
                    key,
                    value: value.clone(),
                }));
            }
        }
        Ok(dispatches)
    }
}

pub struct WmiCollector;

impl SourceCollector for WmiCollector {
    fn source_type(&self) -> SourceType {
        SourceType::Wmi
    }

    fn collect(&self, source: &ArtifactSource, ctx: &CollectContext<'_>) -> CollectResult {
        let query = source.required_str("query")?;
        Ok(interpolate(query, ctx.kb)
            .into_iter()
            .map(|query| remote(RemoteOperation::WmiQuery { query }))
            .collect())
    }
}

pub struct ProcessListCollector;

impl SourceCollector for ProcessListCollector {
    fn source_type(&self) -> SourceType {
        SourceType::ListProcesses
    }

    fn collect(&self, _source: &ArtifactSource, _ctx: &CollectContext<'_>) -> CollectResult {
        Ok(vec![remote(RemoteOperation::ListProcesses)])
    }
}

/// Collects other artifacts as part of this one.
pub struct ArtifactGroupCollector;

impl SourceCollector for ArtifactGroupCollector {
    fn source_type(&self) -> SourceType {
        SourceType::ArtifactGroup
    }

    fn collect(&self, source: &ArtifactSource, _ctx: &CollectContext<'_>) -> CollectResult {
        Ok(vec![Dispatch::Expand {
            names: source.required_list("names")?,
            route: ResultRoute::Collect,
        }])
    }
}

/// Collects the files referenced by other artifacts' results.
pub struct ArtifactFilesCollector;

impl SourceCollector for ArtifactFilesCollector {
    fn source_type(&self) -> SourceType {
        SourceType::ArtifactFiles
    }

    fn collect(&self, source: &ArtifactSource, _ctx: &CollectContext<'_>) -> CollectResult {
        Ok(vec![Dispatch::Expand {
            names: source.required_list("artifact_list")?,
            route: ResultRoute::DetectPaths,
        }])
    }
}
