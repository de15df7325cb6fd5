// Re-export all items from the submodules
pub mod artifact_types;
pub mod conditions;
mod collector_config;
pub mod default_definitions;
pub mod definition;
pub mod interpolation;

// Re-export artifact model
pub use artifact_types::SourceType;
pub use definition::{
    artifacts_from_yaml,
    parse_definitions,
    ArtifactDefinition,
    ArtifactSource,
    ParsedDefinitions,
};

// Re-export collector config
pub use collector_config::{
    CollectorConfig,
    load_or_create_config,
};

pub use conditions::Condition;
pub use default_definitions::bundled_definitions;
pub use interpolation::{expand_windows_env, interpolate, interpolate_all};
