//! Global constants for the artifact collector.

// Flow limits
/// Maximum nesting of ARTIFACT_GROUP / ARTIFACT_FILES references
pub const DEFAULT_MAX_GROUP_DEPTH: usize = 10;

/// Default timeout for a single remote operation (10 minutes)
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 600;

/// Upper bound for concurrently running remote operations
pub const MAX_CONCURRENT_OPERATIONS_CAP: usize = 32;

/// Concurrent file copies inside one local bulk transfer
pub const BULK_TRANSFER_CONCURRENCY: usize = 8;

// Output
/// Default output path template
pub const DEFAULT_OUTPUT_TEMPLATE: &str = "analysis/{c}/{u}-{t}";

/// Timestamp format substituted for `{t}`
pub const OUTPUT_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%SZ";

/// Artifact placeholder value for merged (non-split) output
pub const MERGED_OUTPUT_NAME: &str = "all";

/// Extension of JSON lines output files
pub const OUTPUT_FILE_EXTENSION: &str = "jsonl";

/// File name of the flow summary
pub const FLOW_SUMMARY_FILE: &str = "flow_summary.json";

// Local collaborators
/// Largest file the local GREP operation will scan (64MB)
pub const MAX_GREP_FILE_SIZE: u64 = 64 * 1024 * 1024;

/// Maximum matches reported per file by GREP
pub const MAX_GREP_MATCHES_PER_FILE: usize = 1000;

/// Buffer size for hashing retrieved files (1MB)
pub const HASH_BUFFER_SIZE: usize = 1024 * 1024;

// Collaborator names used in error reports
pub const DEFINITION_STORE: &str = "definition store";
pub const BULK_TRANSFER: &str = "bulk transfer";
pub const OUTPUT_AGGREGATOR: &str = "output aggregator";

/// File extensions treated as definition files when loading a directory
pub const DEFINITION_FILE_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Extensions recognised by path detection in collected data
pub const EXECUTABLE_EXTENSIONS: &[&str] = &[
    "exe", "dll", "sys", "com", "bat", "cmd", "ps1", "vbs", "js", "scr", "cpl", "ocx", "msi",
];
