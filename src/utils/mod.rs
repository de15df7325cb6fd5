//! Helpers shared by the local collaborators and the CLI.
//!
//! - **Hashing**: SHA-256 of retrieved files
//! - **Paths**: mapping client paths and output templates onto a local
//!   directory without escaping it
//! - **Summary**: JSON summary of a finished flow

/// Cryptographic hash calculation utilities
pub mod hash;

/// Traversal-safe path helpers
pub mod paths;

/// Flow summary generation
pub mod summary;
