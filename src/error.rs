//! Error taxonomy for artifact registration and collection.
//!
//! Only [`ArtifactError::Cyclic`] and [`ArtifactError::CollaboratorUnavailable`]
//! stop a flow. Everything else is recorded against the artifact, source or
//! request it belongs to and collection carries on.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArtifactError {
    #[error("failed to parse artifact definition ({context}): {message}")]
    DefinitionParse { context: String, message: String },

    #[error("artifact {0} is not registered")]
    NotRegistered(String),

    #[error("invalid source #{index} ({source_type}) in artifact {artifact}: {reason}")]
    InvalidSource {
        artifact: String,
        index: usize,
        source_type: String,
        reason: String,
    },

    #[error("cyclic artifact dependency: {}", chain.join(" -> "))]
    Cyclic { chain: Vec<String> },

    #[error("remote operation {request_id} for artifact {artifact} failed: {reason}")]
    RemoteOperation {
        artifact: String,
        request_id: u64,
        reason: String,
    },

    #[error("{collaborator} unavailable: {reason}")]
    CollaboratorUnavailable { collaborator: String, reason: String },
}

pub type Result<T> = std::result::Result<T, ArtifactError>;

impl ArtifactError {
    pub fn parse(context: impl Into<String>, message: impl ToString) -> Self {
        Self::DefinitionParse {
            context: context.into(),
            message: message.to_string(),
        }
    }

    pub fn unavailable(collaborator: impl Into<String>, reason: impl ToString) -> Self {
        Self::CollaboratorUnavailable {
            collaborator: collaborator.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error terminates the whole flow in `ERROR`.
    pub fn is_flow_fatal(&self) -> bool {
        matches!(
            self,
            ArtifactError::Cyclic { .. } | ArtifactError::CollaboratorUnavailable { .. }
        )
    }
}
