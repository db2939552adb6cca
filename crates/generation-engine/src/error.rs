//! Error types for the generation engine
//!
//! Every failure of an execution cycle surfaces as one `EngineError`. The
//! variants follow the cycle's phases: compilation, upload, preprocessing and
//! the main generation call.

use thiserror::Error;

use crate::types::NodeId;

/// Result type alias using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised while turning a graph into a request.
///
/// These never have a network effect and are safe to retry once the graph
/// has been corrected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompilationError {
    /// The target node is not part of the graph
    #[error("Node '{0}' not found in graph")]
    UnknownNode(NodeId),

    /// The selected flow needs a base image and none of the ancestors has one
    #[error("The {flow} flow requires an uploaded base image")]
    MissingBaseImage { flow: String },

    /// A rescene transform is missing one of its tagged inputs
    #[error("Rescene requires an image tagged {tag}")]
    MissingTaggedImage { tag: String },

    /// Inpainting without an uploaded mask
    #[error("Inpainting requires an uploaded mask")]
    MissingMask,

    /// A multi-image transform found no usable images
    #[error("The {subtype} transform requires at least one uploaded image")]
    MissingImages { subtype: String },

    /// The node's subtype is not something the compiler can build a request for
    #[error("Unsupported subtype '{subtype}' on node '{node_id}'")]
    UnsupportedSubtype { node_id: NodeId, subtype: String },
}

/// Failure reported by a `GenerationService` implementation.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    /// The request never produced a response
    #[error("Transport error: {0}")]
    Transport(String),

    /// The service answered with a non-success status
    #[error("Service returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The response could not be understood
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The service reported an error in its payload
    #[error("{0}")]
    Remote(String),
}

/// Errors raised by the generation store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Generation '{0}' not found")]
    NotFound(String),

    #[error("Generation '{id}' cannot move from {from} to {to}")]
    InvalidTransition { id: String, from: String, to: String },
}

/// Errors that can occur while executing a generation
#[derive(Debug, Error)]
pub enum EngineError {
    /// The graph could not be compiled into a request
    #[error("Compilation error: {0}")]
    Compilation(#[from] CompilationError),

    /// An image held locally could not be uploaded
    #[error("Upload failed for node '{node_id}': {source}")]
    Upload {
        node_id: NodeId,
        #[source]
        source: ServiceError,
    },

    /// A control-net preprocessing call failed
    #[error("Preprocessing failed for node '{node_id}': {source}")]
    Preprocessing {
        node_id: NodeId,
        #[source]
        source: ServiceError,
    },

    /// The main generation call failed or returned an error payload
    #[error("Generation failed: {0}")]
    Generation(String),

    /// Another execution for the same output node is still running
    #[error("A generation for output node '{output_node_id}' is already running")]
    AlreadyRunning { output_node_id: NodeId },

    /// Record bookkeeping failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Coarse classification of an `EngineError` for user-facing reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Compilation,
    Upload,
    Preprocessing,
    Generation,
    Conflict,
    Internal,
}

impl EngineError {
    /// Which phase of the cycle produced this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Compilation(_) => ErrorKind::Compilation,
            Self::Upload { .. } => ErrorKind::Upload,
            Self::Preprocessing { .. } => ErrorKind::Preprocessing,
            Self::Generation(_) => ErrorKind::Generation,
            Self::AlreadyRunning { .. } => ErrorKind::Conflict,
            Self::Store(_) | Self::Serialization(_) => ErrorKind::Internal,
        }
    }
}

impl From<ServiceError> for EngineError {
    fn from(err: ServiceError) -> Self {
        Self::Generation(err.to_string())
    }
}
