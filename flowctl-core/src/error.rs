//! Error kinds shared by the loader, the config catalog, and (via re-export) the
//! engine crates. Variants mirror the error-kind taxonomy from `spec.md` §7
//! (`schema-invalid`, `unknown-ref`, ...) rather than inventing a parallel one.

use thiserror::Error;

/// Result type for `flowctl-core` operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors produced while loading, validating, or interpolating a workflow.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("schema invalid: {0}")]
    SchemaInvalid(String),

    #[error("unknown reference '{{{{ {name} }}}}' in step '{step}'")]
    UnknownRef { step: String, name: String },

    #[error("cyclic graph detected through step '{0}'")]
    CyclicGraph(String),

    #[error("config not found: {0}")]
    ConfigNotFound(String),

    #[error("interpolation failed: {0}")]
    InterpolationFailed(String),

    #[error("duplicate step name: {0}")]
    DuplicateStep(String),

    #[error(
        "step '{0}' has no mode payload (exactly one of run/template/embeddings/consensus/rag/loop is required)"
    )]
    MissingMode(String),

    #[error("step '{0}' declares more than one mode payload")]
    AmbiguousMode(String),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    pub fn schema_invalid(msg: impl Into<String>) -> Self {
        Self::SchemaInvalid(msg.into())
    }

    /// Stable short code used by the CLI to pick an exit code (`spec.md` §6).
    pub fn code(&self) -> &'static str {
        match self {
            Self::SchemaInvalid(_)
            | Self::DuplicateStep(_)
            | Self::MissingMode(_)
            | Self::AmbiguousMode(_)
            | Self::Yaml(_)
            | Self::Json(_) => "schema-invalid",
            Self::UnknownRef { .. } => "unknown-ref",
            Self::CyclicGraph(_) => "cyclic-graph",
            Self::ConfigNotFound(_) => "config-not-found",
            Self::InterpolationFailed(_) => "interpolation-failed",
            Self::Io(_) => "schema-invalid",
        }
    }
}
