use thiserror::Error;

/// Error types for the stencil crate.
///
/// Variants group into four families: schema misuse (`Schema`), method
/// resolution (`MissingMethod`, `InvalidMethod`), field selection
/// (`UnknownFields`, `NoData`, `NotMany`), and identifier validation for
/// dynamically built schemas (`InvalidIdentifier`, `ReservedWord`).
/// `Attribute` is the raw attribute-lookup failure surfaced unwrapped when
/// a strict accessor misses; `Json` passes the encoder's own error through.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Missing '{0}' method in the schema namespace")]
    MissingMethod(String),

    #[error("'{0}' is not a valid getter method")]
    InvalidMethod(String),

    #[error("One or more unknown fields are being passed: {0}")]
    UnknownFields(String),

    #[error("No data was supplied for serialization")]
    NoData,

    #[error("Many-mode serialization expects a list, got {0}")]
    NotMany(String),

    #[error("Field names must be valid identifiers: '{0}'")]
    InvalidIdentifier(String),

    #[error("Field names must not be reserved words: '{0}'")]
    ReservedWord(String),

    #[error("'{type_name}' has no attribute '{attribute}'")]
    Attribute {
        type_name: String,
        attribute: String,
    },

    #[error("JSON encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for stencil operations.
pub type Result<T> = std::result::Result<T, SchemaError>;
