//! Error types for mg-core

use thiserror::Error;

/// Core error type for Migrid
#[derive(Error, Debug)]
pub enum CoreError {
    /// E001: Migration directory not found
    #[error("[E001] Migration directory not found: {path}")]
    DirNotFound { path: String },

    /// E002: SQL file name does not match the migration grammar
    #[error("[E002] Unrecognized SQL file name: {file} (expected <ts>.<title>.<prefix>.up|dn.sql, before.sql or after.sql)")]
    BadFileName { file: String },

    /// E003: An up/dn file without its counterpart
    #[error("[E003] {file} has no counterpart: expected {expected}")]
    MissingPair { file: String, expected: String },

    /// E004: Unknown `$` directive in a migration file
    #[error("[E004] Unknown directive {name} in {file}")]
    UnknownDirective { file: String, name: String },

    /// E005: Directive value failed to parse as an integer
    #[error("[E005] Bad value for {name} in {file}: {value}")]
    BadDirectiveValue {
        file: String,
        name: String,
        value: String,
    },

    /// E006: The index-wrap validator rejected a file
    #[error("[E006] {file} failed validation:\n  {}", messages.join("\n  "))]
    InvalidIndexFile { file: String, messages: Vec<String> },

    /// E007: Persisted history diverges from the on-disk entry list
    #[error("[E007] Timeline violation on schema {schema}: cannot apply {proposed} because {applied} is already applied in its place; the version list is append-only")]
    TimelineViolation {
        schema: String,
        proposed: String,
        applied: String,
    },

    /// E008: A persisted version no longer exists on disk
    #[error("[E008] Schema {schema} has {version} applied, but no such file exists on disk")]
    MissingOnDisk { schema: String, version: String },

    /// E009: Two conflicting prefixes match the same schema
    #[error("[E009] Prefix conflict for schema {schema}: both {first} and {second} match")]
    PrefixConflict {
        schema: String,
        first: String,
        second: String,
    },

    /// E010: Undo target is not the latest applied version
    #[error("[E010] Cannot undo {version} on schema {schema}: only the latest applied version ({latest}) may be undone")]
    UndoNotLatest {
        schema: String,
        version: String,
        latest: String,
    },

    /// E011: IO error
    #[error("[E011] IO error: {0}")]
    Io(#[from] std::io::Error),

    /// E012: IO error with file path context
    #[error("[E012] Failed to read '{path}': {source}")]
    IoWithPath {
        path: String,
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for CoreError
pub type CoreResult<T> = Result<T, CoreError>;
