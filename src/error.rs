use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MutationError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Git command failed: {0}")]
    Git(String),

    #[error("Malformed diff: {0}")]
    Diff(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Unknown operator: {0}")]
    UnknownOperator(String),

    #[error("Failed to parse {}: {}", .path.display(), .reason)]
    Parse { path: PathBuf, reason: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("Walkdir error: {0}")]
    Walkdir(#[from] walkdir::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, MutationError>;
