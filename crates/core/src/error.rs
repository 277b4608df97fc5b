//! Error types for the YADS core library.

use thiserror::Error;

/// Core error type for YADS operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Project name failed validation.
    #[error("Invalid project name '{0}': use letters, digits and hyphens, starting and ending with a letter or digit")]
    InvalidProjectName(String),

    /// Domain failed validation.
    #[error("Invalid domain '{0}'")]
    InvalidDomain(String),

    /// Database name failed validation.
    #[error("Invalid database name '{0}'")]
    InvalidDatabaseName(String),

    /// Project directory does not exist.
    #[error("Project '{0}' not found")]
    ProjectNotFound(String),

    /// Project directory (enabled or disabled) already exists.
    #[error("Project '{0}' already exists")]
    ProjectExists(String),

    /// Compose service was not found.
    #[error("Service '{0}' not found")]
    ServiceNotFound(String),

    /// An external command exited unsuccessfully.
    #[error("Command `{command}` failed with exit code {code:?}{}", stderr_suffix(.stderr))]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    /// A required external tool is not installed.
    #[error("Required tool '{0}' not found in PATH")]
    MissingTool(String),

    /// The host operating system is not supported.
    #[error("Unsupported operating system: {0}")]
    UnsupportedOs(String),

    /// Settings file contained an unparseable line.
    #[error("Invalid config line {line}: {content}")]
    ConfigParse { line: usize, content: String },

    /// Settings value is not one of the accepted values.
    #[error("Invalid value '{value}' for {key}")]
    InvalidSetting { key: String, value: String },

    /// Health check failed for a container or endpoint.
    #[error("Health check failed: {0}")]
    HealthCheckFailed(String),

    /// Git operation failed.
    #[error("Git operation failed: {0}")]
    GitError(#[from] git2::Error),

    /// IO operation failed.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// YAML serialization failed.
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Generic error with message.
    #[error("{0}")]
    Other(String),
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {}", trimmed)
    }
}

/// Result type alias using the core Error type.
pub type Result<T> = std::result::Result<T, Error>;
