use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Unsupported install source: {0}")]
    UnsupportedSource(String),

    #[error("Missing source: {0}")]
    MissingSource(String),

    /// An external tool exited unsuccessfully. `output` is its combined stdout and stderr.
    #[error("`{command}` failed: {output}")]
    CommandFailed { command: String, output: String },

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("{0}")]
    Other(String),
}

impl From<String> for ResourceError {
    fn from(s: String) -> Self {
        ResourceError::Other(s)
    }
}

impl From<&str> for ResourceError {
    fn from(s: &str) -> Self {
        ResourceError::Other(s.to_string())
    }
}
