use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Missing required setting '{0}'. Set it in sitestack.toml, the .env file, or SITESTACK_{1}")]
    MissingSetting(&'static str, &'static str),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid template: {0}")]
    InvalidTemplate(String),

    #[error("Manifest check failed:\n{}", .0.join("\n"))]
    ManifestViolations(Vec<String>),

    #[error("AWS request failed: {0}")]
    Aws(String),

    #[error("Stack {stack} failed: {reason}")]
    StackFailed { stack: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to parse config file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Failed to build function archive: {0}")]
    Package(String),

    #[error("Failed to write function archive: {0}")]
    Zip(#[from] zip::result::ZipError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// renders an AWS SDK error with its full source chain, which is where
/// the service's own message lives.
pub(crate) fn aws_error<E: std::error::Error>(e: E) -> Error {
    Error::Aws(format!("{}", aws_sdk_cloudformation::error::DisplayErrorContext(&e)))
}
