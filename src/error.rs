use thiserror::Error;

#[derive(Error, Debug)]
pub enum AssetError {
    #[error("Grammar error: {0}")]
    Grammar(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Conservation violation: {0}")]
    Conservation(String),

    #[error("Asset directory unavailable: {0}")]
    DirectoryUnavailable(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("State error: {0}")]
    State(String),
}

pub type Result<T> = std::result::Result<T, AssetError>;

impl From<serde_json::Error> for AssetError {
    fn from(err: serde_json::Error) -> Self {
        AssetError::Config(err.to_string())
    }
}

impl From<std::io::Error> for AssetError {
    fn from(err: std::io::Error) -> Self {
        AssetError::Config(err.to_string())
    }
}
