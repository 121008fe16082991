use std::path::PathBuf;

/// Errors from reading or writing the policy store.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read policy file {1}: {0}")]
    Read(std::io::Error, PathBuf),

    #[error("Failed to write policy file {1}: {0}")]
    Write(std::io::Error, PathBuf),
}

/// A volume could not be inspected.
#[derive(Debug, thiserror::Error)]
pub enum VolumeError {
    #[error("Volume not found: {0}")]
    NotFound(String),

    #[error("Volume not ready: {0}: {1}")]
    NotReady(String, std::io::Error),
}
