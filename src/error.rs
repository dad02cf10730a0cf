//! Error Handling
//!
//! Error type definitions used in docker-image-labeler

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Error types for docker-image-labeler
#[derive(Error, Debug)]
pub enum Error {
    #[error("No labels specified")]
    NoLabelsSpecified,

    #[error("Invalid label specified: {0:?}")]
    InvalidLabel(String),

    #[error("Configuration validation error: {0}")]
    ConfigValidation(String),

    #[error("Failed to open image {reference}: {source}")]
    ImageResolution {
        reference: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Failed to fetch image id: {0}")]
    Identifier(#[source] Box<Error>),

    #[error("Failed to inspect the source image {reference}: {source}")]
    Inspection {
        reference: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Failed to decode recorded image tags: {0}")]
    TagDecode(#[source] serde_json::Error),

    #[error("Label operation failed for {key}: {source}")]
    LabelAccess {
        key: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Failed to save image: {0}")]
    Save(#[source] Box<Error>),

    #[error("New and old image have the same identifier: {0}")]
    SaveConsistency(String),

    #[error("Failed to delete old image {id}: {source}")]
    Deletion {
        id: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Docker API error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("Image not found: {0}")]
    ImageNotFound(String),

    #[error("Image is in use: {0}")]
    ImageInUse(String),

    #[error("Invalid image archive: {0}")]
    Archive(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a new configuration validation error
    pub fn config_validation<S: Into<String>>(message: S) -> Self {
        Error::ConfigValidation(message.into())
    }

    /// Create a new image archive error
    pub fn archive<S: Into<String>>(message: S) -> Self {
        Error::Archive(message.into())
    }

    /// Whether the engine refused the request because the image is still referenced
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::ImageInUse(_))
    }
}
