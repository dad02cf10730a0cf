//! Configuration Management
//!
//! Relabel run settings and their validation

use clap::ValueEnum;

use crate::error::{Error, Result};
use crate::labels::{ALTERNATE_TAGS_LABEL, ORIGINAL_TAGS_LABEL};

/// Which label records the tags an image has carried
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum TagsLabel {
    /// `com.dokku.docker-image-labeler/alternate-tags`
    #[default]
    Alternate,

    /// `com.dokku.docker-image-labeler/original-tags` (legacy key)
    Original,
}

impl TagsLabel {
    /// Label key for this variant
    pub fn key(self) -> &'static str {
        match self {
            TagsLabel::Alternate => ALTERNATE_TAGS_LABEL,
            TagsLabel::Original => ORIGINAL_TAGS_LABEL,
        }
    }
}

/// Relabel Configuration
///
/// docker-image-labeler execution configuration
#[derive(Debug, Clone, Default)]
pub struct RelabelConfig {
    /// Image reference (repository[:tag] or image id)
    pub image: String,

    /// Labels to add or update, as `key=value`
    pub add_labels: Vec<String>,

    /// Label keys to remove
    pub remove_labels: Vec<String>,

    /// Label used to record the image's tag history
    pub tags_label: TagsLabel,

    /// Dry-run mode (don't save or delete anything)
    pub dry_run: bool,
}

impl RelabelConfig {
    /// Create a configuration for the given image with no label changes
    pub fn new<S: Into<String>>(image: S) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }

    /// Add a `key=value` label to set
    pub fn with_label<S: Into<String>>(mut self, label: S) -> Self {
        self.add_labels.push(label.into());
        self
    }

    /// Add a label key to remove
    pub fn without_label<S: Into<String>>(mut self, key: S) -> Self {
        self.remove_labels.push(key.into());
        self
    }

    /// Validate configuration
    ///
    /// # Errors
    /// - If the image reference is empty
    /// - If neither additions nor removals were requested
    pub fn validate(&self) -> Result<()> {
        if self.image.trim().is_empty() {
            return Err(Error::config_validation("No image specified"));
        }

        if self.add_labels.is_empty() && self.remove_labels.is_empty() {
            return Err(Error::NoLabelsSpecified);
        }

        Ok(())
    }
}
