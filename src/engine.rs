//! Image Engine Interfaces
//!
//! Traits describing the container engine and local image access that the
//! relabel workflow drives. `crate::docker` provides the Docker-backed
//! implementation.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;

/// Image details reported by the engine
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageInspection {
    /// Content identifier (`sha256:...`)
    pub id: String,

    /// Repository tags currently pointing at the image
    pub repo_tags: Vec<String>,

    /// Labels stored in the image config
    pub labels: HashMap<String, String>,
}

/// Container engine operations
#[async_trait]
pub trait ImageEngine: Send + Sync {
    /// Inspect an image by reference or identifier
    ///
    /// # Errors
    /// Returns `ImageNotFound` if the engine has no such image
    async fn inspect_image(&self, reference: &str) -> Result<ImageInspection>;

    /// Remove an image without forcing and without pruning its parents
    ///
    /// # Errors
    /// Returns `ImageInUse` if the engine refuses because the image is still referenced
    async fn remove_image(&self, id: &str) -> Result<()>;
}

/// Opens local images for label editing
#[async_trait]
pub trait ImageStore: Send + Sync {
    type Image: LocalImage;

    /// Open the image named by `reference`, using it as the base image
    async fn open(&self, reference: &str) -> Result<Self::Image>;
}

/// A local image whose labels are edited in memory and committed by `save`
#[async_trait]
pub trait LocalImage: Send {
    /// Current content identifier
    fn identifier(&self) -> Result<String>;

    /// Current value of a label, or an empty string when it is not set
    fn label(&self, key: &str) -> Result<String>;

    /// Set a label value
    fn set_label(&mut self, key: &str, value: &str) -> Result<()>;

    /// Remove a label
    fn remove_label(&mut self, key: &str) -> Result<()>;

    /// Persist the edited image
    async fn save(&mut self) -> Result<()>;
}
