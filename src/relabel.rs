//! Image Relabeling
//!
//! Applies label additions and removals to a local image, records the tags
//! it carried, persists the result and cleans up the superseded image

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::config::RelabelConfig;
use crate::engine::{ImageEngine, ImageStore, LocalImage};
use crate::error::{Error, Result};
use crate::labels::{merge_tags, parse_labels};

/// A label change applied to the image
#[derive(Debug, Clone, PartialEq)]
pub enum LabelOperation {
    /// Set a label (previous value is empty when it was unset)
    Set {
        key: String,
        value: String,
        previous: String,
    },

    /// Remove a label
    Remove { key: String, previous: String },
}

/// What happened to the image that was relabeled
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Cleanup {
    /// Nothing was saved, so there was nothing to clean up
    #[default]
    NotAttempted,

    /// Other tags still point at the original image
    Retained { repo_tags: Vec<String> },

    /// The original image was removed
    Deleted,

    /// The engine refused to remove the original image
    InUse { message: String },
}

/// Relabel result
#[derive(Debug, Clone)]
pub struct RelabelResult {
    /// Image reference that was relabeled
    pub image: String,

    /// Identifier before any change
    pub original_id: String,

    /// Identifier of the saved image
    pub new_id: Option<String>,

    /// Label changes, removals first
    pub operations: Vec<LabelOperation>,

    /// Whether this is a dry run
    pub dry_run: bool,

    /// Fate of the original image
    pub cleanup: Cleanup,
}

impl RelabelResult {
    /// Create a new empty relabel result
    pub fn new(image: String, original_id: String, dry_run: bool) -> Self {
        Self {
            image,
            original_id,
            new_id: None,
            operations: Vec::new(),
            dry_run,
            cleanup: Cleanup::NotAttempted,
        }
    }

    /// Whether any label changed
    pub fn has_changes(&self) -> bool {
        !self.operations.is_empty()
    }

    /// Warning to surface to the user, if the run succeeded with one
    pub fn warning(&self) -> Option<String> {
        match &self.cleanup {
            Cleanup::InUse { message } => Some(format!(
                "Failed to delete old image {}: {}",
                self.original_id, message
            )),
            _ => None,
        }
    }
}

/// Whether the original image may be removed after relabeling
///
/// Only an untagged image, or one whose single tag is the reference that was
/// relabeled, becomes dangling once the new image takes over that tag.
pub fn eligible_for_deletion(repo_tags: &[String], reference: &str) -> bool {
    match repo_tags {
        [] => true,
        [tag] => tag == reference,
        _ => false,
    }
}

/// Label Relabeling Engine
///
/// Reconciles an image's labels with the requested changes
pub struct Relabeler<E, S> {
    engine: E,
    store: S,
    config: RelabelConfig,
}

impl<E: ImageEngine, S: ImageStore> Relabeler<E, S> {
    /// Create a new relabeling engine
    ///
    /// # Arguments
    /// - `engine`: Container engine used to inspect and remove images
    /// - `store`: Local image access used to edit and save labels
    /// - `config`: Relabel configuration
    ///
    /// # Errors
    /// Returns an error if configuration validation fails
    pub fn new(engine: E, store: S, config: RelabelConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            engine,
            store,
            config,
        })
    }

    /// Relabel the configured image
    ///
    /// # Returns
    /// The applied label operations and what happened to the original image
    ///
    /// # Errors
    /// Returns an error if any engine or image operation fails, except when
    /// the original image is still in use and cannot be removed
    pub async fn relabel(&self) -> Result<RelabelResult> {
        let reference = self.config.image.as_str();

        let mut image = self
            .store
            .open(reference)
            .await
            .map_err(|e| Error::ImageResolution {
                reference: reference.to_string(),
                source: Box::new(e),
            })?;

        let original_id = image
            .identifier()
            .map_err(|e| Error::Identifier(Box::new(e)))?;
        debug!(image = reference, id = %original_id, "Opened image");

        let inspection = self
            .engine
            .inspect_image(&original_id)
            .await
            .map_err(|e| Error::Inspection {
                reference: original_id.clone(),
                source: Box::new(e),
            })?;
        let repo_tags = inspection.repo_tags;

        let mut additions = parse_labels(&self.config.add_labels)?;

        let tags_key = self.config.tags_label.key();
        let recorded = read_label(&image, tags_key)?;
        let merged = merge_tags(Some(recorded.as_str()), &repo_tags)?;
        match merged {
            Some(tags) => {
                additions.insert(tags_key.to_string(), tags);
            }
            // Nothing new to record, keep the stored history byte for byte
            None if !recorded.is_empty() => {
                additions.insert(tags_key.to_string(), recorded);
            }
            None => {}
        }

        let mut result =
            RelabelResult::new(reference.to_string(), original_id.clone(), self.config.dry_run);
        self.remove_labels(&mut image, &mut result)?;
        self.add_labels(&mut image, &additions, &mut result)?;

        if !result.has_changes() {
            info!(image = reference, "Labels already up to date");
            return Ok(result);
        }

        if self.config.dry_run {
            info!(
                image = reference,
                operations = result.operations.len(),
                "Dry run, not saving"
            );
            return Ok(result);
        }

        image.save().await.map_err(|e| Error::Save(Box::new(e)))?;

        let new_id = image
            .identifier()
            .map_err(|e| Error::Identifier(Box::new(e)))?;
        if new_id == original_id {
            return Err(Error::SaveConsistency(new_id));
        }
        info!(image = reference, old = %original_id, new = %new_id, "Saved relabeled image");
        result.new_id = Some(new_id);

        if !eligible_for_deletion(&repo_tags, reference) {
            debug!(?repo_tags, "Original image still tagged, keeping it");
            result.cleanup = Cleanup::Retained { repo_tags };
            return Ok(result);
        }

        result.cleanup = match self.engine.remove_image(&original_id).await {
            Ok(()) => Cleanup::Deleted,
            Err(e) if e.is_conflict() => {
                debug!(id = %original_id, error = %e, "Original image is still in use");
                Cleanup::InUse {
                    message: e.to_string(),
                }
            }
            Err(e) => {
                return Err(Error::Deletion {
                    id: original_id,
                    source: Box::new(e),
                })
            }
        };

        Ok(result)
    }

    /// Remove requested labels that are currently set
    fn remove_labels<I: LocalImage>(&self, image: &mut I, result: &mut RelabelResult) -> Result<()> {
        for key in &self.config.remove_labels {
            let previous = read_label(image, key)?;
            if previous.is_empty() {
                continue;
            }

            image.remove_label(key).map_err(|e| Error::LabelAccess {
                key: key.clone(),
                source: Box::new(e),
            })?;
            result.operations.push(LabelOperation::Remove {
                key: key.clone(),
                previous,
            });
        }

        Ok(())
    }

    /// Set requested labels whose value differs
    fn add_labels<I: LocalImage>(
        &self,
        image: &mut I,
        additions: &BTreeMap<String, String>,
        result: &mut RelabelResult,
    ) -> Result<()> {
        for (key, value) in additions {
            let previous = read_label(image, key)?;
            if &previous == value {
                continue;
            }

            image.set_label(key, value).map_err(|e| Error::LabelAccess {
                key: key.clone(),
                source: Box::new(e),
            })?;
            result.operations.push(LabelOperation::Set {
                key: key.clone(),
                value: value.clone(),
                previous,
            });
        }

        Ok(())
    }
}

fn read_label<I: LocalImage>(image: &I, key: &str) -> Result<String> {
    image.label(key).map_err(|e| Error::LabelAccess {
        key: key.to_string(),
        source: Box::new(e),
    })
}
