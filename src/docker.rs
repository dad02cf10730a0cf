//! Docker Engine Client
//!
//! bollard-backed implementations of the image engine and local image traits

use std::collections::{BTreeMap, HashMap};
use std::io::{BufReader, BufWriter, Seek, SeekFrom, Write};

use async_trait::async_trait;
use bollard::errors::Error as BollardError;
use bollard::image::{ImportImageOptions, RemoveImageOptions};
use bollard::Docker;
use futures::StreamExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use crate::archive::{rewrite_archive, tagged_reference};
use crate::engine::{ImageEngine, ImageInspection, ImageStore, LocalImage};
use crate::error::{Error, Result};

/// Map engine responses that have a dedicated error kind
fn map_docker_error(err: BollardError, reference: &str) -> Error {
    match err {
        BollardError::DockerResponseServerError {
            status_code: 404, ..
        } => Error::ImageNotFound(reference.to_string()),
        BollardError::DockerResponseServerError {
            status_code: 409,
            message,
        } => Error::ImageInUse(message),
        other => Error::Docker(other),
    }
}

/// Rewrite an exported archive into a fresh temporary file
///
/// Returns the file rewound to its start along with the new content id.
fn rewrite_to_spool(
    exported: std::fs::File,
    labels: &BTreeMap<String, String>,
    repo_tag: Option<&str>,
) -> Result<(std::fs::File, String)> {
    let mut spool = tempfile::tempfile()?;
    let image_id = rewrite_archive(
        BufReader::new(exported),
        BufWriter::new(&mut spool),
        labels,
        repo_tag,
    )?;
    spool.seek(SeekFrom::Start(0))?;
    Ok((spool, image_id))
}

/// Docker Engine Client
///
/// Client responsible for interactions with the local Docker engine
#[derive(Debug, Clone)]
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connect to the engine named by `DOCKER_HOST`, or the local socket
    ///
    /// # Errors
    /// Returns an error if the connection cannot be configured or the API
    /// version negotiation fails
    pub async fn connect() -> Result<Self> {
        let docker = Docker::connect_with_defaults()?.negotiate_version().await?;
        debug!(version = ?docker.client_version(), "Connected to Docker engine");
        Ok(Self { docker })
    }

    /// Stream `docker save` output for an image into a temporary file
    async fn export_image(&self, reference: &str) -> Result<std::fs::File> {
        let mut spool = tempfile::tempfile()?;
        let mut stream = self.docker.export_image(reference);

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| map_docker_error(e, reference))?;
            spool.write_all(&chunk)?;
        }

        spool.flush()?;
        spool.seek(SeekFrom::Start(0))?;
        Ok(spool)
    }

    /// Stream an image archive from disk to `docker load`
    async fn load_image(&self, archive: std::fs::File) -> Result<()> {
        let options = ImportImageOptions {
            quiet: true,
            ..Default::default()
        };
        let body = ReaderStream::new(tokio::fs::File::from_std(archive)).filter_map(|chunk| {
            futures::future::ready(match chunk {
                Ok(chunk) => Some(chunk),
                Err(e) => {
                    warn!(error = %e, "Failed to read rewritten archive");
                    None
                }
            })
        });
        let mut stream = self.docker.import_image_stream(options, body, None);

        while let Some(progress) = stream.next().await {
            let progress = progress?;
            if let Some(message) = progress.error {
                return Err(Error::Docker(BollardError::DockerStreamError {
                    error: message,
                }));
            }
            if let Some(status) = progress.stream.as_deref() {
                debug!(status = status.trim(), "docker load");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl ImageEngine for DockerEngine {
    async fn inspect_image(&self, reference: &str) -> Result<ImageInspection> {
        debug!(reference, "Inspecting image");
        let inspect = self
            .docker
            .inspect_image(reference)
            .await
            .map_err(|e| map_docker_error(e, reference))?;

        Ok(ImageInspection {
            id: inspect.id.unwrap_or_default(),
            repo_tags: inspect.repo_tags.unwrap_or_default(),
            labels: inspect
                .config
                .and_then(|config| config.labels)
                .unwrap_or_default(),
        })
    }

    async fn remove_image(&self, id: &str) -> Result<()> {
        let options = RemoveImageOptions {
            force: false,
            noprune: true,
        };

        let deleted = self
            .docker
            .remove_image(id, Some(options), None)
            .await
            .map_err(|e| map_docker_error(e, id))?;

        info!(image = id, entries = deleted.len(), "Removed image");
        Ok(())
    }
}

#[async_trait]
impl ImageStore for DockerEngine {
    type Image = DockerImage;

    async fn open(&self, reference: &str) -> Result<DockerImage> {
        let inspection = self.inspect_image(reference).await?;
        if inspection.id.is_empty() {
            return Err(Error::ImageNotFound(reference.to_string()));
        }

        Ok(DockerImage {
            engine: self.clone(),
            reference: reference.to_string(),
            id: inspection.id,
            labels: inspection.labels,
        })
    }
}

/// A local Docker image opened for label editing
///
/// Label edits stay in memory until `save`, which exports the image,
/// rewrites its config and loads it back under the same tag.
#[derive(Debug)]
pub struct DockerImage {
    engine: DockerEngine,
    reference: String,
    id: String,
    labels: HashMap<String, String>,
}

#[async_trait]
impl LocalImage for DockerImage {
    fn identifier(&self) -> Result<String> {
        Ok(self.id.clone())
    }

    fn label(&self, key: &str) -> Result<String> {
        Ok(self.labels.get(key).cloned().unwrap_or_default())
    }

    fn set_label(&mut self, key: &str, value: &str) -> Result<()> {
        self.labels.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_label(&mut self, key: &str) -> Result<()> {
        self.labels.remove(key);
        Ok(())
    }

    async fn save(&mut self) -> Result<()> {
        let spool = self.engine.export_image(&self.id).await?;

        let labels: BTreeMap<String, String> = self
            .labels
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let repo_tag = tagged_reference(&self.reference);

        let tag = repo_tag.clone();
        let (rewritten, image_id) =
            tokio::task::spawn_blocking(move || rewrite_to_spool(spool, &labels, tag.as_deref()))
                .await
                .map_err(|e| Error::Io(std::io::Error::other(e)))??;

        debug!(image = %image_id, "Loading rewritten image");
        self.engine.load_image(rewritten).await?;

        self.id = match repo_tag {
            Some(tag) => self.engine.inspect_image(&tag).await?.id,
            None => image_id,
        };

        Ok(())
    }
}
