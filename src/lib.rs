//! # docker-image-labeler
//!
//! Add and remove labels on local Docker images
//!
//! ## Features
//! - Label additions and removals committed as a single new image
//! - No-op detection (nothing is saved when labels already match)
//! - Tag history recorded in a bookkeeping label across relabels
//! - Cleanup of the superseded image when nothing else references it
//! - Dry-run mode

pub mod archive;
pub mod config;
pub mod docker;
pub mod engine;
pub mod error;
pub mod labels;
pub mod relabel;

pub use config::{RelabelConfig, TagsLabel};
pub use docker::{DockerEngine, DockerImage};
pub use engine::{ImageEngine, ImageInspection, ImageStore, LocalImage};
pub use error::{Error, Result};
pub use relabel::{Cleanup, LabelOperation, RelabelResult, Relabeler};

/// Relabel an image on the local Docker engine
///
/// # Examples
///
/// ```rust,no_run
/// use docker_image_labeler::{relabel_image, RelabelConfig};
///
/// #[tokio::main]
/// async fn main() -> docker_image_labeler::Result<()> {
///     let config = RelabelConfig::new("app:latest")
///         .with_label("tier=web")
///         .without_label("maintainer");
///
///     let result = relabel_image(config).await?;
///
///     println!("Relabel completed: {:?}", result);
///     Ok(())
/// }
/// ```
pub async fn relabel_image(config: RelabelConfig) -> Result<RelabelResult> {
    config.validate()?;

    let engine = DockerEngine::connect().await?;
    let relabeler = Relabeler::new(engine.clone(), engine, config)?;
    relabeler.relabel().await
}
