//! docker-image-labeler CLI
//!
//! Command line tool for relabeling local Docker images

use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use docker_image_labeler::{
    relabel_image, Cleanup, Error, LabelOperation, RelabelConfig, RelabelResult, Result,
    TagsLabel,
};

/// Version reported by `--version` and `version`
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Usage examples shown after `--help`
const EXAMPLES: &str = "\
Examples:
  Add a label:
    docker-image-labeler --label=label.key=label.value docker/image:latest

  Remove a label:
    docker-image-labeler --remove-label=label.key docker/image:latest

  Add and remove labels:
    docker-image-labeler --label=new=value --remove-label=old docker/image:latest";

/// docker-image-labeler CLI
///
/// Add and remove labels on local Docker images
#[derive(Parser, Debug)]
#[command(
    name = "docker-image-labeler",
    version,
    about = "Add and remove labels on local Docker images",
    long_about = "Adds and removes labels on a local Docker image, records the tags the image \
    has carried in a bookkeeping label, and removes the superseded image when nothing else \
    references it.",
    after_help = EXAMPLES,
    args_conflicts_with_subcommands = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    relabel: RelabelArgs,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Re-label a docker image
    Relabel(RelabelArgs),

    /// Show the version
    Version,
}

#[derive(Args, Debug, Default)]
struct RelabelArgs {
    /// Name of image to manipulate
    image: Option<String>,

    /// Label to add or update (repeatable)
    #[arg(long = "label", value_name = "KEY=VALUE")]
    labels: Vec<String>,

    /// Label to remove (repeatable)
    #[arg(long = "remove-label", value_name = "KEY")]
    remove_labels: Vec<String>,

    /// Label used to record the image's previous tags
    #[arg(long, value_enum, default_value_t = TagsLabel::Alternate)]
    tags_label: TagsLabel,

    /// Dry run mode (don't save or delete anything)
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let args = match cli.command {
        Some(Commands::Version) => {
            println!("docker-image-labeler {}", VERSION);
            return ExitCode::SUCCESS;
        }
        Some(Commands::Relabel(args)) => args,
        None => cli.relabel,
    };

    match run_relabel(args, cli.verbose).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", "✗".red(), e.to_string().red());
            ExitCode::FAILURE
        }
    }
}

/// Log to stderr, honoring `RUST_LOG` when set
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Execute relabeling
async fn run_relabel(args: RelabelArgs, verbose: bool) -> Result<()> {
    let config = build_config(args)?;

    if verbose {
        println!("{} Relabeling image: {}", "•".blue(), config.image.cyan());

        if config.dry_run {
            println!(
                "{} Running in dry-run mode (no changes will be made)",
                "!".yellow()
            );
        }
    }

    let result = relabel_image(config).await?;
    display_relabel_result(&result, verbose);

    if let Some(warning) = result.warning() {
        eprintln!("{} Warning: {}", "!".yellow(), warning.yellow());
    }

    Ok(())
}

/// Build and validate the relabel configuration from CLI arguments
fn build_config(args: RelabelArgs) -> Result<RelabelConfig> {
    let image = args
        .image
        .filter(|image| !image.is_empty())
        .ok_or_else(|| Error::config_validation("No image specified"))?;

    let config = RelabelConfig {
        image,
        add_labels: args.labels,
        remove_labels: args.remove_labels,
        tags_label: args.tags_label,
        dry_run: args.dry_run,
    };
    config.validate()?;

    Ok(config)
}

/// Display relabel results
fn display_relabel_result(result: &RelabelResult, verbose: bool) {
    if result.dry_run && result.has_changes() {
        println!("{} Relabel preview (dry-run mode):", "•".blue());
    } else if let Some(new_id) = &result.new_id {
        println!(
            "{} Relabel completed: {} -> {}",
            "✓".green(),
            short_id(&result.original_id).dimmed(),
            short_id(new_id).cyan()
        );
    } else {
        println!("{} No changes required", "✓".green());
    }

    if !result.has_changes() {
        return;
    }

    let (set, removed) = result
        .operations
        .iter()
        .fold((0, 0), |(set, removed), op| match op {
            LabelOperation::Set { .. } => (set + 1, removed),
            LabelOperation::Remove { .. } => (set, removed + 1),
        });
    println!("  Set: {}", set.to_string().green());
    println!("  Removed: {}", removed.to_string().red());

    if verbose {
        println!("\n{} Detailed operations:", "•".blue());
        for (i, operation) in result.operations.iter().enumerate() {
            let prefix = format!("  {}.", i + 1);
            match operation {
                LabelOperation::Set {
                    key,
                    value,
                    previous,
                } if previous.is_empty() => {
                    println!("{} Set label: {}={}", prefix, key.cyan(), value);
                }
                LabelOperation::Set {
                    key,
                    value,
                    previous,
                } => {
                    println!(
                        "{} Update label: {}={} (was {})",
                        prefix,
                        key.cyan(),
                        value,
                        previous.dimmed()
                    );
                }
                LabelOperation::Remove { key, previous } => {
                    println!(
                        "{} Remove label: {} (was {})",
                        prefix,
                        key.red(),
                        previous.dimmed()
                    );
                }
            }
        }
    }

    match &result.cleanup {
        Cleanup::Deleted => {
            println!(
                "  Removed old image {}",
                short_id(&result.original_id).dimmed()
            );
        }
        Cleanup::Retained { repo_tags } if verbose => {
            println!(
                "  Kept old image {} (tagged as {})",
                short_id(&result.original_id).dimmed(),
                repo_tags.join(", ")
            );
        }
        _ => {}
    }
}

/// Shorten a content identifier for display
fn short_id(id: &str) -> &str {
    let hex = id.strip_prefix("sha256:").unwrap_or(id);
    hex.get(..12).unwrap_or(hex)
}
