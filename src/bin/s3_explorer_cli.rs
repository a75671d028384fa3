//! S3 Explorer CLI: browse and manage an S3-compatible bucket
//!
//! Usage:
//!   s3-explorer-cli ls [path] [--all]          List a directory page by page
//!   s3-explorer-cli tree [--depth N]           Print the whole bucket tree
//!   s3-explorer-cli get <key>...               Download (several keys as one zip)
//!   s3-explorer-cli put <dir> <file>...        Upload local files
//!   s3-explorer-cli mkdir <parent> <name>      Create a directory
//!   s3-explorer-cli rm <key>...                Delete objects
//!   s3-explorer-cli rmdir <path>               Delete a directory recursively
//!   s3-explorer-cli tag <key> <version>        Set the version tag
//!   s3-explorer-cli tag-get <key>              Read the version tag
//!   s3-explorer-cli link <key> [--share]       Print a signed URL
//!   s3-explorer-cli config [--save]            Show (and store) the effective config

use anyhow::{bail, Context};
use clap::{ArgAction, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use s3_explorer::config::{self, ExplorerConfig};
use s3_explorer::paths;
use s3_explorer::{
    ActionCoordinator, ExpandOutcome, ExplorerSession, LinkKind, TransferOutcome, TreeStore,
    TreeSynchronizer, TypeHint, UploadFile,
};

#[derive(Parser)]
#[command(
    name = "s3-explorer-cli",
    about = "S3 Explorer CLI: browse and manage an S3-compatible bucket",
    version,
    long_about = "Works against AWS S3 or any S3-compatible endpoint (LocalStack, MinIO).\nThe secret key is read from AWS_SECRET_ACCESS_KEY or the config file."
)]
struct Cli {
    /// Custom endpoint URL (e.g., http://localhost:4566)
    #[arg(long, global = true)]
    endpoint: Option<String>,
    /// Bucket name
    #[arg(long, global = true)]
    bucket: Option<String>,
    /// AWS region
    #[arg(long, global = true)]
    region: Option<String>,
    /// Use path-style addressing
    #[arg(long, global = true)]
    path_style: bool,
    /// Config file (default: <config dir>/s3-explorer/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// More output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List a directory
    Ls {
        /// Directory path (default: bucket root)
        #[arg(default_value = "/")]
        path: String,
        /// Follow every page instead of only the first
        #[arg(long)]
        all: bool,
    },
    /// Print the bucket as a tree
    Tree {
        /// Maximum directory depth to print
        #[arg(long, default_value_t = 3)]
        depth: usize,
    },
    /// Download objects; several keys are packed into one zip archive
    Get {
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Upload local files into a directory
    Put {
        /// Destination directory
        directory: String,
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Content category: image, video, audio or document
        #[arg(long = "type")]
        type_hint: Option<TypeHint>,
    },
    /// Create a directory
    Mkdir { parent: String, name: String },
    /// Delete objects
    Rm {
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Delete a directory and everything below it
    Rmdir { path: String },
    /// Set the version tag of an object
    Tag { key: String, version: String },
    /// Print the version tag of an object
    TagGet { key: String },
    /// Print a signed URL for an object
    Link {
        key: String,
        /// Long-lived link for sharing
        #[arg(long)]
        share: bool,
    },
    /// Show the effective configuration
    Config {
        /// Write it back to the config file
        #[arg(long)]
        save: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    s3_explorer::logging::init(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn effective_config(cli: &Cli) -> ExplorerConfig {
    let mut config = match &cli.config {
        Some(path) => config::load_config_from(path),
        None => config::load_config(),
    };
    if let Some(endpoint) = &cli.endpoint {
        config.connection.endpoint = Some(endpoint.clone());
    }
    if let Some(bucket) = &cli.bucket {
        config.connection.bucket = bucket.clone();
    }
    if let Some(region) = &cli.region {
        config.connection.region = region.clone();
    }
    if cli.path_style {
        config.connection.path_style = true;
    }
    config
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = effective_config(&cli);

    if let Commands::Config { save } = &cli.command {
        let mut shown = config.clone();
        shown.connection.secret_access_key = shown.connection.secret_access_key.map(|_| "***".to_string());
        println!("{}", serde_json::to_string_pretty(&shown)?);
        if *save {
            match &cli.config {
                Some(path) => config::save_config_to(path, &config)?,
                None => config::save_config(&config)?,
            }
        }
        return Ok(());
    }

    let session = ExplorerSession::connect(&config).context("Cannot open bucket")?;
    let actions = session.actions();

    match cli.command {
        Commands::Ls { path, all } => {
            let tree = session.tree();
            tree.load_root().await?;
            let target = reveal(tree, &path).await?;
            if all {
                while let ExpandOutcome::Applied { exhausted: false, .. } = tree.expand_more(&target).await? {}
            }
            let store = tree.snapshot();
            print_listing(&store, &target);
        }
        Commands::Tree { depth } => {
            let tree = session.tree();
            tree.hydrate_full_tree().await?;
            let store = tree.snapshot();
            println!("{}", config.connection.bucket);
            print_tree(&store, paths::ROOT_ID, 1, depth);
        }
        Commands::Get { keys } => {
            let (bar, ticker) = track(actions.download_progress(), "Downloading");
            let abort = abort_on_ctrl_c(actions.clone(), Transfer::Download);
            let outcome = actions.download(keys).await;
            abort.abort();
            ticker.abort();
            match outcome? {
                TransferOutcome::Completed(file) => {
                    bar.finish_with_message("Downloaded");
                    println!("{} -> {}", file.filename, file.path.display());
                }
                TransferOutcome::Aborted => bar.abandon_with_message("Download aborted"),
            }
        }
        Commands::Put { directory, files, type_hint } => {
            let mut uploads = Vec::with_capacity(files.len());
            for path in &files {
                let name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .with_context(|| format!("Not a file: {}", path.display()))?;
                let bytes = tokio::fs::read(path)
                    .await
                    .with_context(|| format!("Cannot read {}", path.display()))?;
                uploads.push(UploadFile::new(name, bytes));
            }

            let (bar, ticker) = track(actions.upload_progress(), "Uploading");
            let abort = abort_on_ctrl_c(actions.clone(), Transfer::Upload);
            let outcome = actions.upload(uploads, &directory, type_hint).await;
            abort.abort();
            ticker.abort();
            match outcome? {
                TransferOutcome::Completed(metas) => {
                    bar.finish_with_message("Uploaded");
                    for meta in metas {
                        println!("{} ({} bytes)", meta.key, meta.size);
                    }
                }
                TransferOutcome::Aborted => bar.abandon_with_message("Upload aborted"),
            }
        }
        Commands::Mkdir { parent, name } => {
            let path = actions.create_directory(&parent, &name).await?;
            println!("Created {}", path);
        }
        Commands::Rm { keys } => {
            actions.set_multi_select(true);
            for key in &keys {
                actions.toggle(&paths::normalize_key(key));
            }
            let deleted = actions.delete_selected().await?;
            println!("Deleted {} object(s)", deleted);
        }
        Commands::Rmdir { path } => {
            actions.delete_directory(&path).await?;
            println!("Deleted {}", paths::normalize_directory(&path));
        }
        Commands::Tag { key, version } => {
            actions.toggle(&paths::normalize_key(&key));
            actions.tag_selected(&version).await?;
            println!("{} tagged {}", key, version.trim());
        }
        Commands::TagGet { key } => {
            let version = actions.tag_version(&paths::normalize_key(&key)).await?;
            if version.is_empty() {
                println!("{} has no version tag", key);
            } else {
                println!("{}", version);
            }
        }
        Commands::Link { key, share } => {
            actions.toggle(&paths::normalize_key(&key));
            let kind = if share { LinkKind::Share } else { LinkKind::Inline };
            println!("{}", actions.signed_link(kind).await?);
        }
        Commands::Config { .. } => {}
    }
    Ok(())
}

/// Expand every directory from the root down to `path`, following further
/// pages of a parent when the child is not on the first one
async fn reveal(tree: &TreeSynchronizer, path: &str) -> anyhow::Result<String> {
    let target = paths::normalize_directory(path);
    let mut parent = paths::ROOT_ID.to_string();
    if paths::is_root(&target) {
        return Ok(parent);
    }

    let mut current = String::new();
    for segment in target.trim_end_matches('/').split('/') {
        current = paths::normalize_directory(&paths::join(&current, segment));
        while !tree.snapshot().contains(&current) {
            match tree.expand_more(&parent).await? {
                ExpandOutcome::Applied { .. } => {}
                _ => bail!("No such directory: {}", current),
            }
        }
        tree.expand(&current, 0).await?;
        parent = current.clone();
    }
    Ok(target)
}

fn print_listing(store: &TreeStore, id: &str) {
    for child in store.children(id) {
        if child.is_directory {
            println!("{:>12}  {:<20}  {}", "DIR", "", child.name);
        } else {
            let modified = child
                .meta
                .as_ref()
                .and_then(|m| m.last_modified)
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_default();
            println!("{:>12}  {:<20}  {}", child.size.unwrap_or(0), modified, child.name);
        }
    }
    if store.get(id).is_some_and(|n| !n.exhausted) {
        println!("... more entries, use --all");
    }
}

fn print_tree(store: &TreeStore, id: &str, level: usize, max_depth: usize) {
    if level > max_depth {
        return;
    }
    for child in store.children(id) {
        let suffix = if child.is_directory { "/" } else { "" };
        println!("{}{}{}", "  ".repeat(level), child.name, suffix);
        if child.is_directory {
            print_tree(store, &child.id, level + 1, max_depth);
        }
    }
}

fn track(mut progress: watch::Receiver<u8>, label: &str) -> (ProgressBar, JoinHandle<()>) {
    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("{msg} [{bar:40}] {pos:>3}%")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    bar.set_message(label.to_string());

    let ticker = {
        let bar = bar.clone();
        tokio::spawn(async move {
            loop {
                bar.set_position(u64::from(*progress.borrow_and_update()));
                if progress.changed().await.is_err() {
                    break;
                }
            }
        })
    };
    (bar, ticker)
}

enum Transfer {
    Download,
    Upload,
}

fn abort_on_ctrl_c(actions: Arc<ActionCoordinator>, transfer: Transfer) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            match transfer {
                Transfer::Download => actions.abort_download(),
                Transfer::Upload => actions.abort_upload(),
            };
        }
    })
}
