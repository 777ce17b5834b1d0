use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;

use archive::config::{default_config_path, ArchiveConfig};
use archive::ArchiveError;

mod commands;
mod telemetry;

#[derive(Parser)]
#[command(name = "archive")]
#[command(about = "Keep an archive catalog consistent with the files on disk")]
#[command(version)]
struct Cli {
    /// Configuration file [default: <config dir>/archive-tools/config.toml]
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Catalog database, overriding the configured one
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the catalog if needed and register an archive root
    Init {
        /// Archive name
        #[arg(short, long)]
        archive: String,
        /// Absolute path or URL of the archive root
        #[arg(short, long)]
        root: String,
    },
    /// Fingerprint the files below a directory
    Scan {
        /// Directory to scan
        root: PathBuf,
        /// Subtree below the root
        #[arg(short, long, default_value = "")]
        subpath: String,
        /// Compute content digests
        #[arg(long)]
        hash: bool,
    },
    /// Reconcile catalog records with the files on disk
    Compare {
        #[arg(short, long)]
        archive: String,
        #[arg(short, long, default_value = "")]
        subpath: String,
        /// Compare sizes
        #[arg(long)]
        check_size: bool,
        /// Compare content digests (implies hashing the scan)
        #[arg(long)]
        check_hash: bool,
        /// List equal files too
        #[arg(long)]
        all: bool,
    },
    /// Find the stored variant of each file name
    Resolve {
        #[command(flatten)]
        selection: Selection,
    },
    /// Copy resolved files into a job directory
    Fetch {
        #[command(flatten)]
        selection: Selection,
        /// Destination directory
        #[arg(short, long)]
        dest: PathBuf,
    },
    /// Copy job output into an archive and record it
    Ingest {
        #[arg(short, long)]
        archive: String,
        /// Job directory mirroring the archive layout
        #[arg(long)]
        source: PathBuf,
        /// Subtree of the job directory to ingest
        #[arg(short, long, default_value = "")]
        subpath: String,
        /// File type recorded on new artifacts
        #[arg(long)]
        file_type: Option<String>,
        /// Processing attempt recorded on new artifacts
        #[arg(long)]
        attempt: Option<i64>,
    },
}

/// File names and the archive to look them up in
#[derive(Args)]
pub struct Selection {
    #[arg(short, long)]
    pub archive: String,
    /// Compression preference, e.g. ".fz,none"
    #[arg(short, long)]
    pub order: Option<String>,
    /// File with one name per line
    #[arg(long)]
    pub names_file: Option<PathBuf>,
    /// Logical file names
    pub names: Vec<String>,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            // 1 is reserved for "ran fine, found differences"
            match e.downcast_ref::<ArchiveError>() {
                Some(err) if err.is_precondition() => ExitCode::from(2),
                _ => ExitCode::from(3),
            }
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let mut config = ArchiveConfig::load_or_default(&config_path)
        .with_context(|| format!("loading configuration {}", config_path.display()))?;
    if let Some(catalog) = &cli.catalog {
        config.catalog.path = catalog.clone();
    }

    let _telemetry = telemetry::init(&config.logging, cli.verbose)?;
    debug!("Using configuration {}", config_path.display());

    let context = commands::Context {
        config,
        json: cli.json,
    };

    match cli.command {
        Commands::Init { archive, root } => context.init(&archive, &root),
        Commands::Scan { root, subpath, hash } => context.scan(&root, &subpath, hash),
        Commands::Compare {
            archive,
            subpath,
            check_size,
            check_hash,
            all,
        } => context.compare(&archive, &subpath, check_size, check_hash, all),
        Commands::Resolve { selection } => context.resolve(&selection),
        Commands::Fetch { selection, dest } => context.fetch(&selection, &dest),
        Commands::Ingest {
            archive,
            source,
            subpath,
            file_type,
            attempt,
        } => context.ingest(&archive, &source, &subpath, file_type, attempt),
    }
}
