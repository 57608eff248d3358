use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use lingosync::config::EngineConfig;
use lingosync::server::{AppState, create_router};
use lingosync::source::{DEFAULT_PATTERN, discover, parse_locale};
use lingosync::sync::{ImportRequest, ListOutcome, SourceFile, SyncEngine};
use lingosync::types::{FileKey, Provenance};

#[derive(Parser)]
#[command(name = "lingosync")]
#[command(about = "Translation sync and staleness tracking", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Overrides `data_dir` from the configuration
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Checkout {
    #[arg(long)]
    project: String,

    #[arg(long, default_value = "main")]
    branch: String,

    /// Language code of the source files
    #[arg(long, default_value = "en")]
    source_language: String,

    /// Root of the checkout to read locale files from
    #[arg(long)]
    dir: PathBuf,

    /// Glob, relative to --dir, selecting locale files
    #[arg(long, default_value = DEFAULT_PATTERN)]
    pattern: String,

    /// Comma-separated target language codes
    #[arg(long, value_delimiter = ',')]
    languages: Vec<String>,
}

impl Checkout {
    fn all_languages(&self) -> Vec<String> {
        let mut languages = vec![self.source_language.clone()];
        languages.extend(
            self.languages
                .iter()
                .filter(|l| **l != self.source_language)
                .cloned(),
        );
        languages
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Start the compute service
    Serve {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Import locale files from a checkout
    Import {
        #[command(flatten)]
        checkout: Checkout,

        /// Commit the checkout is at
        #[arg(long)]
        commit: Option<String>,

        /// Remove indexed files that are no longer in the checkout
        #[arg(long)]
        prune: bool,
    },

    /// Remove indexed files that are no longer in the checkout
    Reconcile {
        #[command(flatten)]
        checkout: Checkout,
    },

    /// Print indexed files and their cache token as JSON
    Files {
        #[arg(long)]
        project: String,

        #[arg(long, default_value = "main")]
        branch: String,

        #[arg(long)]
        language: Option<String>,
    },
}

fn read_checkout(checkout: &Checkout) -> anyhow::Result<Vec<SourceFile>> {
    let found = discover(&checkout.dir, &checkout.pattern, &checkout.all_languages())?;
    if found.is_empty() {
        bail!(
            "No locale files found under {} matching {}",
            checkout.dir.display(),
            checkout.pattern
        );
    }

    found
        .into_iter()
        .map(|f| -> anyhow::Result<SourceFile> {
            let bytes = fs::read(&f.path).with_context(|| format!("reading {}", f.path.display()))?;
            let content = parse_locale(&f.path, &bytes)?;
            Ok(SourceFile {
                language: f.language,
                filename: f.filename,
                content,
                metadata: Provenance::default(),
            })
        })
        .collect()
}

fn load_config(path: Option<&Path>, data_dir: Option<PathBuf>) -> anyhow::Result<EngineConfig> {
    let mut config = EngineConfig::load(path)?;
    if let Some(data_dir) = data_dir {
        config.data_dir = data_dir;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("lingosync=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref(), cli.data_dir)?;

    match cli.command {
        Commands::Serve { host, port } => {
            let mut server = config.server.clone();
            if let Some(host) = host {
                server.host = host;
            }
            if let Some(port) = port {
                server.port = port;
            }

            let state = Arc::new(AppState {
                max_batch: config.limits.max_total_keys,
            });
            let app = create_router(state);
            let addr = server.socket_addr()?;

            info!("Starting compute service on {}", addr);

            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, app).await?;
        }
        Commands::Import {
            checkout,
            commit,
            prune,
        } => {
            let engine = SyncEngine::open(&config)?;
            let request = ImportRequest {
                project_id: checkout.project.clone(),
                branch: checkout.branch.clone(),
                source_language: checkout.source_language.clone(),
                commit_ref: commit,
                files: read_checkout(&checkout)?,
                prune,
            };
            let report = engine.import(&request).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Reconcile { checkout } => {
            let engine = SyncEngine::open(&config)?;
            let upstream: HashSet<FileKey> = read_checkout(&checkout)?
                .into_iter()
                .map(|f| FileKey::new(f.language, f.filename))
                .collect();
            let report = engine
                .reconciler()
                .reconcile(&checkout.project, &checkout.branch, &upstream)
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Files {
            project,
            branch,
            language,
        } => {
            let engine = SyncEngine::open(&config)?;
            let outcome = engine.list_files(&project, &branch, language.as_deref(), None)?;
            if let ListOutcome::Files { files, .. } = &outcome {
                info!("{} files indexed for {project}/{branch}", files.len());
            }
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
    }

    Ok(())
}
