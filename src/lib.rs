pub mod config;
pub mod content;
pub mod context;
pub mod error;
pub mod events;
pub mod identity;
pub mod model;
pub mod search;
pub mod service;
pub mod storage;

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};

use config::Config;
use context::RequestContext;
use events::{JsonLinesStream, ReindexOptions, Reindexer};
use identity::JwtTokenManager;
use model::{ResourceReference, SearchRequest};
use service::SearchService;
use storage::{FsStorage, Storage};

static LONG_VERSION: LazyLock<String> = LazyLock::new(|| {
    format!(
        "{}\nbuilt: {}\ntarget: {}",
        env!("CARGO_PKG_VERSION"),
        option_env!("VERGEN_BUILD_TIMESTAMP").unwrap_or("unknown"),
        option_env!("VERGEN_CARGO_TARGET_TRIPLE").unwrap_or("unknown"),
    )
});

/// Command-line interface.
#[derive(Parser, Debug)]
#[command(
    name = "space-search",
    version,
    long_version = LONG_VERSION.as_str(),
    about = "Content indexing and search over storage spaces"
)]
pub struct Cli {
    /// Path to the TOML config (defaults to the platform config dir)
    #[arg(long, env = "SPACE_SEARCH_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Rebuild the index of one space, or of every space
    Index {
        /// Space to rebuild; all spaces when omitted
        #[arg(long)]
        space: Option<String>,
    },
    /// Run a query and print the response as JSON
    Search {
        query: String,

        /// Request token identifying the caller
        #[arg(long, env = "SPACE_SEARCH_TOKEN", hide_env_values = true)]
        token: String,

        /// Restrict to one space
        #[arg(long)]
        space: Option<String>,

        /// Restrict to the subtree below this item (needs --space)
        #[arg(long, requires = "space")]
        item: Option<String>,

        /// Restrict to this path, relative to --item when given
        #[arg(long)]
        path: Option<String>,

        /// Matches per page; 0 uses the default
        #[arg(long, default_value_t = 0)]
        page_size: i32,

        /// Token from a previous page
        #[arg(long, default_value = "")]
        page_token: String,

        /// Include trashed items
        #[arg(long, default_value_t = false)]
        include_trashed: bool,

        /// Give up after this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Apply change events read as JSON lines until end of input
    Watch {
        /// Event file, or `-` for stdin
        #[arg(long, default_value = "-")]
        events: String,
    },
    /// Mint a request token for a user
    Token {
        #[arg(long)]
        user: String,

        /// Display name embedded in the token
        #[arg(long, default_value = "")]
        name: String,
    },
    /// Generate shell completions to stdout
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate man page to stdout
    Man,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Index { space } => {
            let cfg = Config::load(cli.config.as_deref())?;
            run_index(&cfg, space.as_deref())
        }
        Commands::Search {
            query,
            token,
            space,
            item,
            path,
            page_size,
            page_token,
            include_trashed,
            timeout_ms,
        } => {
            let cfg = Config::load(cli.config.as_deref())?;
            let request = SearchRequest {
                query,
                page_size,
                reference: ResourceReference {
                    space_id: space,
                    item_id: item,
                    path,
                },
                page_token,
                include_trashed,
            };
            let ctx = timeout_ms
                .map(|ms| RequestContext::with_timeout(Duration::from_millis(ms)))
                .unwrap_or_default();
            run_search(&cfg, &ctx, &request, &token)
        }
        Commands::Watch { events } => {
            let cfg = Config::load(cli.config.as_deref())?;
            run_watch(&cfg, &events)
        }
        Commands::Token { user, name } => {
            let cfg = Config::load(cli.config.as_deref())?;
            let tokens = JwtTokenManager::new(&cfg.token_manager, cfg.service_account.clone())?;
            println!("{}", tokens.mint(&user, &name)?);
            Ok(())
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "space-search", &mut std::io::stdout());
            Ok(())
        }
        Commands::Man => {
            let cmd = Cli::command();
            let man = clap_mangen::Man::new(cmd);
            let mut out = std::io::stdout();
            man.render(&mut out)?;
            Ok(())
        }
    }
}

fn run_index(cfg: &Config, space: Option<&str>) -> Result<()> {
    let service = SearchService::from_config(cfg)?;
    let report = service.index_space(&RequestContext::background(), space)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.is_complete() {
        anyhow::bail!("{} space(s) failed to index", report.failed.len());
    }
    Ok(())
}

fn run_search(
    cfg: &Config,
    ctx: &RequestContext,
    request: &SearchRequest,
    token: &str,
) -> Result<()> {
    let service = SearchService::from_config(cfg)?;
    let response = service.search(ctx, request, token)?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

fn run_watch(cfg: &Config, source: &str) -> Result<()> {
    let storage: Arc<dyn Storage> = Arc::new(FsStorage::new(&cfg.storage.root));
    let extractor = content::from_config(&cfg.extractor)?;
    let engine = search::open_engine(&cfg.engine, storage, extractor)?;

    let reader: Box<dyn BufRead + Send> = if source == "-" {
        Box::new(BufReader::new(std::io::stdin()))
    } else {
        let file = File::open(source).with_context(|| format!("opening event file {source}"))?;
        Box::new(BufReader::new(file))
    };
    let stream = JsonLinesStream::with_channel_size(reader, cfg.events.channel_size);
    let options = ReindexOptions::from(&cfg.events);
    tracing::info!(
        source,
        workers = cfg.events.workers,
        async_uploads = options.async_uploads,
        rebuild_after_mutation = options.rebuild_after_mutation,
        "watching change events"
    );
    Reindexer::new(engine, options)
        .spawn(&stream, cfg.events.workers)?
        .join();
    Ok(())
}

pub fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "space-search", "space-search")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".space-search"))
}
