//! louis-worker CLI entry point.
//!
//! `serve` answers newline-delimited JSON requests on stdin; `translate`
//! runs a single translation and prints the braille.

mod serve;

use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::AsyncReadExt;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use louis_worker_common::{ConfigFile, TableSourceConfig};
use louis_worker_service::brf::brf_to_unicode;
use louis_worker_service::{
    MathCode, ModeFlags, Response, TranslatePayload, TranslationMode, WorkerClient, WorkerOptions,
    spawn_worker,
};

#[derive(Parser)]
#[command(
    name = "louis-worker",
    version,
    about = "Text-to-braille translation worker hosting a liblouis WebAssembly build"
)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, short, env = "LOUIS_WORKER_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// liblouis WebAssembly module.
    #[arg(long, env = "LOUIS_WASM", global = true)]
    module: Option<PathBuf>,

    /// Directory to load tables from.
    #[arg(long, env = "LOUIS_TABLES", global = true, conflicts_with = "table_url")]
    tables: Option<String>,

    /// Base URL to fetch tables from.
    #[arg(long, env = "LOUIS_TABLE_URL", global = true)]
    table_url: Option<String>,

    /// Emit logs as JSON.
    #[arg(long, env = "LOUIS_LOG_JSON", global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer NDJSON requests on stdin with NDJSON replies on stdout.
    Serve,

    /// Translate text once and print the braille.
    Translate {
        /// Text to translate; read from stdin if absent.
        text: Option<String>,

        /// Comma-separated table list.
        #[arg(long, short)]
        table: Option<String>,

        /// Math code.
        #[arg(long, value_enum, default_value_t = MathArg::Nemeth, ignore_case = true)]
        math: MathArg,

        /// Raw engine mode bits.
        #[arg(long, default_value_t = 0)]
        mode: u32,

        /// Print Unicode braille instead of BRF.
        #[arg(long)]
        unicode: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries replies.
    let json = cli.log_json;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,louis_worker=debug".into()),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .init();

    let config = load_config(&cli)?;
    info!(
        module = ?config.runtime.engine.module_path,
        queue_depth = config.worker.queue_depth,
        "Configuration loaded"
    );

    let client = spawn_worker(
        WorkerOptions::new(config.runtime).with_queue_depth(config.worker.queue_depth),
    )
    .context("Failed to start translation worker")?;

    match cli.command {
        Commands::Serve => serve::run(client).await,
        Commands::Translate {
            text,
            table,
            math,
            mode,
            unicode,
        } => {
            let text = match text {
                Some(text) => text,
                None => read_stdin().await?,
            };
            let payload = TranslatePayload {
                text,
                table,
                mode: TranslationMode {
                    math: math.into(),
                    flags: ModeFlags(mode),
                },
            };
            translate_once(&client, payload, unicode).await
        }
    }
}

/// Config file (or defaults) with command-line overrides applied.
fn load_config(cli: &Cli) -> anyhow::Result<ConfigFile> {
    let mut config = match &cli.config {
        Some(path) => ConfigFile::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ConfigFile::default(),
    };

    if let Some(module) = &cli.module {
        config.runtime.engine.module_path = Some(module.display().to_string());
    }
    if let Some(path) = &cli.tables {
        config.runtime.tables.source = TableSourceConfig::Directory { path: path.clone() };
    }
    if let Some(base_url) = &cli.table_url {
        config.runtime.tables.source = TableSourceConfig::http(base_url.clone());
    }

    Ok(config)
}

async fn translate_once(
    client: &WorkerClient,
    payload: TranslatePayload,
    unicode: bool,
) -> anyhow::Result<()> {
    match client.init().await? {
        Response::Ready { version } => info!(version = %version, "Engine ready"),
        Response::Error(e) => bail!("Initialization failed ({:?}): {}", e.kind, e.message),
        other => bail!("Unexpected reply to INIT: {other:?}"),
    }

    match client.translate(payload).await? {
        Response::TranslateResult { braille } if unicode => println!("{}", brf_to_unicode(&braille)),
        Response::TranslateResult { braille } => println!("{braille}"),
        Response::Error(e) => bail!("Translation failed ({:?}): {}", e.kind, e.message),
        other => bail!("Unexpected reply to TRANSLATE: {other:?}"),
    }

    Ok(())
}

async fn read_stdin() -> anyhow::Result<String> {
    let mut text = String::new();
    tokio::io::stdin()
        .read_to_string(&mut text)
        .await
        .context("Failed to read text from stdin")?;
    Ok(text.trim_end_matches(['\r', '\n']).to_string())
}

/// Math code as spelled on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum MathArg {
    Nemeth,
    Ueb,
}

impl From<MathArg> for MathCode {
    fn from(arg: MathArg) -> Self {
        match arg {
            MathArg::Nemeth => Self::Nemeth,
            MathArg::Ueb => Self::Ueb,
        }
    }
}
