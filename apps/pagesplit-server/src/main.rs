//! pagesplit server
//!
//! Accepts a PDF as the raw body of `POST /api/split` and answers with
//! `{"pages": [<base64 PDF>, ...], "page_count": N}`, one self-contained
//! single-page PDF per input page, in order. Any failure is a 500 with
//! `{"error": "..."}` and no partial results.
//!
//! Optional behaviour, all off by default:
//! - orientation correction of scanned page images (`--correct-orientation`)
//! - staging pages through a per-request scratch directory (`--spool-dir`)

use std::net::SocketAddr;
use std::path::PathBuf;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use clap::{Parser, ValueEnum};
use pagesplit_core::SplitOptions;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod api;
mod error;
mod spool;

use api::{handle_health, handle_split};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ParseModeArg {
    Strict,
    Lenient,
}

/// Command-line arguments for the pagesplit server
#[derive(Parser, Debug)]
#[command(name = "pagesplit-server")]
#[command(about = "Split uploaded PDFs into single-page PDFs")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "3000")]
    port: u16,

    /// Host address to bind to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// How tolerant PDF parsing is of malformed input
    #[arg(long, value_enum, default_value = "lenient")]
    parse_mode: ParseModeArg,

    /// Rotate embedded page scans that look mis-oriented
    #[arg(long)]
    correct_orientation: bool,

    /// Stage split pages on disk under this directory before responding
    #[arg(long)]
    spool_dir: Option<PathBuf>,

    /// Maximum request body size in megabytes
    #[arg(long, default_value = "50")]
    max_body_mb: usize,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub split_options: SplitOptions,
    pub correct_orientation: bool,
    pub spool_dir: Option<PathBuf>,
}

impl AppState {
    fn from_args(args: &Args) -> Self {
        let split_options = match args.parse_mode {
            ParseModeArg::Strict => SplitOptions::strict(),
            ParseModeArg::Lenient => SplitOptions::lenient(),
        };
        Self {
            split_options,
            correct_orientation: args.correct_orientation,
            spool_dir: args.spool_dir.clone(),
        }
    }
}

/// Build the router; shared by `main` and the handler tests
pub fn build_router(state: AppState, max_body_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/split", post(handle_split))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting pagesplit server on {}:{}", args.host, args.port);

    if let Some(dir) = &args.spool_dir {
        std::fs::create_dir_all(dir)?;
    }

    let state = AppState::from_args(&args);
    let app = build_router(state, args.max_body_mb * 1024 * 1024);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("Server listening on http://{}", addr);
    info!("Parse mode: {:?}", args.parse_mode);
    info!("Orientation correction: {}", args.correct_orientation);
    if let Some(dir) = &args.spool_dir {
        info!("Spooling pages under {}", dir.display());
    }

    axum::serve(listener, app).await?;

    Ok(())
}
