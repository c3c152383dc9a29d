mod api;
mod auth;
mod config;
mod email;
mod search;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use auth::oauth::OAuthClient;
use auth::session::AuthSession;
use config::AppConfig;
use email::gmail::GmailProvider;
use email::provider::MailProvider;
use search::download::AttachmentDownloader;
use search::pipeline::{SearchPipeline, DEFAULT_QUERY};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub session: Arc<AuthSession>,
    pub provider: Arc<dyn MailProvider>,
    pub search: Arc<SearchPipeline>,
}

#[derive(Parser)]
#[command(
    name = "attachmail",
    about = "Search a Gmail mailbox and download message attachments",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the web UI and JSON API (default)
    Serve {
        /// Address to bind, overrides SERVER_HOST
        #[arg(long)]
        host: Option<String>,

        /// Port to bind, overrides SERVER_PORT
        #[arg(long, short)]
        port: Option<u16>,
    },
    /// Search once and save every attachment into the download folder
    Fetch {
        /// Gmail search query, e.g. 'from:billing@example.com subject:"Your Invoice"'
        #[arg(long, short, default_value = DEFAULT_QUERY)]
        query: String,

        /// Download folder, overrides DOWNLOAD_DIR
        #[arg(long, short)]
        out: Option<PathBuf>,

        /// Maximum number of messages to inspect
        #[arg(long, short = 'n')]
        max_results: Option<u32>,
    },
    /// Authorize access to the mailbox and save the token
    Auth,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::from_env()?;

    let http = GmailProvider::http_client(config.gmail.http_timeout_secs)?;
    let session = Arc::new(AuthSession::new(
        config.gmail.token_path.clone(),
        config.gmail.credentials_path.clone(),
        OAuthClient::new(http.clone()),
    ));
    let provider: Arc<dyn MailProvider> =
        Arc::new(GmailProvider::new(http, config.gmail.api_base.clone()));

    match cli.command.unwrap_or(Commands::Serve {
        host: None,
        port: None,
    }) {
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            serve(config, session, provider).await
        }
        Commands::Fetch {
            query,
            out,
            max_results,
        } => {
            if let Some(out) = out {
                config.storage.download_dir = out;
            }
            fetch(config, session, provider, &query, max_results).await
        }
        Commands::Auth => session.authorize().await,
    }
}

async fn serve(
    config: AppConfig,
    session: Arc<AuthSession>,
    provider: Arc<dyn MailProvider>,
) -> anyhow::Result<()> {
    tracing::info!("attachmail starting...");
    tracing::info!("Credentials file: {}", config.gmail.credentials_path.display());
    tracing::info!(
        "Search cap: {} messages, {} concurrent fetches",
        config.search.max_results,
        config.search.concurrency
    );

    let search = Arc::new(SearchPipeline::new(
        provider.clone(),
        config.search.max_results,
        config.search.concurrency,
    ));

    let state = AppState {
        config: config.clone(),
        session,
        provider,
        search,
    };

    let app = api::router::build_router(state);

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Attachment downloader UI is running on http://{}", addr);
    tracing::info!(
        "Make sure {} is in place before authenticating",
        config.gmail.credentials_path.display()
    );

    axum::serve(listener, app).await?;

    Ok(())
}

/// One-shot batch mode: authorize, search, save everything
async fn fetch(
    config: AppConfig,
    session: Arc<AuthSession>,
    provider: Arc<dyn MailProvider>,
    query: &str,
    max_results: Option<u32>,
) -> anyhow::Result<()> {
    session.authorize().await?;

    let pipeline = SearchPipeline::new(
        provider.clone(),
        config.search.max_results,
        config.search.concurrency,
    )
    .with_max_results(max_results.unwrap_or(config.search.max_results));
    let outcome = pipeline.search(&session, query).await?;
    if outcome.emails.is_empty() {
        tracing::info!("No messages with attachments found");
        return Ok(());
    }

    let downloader = AttachmentDownloader::new(provider, config.storage.download_dir.clone());
    let report = downloader.download_all(&session, &outcome.emails).await?;

    tracing::info!(
        "Saved {} attachments to {} ({} failed)",
        report.saved.len(),
        downloader.download_dir().display(),
        report.failed
    );
    Ok(())
}
