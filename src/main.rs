// src/main.rs
use std::error::Error;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::time::Duration;

use axum_server::Handle;
use bal_voting::config::{load_dotenv, ClientConfig, ServerConfig};
use bal_voting::db::Store;
use bal_voting::models::CoupleUpdate;
use bal_voting::poll::Session;
use bal_voting::routes;
use bal_voting::services::ApiClient;
use bal_voting::state::AppState;
use bal_voting::view::TerminalView;
use bal_voting::voter::FileStorage;
use bal_voting::watch;
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

type BoxError = Box<dyn Error + Send + Sync>;

#[derive(Parser)]
#[command(name = "bal-voting", version, about = "Event voting server and attendee client")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the voting API (default)
    Serve,
    /// Follow the vote from a terminal; type `vote <id>` to vote
    Watch,
    /// Admin actions against a running server
    Admin {
        /// Shared admin secret
        #[arg(long, env = "ADMIN_PASSWORD", hide_env_values = true)]
        password: String,
        #[command(subcommand)]
        action: AdminAction,
    },
}

#[derive(Subcommand)]
enum AdminAction {
    /// Zero all votes and re-open voting for every attendee
    Reset,
    /// Show or hide the results
    ToggleResults,
    /// Change a contestant's name and image
    Rename {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        name: String,
        /// Defaults to the current image
        #[arg(long)]
        image: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    load_dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bal_voting=info,tower_http=debug".into()),
        )
        .init();

    let cli = Cli::parse();
    let result = match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve().await,
        Commands::Watch => watch_votes().await,
        Commands::Admin { password, action } => admin(&password, action).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn serve() -> Result<(), BoxError> {
    let config = ServerConfig::from_env()?;

    let store = Store::open(&config.storage).await?;
    info!(backend = store.backend_name(), "Storage ready");

    let app = routes::create_routes(AppState::new(store, config.admin_password));

    let address = SocketAddr::new(config.host, config.port);
    let handle = Handle::new();
    tokio::spawn(shutdown_signal(handle.clone()));

    info!("Voting server listening on http://{address}");
    axum_server::bind(address)
        .handle(handle)
        .serve(app.into_make_service())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn watch_votes() -> Result<(), BoxError> {
    let config = ClientConfig::from_env()?;
    let storage = FileStorage::open(&config.voter_state_path)?;
    let session = Session::new(storage, TerminalView::new(std::io::stdout()));

    watch::run(&config, session).await?;
    Ok(())
}

async fn admin(password: &str, action: AdminAction) -> Result<(), BoxError> {
    let config = ClientConfig::from_env()?;
    let client = ApiClient::new(&config.api_url, config.request_timeout)?;

    match action {
        AdminAction::Reset => {
            let last_reset = client.reset(password).await?;
            info!(last_reset, "Votes reset");
        }
        AdminAction::ToggleResults => {
            let visible = client.toggle_results(password).await?;
            info!(visible, "Results visibility toggled");
        }
        AdminAction::Rename { id, name, image } => {
            let image = match image {
                Some(image) => image,
                None => client
                    .fetch_snapshot()
                    .await?
                    .couples
                    .into_iter()
                    .find(|c| c.id == id)
                    .map(|c| c.image)
                    .ok_or_else(|| format!("Couple {id} not found"))?,
            };
            let couples = client
                .update_couples(password, &[CoupleUpdate { id, name, image }])
                .await?;
            info!(couples = couples.len(), "Couple updated");
        }
    }

    Ok(())
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                error!("Failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    handle.graceful_shutdown(Some(Duration::from_secs(10)));
}
