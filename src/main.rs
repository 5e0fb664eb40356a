use clap::Parser;
use dotenv::dotenv;
use tokio::signal;
use tracing_subscriber::EnvFilter;

mod api;
mod cli;
mod crawl;
mod error;
mod models;

use cli::Cli;
use models::AppState;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Initialize environment
    dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse command-line arguments
    let cli = Cli::parse();

    let state = AppState::new();

    // Start the supervised crawl worker
    let crawler = tokio::spawn(crawl::run_supervised(state.clone(), cli.clone()));

    // Start the web server
    let app = api::router(state);
    let listener = tokio::net::TcpListener::bind((cli.bind.as_str(), cli.port)).await?;
    tracing::info!("Server started and listening on {}:{}", cli.bind, cli.port);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = signal::ctrl_c().await {
                tracing::error!("Error handling shutdown signal: {}", e);
            }
            tracing::info!("Received shutdown signal, beginning graceful shutdown...");
        })
        .await?;

    crawler.abort();
    tracing::info!("Shutdown complete");
    Ok(())
}
