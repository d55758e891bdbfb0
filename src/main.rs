use clap::Parser;
use tracing::info;

use record_store::config::Config;
use record_store::database::Database;
use record_store::records::RecordStore;
use record_store::{Server, api};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    // Storage must be usable before anything is served.
    let db = Database::open(&config.database())?;
    let app = api::app(RecordStore::new(db), config.gzip_level);

    let server = Server::bind(&config.listen)
        .await?
        .max_request_size(config.max_request_bytes);
    server
        .run_until(
            move |req| {
                let app = app.clone();
                async move { app.handle(req).await }
            },
            async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "failed to listen for Ctrl+C");
                    std::future::pending::<()>().await;
                }
            },
        )
        .await?;

    info!("shutdown complete");
    Ok(())
}
