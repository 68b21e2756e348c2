use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crewsheet::http::{build_router, AppState};
use crewsheet::zoho::ZohoClient;
use crewsheet::{config, db};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(args.config.as_path()))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/crewsheet.db", cfg.app.data_dir));

    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let zoho = Arc::new(ZohoClient::from_config(&cfg)?);
    let state = AppState::new(pool, zoho, Arc::new(cfg.clone()));
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&cfg.app.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", cfg.app.bind_addr))?;
    info!(addr = %cfg.app.bind_addr, "starting timesheet portal API");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    Ok(())
}
