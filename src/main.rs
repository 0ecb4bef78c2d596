use bookshelf::app;
use bookshelf::config::{Cli, Config, default_config_dir, default_config_path};
use bookshelf::db::Database;
use bookshelf::handler::AppState;
use bookshelf::view::Views;
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let args = Cli::parse();

    // With --config the database lives next to the config file,
    // otherwise both live in ~/.bookshelf/
    let (config_path, data_dir) = match args.config_path {
        Some(path) => {
            let path = std::path::PathBuf::from(path);
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| std::path::PathBuf::from("."));
            (path, dir)
        }
        None => (default_config_path(), default_config_dir()),
    };

    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        eprintln!("failed to create data directory {:?}: {}", data_dir, e);
        std::process::exit(1);
    }

    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    tracing::info!("bookshelf.svc starting");

    let mut cfg = Config::load_or_default(&config_path).unwrap_or_else(|e| {
        tracing::error!(error = %e, path = ?config_path, "failed to load config file");
        std::process::exit(1);
    });
    if let Some(port) = args.port {
        cfg.app.set_port(port);
    }

    let db = Database::new(&cfg, &data_dir).await.unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to setup database");
        std::process::exit(1);
    });
    let views = Views::new().unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to load templates");
        std::process::exit(1);
    });

    let state = AppState::new(db, views);
    let router = app(state.clone());

    let address = cfg.app.address();
    let listener = tokio::net::TcpListener::bind(&address).await.unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to setup tcp listener");
        std::process::exit(1);
    });

    let cancellation_token = CancellationToken::new();
    let shutdown_token = cancellation_token.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            tracing::info!("ctrl+c signal received, preparing to shutdown");
        }
        shutdown_token.cancel();
    });

    tracing::info!("bookshelf.svc running on {}", &address);
    if let Err(err) = axum::serve(listener, router)
        .with_graceful_shutdown(cancellation_token.cancelled_owned())
        .await
    {
        tracing::error!(error = %err, "server error");
        std::process::exit(1);
    }

    if let Err(e) = state.db.sync().await {
        tracing::warn!(error = %e, "final sync failed");
    }
    tracing::info!("bookshelf.svc going off, graceful shutdown complete");
}
