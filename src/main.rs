#![allow(clippy::manual_unwrap_or_default)]
#![allow(clippy::manual_unwrap_or)]
use chatgate::constants::ENV_STATIC_CREDENTIALS;
use chatgate::db::{init_db, seed_static_credentials};
use chatgate::intent::KeywordTables;
use chatgate::main_helper::{creator_passphrase_from_env, BackendKeys};
use chatgate::redaction::RedactingWriter;
use chatgate::routes::build_router;
use chatgate::*;

use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::prelude::*;

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, draining connections");
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => "chatgate=debug,tower_http=info".into(),
    };

    let _ = std::fs::create_dir_all(&args.log_dir);
    let file_appender = tracing_appender::rolling::daily(&args.log_dir, "chatgate.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let text_writer = non_blocking.clone();
    let file_text_layer = (!args.json_logs).then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(move || RedactingWriter::new(text_writer.clone()))
            .with_ansi(false)
    });
    let json_writer = non_blocking.clone();
    let file_json_layer = args.json_logs.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(move || RedactingWriter::new(json_writer.clone()))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stdout))
        .with(file_text_layer)
        .with(file_json_layer)
        .with(tracing_error::ErrorLayer::default())
        .init();

    chatgate::logging::setup_panic_hook();

    let db = match init_db(&args.database).await {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("Failed to initialize database: {}", e);
            std::process::exit(1);
        }
    };

    if let Ok(entries) = std::env::var(ENV_STATIC_CREDENTIALS) {
        match seed_static_credentials(&entries, &db).await {
            Ok(n) => tracing::info!("Seeded {} static credentials", n),
            Err(e) => tracing::error!("Failed to seed static credentials: {}", e),
        }
    }

    let keys = match BackendKeys::from_env() {
        Ok(k) => k,
        Err(e) => {
            eprintln!("Error: {}", e.inner);
            eprintln!("Please set it in your .env file or environment.");
            std::process::exit(1);
        }
    };
    tracing::debug!("Backend keys: {:?}", keys);

    let keywords = match &args.keywords {
        Some(path) => match KeywordTables::from_file(path) {
            Ok(k) => k,
            Err(e) => {
                eprintln!("Failed to load keyword tables from {}: {}", path, e.inner);
                std::process::exit(1);
            }
        },
        None => KeywordTables::default(),
    };

    let passphrase = creator_passphrase_from_env();
    if passphrase.is_none() {
        tracing::info!("No creator pass-phrase configured; creator authentication disabled");
    }

    let addr = format!("{}:{}", args.host, args.port);
    let state = match AppState::new(args, db, keys, keywords, passphrase) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            tracing::error!("Failed to build application state: {}", e);
            std::process::exit(1);
        }
    };
    tracing::info!(
        "Backends: chat={} reasoning={} image={}",
        state.backends.chat.is_configured(),
        state.backends.reasoning.is_configured(),
        state.backends.image.is_configured()
    );

    let app = build_router(state);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    tracing::info!("chatgate listening on {}", addr);
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!("Server error: {}", e);
    }
}
