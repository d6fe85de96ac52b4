// Módulos de la aplicación
mod agents;
mod api;
mod app_state;
mod cli;
mod config;
mod documents;
mod error;
mod llm;
mod models;
mod orchestrator;
mod rag;
mod system;
#[cfg(test)]
mod testing;
mod tools;
mod validation;
mod vector_store;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tokio::sync::oneshot;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::cli::Command;
use crate::system::SupportSystem;

#[tokio::main]
async fn main() -> ExitCode {
    // 1. Cargar .env y parsear argumentos
    dotenvy::dotenv().ok();
    let cli = match cli::parse_args(std::env::args().skip(1)) {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("{e}\n\n{}", cli::USAGE);
            return ExitCode::from(2);
        }
    };

    // 2. Logging a stderr: stdout queda para las respuestas
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if cli.command == Command::Help {
        println!("{}", cli::USAGE);
        return ExitCode::SUCCESS;
    }

    match run(cli.command).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> Result<ExitCode> {
    // 3. Cargar configuración y montar el sistema
    let cfg = config::AppConfig::from_env().context("Error al cargar la configuración")?;
    let system = Arc::new(SupportSystem::from_config(cfg));

    match command {
        Command::Serve => {
            serve(system).await?;
            Ok(ExitCode::SUCCESS)
        }
        other => cli::run(other, &system).await,
    }
}

async fn serve(system: Arc<SupportSystem>) -> Result<()> {
    system.warm_up().await;

    // Crear canal para la señal de apagado.
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let app_state = AppState::new(system.clone(), shutdown_tx);

    let app = Router::new()
        .merge(api::create_router(app_state))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let server_addr = &system.config().server_addr;
    let listener = tokio::net::TcpListener::bind(server_addr)
        .await
        .with_context(|| format!("No se pudo escuchar en {server_addr}"))?;
    info!("🚀 Servidor escuchando en http://{}", server_addr);

    // Apagado ordenado: POST /api/shutdown o Ctrl+C.
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::select! {
                _ = shutdown_rx => {}
                _ = tokio::signal::ctrl_c() => {}
            }
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await
        .context("Error en el servidor HTTP")?;

    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}
