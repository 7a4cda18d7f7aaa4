use std::io::Write as _;
use std::time::Duration;

use axum::{Router, routing::post};
use clap::Parser;
use rmcp::ServiceExt;
use rmcp::transport::stdio;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use plan_review_server::config::{Cli, Command, ServerConfig, ServeArgs, Transport};
use plan_review_server::engine::ReviewEngine;
use plan_review_server::events::EventBus;
use plan_review_server::http::{self, AppState};
use plan_review_server::mcp::PlanReviewMcpServer;
use plan_review_server::mcp_http;
use plan_review_server::store::ContentStore;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // All logs go to stderr: stdout is reserved for the single ready-line
    // the interceptor parses to learn where to connect.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Attempt `preferred_port` first; on `EADDRINUSE` fall back to an
/// OS-assigned ephemeral port.
async fn bind_listener(preferred_port: u16) -> std::io::Result<TcpListener> {
    match TcpListener::bind(("127.0.0.1", preferred_port)).await {
        Ok(listener) => Ok(listener),
        Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
            warn!(preferred_port, "port in use, falling back to an ephemeral port");
            TcpListener::bind(("127.0.0.1", 0)).await
        }
        Err(err) => Err(err),
    }
}

fn emit_ready_line(port: u16) {
    let line = serde_json::json!({ "status": "ready", "port": port }).to_string();
    let mut stdout = std::io::stdout();
    let _ = writeln!(stdout, "{line}");
    let _ = stdout.flush();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

async fn idle_watchdog(state: AppState) {
    let idle_timeout = Duration::from_secs(state.config.idle_timeout_secs);
    let mut interval = tokio::time::interval(Duration::from_secs(5));
    loop {
        interval.tick().await;
        if state.activity.idle_for() >= idle_timeout {
            info!(idle_timeout_secs = state.config.idle_timeout_secs, "idle timeout reached, shutting down");
            return;
        }
    }
}

async fn run_serve(args: ServeArgs) -> anyhow::Result<()> {
    let config = ServerConfig::default().apply_env_overrides().apply_cli(&args);

    let store = ContentStore::new(config.data_root.clone());
    let engine = ReviewEngine::new(store, EventBus::new());
    let state = AppState::new(engine.clone(), config.clone());

    let mut app: Router = http::router(state.clone());
    if args.transport == Transport::Http {
        let mcp_router = Router::new()
            .route("/mcp", post(mcp_http::handle))
            .with_state(state.clone());
        app = app.merge(mcp_router);
    }

    let listener = bind_listener(config.preferred_port).await?;
    let port = listener.local_addr()?.port();
    emit_ready_line(port);
    info!(port, transport = ?args.transport, "plan review server starting");

    let mcp_task = match args.transport {
        Transport::Stdio => {
            let ask_questions_timeout = Duration::from_secs(config.ask_questions_timeout_secs);
            let mcp_server = PlanReviewMcpServer::with_default_project(
                engine.clone(),
                ask_questions_timeout,
                config.default_project.clone(),
            );
            Some(tokio::spawn(async move {
                let service = match mcp_server.serve(stdio()).await {
                    Ok(service) => service,
                    Err(err) => {
                        warn!(%err, "failed to start stdio MCP transport");
                        return;
                    }
                };
                if let Err(err) = service.waiting().await {
                    warn!(%err, "stdio MCP transport ended with an error");
                }
            }))
        }
        Transport::Http => None,
    };

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());

    tokio::select! {
        result = server => {
            if let Err(err) = result {
                warn!(%err, "http server exited with an error");
            }
        }
        _ = idle_watchdog(state) => {}
    }

    if let Some(task) = mcp_task {
        task.abort();
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing();

    let result = match cli.command {
        Command::Serve(args) => run_serve(args).await,
    };

    if let Err(err) = result {
        warn!(%err, "startup failed");
        std::process::exit(1);
    }
}
