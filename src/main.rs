use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chathub::cli::{self, ChatbotCommands, Commands, CredentialCommands};
use chathub::store::{MemoryStore, PgStore, Store};
use chathub::{api, config, vault, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    // OTLP export only when a collector endpoint is configured.
    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let installed = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "chathub"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio);
        match installed {
            Ok(tracer) => Some(tracing_opentelemetry::layer().with_tracer(tracer)),
            Err(e) => {
                eprintln!("OpenTelemetry exporter disabled: {}", e);
                None
            }
        }
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "chathub=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry_layer)
        .init();

    let args = cli::Cli::parse();

    // keygen must work before a master key exists
    if let Some(Commands::Keygen) = args.command {
        println!("{}", vault::builtin::generate_master_key_hex());
        return Ok(());
    }

    let cfg = config::load()?;

    let result = match args.command {
        Some(Commands::Serve { port, in_memory }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port, in_memory).await
        }
        Some(Commands::Credential { command }) => {
            let state = connect_state(cfg).await?;
            handle_credential_command(command, &state).await
        }
        Some(Commands::Chatbot { command }) => {
            let state = connect_state(cfg).await?;
            handle_chatbot_command(command, &state).await
        }
        Some(Commands::Keygen) => Ok(()),
        None => {
            let port = cfg.port;
            run_server(cfg, port, false).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

async fn connect_state(cfg: config::Config) -> anyhow::Result<Arc<AppState>> {
    let db = PgStore::connect(&cfg.database_url)
        .await
        .context("failed to connect to database")?;
    let store: Arc<dyn Store> = Arc::new(db);
    Ok(Arc::new(AppState::build(cfg, store)?))
}

async fn run_server(cfg: config::Config, port: u16, in_memory: bool) -> anyhow::Result<()> {
    let store: Arc<dyn Store> = if in_memory {
        tracing::warn!("Using in-memory store; all data is lost on shutdown");
        Arc::new(MemoryStore::new())
    } else {
        tracing::info!("Connecting to database...");
        let db = PgStore::connect(&cfg.database_url).await?;
        tracing::info!("Running migrations...");
        db.migrate().await?;
        Arc::new(db)
    };

    let dashboard_origin = cfg.dashboard_origin.clone();
    let state = Arc::new(AppState::build(cfg, store)?);
    tracing::info!(
        integrations = ?state.registry.service_types(),
        "Integration registry ready"
    );

    let app = api::app_router(state)
        .layer(DefaultBodyLimit::max(2 * 1024 * 1024))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer({
            use axum::http::{HeaderName, Method};
            use tower_http::cors::AllowOrigin;
            let dashboard_origin =
                dashboard_origin.unwrap_or_else(|| "http://localhost:3000".to_string());
            CorsLayer::new()
                .allow_origin(AllowOrigin::predicate(move |origin, _| {
                    let origin_str = origin.to_str().unwrap_or("");
                    origin_str == dashboard_origin
                        || origin_str.starts_with("http://localhost:")
                        || origin_str.starts_with("http://127.0.0.1:")
                }))
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PUT,
                    Method::DELETE,
                    Method::PATCH,
                    Method::OPTIONS,
                ])
                .allow_headers([
                    HeaderName::from_static("content-type"),
                    HeaderName::from_static("authorization"),
                    HeaderName::from_static("x-request-id"),
                ])
                .allow_credentials(true)
        })
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(axum::middleware::from_fn(security_headers_middleware));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("chathub listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Middleware: injects a unique X-Request-Id into every response.
async fn request_id_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = axum::http::HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}

/// Middleware: security headers on every response.
async fn security_headers_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    use axum::http::HeaderValue;

    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();
    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    // API responses may carry credential descriptors
    headers.insert("Cache-Control", HeaderValue::from_static("no-store"));
    headers.insert("Referrer-Policy", HeaderValue::from_static("no-referrer"));
    headers.remove("Server");
    resp
}

async fn handle_credential_command(
    cmd: CredentialCommands,
    state: &Arc<AppState>,
) -> anyhow::Result<()> {
    match cmd {
        CredentialCommands::List { org, service_type } => {
            let rows = state
                .credentials
                .list(org, service_type.as_deref())
                .await
                .map_err(|e| anyhow::anyhow!("{}", e))?;
            if rows.is_empty() {
                println!("No credentials found.");
            } else {
                println!(
                    "{:<38} {:<8} {:<30} {:<8}",
                    "ID", "SERVICE", "LABEL", "STATUS"
                );
                for c in rows {
                    println!(
                        "{:<38} {:<8} {:<30} {:<8}",
                        c.id, c.service_type, c.label, c.status
                    );
                }
            }
        }
        CredentialCommands::Test { org, id } => {
            let result = state
                .credentials
                .test(org, id, state.config.outbound_timeout)
                .await
                .map_err(|e| anyhow::anyhow!("{}", e))?;
            println!(
                "{}: {}",
                if result.success { "OK" } else { "FAILED" },
                result.message
            );
            if let Some(details) = result.details {
                println!("{}", serde_json::to_string_pretty(&details)?);
            }
        }
    }
    Ok(())
}

async fn handle_chatbot_command(cmd: ChatbotCommands, state: &Arc<AppState>) -> anyhow::Result<()> {
    match cmd {
        ChatbotCommands::Create { org, name } => {
            let bot = state
                .connectors
                .create_chatbot(org, &name)
                .await
                .map_err(|e| anyhow::anyhow!("{}", e))?;
            println!("Chatbot created:\n  Name: {}\n  ID:   {}", bot.name, bot.id);
            println!("  Slack events URL: /webhooks/slack/{}", bot.id);
        }
        ChatbotCommands::Link { org, chatbot, connector } => {
            state
                .connectors
                .link(org, chatbot, connector)
                .await
                .map_err(|e| anyhow::anyhow!("{}", e))?;
            println!("Connector {} linked to chatbot {}.", connector, chatbot);
        }
    }
    Ok(())
}
