use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tacedge_gateway::audit::AuditLog;
use tacedge_gateway::auth::JwtSecret;
use tacedge_gateway::clock::SystemClock;
use tacedge_gateway::config::GatewayConfig;
use tacedge_gateway::crypto::CryptoEngine;
use tacedge_gateway::http::{self, AppState};
use tacedge_gateway::node_registry::StaticNodeRegistry;
use tacedge_gateway::pipeline::Pipeline;
use tacedge_gateway::queue::{DrainWorker, PriorityQueue};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the gateway's YAML configuration file.
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the gateway's HTTP server. The default when no subcommand is given.
    Serve,
    /// Inspect the tamper-evident audit log without starting the server.
    Audit {
        #[command(subcommand)]
        action: AuditAction,
    },
}

#[derive(Subcommand, Debug)]
enum AuditAction {
    /// Print every retained audit event as pretty-printed JSON.
    Export,
    /// Recompute every retained event's integrity hash and report mismatches.
    Verify,
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();
    let config = GatewayConfig::load(Some(&args.config)).context("failed to load gateway configuration")?;

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Audit { action } => run_audit_action(config, action).await,
    }
}

async fn serve(config: GatewayConfig) -> anyhow::Result<()> {
    let clock = Arc::new(SystemClock);
    let audit = Arc::new(AuditLog::new(clock.clone()).with_file_backing(config.audit_dir.clone()));
    let backend = PriorityQueue::resolve_backend(config.redis_url.as_deref()).await;
    let nodes = Arc::new(StaticNodeRegistry::default());
    let queue = Arc::new(PriorityQueue::new(backend, clock.clone()).with_nodes(nodes.clone()));
    let crypto = Arc::new(CryptoEngine::new(config.encryption_key.clone()));

    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install prometheus metrics recorder")?;

    let bind_addr = config.bind_addr.clone();
    let jwt_secret = JwtSecret(config.jwt_secret.clone());
    let drain_interval_ms = config.drain_interval_ms;
    let pipeline = Arc::new(Pipeline::new(config, audit.clone(), queue.clone(), nodes.clone(), clock.clone()));

    DrainWorker::new(
        queue.clone(),
        audit.clone(),
        nodes,
        clock.clone(),
        tokio::time::Duration::from_millis(drain_interval_ms),
    )
    .with_observer(pipeline.clone())
    .spawn();

    let state = AppState {
        pipeline,
        queue,
        audit,
        crypto,
        clock,
        jwt_secret,
        metrics: metrics_handle,
    };

    let router = http::router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;

    tracing::info!(%bind_addr, "tactical edge gateway listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gateway server exited with an error")
}

async fn run_audit_action(config: GatewayConfig, action: AuditAction) -> anyhow::Result<()> {
    let clock = Arc::new(SystemClock);
    let audit = AuditLog::new(clock).with_file_backing(config.audit_dir);

    match action {
        AuditAction::Export => {
            println!("{}", audit.export());
            Ok(())
        }
        AuditAction::Verify => {
            let mut query = tacedge_gateway::audit::AuditQuery::new();
            query.limit = usize::MAX;
            let mismatches: Vec<_> = audit
                .query(&query)
                .into_iter()
                .filter(|event| !audit.verify_integrity(event))
                .collect();

            if mismatches.is_empty() {
                println!("all retained audit events verified clean");
                Ok(())
            } else {
                for event in &mismatches {
                    eprintln!("integrity check failed for event {}", event.event_id);
                }
                anyhow::bail!("{} audit event(s) failed integrity verification", mismatches.len());
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
