//! chainward engine binary.
//!
//! - ext_proc gRPC server on a Unix socket shared with the proxy
//! - optional admin HTTP listener (`/healthz`, `/readyz`, `/metrics`, `/routes`)
//! - optional file-backed route table, re-applied when it changes

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;

use chainward_core::error::{ChainwardError, Result};
use chainward_engine::{
    app_state::AppState,
    builtin,
    condition::LiteralEvaluator,
    config,
    control::{self, FileRouteSource, RouteSource},
    kernel::PolicyRegistry,
    logging, router, transport,
};

#[derive(Debug, Parser)]
#[command(name = "chainward", version, about = "Policy execution engine for proxy external processing")]
struct Args {
    /// Path to the engine config file.
    #[arg(short, long, default_value = "chainward.yaml")]
    config: String,

    /// Validate config, build every chain (including the routes file) and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("chainward: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let cfg = config::load_from_file(&args.config)?;
    if !args.check {
        logging::init(&cfg.logging)?;
    }

    let policies = PolicyRegistry::new();
    builtin::register_builtins(&policies);
    let state = AppState::new(cfg, policies, Arc::new(LiteralEvaluator))?;

    if args.check {
        if let Some(path) = &state.cfg().control_plane.routes_file {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ChainwardError::Config(format!("read {path} failed: {e}")))?;
            let doc = config::load_routes_from_str(&text)?;
            control::sync_routes(&state, &doc.routes)?;
        }
        println!("{}: ok ({} routes)", args.config, state.kernel().len());
        return Ok(());
    }

    if let Some(path) = state.cfg().control_plane.routes_file.clone() {
        let source: Arc<dyn RouteSource> = Arc::new(FileRouteSource::new(path));
        // the first load must succeed; later failures keep the last good table
        control::sync_once(&state, source.as_ref()).await?;
        let interval = Duration::from_millis(state.cfg().control_plane.reload_interval_ms);
        tokio::spawn(control::run_sync_loop(state.clone(), source, interval));
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    if let Some(addr) = state.cfg().server.admin_listen.clone() {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|e| ChainwardError::Config(format!("server.admin_listen: {e}")))?;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ChainwardError::Internal(format!("bind admin {addr} failed: {e}")))?;
        tracing::info!(%addr, "admin listening");
        let app = router::build_admin_router(state.clone());
        let mut rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = rx.changed().await;
                })
                .await;
            if let Err(e) = served {
                tracing::error!(error = %e, "admin server failed");
            }
        });
    }

    let draining = state.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        draining.set_draining();
        let _ = shutdown_tx.send(true);
    });

    let mut rx = shutdown_rx;
    tracing::info!(routes = state.kernel().len(), "chainward starting");
    transport::serve_uds(state, async move {
        let _ = rx.changed().await;
    })
    .await?;

    tracing::info!("chainward stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
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
    tracing::info!("signal received, draining");
}
