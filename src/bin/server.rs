//! `job-workerd`: the job-worker gRPC server.
//!
//! Binds a TCP listener, terminates mutual TLS itself (so the cipher
//! suite/protocol-version restriction in spec.md §6 is enforced
//! exactly, rather than relying on whatever a transport-provided TLS
//! layer happens to default to), authenticates every request via the
//! peer certificate's CommonName, and on SIGINT/SIGTERM drains running
//! jobs before exiting — the graceful-shutdown fix spec.md §9 calls
//! for.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures_util::stream::StreamExt;
use job_worker::api::middleware::authenticate;
use job_worker::api::tls::{load_server_tls, TlsStream};
use job_worker::api::JobService;
use job_worker::config::{ServerConfig, ServerOverrides};
use job_worker::core::job::JobStatus;
use job_worker::core::store::JobStore;
use job_worker::proto::job_worker_server::JobWorkerServer;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{info, warn};

/// How long shutdown waits for interrupted jobs to exit before
/// force-killing them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "job-workerd", about = "Remote job-worker gRPC server")]
struct Args {
    #[arg(long)]
    listen_addr: Option<String>,
    #[arg(long)]
    server_cert: Option<PathBuf>,
    #[arg(long)]
    server_key: Option<PathBuf>,
    #[arg(long)]
    ca_cert: Option<PathBuf>,
    #[arg(long)]
    config: Option<PathBuf>,
    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = ServerConfig::resolve(ServerOverrides {
        config_file: args.config,
        listen_addr: args.listen_addr,
        server_cert: args.server_cert,
        server_key: args.server_key,
        ca_cert: args.ca_cert,
    })?;

    let tls_config = load_server_tls(&config.server_cert, &config.server_key, &config.ca_cert)?;
    let acceptor = TlsAcceptor::from(Arc::new(tls_config));

    let store = Arc::new(JobStore::new());
    let service = JobService::new(store.clone());

    let listener = TcpListener::bind(config.listen_addr).await?;
    info!(addr = %config.listen_addr, "listening");

    let incoming = accept_stream(listener, acceptor);

    let router = tonic::transport::Server::builder()
        .layer(tonic::service::interceptor(authenticate))
        .add_service(JobWorkerServer::new(service));

    tokio::select! {
        result = router.serve_with_incoming(incoming) => {
            result?;
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received, draining jobs");
        }
    }

    drain_jobs(&store).await;
    Ok(())
}

fn accept_stream(
    listener: TcpListener,
    acceptor: TlsAcceptor,
) -> impl futures_util::Stream<Item = std::io::Result<TlsStream>> {
    async_stream::stream! {
        loop {
            let (tcp, peer) = match listener.accept().await {
                Ok(pair) => pair,
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    continue;
                }
            };
            match acceptor.accept(tcp).await {
                Ok(tls) => {
                    yield Ok(TlsStream::new(tls));
                }
                Err(err) => {
                    warn!(%peer, error = %err, "tls handshake failed");
                }
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        sigterm.recv().await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Signal every still-running job to stop, wait briefly, then force
/// kill stragglers. Closing their output writers lets in-flight Logs
/// streams see end-of-stream instead of a dangling error.
async fn drain_jobs(store: &JobStore) {
    let jobs = store.all();
    for job in &jobs {
        if job.status() == JobStatus::Running {
            let _ = job.interrupt();
        }
    }

    tokio::time::sleep(SHUTDOWN_GRACE).await;

    for job in &jobs {
        if job.status() == JobStatus::Running {
            let _ = job.kill();
        }
    }
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();
}
