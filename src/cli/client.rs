//! Subcommand dispatch for `jobctl`, mirroring the original reference
//! client's `exec`/`status`/`stop`/`logs` switch.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_stream::StreamExt;
use tonic::transport::{Channel, Endpoint};

use crate::config::ClientConfig;
use crate::proto::job_worker_client::JobWorkerClient;
use crate::proto::{ExecRequest, LogsRequest, StatusRequest, StopRequest};

#[derive(Parser, Debug)]
#[command(name = "jobctl", about = "Client for the job-worker service")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Server address, e.g. https://127.0.0.1:8888
    #[arg(long, global = true)]
    pub server: Option<String>,

    #[arg(long, global = true)]
    pub cert: Option<std::path::PathBuf>,

    #[arg(long, global = true)]
    pub key: Option<std::path::PathBuf>,

    #[arg(long, global = true)]
    pub ca: Option<std::path::PathBuf>,

    #[arg(long, global = true)]
    pub config: Option<std::path::PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start a command as a new job.
    Exec {
        command: String,
        args: Vec<String>,
    },
    /// Query a job's status.
    Status { id: String },
    /// Request termination of a running job.
    Stop { id: String },
    /// Tail a job's combined stdout/stderr.
    Logs { id: String },
}

impl Cli {
    /// Run the selected subcommand against the configured server.
    /// Returns the process exit code (0 success, 1 error), matching
    /// the reference CLI's convention.
    pub async fn run(self) -> i32 {
        match self.execute().await {
            Ok(()) => 0,
            Err(err) => {
                eprintln!("error: {err}");
                1
            }
        }
    }

    async fn execute(self) -> anyhow::Result<()> {
        let config = ClientConfig::resolve(crate::config::ClientOverrides {
            config_file: self.config,
            server_addr: self.server,
            client_cert: self.cert,
            client_key: self.key,
            ca_cert: self.ca,
        })?;

        let mut client = connect(&config).await?;

        match self.command {
            Command::Exec { command, args } => {
                let resp = client
                    .exec(ExecRequest { command, args })
                    .await?
                    .into_inner();
                println!("{}", resp.id);
            }
            Command::Status { id } => {
                let resp = client.status(StatusRequest { id }).await?.into_inner();
                println!(
                    "status={} exit_code={} error={}",
                    resp.status, resp.exit_code, resp.error
                );
            }
            Command::Stop { id } => {
                let resp = client.stop(StopRequest { id }).await?.into_inner();
                println!("success={}", resp.success);
            }
            Command::Logs { id } => {
                let mut stream = client.logs(LogsRequest { id }).await?.into_inner();
                use std::io::Write;
                let stdout = std::io::stdout();
                let mut handle = stdout.lock();
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk?;
                    handle.write_all(&chunk.log)?;
                }
            }
        }

        Ok(())
    }
}

/// Dial the server, presenting the configured client certificate and
/// validating the server against the configured CA — the client-side
/// half of the mutual-TLS handshake spec.md §6 requires.
async fn connect(config: &ClientConfig) -> anyhow::Result<JobWorkerClient<Channel>> {
    let tls_config = crate::api::tls::load_client_tls(
        &config.client_cert,
        &config.client_key,
        &config.ca_cert,
    )?;
    let tls_config = Arc::new(tls_config);
    let server_addr = config.server_addr.clone();

    let endpoint = Endpoint::try_from(server_addr.clone())?;
    let channel = endpoint
        .connect_with_connector(tower::service_fn(move |_uri: tonic::transport::Uri| {
            let tls_config = tls_config.clone();
            let server_addr = server_addr.clone();
            Box::pin(async move {
                let host = tonic::transport::Uri::try_from(server_addr.as_str())
                    .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)?
                    .host()
                    .unwrap_or("localhost")
                    .to_string();
                let server_name = rustls::pki_types::ServerName::try_from(host)
                    .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)?;
                let connector = tokio_rustls::TlsConnector::from(tls_config);
                let addr = server_addr
                    .trim_start_matches("https://")
                    .trim_start_matches("http://");
                let tcp = tokio::net::TcpStream::connect(addr).await?;
                let tls = connector.connect(server_name, tcp).await?;
                Ok::<_, Box<dyn std::error::Error + Send + Sync>>(hyper_util::rt::TokioIo::new(tls))
            })
        }))
        .await?;

    Ok(JobWorkerClient::new(channel))
}
