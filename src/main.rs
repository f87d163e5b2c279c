//! `mjpeg-httpd` command line server
//!
//! ```text
//! mjpeg-httpd -s 8080 --sysadmin /status -d /var/www \
//!     /cam "/dev/video0 med" \
//!     /raw "v4l2src ! video/x-raw,width=320,height=240 ! jpegenc"
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use mjpeg_httpd::config_file::{self, Mapping};
use mjpeg_httpd::handlers::{StaticFiles, StatusHandler};
use mjpeg_httpd::media::CommandProducerFactory;
use mjpeg_httpd::stats::SystemStats;
use mjpeg_httpd::{HttpServer, ServerConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "HTTP server for live MJPEG streams")]
struct Args {
    /// Mapping file
    #[arg(short = 'f', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short = 'a', long, default_value = "0.0.0.0")]
    address: String,

    /// Port number, or one of the service names http, www, http-alt, webcache
    #[arg(short = 's', long, value_name = "SERVICE", default_value = "8080")]
    service: String,

    /// Serve static files from this directory for unmatched paths
    #[arg(short = 'd', long, value_name = "PATH")]
    docroot: Option<PathBuf>,

    /// Path of the server status page
    #[arg(long, value_name = "PATH")]
    sysadmin: Option<String>,

    /// Write the process ID to this file
    #[arg(short = 'p', long, value_name = "FILE")]
    pidfile: Option<PathBuf>,

    /// gst-launch binary used to run pipelines
    #[arg(long, default_value = "gst-launch-1.0")]
    launcher: PathBuf,

    /// Stream mappings as PATH PIPELINE pairs
    #[arg(value_name = "PATH PIPELINE")]
    mappings: Vec<String>,
}

impl Args {
    fn command_line_mappings(&self) -> Vec<Mapping> {
        if self.mappings.len() % 2 != 0 {
            tracing::warn!(
                argument = %self.mappings[self.mappings.len() - 1],
                "Ignoring path without pipeline"
            );
        }
        self.mappings
            .chunks_exact(2)
            .map(|pair| Mapping::new(pair[0].as_str(), pair[1].as_str()))
            .collect()
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "mjpeg-httpd starting");

    let config = ServerConfig::with_addr(args.address.as_str(), args.service.as_str());
    let factory = Arc::new(CommandProducerFactory::with_launcher(args.launcher.clone()));
    let server = HttpServer::new(config, factory);

    let mut mappings = Vec::new();
    if let Some(file) = &args.config {
        mappings.extend(
            config_file::load(file)
                .with_context(|| format!("failed to read mapping file {}", file.display()))?,
        );
    }
    mappings.extend(args.command_line_mappings());

    for mapping in &mappings {
        let options = mapping.stream_options()?;
        server
            .add_stream(&mapping.path, &mapping.pipeline, options)
            .with_context(|| format!("invalid mapping for {}", mapping.path))?;
    }

    if let Some(pidfile) = &args.pidfile {
        if let Err(e) = std::fs::write(pidfile, std::process::id().to_string()) {
            tracing::warn!(file = %pidfile.display(), error = %e, "Failed to write pid file");
        }
    }

    let mut sampler = None;
    if let Some(path) = &args.sysadmin {
        let system = Arc::new(SystemStats::new());
        sampler = Some(system.spawn_sampler());
        let status = StatusHandler::new(Arc::clone(server.registry()), Arc::clone(server.connections()))
            .with_system_stats(system);
        server
            .add_handler(path, status)
            .with_context(|| format!("invalid status path {}", path))?;
    }

    if let Some(docroot) = &args.docroot {
        match StaticFiles::new(docroot) {
            Ok(pages) => {
                tracing::info!(docroot = %pages.root().display(), "Serving static pages");
                server.add_handler("*", pages)?;
            }
            Err(e) => {
                tracing::error!(docroot = %docroot.display(), error = %e, "Docroot not found");
            }
        }
    }

    if server.registry().is_empty() {
        eprintln!("Error: no streams defined\n");
        eprintln!("{}", Args::command().render_help());
        std::process::exit(1);
    }

    let result = server.run_until(shutdown_signal()).await;

    if let Some(sampler) = sampler {
        sampler.abort();
    }
    result?;

    tracing::info!("mjpeg-httpd stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
