use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use simplelog::{ColorChoice, LevelFilter, TermLogger, TerminalMode};
use structopt::StructOpt;
use tonic::transport::Server;
use tracing::info;

use seglog::server::GrpcServer;
use seglog::settings::Settings;
use seglog::storage::Log;

#[derive(Debug, StructOpt)]
#[structopt(name = "SEGLOG Server", about = "Segmented commit log served over gRPC")]
struct Opt {
    // Settings file (toml, yaml or json)
    #[structopt(long = "config", parse(from_os_str))]
    config: Option<PathBuf>,
    // Overrides the server host from the settings
    #[structopt(long = "host")]
    host: Option<String>,
    // Overrides the server port from the settings
    #[structopt(long = "port")]
    port: Option<u16>,
    // Overrides the directory holding the segment files
    #[structopt(long = "dir", parse(from_os_str))]
    dir: Option<PathBuf>,
    // One of off, error, warn, info, debug, trace
    #[structopt(long = "log_level", default_value = "info")]
    log_level: LevelFilter,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opt = Opt::from_args();
    TermLogger::init(
        opt.log_level,
        simplelog::Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )?;

    let mut settings = Settings::load(opt.config.as_deref())?;
    if let Some(host) = opt.host {
        settings.server.host = host;
    }
    if let Some(port) = opt.port {
        settings.server.port = port;
    }
    if let Some(dir) = opt.dir {
        settings.log.dir = dir;
    }

    let log = Arc::new(
        Log::new(&settings.log.dir, settings.log_config())
            .with_context(|| format!("Failed to open log in {}", settings.log.dir.display()))?,
    );
    let server_addr = settings.server_addr()?;
    info!(addr = %server_addr, dir = %settings.log.dir.display(), "serving commit log");

    Server::builder()
        .add_service(GrpcServer::new(log.clone()).into_service())
        .serve_with_shutdown(server_addr, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    log.close()?;
    info!("commit log closed");
    Ok(())
}
