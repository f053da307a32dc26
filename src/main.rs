//! now-dev: run a serverless project locally.
//!
//! # Architecture Overview
//!
//! ```text
//!                        ┌────────────────────────────────────────────────────┐
//!                        │                     DEV SERVER                     │
//!                        │                                                    │
//!   Client Request       │  ┌──────────┐    ┌──────────┐    ┌─────────────┐  │
//!   ─────────────────────┼─▶│   http   │───▶│ routing  │───▶│  redirect / │──┼──▶ Upstream
//!                        │  │  server  │    │  table   │    │  proxy pass │  │    (absolute URL)
//!                        │  └──────────┘    └────┬─────┘    └─────────────┘  │
//!                        │                       │ local                     │
//!                        │                       ▼                           │
//!                        │  ┌──────────┐    ┌──────────┐    ┌─────────────┐  │
//!                        │  │  assets  │◀───│  builds  │◀───│  registry   │  │
//!                        │  │  store   │    │dispatcher│    │ (src globs) │  │
//!                        │  └────┬─────┘    └──────────┘    └─────────────┘  │
//!                        │       │ static file / blob / function             │
//!   Client Response      │       ▼                                           │
//!   ◀────────────────────┼── serve / invoke                                  │
//!                        │                                                    │
//!                        │  config (now.json, .env) · lifecycle · observability│
//!                        └────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use now_dev::builds::BuilderCatalog;
use now_dev::config::loader::load_dev_config;
use now_dev::config::schema::LogFormat;
use now_dev::config::DevConfig;
use now_dev::http::DevServer;
use now_dev::lifecycle::signals::wait_for_signal;
use now_dev::observability::logging::init_logging;

#[derive(Parser)]
#[command(name = "now-dev")]
#[command(about = "Run a serverless project on a local dev server", long_about = None)]
struct Cli {
    /// Project directory
    dir: Option<PathBuf>,

    /// Address to listen on (e.g. 127.0.0.1:3000)
    #[arg(short, long)]
    listen: Option<String>,

    /// Dev server configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Don't watch project files for changes
    #[arg(long)]
    no_watch: bool,
}

impl Cli {
    fn into_config(self) -> Result<DevConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => load_dev_config(path)?,
            None => DevConfig::default(),
        };

        if let Some(dir) = self.dir {
            config.project.root = dir;
        }
        if let Some(listen) = self.listen {
            config.listener.bind_address = listen;
        }
        if self.debug {
            config.observability.log_level = "debug".to_string();
        }
        if self.json_logs {
            config.observability.log_format = LogFormat::Json;
        }
        if self.no_watch {
            config.watch.enabled = false;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Cli::parse().into_config()?;
    init_logging(&config.observability)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        root = %config.project.root.display(),
        bind_address = %config.listener.bind_address,
        rebuild_window_ms = config.builds.rebuild_window_ms,
        "now-dev starting"
    );

    let server = DevServer::start(config, BuilderCatalog::with_defaults()).await?;
    println!("Ready! Available at http://{}", server.local_addr());

    wait_for_signal().await;
    server.stop().await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
