use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use wwwroot::config::ServerConfig;
use wwwroot::dispatcher::Dispatcher;
use wwwroot::middleware::{AccessLog, from_middleware};
use wwwroot::server::Server;

/// Serve a directory over HTTP.
#[derive(Parser, Debug)]
#[command(name = "wwwroot", version, about, long_about = None)]
struct Cli {
    /// JSON config file; command-line flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short = 'P', long)]
    port: Option<u16>,

    /// Interface to bind
    #[arg(long)]
    host: Option<String>,

    /// Directory to serve
    #[arg(long)]
    root: Option<PathBuf>,

    /// List directories that have no default document
    #[arg(long, value_enum)]
    directory_browse: Option<Toggle>,

    /// Verbose logging and error details in responses
    #[arg(short = 'D', long, default_value_t = false)]
    debug: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Toggle {
    Yes,
    No,
}

impl Cli {
    fn into_config(self) -> Result<ServerConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_json_file(path)?,
            None => ServerConfig::default(),
        };

        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(root) = self.root {
            config.root = root;
        }
        if let Some(toggle) = self.directory_browse {
            config.directory_browse = matches!(toggle, Toggle::Yes);
        }
        config.debug |= self.debug;

        config.validate()?;
        Ok(config)
    }
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Cli::parse().into_config()?;
    init_tracing(config.debug);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let mut dispatcher = Dispatcher::new(&config);
        dispatcher
            .middleware(from_middleware(Arc::new(AccessLog)))
            .route(wwwroot::upload::route()?);

        let server = Server::bind(config.address()).await?.with_config(&config);
        info!(
            root = %config.root.display(),
            url = %format!("http://{}/", server.local_addr()),
            directory_browse = config.directory_browse,
            "serving"
        );
        server.run(Arc::new(dispatcher)).await?;
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}
