// src/main.rs - Multi-material host daemon entry point
use clap::Parser;
use mmu_host::config;
use mmu_host::hardware::sim::{SimAirValve, SimPumpDriver};
use mmu_host::orchestrator::{LinkFactory, Orchestrator};
use mmu_host::printer::PrinterLink;
use mmu_host::printer::monox::MonoXLink;
use mmu_host::web;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Multi-material unit host
#[derive(Parser, Debug)]
#[command(name = "mmu-host", about = "Layer-triggered multi-material controller for MonoX resin printers.")]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long, default_value = "mmu.toml")]
    config: PathBuf,

    /// Printer address (overrides the config file)
    #[arg(long)]
    printer_ip: Option<String>,

    /// Recipe file; when given, monitoring starts immediately
    #[arg(short, long)]
    recipe: Option<PathBuf>,

    /// Web API bind address (overrides the config file)
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let cli = Cli::parse();

    tracing::info!("Starting MMU host");
    tracing::info!("Loading configuration from: {}", cli.config.display());

    let mut config = if cli.config.exists() {
        config::load_config(&cli.config).map_err(|e| {
            tracing::error!("Failed to load config from '{}': {}", cli.config.display(), e);
            Box::new(e) as Box<dyn std::error::Error + Send + Sync + 'static>
        })?
    } else {
        tracing::warn!("Config file '{}' not found, using defaults", cli.config.display());
        config::Config::default()
    };
    if let Some(ip) = cli.printer_ip {
        config.printer.ip_address = ip;
    }
    if let Some(bind) = cli.bind {
        config.web.bind = bind;
    }

    tracing::info!(
        "Printer: {}:{} (poll every {}s)",
        config.printer.ip_address,
        config.printer.port,
        config.printer.poll_interval_seconds
    );

    let port = config.printer.port;
    let request_timeout = Duration::from_secs_f64(config.printer.timeout_seconds);
    let link_factory: LinkFactory = Box::new(move |host| {
        Arc::new(MonoXLink::new(host, port, request_timeout)) as Arc<dyn PrinterLink>
    });

    // Hardware drivers. The pump and valve backends here are the wall-clock
    // simulators; the real I2C/GPIO drivers plug in behind the same traits.
    let pumps = Arc::new(SimPumpDriver::new(1.0));
    let valve = Arc::new(SimAirValve::new());

    let orchestrator = Arc::new(Orchestrator::new(
        config.clone(),
        pumps,
        valve,
        link_factory,
    ));

    if let Some(recipe) = &cli.recipe {
        let printer_ip = config.printer.ip_address.clone();
        orchestrator
            .start(&printer_ip, Some(Path::new(recipe)))
            .await
            .map_err(|e| {
                tracing::error!("Failed to start monitoring: {}", e);
                Box::new(e) as Box<dyn std::error::Error + Send + Sync + 'static>
            })?;
    }

    let app = web::api::create_router(orchestrator);
    let listener = tokio::net::TcpListener::bind(&config.web.bind).await?;
    tracing::info!("Web API listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
