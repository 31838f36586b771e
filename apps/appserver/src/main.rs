use anyhow::{Context, Result};
use appkit::routing::{discover, HandlerTable};
use appkit::services::ServiceCatalog;
use appkit::{Application, RunOptions, ShutdownOptions};
use appkit_bootstrap::{ApplicationConfig, CliArgs, ConfigTree, HostConfig, LogRelay};
use clap::{Parser, Subcommand};
use http_service::{HttpServiceConfig, HttpServiceFactory};
use mimalloc::MiMalloc;
use news_board::{register_handlers, NewsModel};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Application server: serves the route tree of an application root
#[derive(Parser)]
#[command(name = "appserver")]
#[command(about = "Application server: serves the route tree of an application root")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to the host configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Application root (overrides server.root)
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Print effective host configuration (YAML) and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the application and serve until Ctrl+C / SIGTERM
    Run,
    /// Load the config tree, discover every route tree and exit
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let args = CliArgs {
        config: cli.config.as_ref().map(|p| p.to_string_lossy().to_string()),
        root: cli.root.as_ref().map(|p| p.to_string_lossy().to_string()),
        print_config: cli.print_config,
        verbose: cli.verbose,
    };

    // defaults -> YAML (if provided) -> env (APPSERVER__*) -> CLI
    let mut config = HostConfig::load_or_default(cli.config.as_deref())?;
    config.apply_cli_overrides(&args)?;

    if cli.print_config {
        println!("{}", config.to_yaml()?);
        return Ok(());
    }

    let relay = Arc::new(LogRelay::new());
    appkit_bootstrap::init_logging(&config.logging, Arc::clone(&relay));
    tracing::info!(root = %config.server.root, "appserver starting");

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_server(config, relay).await,
        Commands::Check => check_config(&config),
    }
}

fn http_factory() -> HttpServiceFactory {
    let mut table = HandlerTable::new();
    register_handlers(&mut table);
    HttpServiceFactory::new(table)
}

async fn run_server(config: HostConfig, relay: Arc<LogRelay>) -> Result<()> {
    let mut catalog = ServiceCatalog::new();
    http_factory().register(&mut catalog);

    let mut app = Application::builder(config.root())
        .places(config.server.places.clone())
        .step_timeout(config.server.step_timeout_sec.map(Duration::from_secs))
        .model(Arc::new(NewsModel::seeded()))
        .catalog(catalog)
        .relay(relay)
        .build();

    let opts = RunOptions {
        shutdown: ShutdownOptions::Signals,
        close_timeout: Some(Duration::from_secs(config.server.shutdown_timeout_sec)),
    };
    appkit::run(&mut app, opts).await
}

fn check_config(config: &HostConfig) -> Result<()> {
    tracing::info!("Checking configuration…");
    let report = check_routes(&config.root(), &config.server.places, &http_factory())?;
    println!("Configuration is valid");
    for line in report {
        println!("{line}");
    }
    Ok(())
}

/// Loads the config tree and checks that every route of every `http` service has a handler.
/// Returns one `<service> <METHOD> <path>` line per route.
fn check_routes(root: &Path, places: &[String], factory: &HttpServiceFactory) -> Result<Vec<String>> {
    let tree = ConfigTree::load(root, places)?;
    let app: ApplicationConfig = tree.extract_or_default("config.application")?;

    let mut report = Vec::new();
    for decl in app.service_decls() {
        if decl.kind != HttpServiceFactory::KIND {
            continue;
        }
        let cfg: HttpServiceConfig = serde_json::from_value(decl.config.clone())
            .with_context(|| format!("invalid config for service '{}'", decl.name))?;
        let dir = root.join(cfg.routes_dir(&decl.name));
        let handlers = factory.handlers_for(&decl.name);
        for route in discover(&dir)? {
            if handlers.factory(&route.path, route.method).is_none() {
                anyhow::bail!(
                    "service '{}': no handler registered for {} {}",
                    decl.name,
                    route.method,
                    route.path
                );
            }
            report.push(format!("{} {} {}", decl.name, route.method, route.path));
        }
    }
    Ok(report)
}
