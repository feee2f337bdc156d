use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use watcher_chat::{ChatEvent, ChatManager, EarningProcessor, LoopbackAdapter};
use watcher_core::config::WatcherConfig;
use watcher_executor::{Executor, PromptEngine};
use watcher_ledger::Ledger;
use watcher_model::{LlmClient, StubClient};
use watcher_scheduler::{ActivationTrigger, ReflectionScheduler};
use watcher_store::Store;
use watcher_topics::TopicRegistry;

#[derive(Debug, Parser)]
#[command(name = "watcher", version, about = "A persistent reflective-memory chat observer")]
struct Cli {
    /// Path to watcher.toml. Defaults to `$HOME/.watcher/watcher.toml`.
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the build version.
    Version,
    /// Run the observation loop against the registered chat adapters.
    Observe,
    /// Serve the read-only HTTP introspection surface.
    Api,
    /// Inspect or migrate the persisted schema.
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },
    /// Validate configuration without starting anything.
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Run or inspect the salience ledger.
    Salience {
        #[command(subcommand)]
        command: SalienceCommands,
    },
    /// Inspect or validate reflection layer definitions.
    Layer {
        #[command(subcommand)]
        command: LayerCommands,
    },
    /// Trigger or inspect the reflection scheduler.
    Reflect {
        #[command(subcommand)]
        command: ReflectCommands,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommands {
    /// Show the current schema version and any pending migrations.
    Status,
    /// Apply pending migrations, optionally only up to `--target`.
    Migrate {
        #[arg(long)]
        target: Option<i64>,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigCommands {
    /// Load the config and report whether it parses cleanly.
    Check,
}

#[derive(Debug, Subcommand)]
enum SalienceCommands {
    /// Run the decay job once against every inactive topic.
    Decay,
}

#[derive(Debug, Subcommand)]
enum LayerCommands {
    /// List every layer loaded from the configured layers directory.
    List,
    /// Parse and validate a single layer by name.
    Validate { name: String },
}

#[derive(Debug, Subcommand)]
enum ReflectCommands {
    /// Manually activate a layer, bypassing its schedule/threshold.
    Trigger { layer: String },
    /// Show every layer's scheduler state (last/next fire).
    Jobs,
}

#[tokio::main]
async fn main() -> Result<()> {
    watcher_core::logging::init_tracing("watcher=info,tower_http=warn");

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => Ok(()),
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Version => {
            println!("watcher {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Config { command: ConfigCommands::Check } => config_check(cli.config.as_deref()),
        Commands::Db { command } => db_command(cli.config.as_deref(), command),
        Commands::Salience { command: SalienceCommands::Decay } => salience_decay(cli.config.as_deref()),
        Commands::Layer { command } => layer_command(cli.config.as_deref(), command),
        Commands::Reflect { command } => reflect_command(cli.config.as_deref(), command).await,
        Commands::Observe => observe(cli.config.as_deref()).await,
        Commands::Api => serve_api(cli.config.as_deref()).await,
    }
}

fn load_config(path: Option<&str>) -> Result<WatcherConfig> {
    WatcherConfig::load(path).context("loading configuration")
}

fn config_check(path: Option<&str>) -> Result<()> {
    let config = load_config(path)?;
    println!("config ok: database={}, http={}:{}", config.database.path, config.http.bind, config.http.port);
    Ok(())
}

fn open_store(config: &WatcherConfig) -> Result<Arc<Store>> {
    Ok(Arc::new(Store::open(&config.database.path).context("opening store")?))
}

fn db_command(config_path: Option<&str>, command: DbCommands) -> Result<()> {
    let config = load_config(config_path)?;
    match command {
        DbCommands::Status => {
            let store = open_store(&config)?;
            let (current, pending) = store.migration_status()?;
            println!("schema version: {current}");
            if pending.is_empty() {
                println!("up to date");
            } else {
                println!("pending: {:?}", pending);
            }
            Ok(())
        }
        DbCommands::Migrate { target } => {
            let store = open_store(&config)?;
            store.migrate(target)?;
            let (current, _) = store.migration_status()?;
            println!("schema now at version {current}");
            Ok(())
        }
    }
}

fn salience_decay(config_path: Option<&str>) -> Result<()> {
    let config = load_config(config_path)?;
    let store = open_store(&config)?;
    let decayed = watcher_ledger::run_decay(&store, &config.ledger, Utc::now())?;
    println!("decayed {} topic(s)", decayed.len());
    for key in decayed {
        println!("  {key}");
    }
    Ok(())
}

fn load_layers(config: &WatcherConfig) -> Result<Vec<watcher_executor::Layer>> {
    let dir = std::path::Path::new(&config.scheduler.layers_dir);
    if !dir.exists() {
        return Ok(Vec::new());
    }
    Ok(watcher_executor::layer::load_dir(dir)?)
}

fn layer_command(config_path: Option<&str>, command: LayerCommands) -> Result<()> {
    let config = load_config(config_path)?;
    match command {
        LayerCommands::List => {
            let layers = load_layers(&config)?;
            if layers.is_empty() {
                println!("no layers in {}", config.scheduler.layers_dir);
            }
            for layer in layers {
                println!(
                    "{:<24} category={:<10} nodes={} schedule={}",
                    layer.name,
                    layer.category,
                    layer.nodes.len(),
                    layer.schedule.as_deref().unwrap_or("-")
                );
            }
            Ok(())
        }
        LayerCommands::Validate { name } => {
            let path = std::path::Path::new(&config.scheduler.layers_dir).join(format!("{name}.toml"));
            let layer = watcher_executor::layer::load_file(&path)
                .with_context(|| format!("validating layer `{name}` at {}", path.display()))?;
            println!("{} ok: {} node(s)", layer.name, layer.nodes.len());
            Ok(())
        }
    }
}

fn build_model_client(config: &WatcherConfig) -> Result<Box<dyn LlmClient>> {
    if config.model.anthropic.is_some() {
        Ok(Box::new(watcher_model::AnthropicClient::new(&config.model)?))
    } else {
        Ok(Box::new(StubClient))
    }
}

async fn reflect_command(config_path: Option<&str>, command: ReflectCommands) -> Result<()> {
    let config = load_config(config_path)?;
    let store = open_store(&config)?;
    let topics = TopicRegistry::new(store.clone());
    let layers = load_layers(&config)?;

    match command {
        ReflectCommands::Jobs => {
            if layers.is_empty() {
                println!("no layers in {}", config.scheduler.layers_dir);
            }
            for layer in &layers {
                let state = store.get_scheduler_state(&layer.name)?;
                println!(
                    "{:<24} last_fired={:<24} next_fire={}",
                    layer.name,
                    state.as_ref().and_then(|s| s.last_fired_at.clone()).unwrap_or_else(|| "-".to_string()),
                    state.as_ref().and_then(|s| s.next_fire_at.clone()).unwrap_or_else(|| "-".to_string())
                );
            }
            Ok(())
        }
        ReflectCommands::Trigger { layer: name } => {
            let scheduler = ReflectionScheduler::new(store.clone(), config.ledger.clone(), config.scheduler.clone(), layers);
            let Some(layer) = scheduler.layer(&name).cloned() else {
                bail!("no such layer: {name}");
            };

            let model_client = build_model_client(&config)?;
            let prompts = PromptEngine::new(&config.layers.templates_dir)?;
            let executor = Executor::new(&topics, &config.ledger, &config.scheduler, model_client.as_ref(), &prompts, &config.model.profiles);

            let run = scheduler.activate(&layer, ActivationTrigger::Manual, &executor).await?;
            println!("run {} status={:?} targets={}", run.id, run.status, run.targets_matched);
            Ok(())
        }
    }
}

async fn observe(config_path: Option<&str>) -> Result<()> {
    let config = load_config(config_path)?;
    let store = open_store(&config)?;
    let topics = TopicRegistry::new(store.clone());
    let layers = load_layers(&config)?;

    let model_client = build_model_client(&config)?;
    let prompts = PromptEngine::new(&config.layers.templates_dir)?;
    let scheduler = ReflectionScheduler::new(store.clone(), config.ledger.clone(), config.scheduler.clone(), layers);
    scheduler.prime()?;

    let mut manager = ChatManager::new();
    manager.register(Box::new(LoopbackAdapter::new()));

    let (tx, mut rx) = tokio::sync::mpsc::channel::<ChatEvent>(256);
    manager.connect_all(tx).await;
    info!(adapters = ?manager.statuses(), "observation loop starting");

    let mut scheduler_tick = tokio::time::interval(std::time::Duration::from_secs(config.scheduler.tick_interval_secs));
    let mut decay_tick = tokio::time::interval(std::time::Duration::from_secs(config.scheduler.decay_interval_secs));
    scheduler_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    decay_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                let ledger = Ledger::new(&store, &topics, &config.ledger);
                let processor = EarningProcessor::new(&store, ledger, &config.ledger);
                if let Err(e) = processor.process(&event) {
                    warn!(error = %e, "failed to process observed event");
                }
            }
            _ = scheduler_tick.tick() => {
                let executor = Executor::new(&topics, &config.ledger, &config.scheduler, model_client.as_ref(), &prompts, &config.model.profiles);
                match scheduler.tick(&executor).await {
                    Ok(runs) if !runs.is_empty() => info!(count = runs.len(), "reflection scheduler activated layers"),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "reflection scheduler tick failed"),
                }
            }
            _ = decay_tick.tick() => {
                match watcher_ledger::run_decay(&store, &config.ledger, Utc::now()) {
                    Ok(decayed) if !decayed.is_empty() => info!(count = decayed.len(), "salience decay applied"),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "salience decay job failed"),
                }
            }
        }
    }

    manager.disconnect_all().await;
    Ok(())
}

async fn serve_api(config_path: Option<&str>) -> Result<()> {
    let config = load_config(config_path)?;
    let store = open_store(&config)?;

    let state = Arc::new(watcher_http::AppState::new(store, config.ledger.clone()));
    let router = watcher_http::build_router(state);

    let addr: std::net::SocketAddr = format!("{}:{}", config.http.bind, config.http.port).parse()?;
    info!(%addr, "watcher http introspection listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}
