use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ramal::config::{Config, ConfigError, StoreConfig};
use ramal::StatementClassifier;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ramal")]
#[command(about = "Read/write splitting core for primary/replica database connections")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate an example configuration file
    Config {
        /// Sticky context store (memory, noop or remote)
        #[arg(short, long, default_value = "memory")]
        store: String,
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Validate configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Show how statements would be classified
    Classify {
        /// SQL statements, one per argument
        #[arg(required = true)]
        sql: Vec<String>,
    },
    /// Show version information
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Config { store, output } => generate_config(&store, output),
        Commands::Validate { config } => validate_config(config),
        Commands::Classify { sql } => {
            classify_statements(&sql);
            Ok(())
        }
        Commands::Version => {
            show_version();
            Ok(())
        }
    }
}

fn generate_config(store: &str, output: PathBuf) -> Result<()> {
    println!("Generating configuration file with {} context store: {:?}", store, output);

    Config::create_example_config(&output, store)
        .with_context(|| format!("Failed to generate config at {:?}", output))?;

    println!("Configuration file generated successfully!");
    println!("Edit the file to match your environment and check it with:");
    println!("  ramal validate --config {:?}", output);

    Ok(())
}

fn validate_config(config_path: PathBuf) -> Result<()> {
    println!("Validating configuration file: {:?}", config_path);

    let config = match Config::load_from_file(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("✗ Configuration file validation failed:");
            match &e {
                ConfigError::IoError(msg) => eprintln!("  File error: {}", msg),
                ConfigError::ParseError(msg) => eprintln!("  Parse error: {}", msg),
                ConfigError::ValidationError(msg) => eprintln!("  Validation error: {}", msg),
                ConfigError::SerializeError(msg) => eprintln!("  Serialization error: {}", msg),
            }
            return Err(e.into());
        }
    };

    init_logging(&config)?;
    info!("Configuration loaded from {:?}", config_path);

    println!("✓ Configuration file is valid");
    println!("  Nodes: {}", config.nodes.len());
    for (node, id) in config.nodes.iter().zip(config.node_ids()) {
        println!("    {} ({}, weight {}): {}", id, node.role, node.weight, node.url);
    }
    println!(
        "  Blacklist: {}s cooldown after {} failure(s)",
        config.blacklist.cooldown_sec, config.blacklist.failure_threshold
    );
    if config.sticky.enabled {
        let store = match &config.sticky.store {
            StoreConfig::Memory => "memory".to_string(),
            StoreConfig::Noop => "noop".to_string(),
            StoreConfig::Remote { addr, .. } => format!("remote ({})", addr),
        };
        println!(
            "  Sticky context: {}s window, {} store, key prefix {:?}",
            config.sticky.window_sec, store, config.sticky.key_prefix
        );
    } else {
        println!("  Sticky context: disabled");
    }

    Ok(())
}

fn classify_statements(statements: &[String]) {
    let classifier = StatementClassifier::new();
    for sql in statements {
        let classification = classifier.classify(sql);
        println!(
            "{:<8} forces_master={:<5} reason={}  {}",
            classification.role.to_string(),
            classification.forces_master,
            classification.reason,
            sql
        );
    }
}

fn show_version() {
    println!("ramal v{}", env!("CARGO_PKG_VERSION"));
    println!("Read/write splitting core for primary/replica database connections");
    println!();
    println!("Target: {}", std::env::consts::ARCH);
    println!();
    println!("Features:");
    println!("  • Heuristic statement classification");
    println!("  • Weighted replica selection with blacklist and cooldown");
    println!("  • Sticky read-your-writes context over memory or Redis-compatible stores");
}

fn init_logging(config: &Config) -> Result<()> {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    let result = match config.logging.format.as_str() {
        "json" => builder.json().try_init(),
        _ => builder.compact().try_init(),
    };
    result.map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!("Logging initialized at level: {}", config.logging.level);
    Ok(())
}
