//! # Curator Configuration Validator
//!
//! Command-line tool for validating curator configuration files across
//! environments before an engine is started with them.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use curator_core::config::{ConfigManager, CuratorConfig};
use curator_core::orchestration::describe_stages;
use serde_json::json;
use std::path::PathBuf;
use std::process;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "config-validator")]
#[command(about = "Validate curator engine configuration files")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Environment to validate (development, test, production, ...)
    #[arg(short, long, default_value = "development")]
    environment: String,

    /// Configuration directory path (default: $CURATOR_CONFIG_DIR or ./config)
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output format (table, json)
    #[arg(long, default_value = "table")]
    format: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load, validate and summarize the configuration
    Validate,

    /// List environment override files
    Environments,

    /// Show resolved conveyor stages and the transformer pool
    Stages,

    /// Compare two environments section by section
    Compare {
        /// Base environment for comparison
        #[arg(short, long, default_value = "development")]
        base: String,

        /// Target environment for comparison
        #[arg(short, long)]
        target: String,
    },
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let _subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .try_init();

    let result = match &cli.command {
        Some(Commands::Validate) | None => validate(&cli),
        Some(Commands::Environments) => list_environments(&cli),
        Some(Commands::Stages) => show_stages(&cli),
        Some(Commands::Compare { base, target }) => compare(&cli, base, target),
    };

    match result {
        Ok(()) => {
            info!("Configuration validation completed successfully");
            process::exit(0);
        }
        Err(e) => {
            error!("Configuration validation failed: {e:#}");
            eprintln!("❌ {e:#}");
            process::exit(1);
        }
    }
}

fn load(cli: &Cli, environment: &str) -> Result<CuratorConfig> {
    let manager = ConfigManager::load_from_directory_with_env(cli.config_dir.clone(), environment)
        .with_context(|| format!("loading configuration for environment '{environment}'"))?;
    Ok(manager.config().clone())
}

fn json_output(cli: &Cli) -> Result<bool> {
    match cli.format.as_str() {
        "table" => Ok(false),
        "json" => Ok(true),
        other => bail!("unsupported output format '{other}' (expected table or json)"),
    }
}

fn validate(cli: &Cli) -> Result<()> {
    let as_json = json_output(cli)?;
    let config = load(cli, &cli.environment)?;
    let unpooled = config.unpooled_chain_entries();

    if as_json {
        let summary = json!({
            "environment": cli.environment,
            "valid": true,
            "broker": {
                "address": ConfigManager::sanitize_address(&config.broker.default_address),
                "provider": config.broker.provider.as_str(),
                "queues": config.broker.consumed_queues(),
            },
            "indexer": config.dispatcher.indexer,
            "subscribers": config.dispatcher.subscribers,
            "stages": describe_stages(&config.conveyor),
            "pool": config.conveyor.transformer_defaults.keys().collect::<Vec<_>>(),
            "unpooled": unpooled
                .iter()
                .map(|(stage, id)| json!({"stage": stage, "transformer": id}))
                .collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("🔧 Validating Curator Configuration");
    println!("Environment: {}", cli.environment);
    if let Some(dir) = &cli.config_dir {
        println!("Config Directory: {}", dir.display());
    }
    println!();
    println!("✅ Configuration loaded and validated");
    println!();
    println!("📡 Broker");
    println!(
        "   address:  {}",
        ConfigManager::sanitize_address(&config.broker.default_address)
    );
    println!("   provider: {}", config.broker.provider.as_str());
    println!("   queues:   {}", config.broker.consumed_queues().join(", "));
    println!();
    println!("📦 Dispatcher");
    println!(
        "   indexer:     {}",
        config.dispatcher.indexer.as_deref().unwrap_or("(none)")
    );
    println!(
        "   subscribers: {}",
        if config.dispatcher.subscribers.is_empty() {
            "(none)".to_string()
        } else {
            config.dispatcher.subscribers.join(", ")
        }
    );
    println!();
    print_stage_table(&config);

    if unpooled.is_empty() {
        println!("\n🎉 All configuration validation checks passed!");
    } else {
        println!("\n⚠️  Chain entries with no transformer_defaults entry (skipped at run time):");
        for (stage, transformer_id) in unpooled {
            println!("   {stage}: {transformer_id}");
        }
    }
    Ok(())
}

fn print_stage_table(config: &CuratorConfig) {
    println!("🏭 Conveyor stages");
    let stages = describe_stages(&config.conveyor);
    if stages.is_empty() {
        println!("   (no stages configured)");
    }
    let width = stages.keys().map(String::len).max().unwrap_or(0);
    for (stage, chain) in &stages {
        let context = if config.conveyor.execution_stages.contains(stage) {
            "execution"
        } else {
            "routing"
        };
        let chain = if chain.is_empty() { "(object overrides only)" } else { chain.as_str() };
        println!("   {stage:<width$}  [{context}]  {chain}");
    }
    println!(
        "   pool: {}",
        config
            .conveyor
            .transformer_defaults
            .keys()
            .cloned()
            .collect::<Vec<_>>()
            .join(", ")
    );
}

fn show_stages(cli: &Cli) -> Result<()> {
    let config = load(cli, &cli.environment)?;
    if json_output(cli)? {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "stages": config.conveyor.stages,
                "transformer_defaults": config.conveyor.transformer_defaults,
                "transformer_overrides": config.conveyor.transformer_overrides,
                "user_priority_flag": config.conveyor.user_priority_flag,
                "user_priority_selector": config.conveyor.user_priority_selector,
                "execution_stages": config.conveyor.execution_stages,
            }))?
        );
    } else {
        print_stage_table(&config);
    }
    Ok(())
}

fn list_environments(cli: &Cli) -> Result<()> {
    let dir = cli
        .config_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("config"))
        .join("environments");
    if !dir.is_dir() {
        bail!("environments directory not found: {}", dir.display());
    }

    let mut environments: Vec<String> = std::fs::read_dir(&dir)
        .with_context(|| format!("reading {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some("toml"))
        .filter_map(|path| path.file_stem()?.to_str().map(str::to_string))
        .collect();
    environments.sort();

    if json_output(cli)? {
        println!("{}", serde_json::to_string_pretty(&environments)?);
    } else {
        println!("📋 Available Environments:");
        for environment in environments {
            println!("   - {environment}");
        }
    }
    Ok(())
}

fn compare(cli: &Cli, base: &str, target: &str) -> Result<()> {
    let base_config = serde_json::to_value(load(cli, base)?)?;
    let target_config = serde_json::to_value(load(cli, target)?)?;

    let mut differences = Vec::new();
    if let Some(base_sections) = base_config.as_object() {
        for (section, base_value) in base_sections {
            let Some(base_fields) = base_value.as_object() else {
                continue;
            };
            for (field, value) in base_fields {
                let other = &target_config[section][field];
                if value != other {
                    differences.push((format!("{section}.{field}"), value.clone(), other.clone()));
                }
            }
        }
    }

    if json_output(cli)? {
        let rendered: Vec<_> = differences
            .iter()
            .map(|(field, base_value, target_value)| {
                json!({"field": field, (base): base_value, (target): target_value})
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rendered)?);
    } else if differences.is_empty() {
        println!("✅ '{base}' and '{target}' resolve to the same configuration");
    } else {
        println!("🔍 {base} vs {target}");
        for (field, base_value, target_value) in differences {
            println!("   {field}: {base_value} -> {target_value}");
        }
    }
    Ok(())
}
