//! Toolpin CLI - Operator tooling for schema pinning

use anyhow::{bail, Context};
use clap::Parser;
use std::path::{Path, PathBuf};
use toolpin_core::{PinConfig, SchemaGuard, VerificationRequest};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "toolpin")]
#[command(about = "Toolpin - trust-on-first-use pinning for tool schemas")]
struct Cli {
    /// Configuration file path (JSON)
    #[arg(short, long, global = true, default_value = "schemapin.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Manage pinned keys
    #[command(subcommand)]
    Keys(KeyCommands),
    /// Show audit statistics
    Stats,
    /// Manage the configuration file
    #[command(subcommand)]
    Config(ConfigCommands),
    /// Verify a signed schema and print the decision
    Verify {
        /// Tool name
        tool: String,
        /// Path to the schema JSON
        schema: PathBuf,
        /// Base64 signature over the canonical schema
        #[arg(long)]
        signature: Option<String>,
        /// Domain the tool claims to come from
        #[arg(long)]
        domain: Option<String>,
    },
}

#[derive(clap::Subcommand)]
enum KeyCommands {
    /// List pinned keys
    List {
        /// Include revoked pins
        #[arg(long)]
        all: bool,
    },
    /// Show one pin with its statistics
    Info { tool_id: String },
    /// Pin a PEM public key for a tool id
    Pin {
        tool_id: String,
        domain: String,
        /// Path to the PEM file
        pem: PathBuf,
    },
    /// Revoke the pin for a tool id
    Revoke { tool_id: String },
}

#[derive(clap::Subcommand)]
enum ConfigCommands {
    /// Check configuration validity
    Check,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Some(Commands::Keys(command)) => keys(&cli.config, command).await,
        Some(Commands::Stats) => {
            let guard = open_guard(&cli.config)?;
            print_json(&guard.stats()?)
        }
        Some(Commands::Config(ConfigCommands::Check)) => {
            let config = load_config(&cli.config)?;
            println!("Configuration OK: {}", cli.config.display());
            print_json(&config.to_value()?)
        }
        Some(Commands::Config(ConfigCommands::Init { force })) => {
            if cli.config.exists() && !force {
                bail!("{} already exists (use --force)", cli.config.display());
            }
            PinConfig::default().save(&cli.config)?;
            println!("Wrote default configuration to {}", cli.config.display());
            Ok(())
        }
        Some(Commands::Verify {
            tool,
            schema,
            signature,
            domain,
        }) => {
            let guard = open_guard(&cli.config)?;
            let raw = std::fs::read_to_string(&schema)
                .with_context(|| format!("reading {}", schema.display()))?;
            let schema: serde_json::Value = serde_json::from_str(&raw)
                .with_context(|| format!("parsing {}", schema.display()))?;

            let mut request = VerificationRequest::new(tool, schema);
            request.signature = signature;
            request.domain = domain;

            let outcome = guard.check(&request).await?;
            guard.flush()?;
            print_json(&serde_json::json!({
                "result": outcome.result,
                "decision": outcome.decision,
            }))
        }
        None => {
            println!("Toolpin v{} - Use --help for commands", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn keys(config_path: &Path, command: KeyCommands) -> anyhow::Result<()> {
    let guard = open_guard(config_path)?;

    match command {
        KeyCommands::List { all } => {
            let records = if all {
                guard.keys().list()?
            } else {
                guard.keys().list_active()?
            };
            for record in records {
                println!(
                    "{}\t{}\t{}\t{}{}",
                    record.tool_id,
                    record.domain,
                    record.verification_count,
                    record.fingerprint(),
                    if record.revoked { "\t(revoked)" } else { "" }
                );
            }
        }
        KeyCommands::Info { tool_id } => match guard.keys().get_info(&tool_id)? {
            Some(info) => print_json(&info)?,
            None => bail!("no pin recorded for {}", tool_id),
        },
        KeyCommands::Pin {
            tool_id,
            domain,
            pem,
        } => {
            let key = std::fs::read_to_string(&pem)
                .with_context(|| format!("reading {}", pem.display()))?;
            let outcome = guard.pin_key(&tool_id, &domain, &key, None)?;
            println!("{}: {:?}", tool_id, outcome);
        }
        KeyCommands::Revoke { tool_id } => {
            if guard.revoke_key(&tool_id).await? {
                println!("Revoked {}", tool_id);
            } else {
                bail!("no active pin for {}", tool_id);
            }
        }
    }

    guard.flush()?;
    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<PinConfig> {
    PinConfig::load(path).with_context(|| format!("loading config {}", path.display()))
}

fn open_guard(path: &Path) -> anyhow::Result<SchemaGuard> {
    let config = if path.exists() {
        load_config(path)?
    } else {
        tracing::info!(path = %path.display(), "no config file, using defaults");
        PinConfig::default()
    };
    Ok(SchemaGuard::open(config)?)
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
