// SPDX-License-Identifier: MIT

//! Promptpix: gallery and metadata extractor for AI-generated images

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{error, info};

use promptpix::config::AppConfig;
use promptpix::metadata;
use promptpix::store::GalleryStore;
use promptpix::web;
use promptpix::{PromptpixError, Result};

/// Promptpix CLI - AI image gallery and metadata extractor
#[derive(Parser, Debug)]
#[command(name = "promptpix")]
#[command(version = "0.3.0")]
#[command(about = "Gallery and metadata extractor for AI-generated images", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (JSON format)
    #[arg(short, long, default_value = "config.json", global = true)]
    config: PathBuf,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable trace logging (most verbose)
    #[arg(long, global = true)]
    trace: bool,

    /// Output format for results
    #[arg(long, global = true, default_value = "text", value_parser = ["text", "json"])]
    format: String,

    /// Suppress non-essential output (quiet mode)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the gallery web server
    Serve {
        /// Bind host (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Bind port (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Extract metadata from an image file or directory
    Extract {
        /// File or directory to extract from
        path: PathBuf,

        /// Recurse into subdirectories
        #[arg(short, long)]
        recursive: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Initialize a new Promptpix gallery
    Init {
        /// Directory to initialize (default: current)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Force overwrite existing configuration
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Generate default configuration file
    Generate {
        /// Output file path
        #[arg(short, long, default_value = "config.json")]
        output: PathBuf,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // Load configuration
    let config = AppConfig::load(&cli.config)?;

    match cli.command {
        Some(Commands::Serve { host, port }) => run_serve(config, host, port).await,
        Some(Commands::Extract { path, recursive }) => {
            run_extract(path, recursive, &cli.format)
        }
        Some(Commands::Config { action }) => run_config_command(config, action, &cli.config),
        Some(Commands::Init { dir, force }) => run_init(dir, force),
        None => run_serve(config, None, None).await,
    }
}

/// Run the gallery web server
async fn run_serve(mut config: AppConfig, host: Option<String>, port: Option<u16>) -> Result<()> {
    if let Some(host) = host {
        config.web.host = host;
    }
    if let Some(port) = port {
        config.web.port = port;
    }

    std::fs::create_dir_all(&config.storage.upload_dir)?;
    let store = GalleryStore::load(PathBuf::from(&config.storage.store_path))?;
    info!(
        "Loaded {} images from {:?}",
        store.len(),
        store.path()
    );

    web::start_server(config, store).await
}

/// Extract and print metadata for files on disk
fn run_extract(path: PathBuf, recursive: bool, format: &str) -> Result<()> {
    let files: Vec<PathBuf> = if path.is_dir() {
        if recursive {
            walkdir(&path)
        } else {
            std::fs::read_dir(&path)?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_file())
                .collect()
        }
    } else {
        vec![path]
    };

    let mut results = Vec::new();
    for file in files {
        if !is_image(&file) {
            continue;
        }
        let record = metadata::extract(&file);
        if format == "text" {
            println!("{}", file.display());
            println!("  Prompt:   {}", record.prompt);
            println!("  Negative: {}", record.negative_prompt);
            println!(
                "  Model: {}  Sampler: {}  Steps: {}  CFG: {}  Seed: {}  Size: {}",
                record.model_name,
                record.sampler,
                record.steps,
                record.cfg_scale,
                record.seed,
                record.size
            );
            if !record.tools.is_empty() {
                println!("  Tools: {:?}", record.tools);
            }
        }
        results.push((file, record));
    }

    if format == "json" {
        let output: Vec<serde_json::Value> = results
            .iter()
            .map(|(p, r)| {
                serde_json::json!({
                    "path": p.to_string_lossy(),
                    "metadata": r,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else if results.is_empty() {
        error!("No image files found");
    }

    Ok(())
}

fn is_image(path: &Path) -> bool {
    matches!(
        path.extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .as_deref(),
        Some("png" | "jpg" | "jpeg" | "webp")
    )
}

/// Walk directory recursively
fn walkdir(path: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    if let Ok(entries) = std::fs::read_dir(path) {
        for entry in entries.flatten() {
            let p = entry.path();
            if p.is_dir() {
                files.extend(walkdir(&p));
            } else if p.is_file() {
                files.push(p);
            }
        }
    }

    files
}

/// Run config commands
fn run_config_command(config: AppConfig, action: ConfigCommands, config_path: &Path) -> Result<()> {
    match action {
        ConfigCommands::Show => {
            let json = serde_json::to_string_pretty(&config)?;
            println!("{}", json);
        }
        ConfigCommands::Generate { output } => {
            let default_config = AppConfig::default();
            default_config.save(&output)?;
            println!("Generated config at {:?}", output);
        }
        ConfigCommands::Validate => {
            println!("Configuration at {:?} is valid", config_path);
            println!("  Upload dir: {}", config.storage.upload_dir);
            println!("  Store: {}", config.storage.store_path);
            println!("  Bind: {}:{}", config.web.host, config.web.port);
        }
    }

    Ok(())
}

/// Initialize a new Promptpix gallery
fn run_init(dir: Option<PathBuf>, force: bool) -> Result<()> {
    let target = dir.unwrap_or_else(|| PathBuf::from("."));
    let config_path = target.join("config.json");

    if config_path.exists() && !force {
        return Err(PromptpixError::Config(
            "config.json already exists. Use --force to overwrite".to_string(),
        ));
    }

    let upload_dir = target.join("uploads");
    std::fs::create_dir_all(&upload_dir)?;

    let mut config = AppConfig::default();
    config.storage.upload_dir = upload_dir.to_string_lossy().to_string();
    config.storage.store_path = target.join("image_metadata.json").to_string_lossy().to_string();
    config.save(&config_path)?;

    println!("Promptpix initialized in {:?}", target);
    println!("\nCreated:");
    println!("  - config.json");
    println!("  - uploads/");
    println!("\nNext step: promptpix serve");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["promptpix"]).unwrap();
        assert!(!cli.verbose);
    }

    #[test]
    fn test_cli_serve_command() {
        let cli = Cli::try_parse_from(["promptpix", "serve", "--port", "3000"]).unwrap();

        match cli.command {
            Some(Commands::Serve { port, host }) => {
                assert_eq!(port, Some(3000));
                assert!(host.is_none());
            }
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_cli_extract_command() {
        let cli =
            Cli::try_parse_from(["promptpix", "extract", "/tmp/img.png", "--format", "json"])
                .unwrap();

        match cli.command {
            Some(Commands::Extract { path, recursive }) => {
                assert_eq!(path, PathBuf::from("/tmp/img.png"));
                assert!(!recursive);
            }
            _ => panic!("Expected Extract command"),
        }
        assert_eq!(cli.format, "json");
    }

    #[test]
    fn image_extension_filter() {
        assert!(is_image(Path::new("a.PNG")));
        assert!(is_image(Path::new("b.jpeg")));
        assert!(!is_image(Path::new("c.txt")));
        assert!(!is_image(Path::new("noext")));
    }
}
