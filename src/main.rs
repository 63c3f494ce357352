use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use filegate::config::{format_config, Config};
use filegate::logging::{init_logging, LogConfig, Verbosity};
use filegate::server::{run_server, AccessPolicy, AllowAll, PerimeterPolicy, ServerConfig};
use filegate::store::LinkRegistry;

#[derive(Parser)]
#[command(name = "filegate")]
#[command(version)]
#[command(about = "Serve a directory over HTTP with share links and an IP gate")]
#[command(
    long_about = "A self-hosted file browser: resumable range downloads, public share links for files and folders, and an IP whitelist protecting everything else."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: ~/.config/filegate/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Also write debug logs to this file
    #[arg(long, global = true)]
    log_file: Option<String>,

    /// Log as JSON lines on stderr
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the web server
    Serve {
        /// Port to listen on (default: 3000)
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to bind (default: 0.0.0.0)
        #[arg(long)]
        bind: Option<IpAddr>,

        #[command(flatten)]
        root: RootArg,

        /// Disable the IP gate (every path reachable from anywhere)
        #[arg(long)]
        open: bool,
    },
    /// Manage share links
    Link {
        #[command(subcommand)]
        command: LinkCommands,
    },
    /// Show the effective configuration
    Config,
}

#[derive(Subcommand)]
enum LinkCommands {
    /// Create a share link for a file or folder under the base root
    Create {
        /// Path relative to the base root
        path: String,

        /// Name shown to recipients (default: the file name)
        #[arg(short, long)]
        name: Option<String>,

        #[command(flatten)]
        root: RootArg,
    },
    /// List all share links
    List,
}

#[derive(Args)]
struct RootArg {
    /// Directory to serve (overrides FILE_DIRECTORY and the config file)
    #[arg(short, long)]
    root: Option<PathBuf>,
}

/// Config file, then environment, then command-line flags.
fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => Config::load().context("loading config")?,
    };
    config.apply_env();
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let _log_guard = init_logging(&LogConfig {
        verbosity: Verbosity::from_flags(cli.quiet, cli.verbose),
        log_file: cli.log_file.clone(),
        json: cli.json_logs,
    });

    let mut config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Serve {
            port,
            bind,
            root,
            open,
        } => {
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(bind) = bind {
                config.bind = bind;
            }
            if let Some(root) = root.root {
                config.base_root = Some(root);
            }

            let base_root = config.base_root()?;
            if !base_root.path().is_dir() {
                anyhow::bail!("Base root is not a directory: {}", base_root.path().display());
            }

            let policy: Arc<dyn AccessPolicy> = if open {
                Arc::new(AllowAll)
            } else {
                Arc::new(PerimeterPolicy::new(
                    config.public_prefixes.clone(),
                    config.allow_list(),
                ))
            };

            let server_config = ServerConfig {
                bind: config.bind,
                port: config.port,
                root: base_root,
                data_dir: config.data_dir.clone(),
                public_base_url: config.effective_public_base_url(),
                policy,
                trusted_proxies: config.trusted_proxies(),
                suspicious_log: config.suspicious_log_path(),
                flush_interval: config.flush_interval(),
            };

            println!(
                "Serving {} on http://{}:{}",
                server_config.root.path().display(),
                server_config.bind,
                server_config.port
            );
            println!("Press Ctrl+C to stop");

            run_server(server_config).await?;
        }
        Commands::Link { command } => match command {
            LinkCommands::Create { path, name, root } => {
                if let Some(root) = root.root {
                    config.base_root = Some(root);
                }
                let base_root = config.base_root()?;
                let full_path = base_root.resolve_existing(&path).await?;
                let meta = tokio::fs::metadata(&full_path)
                    .await
                    .with_context(|| format!("Not found: {}", path))?;

                let display_name = name.unwrap_or_else(|| {
                    full_path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default()
                });

                let registry = LinkRegistry::open(config.links_file());
                let record = registry
                    .create(base_root.relative_of(&full_path), display_name, meta.is_dir())
                    .await?;

                println!("{}", record.public_url(&config.effective_public_base_url()));
            }
            LinkCommands::List => {
                let registry = LinkRegistry::open(config.links_file());
                let records = registry.list().await;
                if records.is_empty() {
                    println!("No share links.");
                    return Ok(());
                }

                let base_url = config.effective_public_base_url();
                for record in records {
                    println!(
                        "{}  {}  {:<40}  {}",
                        record.created_at.format("%Y-%m-%d %H:%M"),
                        if record.is_directory { "dir " } else { "file" },
                        record.target_path,
                        record.public_url(&base_url)
                    );
                }
            }
        },
        Commands::Config => {
            match cli.config.as_ref() {
                Some(path) => println!("Config file: {}", path.display()),
                None => {
                    if let Ok(path) = Config::config_path() {
                        println!("Config file: {}", path.display());
                    }
                }
            }
            println!();
            println!("{}", format_config(&config));
        }
    }

    Ok(())
}
