use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use strand::{config::Config, server::Server, tracing_support, PluginEndpoint};
use strand_plugin_host::{HotReloadWatcher, RegistryError};

#[derive(Debug, Parser)]
#[command(
    name = "strand",
    version,
    about = "Serve string-transform plugins that reload when their artifacts change"
)]
struct Cli {
    /// Configuration file (defaults to ./strand.toml when present)
    #[arg(short, long, global = true, value_name = "FILE", env = "STRAND_CONFIG")]
    config: Option<PathBuf>,

    /// Plugin artifact directory
    #[arg(long, global = true, value_name = "DIR", env = "STRAND_PLUGIN_DIR")]
    plugin_dir: Option<PathBuf>,

    /// Log level or filter directives
    #[arg(long, global = true, value_name = "LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the HTTP endpoint
    Serve {
        /// Address to listen on
        #[arg(long, value_name = "ADDR")]
        listen: Option<String>,

        /// Reload changed artifacts in the background
        #[arg(long)]
        watch: bool,
    },
    /// List discovered plugins
    List {
        #[arg(long)]
        json: bool,
    },
    /// Run one plugin on one input
    Invoke { plugin: String, input: String },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load_or_default(cli.config.as_deref())?;
    if let Some(dir) = cli.plugin_dir {
        config.plugins.dir = Some(dir);
    }
    if let Some(level) = cli.log_level {
        config.log.level = level;
    }
    if let Commands::Serve { listen, watch } = &cli.command {
        if let Some(listen) = listen {
            config.server.listen = listen.clone();
        }
        config.plugins.watch |= *watch;
    }
    config.validate()?;

    tracing_support::init_subscriber(&config.log)?;

    match cli.command {
        Commands::Serve { .. } => serve(config).await,
        Commands::List { json } => list(&config, json),
        Commands::Invoke { plugin, input } => invoke(&config, &plugin, &input),
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn serve(config: Config) -> Result<()> {
    let registry = {
        let config = config.clone();
        tokio::task::spawn_blocking(move || config.build_registry())
            .await
            .context("registry build aborted")??
    };
    tracing::info!(
        plugins = registry.len(),
        artifacts = registry.artifacts().len(),
        "registry ready"
    );

    let watcher = if config.plugins.watch {
        Some(
            HotReloadWatcher::new(registry.clone(), config.watcher_config())
                .context("Failed to start artifact watcher")?,
        )
    } else {
        None
    };

    let server = Server::bind(config.listen_addr()?, PluginEndpoint::new(registry)).await?;
    let result = server.run().await;

    if let Some(watcher) = watcher {
        watcher.shutdown().await;
    }
    result
}

fn list(config: &Config, json: bool) -> Result<()> {
    let registry = config.build_registry()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&registry.list())?);
    } else {
        print!("{}", PluginEndpoint::new(registry).plugin_list());
    }
    Ok(())
}

fn invoke(config: &Config, plugin: &str, input: &str) -> Result<()> {
    let registry = config.build_registry()?;
    match registry.invoke(plugin, input) {
        Ok(output) => {
            println!("{}", output);
            Ok(())
        }
        Err(RegistryError::PluginNotFound(name)) => {
            let searched: Vec<String> = registry
                .directories()
                .iter()
                .map(|dir| dir.display().to_string())
                .collect();
            anyhow::bail!("plugin '{}' not loaded from {}", name, searched.join(", "))
        }
        Err(err) => Err(err.into()),
    }
}
