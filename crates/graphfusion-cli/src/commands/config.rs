//! Config 命令

use anyhow::{Result, bail};
use graphfusion_core::Config;

use super::{expand, load_config};
use crate::ConfigCommands;

pub async fn run(command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Init { path, force } => init(path.as_deref(), force),
        ConfigCommands::Show { path } => {
            let config = load_config(path.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        ConfigCommands::Validate { path } => {
            match load_config(path.as_deref()) {
                Ok(config) => {
                    println!(
                        "Configuration is valid (provider: {}, model: {})",
                        config.llm.provider, config.llm.model
                    );
                    Ok(())
                }
                Err(e) => bail!("Invalid configuration: {}", e),
            }
        }
    }
}

fn init(path: Option<&str>, force: bool) -> Result<()> {
    let path = path.map(expand).unwrap_or_else(Config::default_path);
    if path.exists() && !force {
        bail!(
            "{} already exists, pass --force to overwrite",
            path.display()
        );
    }

    let config = Config::default();
    config.save(&path)?;

    println!("Configuration initialized at: {}", path.display());
    println!("  Provider: {}", config.llm.provider);
    println!("  Model: {}", config.llm.model);
    println!("\nSet the provider API key in the file or through the environment.");
    Ok(())
}
