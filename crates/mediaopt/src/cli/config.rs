//! The `mediaopt config` command for configuration management.

use clap::{Args, Subcommand};
use mediaopt_core::{Config, ConfigError};
use std::path::PathBuf;

/// Arguments for the `config` command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Subcommands for configuration management.
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Display the effective configuration (file, .env and environment merged)
    Show,

    /// Show config file path
    Path,

    /// Initialize a new config file with defaults
    Init {
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
}

/// Execute the config command.
///
/// `explicit` is the `--config` path, which replaces the default location for
/// every subcommand.
pub async fn execute(
    args: ConfigArgs,
    loaded: Result<Config, ConfigError>,
    explicit: Option<PathBuf>,
) -> anyhow::Result<()> {
    let path = explicit.unwrap_or_else(Config::default_path);

    match args.command {
        ConfigCommand::Show => {
            let config = loaded?;
            let toml = config.to_toml()?;
            println!("{}", toml);
        }

        ConfigCommand::Path => {
            println!("{}", path.display());
        }

        ConfigCommand::Init { force } => {
            if path.exists() && !force {
                anyhow::bail!(
                    "Config file already exists at: {}\nUse --force to overwrite.",
                    path.display()
                );
            }

            // Ensure parent directory exists
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            // Write default config
            let config = Config::default();
            let toml = config.to_toml()?;
            std::fs::write(&path, toml)?;

            tracing::info!("Config file created at: {}", path.display());
            println!("Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_writes_loadable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");

        let args = ConfigArgs {
            command: ConfigCommand::Init { force: false },
        };
        execute(args, Ok(Config::default()), Some(path.clone()))
            .await
            .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.video.crf, 28);
    }

    #[tokio::test]
    async fn test_init_refuses_to_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "# mine\n").unwrap();

        let args = ConfigArgs {
            command: ConfigCommand::Init { force: false },
        };
        assert!(execute(args, Ok(Config::default()), Some(path.clone()))
            .await
            .is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# mine\n");

        let args = ConfigArgs {
            command: ConfigCommand::Init { force: true },
        };
        execute(args, Ok(Config::default()), Some(path.clone()))
            .await
            .unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().contains("[video]"));
    }
}
