//! Init command

use std::path::Path;

use clap::Parser;
use color_eyre::eyre::{eyre, Result};
use tracing::{info, warn};

use dcmanager_config::{save_config, Config, LoggingConfig};

#[derive(Parser, Debug, Clone, Default, PartialEq)]
pub struct InitCmd {
    /// Overwrite an existing configuration file
    #[clap(long)]
    pub overwrite: bool,
}

impl InitCmd {
    pub fn run(&self, config_file: &Path, logging: LoggingConfig) -> Result<()> {
        if config_file.exists() && !self.overwrite {
            warn!(
                file = %config_file.display(),
                "Configuration file already exists, use --overwrite to replace it"
            );
            return Ok(());
        }

        let config = Config {
            logging,
            ..Config::default()
        };

        save_config(config_file, &config)
            .map_err(|e| eyre!("Failed to save configuration to {}: {e}", config_file.display()))?;

        info!(file = %config_file.display(), "Configuration written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use dcmanager_config::{load_config, LogLevel};

    use super::*;

    #[test]
    fn writes_loadable_config() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("config/config.toml");

        let logging = LoggingConfig {
            log_level: LogLevel::Debug,
            ..Default::default()
        };

        InitCmd::default().run(&file, logging.clone()).unwrap();

        let config = load_config(&file, Some("DCMANAGER_TEST_INIT")).unwrap();
        assert_eq!(config.logging, logging);
        assert_eq!(config.node, Config::default().node);

        // An existing file is left alone
        std::fs::write(&file, "garbage").unwrap();
        InitCmd::default().run(&file, logging).unwrap();
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "garbage");
    }
}
