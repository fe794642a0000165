use color_eyre::eyre::{eyre, Result};
use tracing::{info, trace};

use dcmanager_config::{load_config, Config, ENV_PREFIX};

use crate::args::{Args, Commands};

mod args;
mod cmd;
mod logging;

pub fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::new();
    let config_file = args.get_config_file_path()?;

    let loaded = load_config(&config_file, Some(ENV_PREFIX))
        .map_err(|e| eyre!("Failed to load configuration file {}: {e}", config_file.display()));

    // Command-line options override the logging section of the configuration
    let mut logging = loaded.as_ref().map(|c| c.logging.clone()).unwrap_or_default();
    if let Some(log_level) = args.log_level {
        logging.log_level = log_level;
    }
    if let Some(log_format) = args.log_format {
        logging.log_format = log_format;
    }

    // Flushes file logs on exit, so it must stay bound until then
    let _guard = logging::init(logging.log_level, logging.log_format, logging.log_dir.as_deref());

    trace!("Command-line parameters: {args:?}");

    if let Commands::Init(cmd) = &args.command {
        return cmd.run(&config_file, logging);
    }

    let mut config: Config = loaded?;
    config.logging = logging;

    info!(file = %config_file.display(), "Loaded configuration");
    trace!(?config, "Configuration");

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| eyre!("Failed to build runtime: {e}"))?;

    rt.block_on(async move {
        match &args.command {
            Commands::Init(_) => Ok(()),
            Commands::Get(cmd) => cmd.run(config).await,
            Commands::Daemon(cmd) => cmd.run(config, &config_file).await,
            Commands::Start(cmd) => cmd.start(config).await,
            Commands::Stop(cmd) => cmd.stop(config).await,
            Commands::Status(cmd) => cmd.run(config).await,
        }
    })
}
