//! Command-line interface of the node manager
//!
//! Configuration is read from the file given with `--config`, by default
//! `$HOME/.dcmanager/config/config.toml`. Logging options can be overridden
//! on the command line.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{eyre, Result};
use directories::BaseDirs;

use dcmanager_config::{LogFormat, LogLevel};

use crate::cmd::daemon::DaemonCmd;
use crate::cmd::get::GetCmd;
use crate::cmd::init::InitCmd;
use crate::cmd::service::ServiceCmd;
use crate::cmd::status::StatusCmd;

const APP_FOLDER: &str = ".dcmanager";
const CONFIG_FILE: &str = "config.toml";

#[derive(Parser, Clone, Debug)]
#[command(name = "dcmanager", version, about, long_about = None)]
pub struct Args {
    /// Config file path
    #[arg(short, long, global = true, value_name = "FILE", env = "DCMANAGER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (default: `info`)
    #[arg(long, global = true)]
    pub log_level: Option<LogLevel>,

    /// Log format (default: `plaintext`)
    #[arg(long, global = true)]
    pub log_format: Option<LogFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone, Debug, PartialEq)]
pub enum Commands {
    /// Write a default configuration file
    Init(InitCmd),

    /// Download a file or directory from the storage network
    Get(GetCmd),

    /// Run the upgrade scheduler
    Daemon(DaemonCmd),

    /// Mark the storage node as wanted and start it
    Start(ServiceCmd),

    /// Mark the storage node as not wanted and stop it
    Stop(ServiceCmd),

    /// Show what the storage node and the assistant report
    Status(StatusCmd),
}

impl Args {
    pub fn new() -> Args {
        Args::parse()
    }

    /// Application home folder, typically `$HOME/.dcmanager`.
    pub fn get_home_dir(&self) -> Result<PathBuf> {
        Ok(BaseDirs::new()
            .ok_or_else(|| eyre!("could not determine home directory path"))?
            .home_dir()
            .join(APP_FOLDER))
    }

    pub fn get_config_dir(&self) -> Result<PathBuf> {
        Ok(self.get_home_dir()?.join("config"))
    }

    pub fn get_config_file_path(&self) -> Result<PathBuf> {
        Ok(match &self.config {
            Some(path) => path.clone(),
            None => self.get_config_dir()?.join(CONFIG_FILE),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn args_struct() {
        let args = Args::parse_from(["test", "--log-level", "debug", "init"]);
        assert_eq!(args.log_level, Some(LogLevel::Debug));
        assert!(matches!(args.command, Commands::Init(_)));

        let args = Args::parse_from(["test", "status", "--config", "myconfig.toml"]);
        assert_eq!(args.config, Some(PathBuf::from("myconfig.toml")));
        assert!(matches!(args.command, Commands::Status(_)));
        assert!(args.get_home_dir().is_ok());
    }

    #[test]
    fn get_arguments() {
        let args = Args::parse_from([
            "test",
            "get",
            "QmaozNR7DZHQK1ZcU9p7QdrshMvXqWK6gpu5rmrkPdT3L4",
            "--output",
            "out.bin",
            "--secret",
            "bsecret",
            "--timeout",
            "90s",
        ]);

        let Commands::Get(cmd) = args.command else {
            panic!("expected get command");
        };

        assert_eq!(cmd.output, Some(PathBuf::from("out.bin")));
        assert_eq!(cmd.secret.as_deref(), Some("bsecret"));
        assert_eq!(cmd.timeout.map(Duration::from), Some(Duration::from_secs(90)));
        assert!(!cmd.no_timeout);

        let args = Args::parse_from([
            "test",
            "get",
            "QmaozNR7DZHQK1ZcU9p7QdrshMvXqWK6gpu5rmrkPdT3L4",
            "--no-timeout",
        ]);
        let Commands::Get(cmd) = args.command else {
            panic!("expected get command");
        };
        assert!(cmd.no_timeout);

        assert!(Args::try_parse_from(["test", "get", "not-a-cid"]).is_err());
        assert!(Args::try_parse_from([
            "test",
            "get",
            "QmaozNR7DZHQK1ZcU9p7QdrshMvXqWK6gpu5rmrkPdT3L4",
            "--timeout",
            "1m",
            "--no-timeout",
        ])
        .is_err());
    }
}
