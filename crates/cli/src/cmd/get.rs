//! Get command

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use bytesize::ByteSize;
use clap::Parser;
use color_eyre::eyre::{eyre, Result};
use tracing::info;

use dcmanager_config::Config;
use dcmanager_download::{download, DownloadOptions, ProgressSink};
use dcmanager_types::{ContentId, EntryKind, TransmitStatus};

use crate::cmd::{build_fetcher, build_oracle, cancel_on_ctrl_c};

#[derive(Parser, Debug, Clone, PartialEq)]
pub struct GetCmd {
    /// Identifier of the file or directory
    pub cid: ContentId,

    /// Destination path (default: the identifier, in the current directory)
    #[clap(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Secret the content was encrypted with
    #[clap(long, env = "DCMANAGER_SECRET", hide_env_values = true)]
    pub secret: Option<String>,

    /// Give up after this long (default: from the configuration)
    #[clap(long, conflicts_with = "no_timeout")]
    pub timeout: Option<humantime::Duration>,

    /// Wait for the download however long it takes
    #[clap(long)]
    pub no_timeout: bool,
}

impl GetCmd {
    pub async fn run(&self, config: Config) -> Result<()> {
        let cancel = cancel_on_ctrl_c();

        let oracle = build_oracle(&config.chain, &cancel)?;
        let fetcher = build_fetcher(oracle, &config.download);

        let dest = self
            .output
            .clone()
            .unwrap_or_else(|| PathBuf::from(self.cid.to_string()));

        let options = DownloadOptions {
            secret: self.secret.clone(),
            timeout: self.effective_timeout(&config),
            channel_capacity: config.download.channel_capacity,
        };

        let summary = download(&fetcher, &self.cid, &dest, &options, &ConsoleProgress, &cancel)
            .await
            .map_err(|e| eyre!("Failed to download {}: {e}", self.cid))?;

        match summary.kind {
            EntryKind::File => info!(
                path = %dest.display(),
                size = %ByteSize::b(summary.bytes),
                "File downloaded"
            ),
            EntryKind::Directory => info!(
                path = %dest.display(),
                files = summary.files,
                directories = summary.directories,
                size = %ByteSize::b(summary.bytes),
                "Directory downloaded"
            ),
        }

        Ok(())
    }

    fn effective_timeout(&self, config: &Config) -> Option<Duration> {
        if self.no_timeout {
            return None;
        }

        Some(self.timeout.map_or(config.download.timeout, Duration::from))
    }
}

/// Prints progress on a single terminal line.
struct ConsoleProgress;

impl ProgressSink for ConsoleProgress {
    fn report(&self, status: TransmitStatus, bytes: u64) {
        let mut stderr = std::io::stderr().lock();

        let size = ByteSize::b(bytes).to_string();

        let _ = match status {
            TransmitStatus::Transmitting | TransmitStatus::ConvertingToObject => {
                write!(stderr, "\rDownloading... {size:>12}")
            }
            TransmitStatus::Success => writeln!(stderr, "\rDownloaded {size:>12}    "),
            TransmitStatus::Failed | TransmitStatus::Error => {
                writeln!(stderr, "\rFailed after {size:>12}  ")
            }
        };

        let _ = stderr.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(timeout: Option<&str>, no_timeout: bool) -> GetCmd {
        GetCmd {
            cid: ContentId::of(b"hello world"),
            output: None,
            secret: None,
            timeout: timeout.map(|t| t.parse().unwrap()),
            no_timeout,
        }
    }

    #[test]
    fn timeout_resolution() {
        let config = Config::default();

        assert_eq!(cmd(None, false).effective_timeout(&config), Some(Duration::from_secs(600)));
        assert_eq!(cmd(Some("5m"), false).effective_timeout(&config), Some(Duration::from_secs(300)));
        assert_eq!(cmd(None, true).effective_timeout(&config), None);
    }
}
