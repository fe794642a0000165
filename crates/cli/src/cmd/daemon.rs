//! Daemon command

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::{eyre, Result, WrapErr};
use tracing::{error, info, Instrument};

use dcmanager_config::Config;
use dcmanager_download::DownloadOptions;
use dcmanager_metrics::serve_metrics;
use dcmanager_upgrade::{
    Collaborators, ConfigFileStore, DaemonLock, DockerCli, NetworkDownloader, Scheduler,
    ServiceFlag, Sgx, UpgradeCoordinator,
};

use crate::cmd::{build_fetcher, build_oracle, build_status_client, cancel_on_ctrl_c};

#[derive(Parser, Debug, Clone, Default, PartialEq)]
pub struct DaemonCmd {
    /// Run a single upgrade cycle and exit
    #[clap(long)]
    pub once: bool,
}

impl DaemonCmd {
    pub async fn run(&self, config: Config, config_file: &Path) -> Result<()> {
        let _lock = DaemonLock::acquire(&config.upgrade.lock_file)?;

        let span = tracing::error_span!("daemon");

        if config.metrics.enabled {
            let listen_addr = config.metrics.listen_addr;
            tokio::spawn(
                async move {
                    if let Err(e) = serve_metrics(listen_addr).await {
                        error!("Metrics server stopped: {e}");
                    }
                }
                .instrument(span.clone()),
            );
        }

        let cancel = cancel_on_ctrl_c();

        let oracle = build_oracle(&config.chain, &cancel)?;
        let fetcher = build_fetcher(oracle.clone(), &config.download);
        let status = Arc::new(build_status_client(&config)?);
        let runtime = Arc::new(DockerCli::default());

        let downloader = NetworkDownloader::new(
            fetcher,
            DownloadOptions {
                secret: None,
                timeout: Some(config.upgrade.image_fetch_timeout),
                channel_capacity: config.download.channel_capacity,
            },
        );

        let sgx = Sgx::detect();
        info!(?sgx, "Host capabilities");

        let collaborators = Collaborators {
            oracle,
            runtime,
            status,
            downloader: Arc::new(downloader),
            store: Arc::new(ConfigFileStore::new(config_file, config.clone())),
        };

        let mut coordinator = UpgradeCoordinator::new(&config, collaborators, sgx);
        let flag = ServiceFlag::new(&config.upgrade.desired_flag);

        async {
            if flag.is_desired().await {
                coordinator
                    .ensure_node_running()
                    .await
                    .wrap_err("Failed to start storage node")?;
            }

            if self.once {
                let outcome = coordinator
                    .run_cycle(&cancel)
                    .await
                    .map_err(|e| eyre!("Upgrade cycle failed: {e}"))?;

                info!(?outcome, "Upgrade cycle finished");
                return Ok(());
            }

            Scheduler::new(config.upgrade.interval, flag)
                .run(&mut coordinator, &cancel)
                .await;

            Ok::<_, color_eyre::eyre::Report>(())
        }
        .instrument(span)
        .await
    }
}
