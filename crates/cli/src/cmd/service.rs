//! Start and stop commands

use clap::Parser;
use color_eyre::eyre::{Result, WrapErr};
use tracing::info;

use dcmanager_config::Config;
use dcmanager_upgrade::{ContainerRuntime, ContainerSpec, DockerCli, ServiceFlag, Sgx};

#[derive(Parser, Debug, Clone, Default, PartialEq)]
pub struct ServiceCmd {}

impl ServiceCmd {
    pub async fn start(&self, config: Config) -> Result<()> {
        let flag = ServiceFlag::new(&config.upgrade.desired_flag);
        flag.set(true)
            .await
            .wrap_err_with(|| format!("Failed to write {}", flag.path().display()))?;

        let docker = DockerCli::default();

        if docker.is_running(&config.node.container).await? {
            info!(name = %config.node.container, "Storage node already running");
            return Ok(());
        }

        let spec = ContainerSpec::node(&config.node, &config.node.image, Sgx::detect());
        docker.start(&spec).await?;

        Ok(())
    }

    pub async fn stop(&self, config: Config) -> Result<()> {
        let flag = ServiceFlag::new(&config.upgrade.desired_flag);
        flag.set(false)
            .await
            .wrap_err_with(|| format!("Failed to write {}", flag.path().display()))?;

        let docker = DockerCli::default();
        docker.stop(&config.node.container).await?;
        docker.stop(&config.upgrade.assistant_container).await?;

        Ok(())
    }
}
