//! Status command

use clap::Parser;
use color_eyre::eyre::Result;

use dcmanager_config::Config;
use dcmanager_upgrade::{Service, ServiceFlag, StatusSurface};

use crate::cmd::build_status_client;

#[derive(Parser, Debug, Clone, Default, PartialEq)]
pub struct StatusCmd {}

impl StatusCmd {
    pub async fn run(&self, config: Config) -> Result<()> {
        let client = build_status_client(&config)?;
        let desired = ServiceFlag::new(&config.upgrade.desired_flag).is_desired().await;

        println!("service desired: {desired}");

        match client.version(Service::Node).await {
            Ok(id) => println!("node:      version {} enclave {}", id.version, id.enclave_id),
            Err(e) => println!("node:      unavailable ({e})"),
        }

        if let Ok(id) = client.version(Service::Assistant).await {
            println!("assistant: version {} enclave {}", id.version, id.enclave_id);
        }

        Ok(())
    }
}
