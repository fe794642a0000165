use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use dcmanager_config::{NodeConfig, UpgradeConfig};

use crate::ContainerError;

const DATA_VOLUME: &str = "dcstorage:/opt/dcnetio/data";
const DISKS_BIND: &str = "/opt/dcnetio/disks:/opt/dcnetio/disks";
const ETC_BIND: &str = "/opt/dcnetio/etc:/opt/dcnetio/etc";
const SGX_DEVICES: [&str; 2] = ["/dev/sgx/enclave", "/dev/sgx/provision"];

/// Whether the host exposes the SGX device nodes to containers.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Sgx {
    Available,
    Unavailable,
}

impl Sgx {
    pub fn detect() -> Self {
        if Path::new(SGX_DEVICES[0]).exists() {
            Self::Available
        } else {
            Self::Unavailable
        }
    }
}

/// Everything needed to start one of the managed containers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub entrypoint: Option<String>,
    pub volumes: Vec<String>,
    pub devices: Vec<String>,
    pub log_max_size: &'static str,
    pub log_max_files: u32,
}

impl ContainerSpec {
    /// The storage node, running `image`.
    pub fn node(config: &NodeConfig, image: &str, sgx: Sgx) -> Self {
        let (entrypoint, devices) = match sgx {
            Sgx::Available => ("dcstorage", sgx_devices()),
            Sgx::Unavailable => ("dcstorage_native", Vec::new()),
        };

        Self {
            name: config.container.clone(),
            image: image.to_string(),
            entrypoint: Some(entrypoint.to_string()),
            volumes: vec![
                DATA_VOLUME.to_string(),
                DISKS_BIND.to_string(),
                ETC_BIND.to_string(),
            ],
            devices,
            log_max_size: "100m",
            log_max_files: 3,
        }
    }

    /// The key hand-off assistant.
    pub fn assistant(config: &UpgradeConfig, sgx: Sgx) -> Self {
        Self {
            name: config.assistant_container.clone(),
            image: config.assistant_image.clone(),
            entrypoint: None,
            volumes: Vec::new(),
            devices: match sgx {
                Sgx::Available => sgx_devices(),
                Sgx::Unavailable => Vec::new(),
            },
            log_max_size: "10m",
            log_max_files: 3,
        }
    }

    /// Arguments of `docker run` for this container.
    pub fn run_args(&self) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--detach".to_string(),
            "--name".to_string(),
            self.name.clone(),
            "--network".to_string(),
            "host".to_string(),
            "--restart".to_string(),
            "always".to_string(),
            "--log-driver".to_string(),
            "json-file".to_string(),
            "--log-opt".to_string(),
            format!("max-size={}", self.log_max_size),
            "--log-opt".to_string(),
            format!("max-file={}", self.log_max_files),
        ];

        for volume in &self.volumes {
            args.push("--volume".to_string());
            args.push(volume.clone());
        }

        for device in &self.devices {
            args.push("--device".to_string());
            args.push(device.clone());
        }

        if let Some(entrypoint) = &self.entrypoint {
            args.push("--entrypoint".to_string());
            args.push(entrypoint.clone());
        }

        args.push(self.image.clone());
        args
    }
}

fn sgx_devices() -> Vec<String> {
    SGX_DEVICES.iter().map(|d| format!("{d}:{d}")).collect()
}

/// Lifecycle operations on the local container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn start(&self, spec: &ContainerSpec) -> Result<(), ContainerError>;

    /// Stopping a container that does not run is not an error.
    async fn stop(&self, name: &str) -> Result<(), ContainerError>;

    /// Removing a container that does not exist is not an error.
    async fn remove(&self, name: &str) -> Result<(), ContainerError>;

    async fn is_running(&self, name: &str) -> Result<bool, ContainerError>;

    /// Imports an image tarball.
    async fn load_image(&self, tarball: &Path) -> Result<(), ContainerError>;

    async fn pull_image(&self, reference: &str) -> Result<(), ContainerError>;
}

/// [`ContainerRuntime`] driving the `docker` command line client.
#[derive(Clone, Debug)]
pub struct DockerCli {
    program: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String, ContainerError> {
        let command = format!("{} {}", self.program, args.join(" "));
        debug!(%command, "Running container command");

        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ContainerError::Spawn {
                command: command.clone(),
                source,
            })?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(ContainerError::Failed {
                command,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    async fn exists(&self, name: &str) -> Result<bool, ContainerError> {
        let filter = format!("name=^{name}$");
        let found = self
            .run(&["ps", "--all", "--quiet", "--filter", &filter])
            .await?;

        Ok(!found.is_empty())
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn start(&self, spec: &ContainerSpec) -> Result<(), ContainerError> {
        // A stopped container with the same name is started as it is
        if self.exists(&spec.name).await? {
            self.run(&["start", &spec.name]).await?;
        } else {
            let args = spec.run_args();
            let args = args.iter().map(String::as_str).collect::<Vec<_>>();
            self.run(&args).await?;
        }

        info!(name = %spec.name, image = %spec.image, "Container started");
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<(), ContainerError> {
        if self.is_running(name).await? {
            self.run(&["stop", name]).await?;
            info!(%name, "Container stopped");
        }

        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<(), ContainerError> {
        if self.exists(name).await? {
            self.run(&["rm", "--force", name]).await?;
            info!(%name, "Container removed");
        }

        Ok(())
    }

    async fn is_running(&self, name: &str) -> Result<bool, ContainerError> {
        let filter = format!("name=^{name}$");
        let found = self
            .run(&["ps", "--quiet", "--filter", &filter, "--filter", "status=running"])
            .await?;

        Ok(!found.is_empty())
    }

    async fn load_image(&self, tarball: &Path) -> Result<(), ContainerError> {
        let path = tarball.to_string_lossy();
        self.run(&["load", "--input", &path]).await?;
        Ok(())
    }

    async fn pull_image(&self, reference: &str) -> Result<(), ContainerError> {
        self.run(&["pull", reference]).await?;
        Ok(())
    }
}
