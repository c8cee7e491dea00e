#[cfg(test)]
use std::collections::HashMap;
use std::net::IpAddr;

use stacked_errors::{Result, StackableErr};
use tracing::warn;

/// Where the runtime API lives, needed for finding out where published ports
/// end up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeEndpoint {
    /// e.g. `unix:///var/run/docker.sock` or `tcp://52.1.2.3:2376`
    pub url: String,
    /// If the connection is TLS encrypted (as with `docker-machine` hosts)
    pub tls: bool,
}

impl RuntimeEndpoint {
    pub fn local() -> Self {
        Self {
            url: "unix:///var/run/docker.sock".to_owned(),
            tls: false,
        }
    }

    pub fn remote_tls(url: impl ToString) -> Self {
        Self {
            url: url.to_string(),
            tls: true,
        }
    }

    /// The endpoint `bollard::Docker::connect_with_defaults` ends up at for
    /// the given values of `DOCKER_HOST` and `DOCKER_TLS_VERIFY`. A `tcp://`
    /// or `http://` host is TLS when `DOCKER_TLS_VERIFY` is set to anything,
    /// which is what `docker-machine env` sets up. `https://` always is.
    pub fn from_docker_env(docker_host: Option<&str>, tls_verify: Option<&str>) -> Self {
        let Some(url) = docker_host.filter(|host| !host.is_empty()) else {
            return Self::local()
        };
        let plain = url.starts_with("tcp://") || url.starts_with("http://");
        Self {
            url: url.to_owned(),
            tls: url.starts_with("https://") || (plain && tls_verify.is_some()),
        }
    }

    /// [RuntimeEndpoint::from_docker_env] with the variables of this process
    pub fn from_env() -> Self {
        let docker_host = std::env::var("DOCKER_HOST").ok();
        let tls_verify = std::env::var("DOCKER_TLS_VERIFY").ok();
        Self::from_docker_env(docker_host.as_deref(), tls_verify.as_deref())
    }
}

/// The coarse lifecycle state of a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerStatus {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
    Other(String),
}

impl ContainerStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "created" => ContainerStatus::Created,
            "running" => ContainerStatus::Running,
            "paused" => ContainerStatus::Paused,
            "restarting" => ContainerStatus::Restarting,
            "removing" => ContainerStatus::Removing,
            "exited" => ContainerStatus::Exited,
            "dead" => ContainerStatus::Dead,
            other => ContainerStatus::Other(other.to_owned()),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, ContainerStatus::Running | ContainerStatus::Restarting)
    }
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ContainerStatus::Created => "created",
            ContainerStatus::Running => "running",
            ContainerStatus::Paused => "paused",
            ContainerStatus::Restarting => "restarting",
            ContainerStatus::Removing => "removing",
            ContainerStatus::Exited => "exited",
            ContainerStatus::Dead => "dead",
            ContainerStatus::Other(s) => s,
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub status: ContainerStatus,
}

/// What waiting on a container reports once it has exited
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitInfo {
    pub status_code: i64,
    /// An error reported by the runtime itself (as opposed to the process)
    pub error: Option<String>,
}

impl ExitInfo {
    pub fn succeeded(&self) -> bool {
        self.status_code == 0 && self.error.is_none()
    }
}

/// Define port mapping like for the argument `-p
/// <host_ip>:<host_port>:<container_port>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortBind {
    pub container_port: u16,
    pub host_port: Option<u16>,
    pub host_ip: Option<IpAddr>,
}

impl PortBind {
    /// Results in the port mapping `<port>:<port>`
    pub fn new(port: u16) -> Self {
        Self {
            container_port: port,
            host_port: Some(port),
            host_ip: None,
        }
    }

}

/// The arguments to the API's equivalent of `docker run --detach`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// `None` uses the image's default command
    pub cmd: Option<Vec<String>>,
    /// `KEY=value` entries
    pub env_vars: Vec<String>,
    /// `(volume_or_host_path, container_path)` pairs
    pub volumes: Vec<(String, String)>,
    pub port_bindings: Vec<PortBind>,
    /// The network the container is attached to on creation
    pub network: Option<String>,
}

impl ContainerSpec {
    pub fn new(name: impl ToString, image: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            image: image.to_string(),
            ..Default::default()
        }
    }
}

/// Creation is an atomic create-if-absent on the container name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Started { id: String },
    /// A container with the same name already exists, nothing was created
    NameTaken,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    /// The full id, including the `sha256:` prefix
    pub id: String,
    pub tags: Vec<String>,
}

impl ImageInfo {
    /// The first 12 hex digits of the id, like `docker images` shows
    pub fn short_id(&self) -> String {
        let hex = self
            .id
            .split_once(':')
            .map(|(_, hex)| hex)
            .unwrap_or(&self.id);
        hex.chars().take(12).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Built(ImageInfo),
    /// `log` holds every line-structured progress message of the build in
    /// order, `message` is the error reported by the runtime
    Failed { message: String, log: Vec<String> },
}

/// The subset of container engine operations the orchestration needs. Every
/// lookup is by name, no handles are retained between calls.
#[async_trait::async_trait]
pub trait ContainerRuntime: Send + Sync {
    fn endpoint(&self) -> &RuntimeEndpoint;

    /// Finds a container of any state with exactly this name
    async fn find_container(&self, name: &str) -> Result<Option<ContainerInfo>>;

    async fn stop_container(&self, name: &str) -> Result<()>;

    async fn remove_container(&self, name: &str) -> Result<()>;

    /// Creates a container without starting it, returning its id. `None` if
    /// the name is taken, in which case nothing was created.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<Option<String>>;

    async fn start_container(&self, name: &str) -> Result<()>;

    /// Creates and starts a detached container. A container that fails to
    /// start is removed again before the start error is returned.
    async fn create_and_start(&self, spec: &ContainerSpec) -> Result<CreateOutcome> {
        let Some(id) = self.create_container(spec).await.stack()? else {
            return Ok(CreateOutcome::NameTaken)
        };
        if let Err(e) = self.start_container(&spec.name).await {
            if let Err(removal) = self.remove_container(&spec.name).await {
                warn!(
                    "could not remove container {} after it failed to start: {removal}",
                    spec.name
                );
            }
            return Err(e).stack_err_with(|| format!("starting container {}", spec.name))
        }
        Ok(CreateOutcome::Started { id })
    }

    /// Waits for the container to exit
    async fn wait_container(&self, name: &str) -> Result<ExitInfo>;

    /// The combined stdout and stderr, limited to the last `tail` lines if set
    async fn container_logs(&self, name: &str, tail: Option<usize>) -> Result<String>;

    /// Runs `cmd` in a throwaway container to completion, returning its output
    async fn run_and_remove(&self, image: &str, cmd: &[String]) -> Result<String>;

    async fn network_exists(&self, name: &str) -> Result<bool>;

    async fn create_network(&self, name: &str) -> Result<()>;

    /// Names of the containers attached to the network
    async fn network_containers(&self, name: &str) -> Result<Vec<String>>;

    async fn connect_network(&self, network: &str, container: &str) -> Result<()>;

    async fn volume_exists(&self, name: &str) -> Result<bool>;

    async fn remove_volume(&self, name: &str) -> Result<()>;

    /// Builds `context` (a tarball containing a `Dockerfile`) and tags the
    /// result with `tag`
    async fn build_image(&self, tag: &str, context: Vec<u8>) -> Result<BuildOutcome>;
}

/// Converts environment pairs into the `KEY=value` form
pub fn env_vars<K: AsRef<str>, V: AsRef<str>>(
    pairs: impl IntoIterator<Item = (K, V)>,
) -> Vec<String> {
    pairs
        .into_iter()
        .map(|(k, v)| format!("{}={}", k.as_ref(), v.as_ref()))
        .collect()
}

/// Splits `KEY=value` entries back into a map
#[cfg(test)]
pub(crate) fn env_map(env_vars: &[String]) -> HashMap<String, String> {
    env_vars
        .iter()
        .filter_map(|kv| kv.split_once('='))
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect()
}
