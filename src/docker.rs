use std::{collections::HashMap, path::Path};

use bollard::{
    container::{
        Config, CreateContainerOptions, ListContainersOptions, LogsOptions, NetworkingConfig,
        RemoveContainerOptions, StopContainerOptions, WaitContainerOptions,
    },
    errors::Error as BollardError,
    image::BuildImageOptions,
    network::{ConnectNetworkOptions, CreateNetworkOptions},
    secret::HostConfig,
    volume::RemoveVolumeOptions,
    Docker, API_DEFAULT_VERSION,
};
use futures::{StreamExt, TryStreamExt};
use stacked_errors::{bail, Result, StackableErr};
use tracing::debug;

use crate::{
    BuildOutcome, ContainerInfo, ContainerRuntime, ContainerSpec, ContainerStatus, CreateOutcome,
    ExitInfo, ImageInfo, PortBind, RuntimeEndpoint,
};

pub mod docker_socket {
    use std::sync::{LazyLock, OnceLock};

    use stacked_errors::{Result, StackableErr};

    /// This acquires a process-wide unified `bollard::Docker` handle to the
    /// local daemon
    pub async fn get_or_init_default_docker_instance() -> Result<bollard::Docker> {
        static DOCKER_SOCKET: OnceLock<bollard::Docker> = OnceLock::new();
        static EXEC_LOCK: LazyLock<tokio::sync::Mutex<()>> = LazyLock::new(Default::default);

        // this has a fast path with a slow path that is careful to not block the
        // process
        if let Some(docker_instance) = DOCKER_SOCKET.get() {
            Ok(docker_instance.clone())
        } else {
            let _exec_lock = EXEC_LOCK.lock().await;

            if let Some(docker_instance) = DOCKER_SOCKET.get() {
                Ok(docker_instance.clone())
            } else {
                let docker_socket = tokio::task::spawn_blocking(|| {
                    bollard::Docker::connect_with_defaults().stack()
                })
                .await
                .stack()??;

                let docker_instance = DOCKER_SOCKET.get_or_init(|| docker_socket);
                Ok(docker_instance.clone())
            }
        }
    }
}

/// How long API requests to a remote machine may take, in seconds
const REMOTE_TIMEOUT: u64 = 120;

pub(crate) fn port_bindings_to_bollard_args(
    pbs: &[PortBind],
) -> (
    Option<HashMap<String, HashMap<(), ()>>>,
    Option<HashMap<String, Option<Vec<bollard::secret::PortBinding>>>>,
) {
    if pbs.is_empty() {
        return (None, None)
    }
    Some(
        pbs.iter()
            .map(|pb| {
                (
                    (pb.container_port.to_string(), HashMap::new()),
                    (
                        pb.container_port.to_string(),
                        Some(vec![bollard::secret::PortBinding {
                            host_port: pb
                                .host_port
                                .or(Some(pb.container_port))
                                .as_ref()
                                .map(ToString::to_string),
                            host_ip: pb.host_ip.as_ref().map(ToString::to_string),
                        }]),
                    ),
                )
            })
            .unzip(),
    )
    .unzip()
}

/// [ContainerRuntime] talking to a docker daemon through its HTTP API
#[derive(Debug, Clone)]
pub struct BollardRuntime {
    docker: Docker,
    endpoint: RuntimeEndpoint,
}

impl BollardRuntime {
    /// Uses `DOCKER_HOST` or the local socket like the `docker` CLI does.
    /// `endpoint` is where that resolves to, see
    /// [RuntimeEndpoint::from_docker_env].
    pub async fn local(endpoint: RuntimeEndpoint) -> Result<Self> {
        let docker = docker_socket::get_or_init_default_docker_instance()
            .await
            .stack()?;
        Ok(Self { docker, endpoint })
    }

    /// Connects to a TLS protected daemon, `cert_dir` has the `key.pem`,
    /// `cert.pem`, and `ca.pem` of the client
    pub fn remote_tls(url: &str, cert_dir: &Path) -> Result<Self> {
        let docker = Docker::connect_with_ssl(
            url,
            &cert_dir.join("key.pem"),
            &cert_dir.join("cert.pem"),
            &cert_dir.join("ca.pem"),
            REMOTE_TIMEOUT,
            API_DEFAULT_VERSION,
        )
        .stack_err_with(|| {
            format!(
                "BollardRuntime::remote_tls -> could not connect to {url} with certificates \
                 from {cert_dir:?}"
            )
        })?;
        Ok(Self {
            docker,
            endpoint: RuntimeEndpoint::remote_tls(url),
        })
    }

    async fn collect_logs(
        &self,
        name: &str,
        stderr: bool,
        tail: Option<usize>,
    ) -> Result<String> {
        let output = self
            .docker
            .logs(
                name,
                Some(LogsOptions::<String> {
                    stdout: true,
                    stderr,
                    tail: tail.map_or_else(|| "all".to_owned(), |tail| tail.to_string()),
                    ..Default::default()
                }),
            )
            .try_collect::<Vec<_>>()
            .await
            .stack_err_with(|| format!("collecting the logs of container {name}"))?;
        let mut bytes = vec![];
        for chunk in output {
            bytes.extend_from_slice(&chunk.into_bytes());
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[async_trait::async_trait]
impl ContainerRuntime for BollardRuntime {
    fn endpoint(&self) -> &RuntimeEndpoint {
        &self.endpoint
    }

    #[tracing::instrument(skip(self))]
    async fn find_container(&self, name: &str) -> Result<Option<ContainerInfo>> {
        let filters = HashMap::from([("name".to_owned(), vec![format!("^/{name}$")])]);
        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: true,
                filters,
                ..Default::default()
            }))
            .await
            .stack()?;
        let expected = format!("/{name}");
        Ok(containers.into_iter().find_map(|container| {
            container
                .names
                .as_ref()?
                .iter()
                .any(|n| *n == expected)
                .then(|| ContainerInfo {
                    id: container.id.clone().unwrap_or_default(),
                    name: name.to_owned(),
                    status: ContainerStatus::parse(container.state.as_deref().unwrap_or_default()),
                })
        }))
    }

    #[tracing::instrument(skip(self))]
    async fn stop_container(&self, name: &str) -> Result<()> {
        self.docker
            .stop_container(name, None::<StopContainerOptions>)
            .await
            .stack()
    }

    #[tracing::instrument(skip(self))]
    async fn remove_container(&self, name: &str) -> Result<()> {
        self.docker
            .remove_container(name, None::<RemoveContainerOptions>)
            .await
            .stack()
    }

    #[tracing::instrument(skip_all, fields(container.name = %spec.name, image = %spec.image))]
    async fn create_container(&self, spec: &ContainerSpec) -> Result<Option<String>> {
        let (exposed_ports, port_bindings) = port_bindings_to_bollard_args(&spec.port_bindings);
        let binds = spec
            .volumes
            .iter()
            .map(|(volume, container)| format!("{volume}:{container}"))
            .collect::<Vec<_>>();
        let networking_config = spec.network.as_ref().map(|network| NetworkingConfig {
            endpoints_config: [(network.clone(), Default::default())]
                .into_iter()
                .collect(),
        });

        debug!("Creating container");
        let response = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.clone(),
                    ..Default::default()
                }),
                Config {
                    image: Some(spec.image.clone()),
                    cmd: spec.cmd.clone(),
                    env: Some(spec.env_vars.clone()),
                    exposed_ports,
                    host_config: Some(HostConfig {
                        port_bindings,
                        binds: Some(binds),
                        ..Default::default()
                    }),
                    networking_config,
                    ..Default::default()
                },
            )
            .await;
        match response {
            Ok(response) => {
                debug!(container.id = %response.id, "Created container");
                Ok(Some(response.id))
            }
            // the daemon enforces unique names, this is the only atomic check
            Err(BollardError::DockerResponseServerError {
                status_code: 409, ..
            }) => Ok(None),
            Err(e) => Err(e).stack(),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn start_container(&self, name: &str) -> Result<()> {
        self.docker
            .start_container::<String>(name, None)
            .await
            .stack()
    }

    #[tracing::instrument(skip(self))]
    async fn wait_container(&self, name: &str) -> Result<ExitInfo> {
        let mut wait = std::pin::pin!(self
            .docker
            .wait_container(name, None::<WaitContainerOptions<String>>));
        match wait.next().await {
            Some(Ok(response)) => Ok(ExitInfo {
                status_code: response.status_code,
                error: response.error.and_then(|e| e.message),
            }),
            // bollard turns non-zero exit codes into this error
            Some(Err(BollardError::DockerContainerWaitError { error, code })) => Ok(ExitInfo {
                status_code: code,
                error: (!error.is_empty()).then_some(error),
            }),
            Some(Err(e)) => Err(e).stack(),
            None => bail!("wait on container {name} ended without a response"),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn container_logs(&self, name: &str, tail: Option<usize>) -> Result<String> {
        self.collect_logs(name, true, tail).await
    }

    #[tracing::instrument(skip(self))]
    async fn run_and_remove(&self, image: &str, cmd: &[String]) -> Result<String> {
        let name = format!("nycdbuddy_run_{}", uuid::Uuid::new_v4().simple());
        let spec = ContainerSpec {
            cmd: Some(cmd.to_vec()),
            ..ContainerSpec::new(&name, image)
        };
        if let CreateOutcome::NameTaken = self.create_and_start(&spec).await.stack()? {
            bail!("a container named {name} already exists")
        }
        let res = async {
            let exit = self.wait_container(&name).await.stack()?;
            if !exit.succeeded() {
                let logs = self.collect_logs(&name, true, None).await.stack()?;
                bail!(
                    "`{}` in image {image} exited with {exit:?}, output:\n{logs}",
                    cmd.join(" ")
                )
            }
            self.collect_logs(&name, false, None).await.stack()
        }
        .await;
        // clean up regardless
        let removed = self.remove_container(&name).await;
        let output = res.stack()?;
        removed.stack()?;
        Ok(output)
    }

    #[tracing::instrument(skip(self))]
    async fn network_exists(&self, name: &str) -> Result<bool> {
        Ok(self
            .docker
            .list_networks::<String>(None)
            .await
            .stack()?
            .into_iter()
            .any(|network| network.name.as_deref() == Some(name)))
    }

    #[tracing::instrument(skip(self))]
    async fn create_network(&self, name: &str) -> Result<()> {
        let response = self
            .docker
            .create_network(CreateNetworkOptions {
                name: name.to_owned(),
                driver: "bridge".to_owned(),
                ..Default::default()
            })
            .await
            .stack()?;
        debug!(network.id = ?response.id);
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn network_containers(&self, name: &str) -> Result<Vec<String>> {
        let network = self
            .docker
            .inspect_network::<String>(name, None)
            .await
            .stack()?;
        Ok(network
            .containers
            .unwrap_or_default()
            .into_values()
            .filter_map(|container| container.name)
            .collect())
    }

    #[tracing::instrument(skip(self))]
    async fn connect_network(&self, network: &str, container: &str) -> Result<()> {
        self.docker
            .connect_network(network, ConnectNetworkOptions {
                container: container.to_owned(),
                endpoint_config: Default::default(),
            })
            .await
            .stack()
    }

    #[tracing::instrument(skip(self))]
    async fn volume_exists(&self, name: &str) -> Result<bool> {
        Ok(self
            .docker
            .list_volumes::<String>(None)
            .await
            .stack()?
            .volumes
            .unwrap_or_default()
            .iter()
            .any(|volume| volume.name == name))
    }

    #[tracing::instrument(skip(self))]
    async fn remove_volume(&self, name: &str) -> Result<()> {
        self.docker
            .remove_volume(name, None::<RemoveVolumeOptions>)
            .await
            .stack()
    }

    #[tracing::instrument(skip(self, context))]
    async fn build_image(&self, tag: &str, context: Vec<u8>) -> Result<BuildOutcome> {
        let opts = BuildImageOptions {
            t: tag.to_owned(),
            dockerfile: "Dockerfile".to_owned(),
            rm: true,
            ..Default::default()
        };
        let mut stream = std::pin::pin!(self
            .docker
            .build_image(opts, None, Some(bytes::Bytes::from(context))));
        let mut log = vec![];
        while let Some(item) = stream.next().await {
            match item {
                Ok(info) => {
                    if let Some(line) = info.stream {
                        debug!("{}", line.trim());
                        log.push(line);
                    }
                    if let Some(message) = info.error {
                        return Ok(BuildOutcome::Failed { message, log })
                    }
                }
                Err(e) => {
                    return Ok(BuildOutcome::Failed {
                        message: e.to_string(),
                        log,
                    })
                }
            }
        }

        let image = self.docker.inspect_image(tag).await.stack()?;
        let id = image
            .id
            .stack_err_with(|| format!("image {tag} was built without an id"))?;
        Ok(BuildOutcome::Built(ImageInfo {
            id,
            tags: image.repo_tags.unwrap_or_default(),
        }))
    }
}
