//! In-memory stand-ins for the container engine and the database, so that the
//! orchestration can be tested without a docker daemon

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{
        atomic::{AtomicU32, Ordering},
        Mutex,
    },
};

use stacked_errors::{bail, Result, StackableErr};

use crate::{
    BuildOutcome, ConnectInfo, ContainerInfo, ContainerRuntime, ContainerSpec, ContainerStatus,
    Database, ExitInfo, ImageInfo, RuntimeEndpoint, TableInfo,
};

#[derive(Debug, Clone)]
struct FakeContainer {
    id: String,
    status: ContainerStatus,
    exit_code: i64,
    logs: String,
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    containers: BTreeMap<String, FakeContainer>,
    specs: HashMap<String, ContainerSpec>,
    created: HashMap<String, usize>,
    /// network name to attached container names
    networks: BTreeMap<String, BTreeSet<String>>,
    network_connects: usize,
    volumes: BTreeSet<String>,
    volume_removals: usize,
    images: HashMap<String, ImageInfo>,
    next_build_failure: Option<(String, Vec<String>)>,
    last_build_context: Option<Vec<u8>>,
    run_outputs: HashMap<String, String>,
    concurrent_create: Option<String>,
    failing_start: Option<String>,
}

impl State {
    fn next_id(&mut self) -> String {
        self.next_id += 1;
        format!("{:064x}", self.next_id)
    }
}

#[derive(Debug)]
pub struct FakeRuntime {
    endpoint: RuntimeEndpoint,
    state: Mutex<State>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::with_endpoint(RuntimeEndpoint::local())
    }

    pub fn with_endpoint(endpoint: RuntimeEndpoint) -> Self {
        Self {
            endpoint,
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Adds a container as if some earlier invocation had left it behind
    pub fn insert_container(&self, name: &str, status: ContainerStatus, exit_code: i64, logs: &str) {
        let mut state = self.state();
        let id = state.next_id();
        state.containers.insert(name.to_owned(), FakeContainer {
            id,
            status,
            exit_code,
            logs: logs.to_owned(),
        });
    }

    /// Makes a running container exit
    pub fn exit_container(&self, name: &str, exit_code: i64) {
        let mut state = self.state();
        let container = state.containers.get_mut(name).unwrap();
        container.status = ContainerStatus::Exited;
        container.exit_code = exit_code;
    }

    /// The next `create_and_start` of `name` finds that a container of that
    /// name appeared after the caller last looked
    pub fn create_concurrently_on_next_create(&self, name: &str) {
        self.state().concurrent_create = Some(name.to_owned());
    }

    /// The next start of `name` fails after it was created, as when its port
    /// is already taken
    pub fn fail_next_start(&self, name: &str) {
        self.state().failing_start = Some(name.to_owned());
    }

    /// Sets the output of `run_and_remove` for the command joined by spaces
    pub fn set_run_output(&self, cmd: &str, output: &str) {
        self.state()
            .run_outputs
            .insert(cmd.to_owned(), output.to_owned());
    }

    pub fn fail_next_build(&self, message: &str, log: Vec<String>) {
        self.state().next_build_failure = Some((message.to_owned(), log));
    }

    pub fn container_count(&self) -> usize {
        self.state().containers.len()
    }

    /// The `ContainerSpec` that `name` was last created with
    pub fn spec(&self, name: &str) -> Option<ContainerSpec> {
        self.state().specs.get(name).cloned()
    }

    /// How many times a container `name` was created
    pub fn created_count(&self, name: &str) -> usize {
        self.state().created.get(name).copied().unwrap_or(0)
    }

    pub fn network_connects(&self) -> usize {
        self.state().network_connects
    }

    pub fn volume_removals(&self) -> usize {
        self.state().volume_removals
    }

    pub fn image(&self, tag: &str) -> Option<ImageInfo> {
        self.state().images.get(tag).cloned()
    }

    pub fn last_build_context(&self) -> Option<Vec<u8>> {
        self.state().last_build_context.clone()
    }
}

fn tail_lines(logs: &str, tail: Option<usize>) -> String {
    let lines = logs.lines().collect::<Vec<_>>();
    let start = tail.map_or(0, |tail| lines.len().saturating_sub(tail));
    lines[start..].iter().map(|line| format!("{line}\n")).collect()
}

#[async_trait::async_trait]
impl ContainerRuntime for FakeRuntime {
    fn endpoint(&self) -> &RuntimeEndpoint {
        &self.endpoint
    }

    async fn find_container(&self, name: &str) -> Result<Option<ContainerInfo>> {
        Ok(self.state().containers.get(name).map(|c| ContainerInfo {
            id: c.id.clone(),
            name: name.to_owned(),
            status: c.status.clone(),
        }))
    }

    async fn stop_container(&self, name: &str) -> Result<()> {
        let mut state = self.state();
        let container = state
            .containers
            .get_mut(name)
            .stack_err_with(|| format!("no such container: {name}"))?;
        container.status = ContainerStatus::Exited;
        Ok(())
    }

    async fn remove_container(&self, name: &str) -> Result<()> {
        let mut state = self.state();
        if state.containers.remove(name).is_none() {
            bail!("no such container: {name}")
        }
        for attached in state.networks.values_mut() {
            attached.remove(name);
        }
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<Option<String>> {
        let mut state = self.state();
        if state.concurrent_create.as_deref() == Some(spec.name.as_str()) {
            state.concurrent_create = None;
            let id = state.next_id();
            state.containers.insert(spec.name.clone(), FakeContainer {
                id,
                status: ContainerStatus::Running,
                exit_code: 0,
                logs: String::new(),
            });
        }
        if state.containers.contains_key(&spec.name) {
            return Ok(None)
        }
        if let Some(ref network) = spec.network {
            state
                .networks
                .get_mut(network)
                .stack_err_with(|| format!("no such network: {network}"))?
                .insert(spec.name.clone());
        }
        for (volume, _) in &spec.volumes {
            state.volumes.insert(volume.clone());
        }
        let id = state.next_id();
        state.containers.insert(spec.name.clone(), FakeContainer {
            id: id.clone(),
            status: ContainerStatus::Created,
            exit_code: 0,
            logs: String::new(),
        });
        state.specs.insert(spec.name.clone(), spec.clone());
        *state.created.entry(spec.name.clone()).or_default() += 1;
        Ok(Some(id))
    }

    async fn start_container(&self, name: &str) -> Result<()> {
        let mut state = self.state();
        if state.failing_start.as_deref() == Some(name) {
            state.failing_start = None;
            bail!("port is already allocated, cannot start container {name}")
        }
        let container = state
            .containers
            .get_mut(name)
            .stack_err_with(|| format!("no such container: {name}"))?;
        container.status = ContainerStatus::Running;
        Ok(())
    }

    async fn wait_container(&self, name: &str) -> Result<ExitInfo> {
        let state = self.state();
        let container = state
            .containers
            .get(name)
            .stack_err_with(|| format!("no such container: {name}"))?;
        Ok(ExitInfo {
            status_code: container.exit_code,
            error: None,
        })
    }

    async fn container_logs(&self, name: &str, tail: Option<usize>) -> Result<String> {
        let state = self.state();
        let container = state
            .containers
            .get(name)
            .stack_err_with(|| format!("no such container: {name}"))?;
        Ok(tail_lines(&container.logs, tail))
    }

    async fn run_and_remove(&self, image: &str, cmd: &[String]) -> Result<String> {
        let key = cmd.join(" ");
        self.state()
            .run_outputs
            .get(&key)
            .cloned()
            .stack_err_with(|| format!("`{key}` in image {image} has no output set"))
    }

    async fn network_exists(&self, name: &str) -> Result<bool> {
        Ok(self.state().networks.contains_key(name))
    }

    async fn create_network(&self, name: &str) -> Result<()> {
        self.state().networks.entry(name.to_owned()).or_default();
        Ok(())
    }

    async fn network_containers(&self, name: &str) -> Result<Vec<String>> {
        let state = self.state();
        let attached = state
            .networks
            .get(name)
            .stack_err_with(|| format!("no such network: {name}"))?;
        Ok(attached.iter().cloned().collect())
    }

    async fn connect_network(&self, network: &str, container: &str) -> Result<()> {
        let mut state = self.state();
        if !state.containers.contains_key(container) {
            bail!("no such container: {container}")
        }
        state
            .networks
            .get_mut(network)
            .stack_err_with(|| format!("no such network: {network}"))?
            .insert(container.to_owned());
        state.network_connects += 1;
        Ok(())
    }

    async fn volume_exists(&self, name: &str) -> Result<bool> {
        Ok(self.state().volumes.contains(name))
    }

    async fn remove_volume(&self, name: &str) -> Result<()> {
        let mut state = self.state();
        if !state.volumes.remove(name) {
            bail!("no such volume: {name}")
        }
        state.volume_removals += 1;
        Ok(())
    }

    async fn build_image(&self, tag: &str, context: Vec<u8>) -> Result<BuildOutcome> {
        let mut state = self.state();
        state.last_build_context = Some(context);
        if let Some((message, log)) = state.next_build_failure.take() {
            return Ok(BuildOutcome::Failed { message, log })
        }
        let id = format!("sha256:{}", state.next_id());
        let image = ImageInfo {
            id,
            tags: vec![format!("{tag}:latest")],
        };
        state.images.insert(tag.to_owned(), image.clone());
        Ok(BuildOutcome::Built(image))
    }
}

#[derive(Debug, Default)]
pub struct FakeDatabase {
    unreachable_for: u32,
    attempts: AtomicU32,
    last_host: Mutex<Option<String>>,
    tables: HashMap<String, u64>,
}

impl FakeDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// The first `attempts` calls fail as if nothing was listening
    pub fn unreachable_for(mut self, attempts: u32) -> Self {
        self.unreachable_for = attempts;
        self
    }

    /// Makes `name` exist with `rows` rows
    pub fn with_table(mut self, name: &str, rows: u64) -> Self {
        self.tables.insert(name.to_owned(), rows);
        self
    }

    /// How many calls were made
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn last_host(&self) -> Option<String> {
        self.last_host.lock().unwrap().clone()
    }

    fn connect(&self, cinfo: &ConnectInfo) -> Result<()> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        *self.last_host.lock().unwrap() = Some(cinfo.host.clone());
        if attempt <= self.unreachable_for {
            bail!("connection refused to {}:{}", cinfo.host, cinfo.port)
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Database for FakeDatabase {
    async fn first_user(&self, cinfo: &ConnectInfo) -> Result<String> {
        self.connect(cinfo).stack()?;
        Ok(cinfo.user.clone())
    }

    async fn row_counts(
        &self,
        cinfo: &ConnectInfo,
        tables: &[TableInfo],
    ) -> Result<Vec<TableInfo>> {
        self.connect(cinfo).stack()?;
        Ok(tables
            .iter()
            .map(|table| match self.tables.get(&table.name) {
                Some(rows) => table.with_row_count(*rows),
                None => table.clone(),
            })
            .collect())
    }
}
