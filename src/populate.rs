//! The populate process: a detached container running `nycdb` to download and
//! load every dataset into the database container, and the polling of its
//! progress.
//!
//! Nothing is remembered between calls, the populate container is looked up
//! by its fixed name every time. An exited populate container is always
//! reclaimed (its verdict reported and the container removed) by whichever of
//! `populate` or `status` sees it first.

use std::fmt::{self, Write as _};

use owo_colors::OwoColorize;
use stacked_errors::{bail, Result, StackableErr};
use tracing::info;

use crate::{
    postgres, BuddyConfig, ConnectInfo, ContainerInfo, ContainerRuntime, ContainerSpec,
    ContainerStatus, CreateOutcome, Database, ExitInfo, Manifest, TableInfo,
};

/// Test data shipped with the nyc-db sources inside the image
pub const TEST_DATA_DIR: &str = "/nyc-db/src/tests/integration/data";
/// Where datasets get downloaded to for a real run
pub const NYCDB_DATA_DIR: &str = "/var/nycdb";

/// Separates the arguments of one step when it is passed to [RUNNER_SCRIPT]
pub const ARG_SEPARATOR: char = '\u{1f}';

/// Runs every positional argument as one command, with its arguments split on
/// [ARG_SEPARATOR] only. Globbing is off and nothing is `eval`ed, so argument
/// contents are never interpreted by the shell. Halts on the first failing
/// step with its exit code.
pub const RUNNER_SCRIPT: &str = r#"IFS="$(printf '\037')"
set -f
for step in "$@"; do
  $step || exit $?
done
"#;

/// The ordered `nycdb` invocations of a populate run. Each dataset is
/// downloaded then loaded before the next dataset starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopulatePlan {
    pub steps: Vec<Vec<String>>,
}

impl PopulatePlan {
    pub fn new(datasets: &[String], cinfo: &ConnectInfo, db_host: &str, root_dir: &str) -> Self {
        let base = [
            "nycdb",
            "-D",
            cinfo.db.as_str(),
            "-H",
            db_host,
            "-U",
            cinfo.user.as_str(),
            "-P",
            cinfo.password.as_str(),
            "--root-dir",
            root_dir,
        ]
        .map(ToOwned::to_owned);
        let mut steps = vec![];
        for dataset in datasets {
            for action in ["--download", "--load"] {
                let mut step = base.to_vec();
                step.push(action.to_owned());
                step.push(dataset.clone());
                steps.push(step);
            }
        }
        Self { steps }
    }

    /// The command for the worker container
    pub fn to_container_cmd(&self) -> Result<Vec<String>> {
        let mut cmd = vec![
            "bash".to_owned(),
            "-c".to_owned(),
            RUNNER_SCRIPT.to_owned(),
            // becomes `$0`
            "nycdbuddy-populate".to_owned(),
        ];
        for step in &self.steps {
            if let Some(arg) = step.iter().find(|arg| arg.contains(ARG_SEPARATOR)) {
                bail!("populate argument {arg:?} contains the argument separator")
            }
            let mut joined = String::new();
            for (i, arg) in step.iter().enumerate() {
                if i != 0 {
                    joined.push(ARG_SEPARATOR);
                }
                joined.push_str(arg);
            }
            cmd.push(joined);
        }
        Ok(cmd)
    }
}

/// How a finished populate run went
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Succeeded,
    Failed { exit: ExitInfo, logs: String },
}

impl Verdict {
    pub fn succeeded(&self) -> bool {
        matches!(self, Verdict::Succeeded)
    }
}

/// A populate container that has not exited yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveReport {
    pub container: String,
    pub status: ContainerStatus,
    /// The latest lines of output
    pub tail: Vec<String>,
    /// Row counts of every table in the manifest, in manifest order, when they
    /// were asked for
    pub tables: Option<Vec<TableInfo>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusReport {
    NoProcess,
    /// The run had exited and its container has been removed
    Finished { container: String, verdict: Verdict },
    Active(ActiveReport),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PopulateOutcome {
    Started { container: String },
    /// A previous run had exited, it was reported and cleared. The next call
    /// starts a fresh run.
    Reclaimed { container: String, verdict: Verdict },
    /// A run is still going, nothing was started
    AlreadyActive(ActiveReport),
}

impl PopulateOutcome {
    /// If the command should exit successfully
    pub fn is_success(&self) -> bool {
        match self {
            PopulateOutcome::Started { .. } => true,
            PopulateOutcome::Reclaimed { verdict, .. } => verdict.succeeded(),
            PopulateOutcome::AlreadyActive(_) => false,
        }
    }
}

fn render_verdict(s: &mut String, container: &str, verdict: &Verdict, color: bool) -> fmt::Result {
    match verdict {
        Verdict::Succeeded => {
            let line = "Populate exited successfully!";
            if color {
                writeln!(s, "{}", line.green())?;
            } else {
                writeln!(s, "{line}")?;
            }
        }
        Verdict::Failed { exit, logs } => {
            let mut line = format!("Populate failed with exit code {}", exit.status_code);
            if let Some(ref error) = exit.error {
                write!(line, " ({error})")?;
            }
            line.push(':');
            if color {
                writeln!(s, "{}", line.red())?;
            } else {
                writeln!(s, "{line}")?;
            }
            writeln!(s, "{}", logs.trim_end())?;
        }
    }
    writeln!(s, "Removed container {container}.")
}

fn render_active(s: &mut String, report: &ActiveReport) -> fmt::Result {
    writeln!(
        s,
        "Populate process container {} is {}.",
        report.container, report.status
    )?;
    writeln!(s, "Here's its latest output:\n")?;
    for line in &report.tail {
        writeln!(s, "{line}")?;
    }
    if let Some(ref tables) = report.tables {
        writeln!(s)?;
        for table in tables {
            writeln!(s, "{table}")?;
        }
    }
    Ok(())
}

impl StatusReport {
    /// Only a run found to have failed is unsuccessful
    pub fn is_success(&self) -> bool {
        match self {
            StatusReport::Finished { verdict, .. } => verdict.succeeded(),
            _ => true,
        }
    }

    /// The operator facing text, `color` is for terminals
    pub fn render(&self, color: bool) -> String {
        let mut s = String::new();
        let _ = match self {
            StatusReport::NoProcess => writeln!(s, "No populate process currently exists."),
            StatusReport::Finished { container, verdict } => {
                render_verdict(&mut s, container, verdict, color)
            }
            StatusReport::Active(report) => render_active(&mut s, report),
        };
        s
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(false))
    }
}

impl PopulateOutcome {
    pub fn render(&self, color: bool) -> String {
        let mut s = String::new();
        let _ = match self {
            PopulateOutcome::Started { container } => writeln!(
                s,
                "Started populate process in container '{container}'."
            ),
            PopulateOutcome::Reclaimed { container, verdict } => {
                let _ = writeln!(s, "A previous populate process already exists.");
                render_verdict(&mut s, container, verdict, color)
            }
            PopulateOutcome::AlreadyActive(report) => {
                let _ = writeln!(s, "A previous populate process already exists.");
                render_active(&mut s, report)
            }
        };
        s
    }
}

impl fmt::Display for PopulateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(false))
    }
}

fn is_finished(status: &ContainerStatus) -> bool {
    matches!(status, ContainerStatus::Exited | ContainerStatus::Dead)
}

/// Reports how an exited container went and removes it
#[tracing::instrument(skip(runtime))]
async fn reclaim(runtime: &impl ContainerRuntime, name: &str) -> Result<Verdict> {
    let exit = runtime.wait_container(name).await.stack()?;
    let verdict = if exit.succeeded() {
        Verdict::Succeeded
    } else {
        let logs = runtime.container_logs(name, None).await.stack()?;
        Verdict::Failed { exit, logs }
    };
    info!("Removing container {name}.");
    runtime.remove_container(name).await.stack()?;
    Ok(verdict)
}

async fn active_report(
    runtime: &impl ContainerRuntime,
    container: &ContainerInfo,
    log_tail: usize,
) -> Result<ActiveReport> {
    let logs = runtime
        .container_logs(&container.name, Some(log_tail))
        .await
        .stack()?;
    Ok(ActiveReport {
        container: container.name.clone(),
        status: container.status.clone(),
        tail: logs.lines().map(ToOwned::to_owned).collect(),
        tables: None,
    })
}

/// Row counts for every table of the manifest, in manifest order
pub async fn row_counts(
    runtime: &impl ContainerRuntime,
    db: &impl Database,
    config: &BuddyConfig,
) -> Result<Vec<TableInfo>> {
    let manifest = Manifest::discover(runtime, &config.names.image_tag, &config.datasets)
        .await
        .stack()?;
    let cinfo = config.connect_info.with_runtime_host(runtime.endpoint());
    db.row_counts(&cinfo, &manifest.tables).await.stack()
}

/// Polls the populate container. Read only apart from reclaiming an exited
/// run, database errors while counting rows are returned as is.
#[tracing::instrument(skip_all, fields(container.name = %config.names.populate_container))]
pub async fn status(
    runtime: &impl ContainerRuntime,
    db: &impl Database,
    config: &BuddyConfig,
) -> Result<StatusReport> {
    let name = &config.names.populate_container;
    let Some(container) = runtime.find_container(name).await.stack()? else {
        return Ok(StatusReport::NoProcess)
    };
    if is_finished(&container.status) {
        let verdict = reclaim(runtime, name).await.stack()?;
        return Ok(StatusReport::Finished {
            container: name.clone(),
            verdict,
        })
    }
    let mut report = active_report(runtime, &container, config.log_tail)
        .await
        .stack()?;
    report.tables = Some(row_counts(runtime, db, config).await.stack()?);
    Ok(StatusReport::Active(report))
}

/// Starts a detached populate run unless one already exists. The database
/// container is started if needed and joined to the populate network.
#[tracing::instrument(skip_all, fields(container.name = %config.names.populate_container))]
pub async fn populate(
    runtime: &impl ContainerRuntime,
    db: &impl Database,
    config: &BuddyConfig,
    use_test_data: bool,
) -> Result<PopulateOutcome> {
    let names = &config.names;
    let name = &names.populate_container;

    if let Some(container) = runtime.find_container(name).await.stack()? {
        if is_finished(&container.status) {
            let verdict = reclaim(runtime, name).await.stack()?;
            return Ok(PopulateOutcome::Reclaimed {
                container: name.clone(),
                verdict,
            })
        }
        let report = active_report(runtime, &container, config.log_tail)
            .await
            .stack()?;
        return Ok(PopulateOutcome::AlreadyActive(report))
    }

    match runtime.find_container(&names.db_container).await.stack()? {
        Some(db_container) if db_container.status.is_running() => (),
        _ => postgres::start(
            runtime,
            db,
            &config.connect_info,
            names,
            config.readiness,
        )
        .await
        .stack()?,
    }

    let manifest = Manifest::discover(runtime, &names.image_tag, &config.datasets)
        .await
        .stack()?;

    if !runtime.network_exists(&names.network).await.stack()? {
        info!("Creating network '{}'", names.network);
        runtime.create_network(&names.network).await.stack()?;
    }
    let attached = runtime
        .network_containers(&names.network)
        .await
        .stack()?;
    if !attached.contains(&names.db_container) {
        runtime
            .connect_network(&names.network, &names.db_container)
            .await
            .stack()?;
    }

    let root_dir = if use_test_data {
        TEST_DATA_DIR
    } else {
        NYCDB_DATA_DIR
    };
    // on the shared network the db container is reachable by its name
    let plan = PopulatePlan::new(
        &manifest.datasets,
        &config.connect_info,
        &names.db_container,
        root_dir,
    );
    let spec = ContainerSpec {
        cmd: Some(plan.to_container_cmd().stack()?),
        network: Some(names.network.clone()),
        ..ContainerSpec::new(name, &names.image_tag)
    };
    match runtime.create_and_start(&spec).await.stack()? {
        CreateOutcome::Started { .. } => {
            info!("Started populate process in container '{name}'.");
            Ok(PopulateOutcome::Started {
                container: name.clone(),
            })
        }
        // lost a race with another `populate` between the lookup and here
        CreateOutcome::NameTaken => {
            let container = runtime
                .find_container(name)
                .await
                .stack()?
                .unwrap_or_else(|| ContainerInfo {
                    id: String::new(),
                    name: name.clone(),
                    status: ContainerStatus::Other("unknown".to_owned()),
                });
            let report = active_report(runtime, &container, config.log_tail)
                .await
                .stack()?;
            Ok(PopulateOutcome::AlreadyActive(report))
        }
    }
}
