use std::{future::Future, time::Duration};

use stacked_errors::{bail, Result, StackableErr};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    env_vars, BuddyError, ConnectInfo, ContainerRuntime, ContainerSpec, CreateOutcome, Database,
    Names, PortBind, Readiness, POSTGRES_PORT,
};

pub const POSTGRES_VERSION: &str = "11";
pub const POSTGRES_DATA_DIR: &str = "/var/lib/postgresql/data";

pub fn postgres_image() -> String {
    format!("postgres:{POSTGRES_VERSION}")
}

/// Calls `f` up to `num_tries` times, sleeping `delay` between failures. The
/// first `Ok` is returned immediately, the error of the last try is returned
/// if none succeed.
pub async fn retry_with_delay<F: FnMut() -> Fut, Fut: Future<Output = Result<T>>, T>(
    num_tries: u32,
    delay: Duration,
    mut f: F,
) -> Result<T> {
    let mut i = 1;
    loop {
        match f().await {
            Ok(o) => return Ok(o),
            Err(e) => {
                if i >= num_tries {
                    return Err(e)
                }
                warn!("attempt {i}/{num_tries} failed, retrying in {delay:?}");
            }
        }
        sleep(delay).await;
        i += 1;
    }
}

/// Stops and removes the container `name` if it exists
#[tracing::instrument(skip(runtime))]
pub async fn stop(runtime: &impl ContainerRuntime, name: &str) -> Result<()> {
    if let Some(container) = runtime.find_container(name).await.stack()? {
        if container.status.is_running() {
            info!("Stopping postgres container '{name}'...");
            runtime.stop_container(name).await.stack()?;
        }
        info!("Removing postgres container '{name}'...");
        runtime.remove_container(name).await.stack()?;
    }
    Ok(())
}

/// (Re)starts the postgres container with its data in the named volume, then
/// waits for it to accept connections. Any existing container of the same
/// name is discarded first, the volume is left as is.
#[tracing::instrument(skip_all, fields(container.name = %names.db_container))]
pub async fn start(
    runtime: &impl ContainerRuntime,
    db: &impl Database,
    cinfo: &ConnectInfo,
    names: &Names,
    readiness: Readiness,
) -> Result<()> {
    let name = &names.db_container;
    stop(runtime, name).await.stack()?;
    info!(
        "Starting postgres container '{name}' with volume '{}'...",
        names.volume
    );
    let spec = ContainerSpec {
        env_vars: env_vars(cinfo.to_postgres_environment()),
        volumes: vec![(names.volume.clone(), POSTGRES_DATA_DIR.to_owned())],
        port_bindings: vec![PortBind::new(POSTGRES_PORT)],
        ..ContainerSpec::new(name, postgres_image())
    };
    match runtime.create_and_start(&spec).await.stack()? {
        CreateOutcome::Started { id } => tracing::debug!(container.id = %id),
        // someone else started one between our `stop` and create
        CreateOutcome::NameTaken => {
            bail!("a container named \"{name}\" was created concurrently")
        }
    }

    let cinfo = cinfo.with_runtime_host(runtime.endpoint());
    info!("Waiting for postgres on {}:{}...", cinfo.host, cinfo.port);
    retry_with_delay(readiness.attempts, readiness.delay, || db.first_user(&cinfo))
        .await
        .stack_err_with(|| BuddyError::DatabaseUnreachable {
            host: cinfo.host.clone(),
            port: cinfo.port,
            attempts: readiness.attempts,
        })?;
    info!("Done.");
    Ok(())
}

/// Stops the postgres container and deletes its data volume. This loses all
/// data and is only run when explicitly asked for.
#[tracing::instrument(skip_all, fields(container.name = %names.db_container))]
pub async fn wipe(runtime: &impl ContainerRuntime, names: &Names) -> Result<()> {
    stop(runtime, &names.db_container).await.stack()?;
    if runtime.volume_exists(&names.volume).await.stack()? {
        info!("Removing volume '{}'...", names.volume);
        runtime.remove_volume(&names.volume).await.stack()?;
    }
    Ok(())
}

/// Smoke test: connects to the database and returns the line to show for
/// the first user name found
pub async fn hello_world(
    runtime: &impl ContainerRuntime,
    db: &impl Database,
    cinfo: &ConnectInfo,
) -> Result<String> {
    let cinfo = cinfo.with_runtime_host(runtime.endpoint());
    info!("Connecting to db on \"{}\"...", cinfo.host);
    let user = db.first_user(&cinfo).await.stack()?;
    Ok(format!("Connected to db and found a user named \"{user}\"."))
}
