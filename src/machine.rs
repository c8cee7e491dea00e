//! `docker-machine` hosts on AWS. The `docker-machine` CLI does the
//! provisioning, and its output is passed straight through since it is meant
//! for the operator.

use std::path::PathBuf;

use serde::Deserialize;
use stacked_errors::{Result, StackableErr};
use tracing::info;

use crate::{BollardRuntime, Command, MachineConfig};

pub fn create_command(name: &str, machine: &MachineConfig) -> Command {
    Command::new("docker-machine create")
        .arg(name)
        .arg(format!("--driver={}", machine.driver))
        .arg("--amazonec2-instance-type")
        .arg(&machine.instance_type)
        .arg("--amazonec2-security-group")
        .arg(&machine.security_group)
        .debug(true)
}

pub fn remove_command(name: &str) -> Command {
    Command::new("docker-machine rm -y").arg(name).debug(true)
}

/// Creates the machine `name`. AWS credentials are picked up by
/// `docker-machine` from the environment or the AWS credentials file. Returns
/// if `docker-machine` was successful, its own output explains any failure.
pub async fn create(name: &str, machine: &MachineConfig) -> Result<bool> {
    info!("Creating Docker machine '{name}'.");
    let comres = create_command(name, machine)
        .run_to_completion()
        .await
        .stack()?;
    Ok(comres.successful())
}

pub async fn remove(name: &str) -> Result<bool> {
    info!("Removing Docker machine '{name}'.");
    let comres = remove_command(name).run_to_completion().await.stack()?;
    Ok(comres.successful())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MachineInspect {
    host_options: HostOptions,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HostOptions {
    auth_options: AuthOptions,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AuthOptions {
    /// The directory with the client certificates of this machine, what
    /// `docker-machine env` exports as `DOCKER_CERT_PATH`
    store_path: PathBuf,
}

/// Gets the client certificate directory out of `docker-machine inspect`
pub fn parse_cert_dir(inspect_json: &str) -> Result<PathBuf> {
    let inspect: MachineInspect = serde_json::from_str(inspect_json)
        .stack_err("parse_cert_dir -> unexpected `docker-machine inspect` output")?;
    Ok(inspect.host_options.auth_options.store_path)
}

/// Connects to the docker daemon of the machine `name`
#[tracing::instrument]
pub async fn connect(name: &str) -> Result<BollardRuntime> {
    let comres = Command::new("docker-machine url")
        .arg(name)
        .run_to_completion()
        .await
        .stack()?;
    comres.assert_success().stack()?;
    let url = comres.stdout_as_utf8().stack()?.trim().to_owned();

    let comres = Command::new("docker-machine inspect")
        .arg(name)
        .run_to_completion()
        .await
        .stack()?;
    comres.assert_success().stack()?;
    let cert_dir = parse_cert_dir(comres.stdout_as_utf8().stack()?).stack()?;

    BollardRuntime::remote_tls(&url, &cert_dir)
        .stack_err_with(|| format!("connecting to docker machine \"{name}\""))
}
