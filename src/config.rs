use std::time::Duration;

use crate::{BuddyError, ConnectInfo, RuntimeEndpoint};

pub const IMAGE_TAG: &str = "nycdbuddy";
pub const DB_CONTAINER_NAME: &str = "nycdbuddy_db";
pub const POPULATE_CONTAINER_NAME: &str = "nycdbuddy_populate";
pub const VOLUME_NAME: &str = "nycdbuddy_pgdata";

pub const NYCDB_REPO: &str = "https://github.com/aepyornis/nyc-db";
pub const NYCDB_BRANCH: &str = "master";
/// Where the image's Dockerfile unpacks the nyc-db sources
pub const NYCDB_MANIFEST_PATH: &str = "/nyc-db/src/nycdb/datasets.yml";

pub const DEFAULT_INSTANCE_TYPE: &str = "t2.large";
pub const DEFAULT_SECURITY_GROUP: &str = "nycdbuddy";
pub const DEFAULT_MACHINE_DRIVER: &str = "amazonec2";

/// The fixed, well-known names of everything this tool creates in the docker
/// namespace. At most one object of each name exists at a time, and all of
/// the state of the tool is rederived from these on every call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Names {
    pub image_tag: String,
    pub db_container: String,
    pub populate_container: String,
    pub network: String,
    pub volume: String,
}

impl Default for Names {
    fn default() -> Self {
        Self {
            image_tag: IMAGE_TAG.to_owned(),
            db_container: DB_CONTAINER_NAME.to_owned(),
            populate_container: POPULATE_CONTAINER_NAME.to_owned(),
            network: format!("{POPULATE_CONTAINER_NAME}_network"),
            volume: VOLUME_NAME.to_owned(),
        }
    }
}

/// Options for `docker-machine create` with the AWS driver. These used to be
/// communicated through `AWS_*` environment variables, now they are passed as
/// explicit driver flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineConfig {
    /// When set, every docker command targets this machine instead of the
    /// local docker daemon
    pub name: Option<String>,
    pub driver: String,
    pub instance_type: String,
    pub security_group: String,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            name: None,
            driver: DEFAULT_MACHINE_DRIVER.to_owned(),
            instance_type: DEFAULT_INSTANCE_TYPE.to_owned(),
            security_group: DEFAULT_SECURITY_GROUP.to_owned(),
        }
    }
}

impl MachineConfig {
    /// The machine name, or a configuration error for commands that cannot
    /// do anything without one
    pub fn require_name(&self) -> std::result::Result<&str, BuddyError> {
        self.name.as_deref().ok_or_else(|| {
            BuddyError::Config(
                "a docker machine name is required, pass `--machine` or set \
                 NYCDBUDDY_MACHINE"
                    .to_owned(),
            )
        })
    }
}

/// How the set of datasets (and the tables they populate) is discovered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetSource {
    /// Run `nycdb --list-datasets` in the image, each dataset is assumed to
    /// populate a table of the same name
    Listing,
    /// Read the YAML manifest at this path inside the image
    Manifest { path: String },
}

impl Default for DatasetSource {
    fn default() -> Self {
        DatasetSource::Manifest {
            path: NYCDB_MANIFEST_PATH.to_owned(),
        }
    }
}

/// Bounded retry parameters for waiting on a freshly started database
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for Readiness {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay: Duration::from_secs(2),
        }
    }
}

/// Everything an operation may need, resolved once by the CLI and passed down
/// explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuddyConfig {
    pub names: Names,
    pub connect_info: ConnectInfo,
    pub machine: MachineConfig,
    /// The local docker daemon, used when no machine is targeted
    pub docker: RuntimeEndpoint,
    pub datasets: DatasetSource,
    pub readiness: Readiness,
    /// The number of trailing log lines shown for a running populate container
    pub log_tail: usize,
}

impl BuddyConfig {
    pub const DEFAULT_LOG_TAIL: usize = 10;
}

impl Default for BuddyConfig {
    fn default() -> Self {
        Self {
            names: Names::default(),
            connect_info: ConnectInfo::default(),
            machine: MachineConfig::default(),
            docker: RuntimeEndpoint::local(),
            datasets: DatasetSource::default(),
            readiness: Readiness::default(),
            log_tail: Self::DEFAULT_LOG_TAIL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_names() {
        let names = Names::default();
        assert_eq!(names.image_tag, "nycdbuddy");
        assert_eq!(names.db_container, "nycdbuddy_db");
        assert_eq!(names.populate_container, "nycdbuddy_populate");
        assert_eq!(names.network, "nycdbuddy_populate_network");
        assert_eq!(names.volume, "nycdbuddy_pgdata");
    }

    #[test]
    fn machine_name_is_required() {
        let mut machine = MachineConfig::default();
        assert!(matches!(machine.require_name(), Err(BuddyError::Config(_))));
        machine.name = Some("aws1".to_owned());
        assert_eq!(machine.require_name().unwrap(), "aws1");
    }

    #[test]
    fn defaults() {
        let config = BuddyConfig::default();
        assert_eq!(config.log_tail, 10);
        assert_eq!(config.readiness.attempts, 5);
        assert_eq!(config.readiness.delay, Duration::from_secs(2));
        assert_eq!(config.machine.instance_type, "t2.large");
        assert_eq!(config.machine.security_group, "nycdbuddy");
        assert_eq!(config.docker, RuntimeEndpoint::local());
    }
}
