use clap::{Parser, Subcommand};

use crate::{
    config::{DEFAULT_INSTANCE_TYPE, DEFAULT_SECURITY_GROUP, NYCDB_REPO},
    BuddyConfig, DatasetSource, MachineConfig, RuntimeEndpoint,
};

/// Your NYC-DB buddy. Builds an image with the nyc-db loader, runs postgres
/// in docker, and populates it with every NYC-DB dataset, locally or on an
/// AWS docker machine.
#[derive(Parser, Debug, Clone)]
#[command(name = "nycdbuddy", version, about)]
pub struct Cli {
    /// The docker machine to target, instead of the local docker daemon
    #[arg(long, global = true, env = "NYCDBUDDY_MACHINE")]
    pub machine: Option<String>,

    /// EC2 instance type for `create`
    #[arg(long, global = true, env = "AWS_INSTANCE_TYPE", default_value = DEFAULT_INSTANCE_TYPE)]
    pub instance_type: String,

    /// EC2 security group for `create`
    #[arg(long, global = true, env = "AWS_SECURITY_GROUP", default_value = DEFAULT_SECURITY_GROUP)]
    pub security_group: String,

    /// Discover datasets with `nycdb --list-datasets` instead of reading the
    /// dataset manifest in the image
    #[arg(long, global = true)]
    pub list_datasets: bool,

    /// `tracing` filter directives for the log output on stderr
    #[arg(long, global = true, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Create the AWS docker machine
    Create,

    /// Remove the AWS docker machine
    Remove,

    /// Build the nyc-db image
    Build {
        /// The nyc-db repository to build from
        #[arg(long, default_value = NYCDB_REPO)]
        repo: String,

        /// The revision to build, the head of `master` if not given
        #[arg(long)]
        rev: Option<String>,
    },

    /// (Re)start the postgres container and wait until it accepts connections
    Start,

    /// Stop and remove the postgres container, keeping its data
    Stop,

    /// Stop the postgres container and delete all of its data
    Wipe,

    /// Connect to postgres and print the name of a user
    HelloWorld,

    /// Start loading every dataset into postgres in the background
    Populate {
        /// Load the small test datasets shipped with nyc-db
        #[arg(long)]
        use_test_data: bool,
    },

    /// Show how the background populate process is doing
    #[command(name = "populate:status")]
    PopulateStatus,
}

impl Cli {
    /// The local daemon is resolved from `DOCKER_HOST` and `DOCKER_TLS_VERIFY`
    /// here, the same variables the docker client connects with
    pub fn to_config(&self) -> BuddyConfig {
        self.to_config_with_docker(RuntimeEndpoint::from_env())
    }

    pub fn to_config_with_docker(&self, docker: RuntimeEndpoint) -> BuddyConfig {
        BuddyConfig {
            machine: MachineConfig {
                name: self.machine.clone(),
                instance_type: self.instance_type.clone(),
                security_group: self.security_group.clone(),
                ..Default::default()
            },
            docker,
            datasets: if self.list_datasets {
                DatasetSource::Listing
            } else {
                DatasetSource::default()
            },
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_subcommands() {
        let cli = Cli::try_parse_from(["nycdbuddy", "populate", "--use-test-data"]).unwrap();
        assert_eq!(cli.command, Commands::Populate {
            use_test_data: true
        });
        let cli = Cli::try_parse_from(["nycdbuddy", "populate:status"]).unwrap();
        assert_eq!(cli.command, Commands::PopulateStatus);
        let cli = Cli::try_parse_from(["nycdbuddy", "hello-world"]).unwrap();
        assert_eq!(cli.command, Commands::HelloWorld);
        let cli = Cli::try_parse_from(["nycdbuddy", "build", "--rev", "abc123"]).unwrap();
        assert_eq!(cli.command, Commands::Build {
            repo: NYCDB_REPO.to_owned(),
            rev: Some("abc123".to_owned())
        });
    }

    #[test]
    fn config_from_flags() {
        let cli = Cli::try_parse_from([
            "nycdbuddy",
            "create",
            "--machine",
            "aws1",
            "--instance-type",
            "m5.large",
            "--list-datasets",
        ])
        .unwrap();
        let config = cli.to_config();
        assert_eq!(config.machine.name.as_deref(), Some("aws1"));
        assert_eq!(config.machine.instance_type, "m5.large");
        assert_eq!(config.machine.driver, "amazonec2");
        assert_eq!(config.datasets, DatasetSource::Listing);
        assert_eq!(config.names, crate::Names::default());
    }

    #[test]
    fn docker_machine_env_targets_the_remote_host() {
        let cli = Cli::try_parse_from(["nycdbuddy", "start"]).unwrap();
        let config = cli.to_config_with_docker(RuntimeEndpoint::from_docker_env(
            Some("tcp://52.1.2.3:2376"),
            Some("1"),
        ));
        assert!(config.docker.tls);
        let cinfo = config.connect_info.with_runtime_host(&config.docker);
        assert_eq!(cinfo.host, "52.1.2.3");
        assert_eq!(cinfo.port, 5432);
    }
}
