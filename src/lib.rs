//! See README.md for more

mod cli;
mod command;
mod config;
mod connect_info;
mod datasets;
mod db;
mod error;
mod runtime;
mod tarball;

/// The [ContainerRuntime] backed by the docker API through [bollard]
pub mod docker;
/// Generating and building the image with the nyc-db loader
pub mod image;
/// Provisioning AWS hosts with `docker-machine`
pub mod machine;
pub mod populate;
/// The lifecycle of the postgres container and its data volume
pub mod postgres;

#[cfg(test)]
mod fake;

pub use cli::*;
pub use command::*;
pub use config::*;
pub use connect_info::*;
pub use datasets::*;
pub use db::*;
pub use docker::BollardRuntime;
pub use error::*;
pub use runtime::*;
pub use tarball::*;
/// This reexport helps with dependency wrangling
pub use stacked_errors;
