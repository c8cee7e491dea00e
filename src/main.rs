use std::{io::IsTerminal, process::ExitCode};

use clap::Parser;
use nycdbuddy::{
    image::{self, BuildArgs},
    machine, populate, postgres, BollardRuntime, BuddyConfig, Cli, Commands, PgDatabase,
};
use stacked_errors::{Result, StackableErr};
use tracing::info;
use tracing_subscriber::EnvFilter;

async fn connect_runtime(config: &BuddyConfig) -> Result<BollardRuntime> {
    match config.machine.name {
        Some(ref name) => machine::connect(name).await.stack(),
        None => BollardRuntime::local(config.docker.clone()).await.stack(),
    }
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn run(command: Commands, config: BuddyConfig) -> Result<ExitCode> {
    let color = std::io::stdout().is_terminal();
    let db = PgDatabase;
    let names = &config.names;
    match command {
        Commands::Create | Commands::Remove => {
            let name = match config.machine.require_name() {
                Ok(name) => name,
                Err(e) => {
                    eprintln!("{e}");
                    return Ok(ExitCode::FAILURE)
                }
            };
            let success = if command == Commands::Create {
                machine::create(name, &config.machine).await.stack()?
            } else {
                machine::remove(name).await.stack()?
            };
            Ok(exit_code(success))
        }
        Commands::Build { repo, rev } => {
            let runtime = connect_runtime(&config).await.stack()?;
            let build_args = match rev {
                Some(rev) => BuildArgs::new(repo, rev),
                None => BuildArgs::latest(repo).await.stack()?,
            };
            image::build(
                &runtime,
                &names.image_tag,
                Some(build_args),
                &mut std::io::stderr(),
            )
            .await
            .stack()?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Start => {
            let runtime = connect_runtime(&config).await.stack()?;
            postgres::start(
                &runtime,
                &db,
                &config.connect_info,
                names,
                config.readiness,
            )
            .await
            .stack()?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Stop => {
            let runtime = connect_runtime(&config).await.stack()?;
            postgres::stop(&runtime, &names.db_container).await.stack()?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Wipe => {
            let runtime = connect_runtime(&config).await.stack()?;
            postgres::wipe(&runtime, names).await.stack()?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::HelloWorld => {
            let runtime = connect_runtime(&config).await.stack()?;
            let report = postgres::hello_world(&runtime, &db, &config.connect_info)
                .await
                .stack()?;
            println!("{report}");
            Ok(ExitCode::SUCCESS)
        }
        Commands::Populate { use_test_data } => {
            let runtime = connect_runtime(&config).await.stack()?;
            let outcome = populate::populate(&runtime, &db, &config, use_test_data)
                .await
                .stack()?;
            print!("{}", outcome.render(color));
            Ok(exit_code(outcome.is_success()))
        }
        Commands::PopulateStatus => {
            let runtime = connect_runtime(&config).await.stack()?;
            let report = populate::status(&runtime, &db, &config).await.stack()?;
            print!("{}", report.render(color));
            Ok(exit_code(report.is_success()))
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cli.log_level))
        .with_writer(std::io::stderr)
        .init();

    let config = cli.to_config();
    if let Some(ref name) = config.machine.name {
        info!("Targeting docker machine '{name}'");
    }
    match run(cli.command, config).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{e:?}");
            ExitCode::FAILURE
        }
    }
}
