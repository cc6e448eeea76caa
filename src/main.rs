//! Binary entry point for the `scalevol` CLI.

use std::io::{self, Write};
use std::process;

use clap::Parser;
use serde::Serialize;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use scalevol::model::BOOTSTRAP_VOLUME_SUFFIX;
use scalevol::{
    ConfigError, EngineError, OptionsError, ProvisioningEngine, ScaleConfig, StorageSlot,
    VolumeOptions,
};

mod cli;

use cli::{Cli, Command};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("invalid options: {0}")]
    Options(#[from] OptionsError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(
        "volume name {name} ends with the reserved suffix {suffix}; it names the \
         bootstrap volume, which lives only inside one engine process",
        suffix = BOOTSTRAP_VOLUME_SUFFIX
    )]
    ReservedName { name: String },
    #[error("failed to initialise logging: {0}")]
    Logging(String),
    #[error("failed to write output: {0}")]
    Output(String),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = init_logging(&cli.log_level, cli.log_json) {
        report_error(&err);
        process::exit(2);
    }

    let exit_code = match dispatch(cli.command).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };
    process::exit(exit_code);
}

fn init_logging(level: &str, json: bool) -> Result<(), CliError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|err| CliError::Logging(err.to_string()))?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    let installed = if json {
        builder.json().try_init()
    } else {
        builder.with_target(false).try_init()
    };
    installed.map_err(|err| CliError::Logging(err.to_string()))
}

/// Refuses bootstrap volume names; their in-memory slot does not outlive one
/// invocation.
fn reject_reserved_name(command: &Command) -> Result<(), CliError> {
    let name = match command {
        Command::Activate | Command::List => return Ok(()),
        Command::Create(args) => &args.name,
        Command::Remove(args) => &args.name,
        Command::Get(args) | Command::Attach(args) | Command::Detach(args) => &args.name,
    };
    if StorageSlot::for_name(name) == StorageSlot::InMemorySingleSlot {
        return Err(CliError::ReservedName { name: name.clone() });
    }
    Ok(())
}

async fn dispatch(command: Command) -> Result<(), CliError> {
    reject_reserved_name(&command)?;
    let config = ScaleConfig::load_without_cli_args()?;
    let mut engine = ProvisioningEngine::from_config(&config)?;
    engine.activate().await?;

    match command {
        Command::Activate => print_json(&serde_json::json!({
            "activated": true,
            "cluster_id": engine.model().cluster_id(),
        })),
        Command::Create(args) => {
            let options = VolumeOptions::from_assignments(&args.options)?;
            let volume = engine.create_volume(&args.name, &options).await?;
            print_json(&volume)
        }
        Command::Remove(args) => {
            let force = args.force || config.force_delete;
            engine.remove_volume(&args.name, force).await?;
            print_json(&serde_json::json!({ "removed": args.name, "force": force }))
        }
        Command::Get(args) => print_json(&engine.get_volume(&args.name).await?),
        Command::List => print_json(&engine.list_volumes().await?),
        Command::Attach(args) => {
            let path = engine.attach(&args.name).await?;
            print_json(&serde_json::json!({ "name": args.name, "mountpoint": path }))
        }
        Command::Detach(args) => {
            engine.detach(&args.name).await?;
            print_json(&serde_json::json!({ "detached": args.name }))
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    let rendered =
        serde_json::to_string_pretty(value).map_err(|err| CliError::Output(err.to_string()))?;
    writeln!(io::stdout(), "{rendered}").map_err(|err| CliError::Output(err.to_string()))
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
