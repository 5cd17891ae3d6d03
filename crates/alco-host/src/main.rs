//! `alco` command line entry point
//!
//! ```text
//! alco run [--store thread|shm|manager] [--hardware sim|linux]
//! alco query --store shm|manager --http-port 5000
//! alco manager --socket /tmp/alco-manager.sock
//! ```
//!
//! `query` and `manager` are normally started by `run` as child processes.

use std::path::PathBuf;

use alco_host::app::{self, DEFAULT_SHM_PATH, DEFAULT_SOCKET_PATH, RunOptions, StoreStrategy};
use alco_host::hardware;
use alco_host::settings;
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::error;

#[derive(Parser, Debug)]
#[command(name = "alco", version, about = "Breath alcohol monitor")]
struct Cli {
    /// TOML configuration file; built-in defaults are used without one
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Calibrate, then sample, actuate and serve until Ctrl-C (default)
    Run(RunArgs),
    /// Serve the query surface from a store owned by another process
    Query(QueryArgs),
    /// Own the state store and serve it over a Unix socket
    Manager {
        #[arg(long, default_value = DEFAULT_SOCKET_PATH)]
        socket: PathBuf,
    },
}

#[derive(Args, Debug, Clone)]
struct StoreArgs {
    #[arg(long, value_enum, default_value_t = StoreStrategy::Thread)]
    store: StoreStrategy,

    #[arg(long, default_value = DEFAULT_SHM_PATH)]
    shm_path: PathBuf,

    #[arg(long, default_value = DEFAULT_SOCKET_PATH)]
    socket: PathBuf,
}

impl Default for StoreArgs {
    fn default() -> Self {
        Self {
            store: StoreStrategy::Thread,
            shm_path: PathBuf::from(DEFAULT_SHM_PATH),
            socket: PathBuf::from(DEFAULT_SOCKET_PATH),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
enum HardwareKind {
    #[default]
    Sim,
    #[cfg(feature = "linux-hw")]
    Linux,
}

#[derive(Args, Debug, Clone, Default)]
struct RunArgs {
    #[command(flatten)]
    store: StoreArgs,

    #[arg(long, value_enum, default_value_t = HardwareKind::Sim)]
    hardware: HardwareKind,

    /// Make the simulated sensor fail every Nth read
    #[arg(long)]
    fault_every: Option<u64>,
}

#[derive(Args, Debug, Clone)]
struct QueryArgs {
    #[command(flatten)]
    store: StoreArgs,

    /// Overrides `http_port` from the config
    #[arg(long)]
    http_port: Option<u16>,
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = settings::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(CliCommand::Run(RunArgs::default())) {
        CliCommand::Run(args) => {
            let options = RunOptions {
                strategy: args.store.store,
                shm_path: args.store.shm_path,
                socket_path: args.store.socket,
                config_path: cli.config,
                ..RunOptions::new(args.store.store)?
            };
            match args.hardware {
                HardwareKind::Sim => {
                    app::run(&config, &options, hardware::sim::open(args.fault_every))
                }
                #[cfg(feature = "linux-hw")]
                HardwareKind::Linux => {
                    app::run(&config, &options, hardware::linux::open(&config)?)
                }
            }
        }
        CliCommand::Query(args) => app::run_query(
            &config,
            args.store.store,
            &args.store.shm_path,
            &args.store.socket,
            args.http_port.unwrap_or(config.http_port),
        ),
        CliCommand::Manager { socket } => app::run_manager(&config, &socket),
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run(Cli::parse()) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
