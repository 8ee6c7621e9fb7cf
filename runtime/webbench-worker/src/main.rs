use std::io::{self, Write};
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use webbench_worker::config::{Cli, Command, WorkerArgs};
use webbench_worker::{build, run, serve, Result, Worker};

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "webbench_worker=debug,webbench_db=debug"
    } else {
        "webbench_worker=info,webbench_db=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());
    // stdout carries reports and protocol frames.
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    match execute(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(kind = err.kind(), error = %err, "webbench-worker failed");
            ExitCode::FAILURE
        }
    }
}

fn execute(command: Command) -> Result<()> {
    match command {
        Command::Run(args) => {
            let keys = args.load_keys()?;
            let config = args.run_config()?;
            let worker = open(&args.worker)?;
            let outcome = run(&worker, &keys, &config);
            let closed = worker.close();
            let report = outcome?;
            closed?;
            let mut stdout = io::stdout().lock();
            serde_json::to_writer_pretty(&mut stdout, &report)?;
            writeln!(stdout)?;
            Ok(())
        }
        Command::Serve(args) => {
            let worker = open(&args.worker)?;
            let outcome = serve(&worker, io::stdin(), io::stdout(), args.serve_config());
            let closed = worker.close();
            outcome?;
            closed
        }
    }
}

fn open(args: &WorkerArgs) -> Result<Worker> {
    let config = args.worker_config()?;
    let store = args.open_store()?;
    info!(store = store.name(), "store opened");
    build(store, &config)
}
