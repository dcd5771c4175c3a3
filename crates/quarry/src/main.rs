//! Question Quarry entry point.
//!
//! `quarry serve` runs the pipeline and its REST/WebSocket surface;
//! the `sources` and `jobs` subcommands are a thin client over a running
//! server. Exit codes: 0 success, 2 validation error, 3 transient
//! failure, 4 permanent upstream failure, 5 internal invariant violation.

mod cli;
mod serve;

use clap::Parser;
use cli::{Cli, Command};

fn main() {
    let cli = Cli::parse();
    let exit_code = run(cli);
    std::process::exit(exit_code);
}

fn run(cli: Cli) -> i32 {
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("failed to start runtime: {e}");
            return 5;
        }
    };

    let result = runtime.block_on(async {
        match cli.command {
            Command::Serve(args) => serve::serve(args, cli.verbose).await,
            Command::InitConfig(args) => cli::init_config(args),
            Command::Sources(args) => cli::sources(args).await,
            Command::Jobs(args) => cli::jobs(args).await,
        }
    });

    match result {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("error: {e:#}");
            exit_code_for(&e)
        }
    }
}

/// Map an error chain onto the documented CLI exit codes.
fn exit_code_for(error: &anyhow::Error) -> i32 {
    if let Some(quarry) = error.downcast_ref::<quarry_protocol::QuarryError>() {
        return quarry.exit_code();
    }
    if let Some(api) = error.downcast_ref::<cli::ClientError>() {
        return api.exit_code();
    }
    if error.downcast_ref::<quarry_protocol::config::ConfigError>().is_some() {
        return 2;
    }
    if let Some(req) = error.downcast_ref::<reqwest::Error>() {
        return if req.is_connect() || req.is_timeout() { 3 } else { 4 };
    }
    5
}
