use std::process::ExitCode;

use clap::Parser;

use kpio_cachectl::cli::{Cli, Command};
use kpio_cachectl::commands;
use kpio_cachectl::error::CachectlError;
use kpio_cachectl::output;

fn run(command: Command) -> Result<serde_json::Value, CachectlError> {
    match command {
        Command::ConfigCheck(args) => commands::config_check(&commands::load_config(&args.config)?),
        Command::Generations(args) => commands::generations(&commands::load_config(&args.config)?),
        Command::Entries(args) => {
            commands::entries(&commands::load_config(&args.config.config)?, args.limit)
        }
        Command::Inspect(args) => {
            commands::inspect(&commands::load_config(&args.config.config)?, &args.url)
        }
        Command::Delete(args) => {
            commands::delete(&commands::load_config(&args.config.config)?, &args.url)
        }
        Command::Retire(args) => commands::retire(&commands::load_config(&args.config)?),
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    match run(cli.command) {
        Ok(value) => match output::emit(cli.output, &value) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                let e = CachectlError::from(e);
                output::emit_error(cli.output, e.code(), &e.to_string());
                e.exit_code()
            }
        },
        Err(e) => {
            output::emit_error(cli.output, e.code(), &e.to_string());
            e.exit_code()
        }
    }
}
