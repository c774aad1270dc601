use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::output::OutputFormat;

/// Inspect and maintain a KPIO offline cache store.
///
/// Inspection commands never change the store. `delete` and `retire` open
/// it the way a host does, discarding unfinished staging generations, so
/// run them while the host is stopped.
#[derive(Parser, Debug)]
#[command(name = "cachectl", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Output format for all subcommands.
    #[arg(long, value_enum, default_value = "human", global = true)]
    pub output: OutputFormat,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Validate a config file and print the derived settings.
    ConfigCheck(ConfigArg),

    /// List active and staging generations in the store.
    Generations(ConfigArg),

    /// List entries of the active generation.
    Entries(EntriesArgs),

    /// Show the cached entry for a URL.
    Inspect(UrlArgs),

    /// Remove the cached entry for a URL.
    Delete(UrlArgs),

    /// Remove every generation that is not active.
    Retire(ConfigArg),
}

#[derive(Args, Debug, Clone)]
pub struct ConfigArg {
    /// Path to the offline cache TOML config.
    #[arg(long, short)]
    pub config: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct EntriesArgs {
    #[command(flatten)]
    pub config: ConfigArg,

    /// Show at most this many entries, most recently stored first.
    #[arg(long)]
    pub limit: Option<usize>,
}

#[derive(Args, Debug, Clone)]
pub struct UrlArgs {
    #[command(flatten)]
    pub config: ConfigArg,

    /// Absolute URL, or a path relative to the configured origin.
    pub url: String,
}
