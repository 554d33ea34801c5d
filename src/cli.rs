//! Command line interface.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "edgelink", version, about = "edge gateway core")]
pub struct Cli {
    /// Path to the configuration file
    #[arg(long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Print the default configuration and exit
    #[arg(long)]
    pub default_config: bool,

    /// Print a minimal configuration and exit
    #[arg(long)]
    pub min_config: bool,
}

pub fn print_default_config() {
    print!("{}", include_str!("../config/default-config.toml"));
}

pub fn print_min_config() {
    print!("{}", include_str!("../config/min-config.toml"));
}
