//! Command-line surface for the `forged` daemon.
//!
//! Grounded on `acutectl/src/cli.rs`'s `clap::Parser` shape and
//! `fetiched/src/cli.rs`'s `Server`/`Status`/`Version` subcommands, minus
//! the `Server` subcommand's listen address/port — the HTTP/REST edge is
//! out of scope here, so there is no socket to bind.

use std::path::PathBuf;

use clap::{crate_authors, crate_description, crate_name, crate_version, Parser};

/// CLI options
#[derive(Parser)]
#[command(disable_version_flag = true)]
#[clap(name = crate_name!(), about = crate_description!())]
#[clap(version = crate_version!(), author = crate_authors!())]
pub struct Opts {
    /// configuration file.
    #[clap(short = 'c', long)]
    pub config: Option<PathBuf>,
    /// debug mode (hierarchical log output instead of compact).
    #[clap(short = 'D', long = "debug")]
    pub debug: bool,
    /// Verbose mode.
    #[clap(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,
    /// Sub-commands (see below).
    #[clap(subcommand)]
    pub subcmd: SubCommand,
}

/// All sub-commands:
///
/// - `run`
/// - `config`
/// - `version`
#[derive(Debug, Parser)]
pub enum SubCommand {
    /// Run the daemon in the foreground until interrupted.
    Run,
    /// Display the resolved configuration and exit.
    Config,
    /// List all package versions.
    Version,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_with_a_config_flag() {
        let opts = Opts::parse_from(["forged", "-c", "forged.json", "run"]);
        assert_eq!(opts.config, Some(PathBuf::from("forged.json")));
        assert!(matches!(opts.subcmd, SubCommand::Run));
    }

    #[test]
    fn verbose_flag_is_countable() {
        let opts = Opts::parse_from(["forged", "-vvv", "version"]);
        assert_eq!(opts.verbose, 3);
    }

    #[test]
    fn missing_subcommand_is_rejected() {
        assert!(Opts::try_parse_from(["forged"]).is_err());
    }
}
