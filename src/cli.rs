use crate::model::{EcosystemSelection, RetrievalMode};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Package Harvester - collect package manifests and lockfiles from GitHub
#[derive(Parser, Debug)]
#[command(name = "package-harvester")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Discover repositories and retrieve their package files
    Fetch(FetchArgs),

    /// Show the remaining API quota
    RateLimit(RateLimitArgs),
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModeArg {
    /// Download matching files only
    Files,
    /// Clone whole repositories
    Clone,
}

impl From<ModeArg> for RetrievalMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Files => RetrievalMode::Files,
            ModeArg::Clone => RetrievalMode::Clone,
        }
    }
}

#[derive(Args, Debug)]
pub struct FetchArgs {
    /// Ecosystem to harvest: python, rust, javascript, ruby, php or all
    #[arg(short, long, default_value = "all", value_name = "NAME")]
    pub ecosystem: EcosystemSelection,

    /// Retrieval mode
    #[arg(short, long, value_enum, default_value = "files")]
    pub mode: ModeArg,

    /// Output root directory
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Candidate list (markdown or one URL per line); single ecosystem only
    #[arg(short, long, value_name = "PATH_OR_URL")]
    pub input: Option<String>,

    /// Clone attempts per repository
    #[arg(long, value_name = "N")]
    pub retries: Option<u32>,

    /// Seconds between clone attempts
    #[arg(long, value_name = "SECS")]
    pub retry_delay: Option<u64>,

    /// Concurrent crawls and downloads
    #[arg(long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// Concurrent clones
    #[arg(long, value_name = "N")]
    pub clone_concurrency: Option<usize>,

    /// Descend into subdirectories when crawling
    #[arg(short, long)]
    pub recursive: bool,

    /// GitHub access token
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub token: Option<String>,
}

#[derive(Args, Debug)]
pub struct RateLimitArgs {
    /// GitHub access token
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Ecosystem;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_fetch_defaults() {
        let cli = Cli::try_parse_from(["package-harvester", "fetch"]).unwrap();
        let Command::Fetch(args) = cli.command else {
            panic!("expected fetch");
        };
        assert_eq!(args.ecosystem, EcosystemSelection::All);
        assert_eq!(args.mode, ModeArg::Files);
        assert!(!args.recursive);
    }

    #[test]
    fn parse_fetch_flags() {
        let cli = Cli::try_parse_from([
            "package-harvester",
            "-vv",
            "fetch",
            "--ecosystem",
            "Rust",
            "--mode",
            "clone",
            "--retries",
            "5",
            "--clone-concurrency",
            "8",
            "--input",
            "repos.txt",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        let Command::Fetch(args) = cli.command else {
            panic!("expected fetch");
        };
        assert_eq!(args.ecosystem, EcosystemSelection::One(Ecosystem::Rust));
        assert_eq!(RetrievalMode::from(args.mode), RetrievalMode::Clone);
        assert_eq!(args.retries, Some(5));
        assert_eq!(args.clone_concurrency, Some(8));
        assert_eq!(args.input.as_deref(), Some("repos.txt"));
    }

    #[test]
    fn unknown_ecosystem_rejected() {
        let args = ["package-harvester", "fetch", "--ecosystem", "cobol"];
        assert!(Cli::try_parse_from(args).is_err());
    }
}
