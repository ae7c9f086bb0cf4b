//! Command-line interface definitions.

use clap::{ColorChoice, Parser, Subcommand};
use std::net::IpAddr;
use std::path::PathBuf;

/// assetflow asset pipeline CLI
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None, arg_required_else_help = true)]
pub struct Cli {
    /// Control colored output (auto, always, never)
    #[arg(long, global = true, default_value = "auto")]
    pub color: ColorChoice,

    /// Config file path (default: nearest assetflow.toml)
    #[arg(short = 'C', long, global = true, value_hint = clap::ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    /// Enable verbose output for debugging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run every workflow and write the results
    #[command(visible_alias = "b")]
    Build {
        /// Output directory (overrides [output].dir)
        #[arg(short, long, value_hint = clap::ValueHint::DirPath)]
        out: Option<PathBuf>,

        /// Only build this workflow
        #[arg(short, long)]
        workflow: Option<String>,
    },

    /// Build, then rebuild workflows whose sources change
    #[command(visible_alias = "w")]
    Watch {
        /// Output directory (overrides [output].dir)
        #[arg(short, long, value_hint = clap::ValueHint::DirPath)]
        out: Option<PathBuf>,
    },

    /// Serve workflow results over HTTP
    #[command(visible_alias = "s")]
    Serve {
        /// Network interface to bind (e.g., 127.0.0.1, 0.0.0.0)
        #[arg(short, long)]
        interface: Option<IpAddr>,

        /// Port number to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Check sources for changes on filesystem events
        #[arg(short, long)]
        watch: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_build() {
        let cli = Cli::try_parse_from(["assetflow", "-v", "build", "--out", "public"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(
            cli.command,
            Commands::Build { out: Some(ref out), workflow: None } if out == &PathBuf::from("public")
        ));
    }

    #[test]
    fn test_parse_serve() {
        let cli = Cli::try_parse_from(["assetflow", "serve", "-p", "8080", "--watch", "-C", "a.toml"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("a.toml")));
        match cli.command {
            Commands::Serve { interface, port, watch } => {
                assert!(interface.is_none());
                assert_eq!(port, Some(8080));
                assert!(watch);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
