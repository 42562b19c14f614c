//! This module defines the command-line interface for the application using `clap`.
//!
//! It provides a `Cli` struct with the global `--config` option and a `Commands`
//! enum with one variant per subcommand.
//!
//! # Examples
//!
//! ```
//! use clap::Parser;
//! use medirag::commands::{Cli, Commands};
//!
//! let cli = Cli::parse_from(["medirag", "ask", "Quel est son âge ?", "-p", "p1"]);
//! match cli.command {
//!     Commands::Ask { question, patient } => {
//!         assert_eq!(question, "Quel est son âge ?");
//!         assert_eq!(patient.as_deref(), Some("p1"));
//!     }
//!     _ => unreachable!(),
//! }
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Represents the parsed command-line arguments.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, propagate_version = true, color = clap::ColorChoice::Always)]
pub struct Cli {
    /// Path of the YAML configuration file. Defaults to `config.yaml` in the
    /// per-platform config directory.
    #[arg(long, global = true, env = "MEDIRAG_CONFIG")]
    pub config: Option<PathBuf>,

    /// The parsed subcommand and its options.
    #[command(subcommand)]
    pub command: Commands,
}

/// Represents the available subcommands and their options.
#[derive(Subcommand, Debug)]
#[command(about, long_about = None, color = clap::ColorChoice::Always)]
pub enum Commands {
    /// Write a configuration template.
    Init,

    /// Ask a question about the patients.
    #[clap(name = "ask", alias = "a")]
    Ask {
        question: String,

        /// Restrict the answer to one patient.
        #[arg(short = 'p', long)]
        patient: Option<String>,
    },

    /// Request form fields of a case, e.g. "Résumé clinique".
    #[clap(name = "field", alias = "f")]
    Field {
        message: String,

        /// Medical case or intake id. When absent, the patient named in the message is used.
        #[arg(short = 'c', long = "case")]
        case_id: Option<String>,
    },

    /// Rebuild the index from the record store.
    Rebuild,

    /// Look for new patients and rebuild when there are any.
    Check,

    /// Print patient statistics.
    Stats,

    /// Question-answer loop on the terminal.
    ///
    /// This subcommand can be invoked with either 'i' or 'interactive'.
    #[clap(name = "interactive", alias = "i")]
    Interactive,

    /// Serve the HTTP API.
    Serve {
        /// Bind address; overrides `listen_addr`.
        #[arg(long)]
        addr: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_field_with_case() {
        let cli = Cli::parse_from(["medirag", "field", "Conclusion", "-c", "c1"]);
        match cli.command {
            Commands::Field { message, case_id } => {
                assert_eq!(message, "Conclusion");
                assert_eq!(case_id.as_deref(), Some("c1"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn config_is_global() {
        let cli = Cli::parse_from(["medirag", "stats", "--config", "/tmp/m.yaml"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/m.yaml")));
        assert!(matches!(cli.command, Commands::Stats));
    }

    #[test]
    fn serve_accepts_addr() {
        let cli = Cli::parse_from(["medirag", "serve", "--addr", "0.0.0.0:8080"]);
        assert!(matches!(cli.command, Commands::Serve { addr: Some(a) } if a == "0.0.0.0:8080"));
    }
}
