//! strata CLI - command-line lookups against a strata hierarchy
//!
//! Usage:
//!   strata lookup database.host
//!   strata lookup users --merge deep --var node:web01
//!   strata lookup secret --type String --explain

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;

use strata_core::{CommandOptions, RenderAs, Session};

/// strata - hierarchical configuration data lookup
#[derive(Parser)]
#[command(name = "strata")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Look up one or more keys in the hierarchy
    Lookup {
        /// Keys to look up; the first one that yields a value wins
        #[arg(required = true)]
        names: Vec<String>,

        /// Assert this type on the found value (e.g. String, Array[Integer])
        #[arg(short = 't', long = "type")]
        value_type: Option<String>,

        /// Merge strategy: first, unique, hash or deep
        #[arg(short, long)]
        merge: Option<String>,

        /// Value to return when nothing is found
        #[arg(short, long)]
        default: Option<String>,

        /// Output rendering: yaml, json, s or binary
        #[arg(long = "render-as", value_parser = parse_render_as)]
        render_as: Option<RenderAs>,

        /// Extra scope variable as key:value or key=value (repeatable)
        #[arg(long = "var")]
        variables: Vec<String>,

        /// YAML or JSON file with scope variables, `-` for stdin (repeatable)
        #[arg(long = "vars")]
        var_paths: Vec<String>,

        /// Explain the progress of the lookup
        #[arg(long)]
        explain: bool,

        /// Explain how lookup options were found for the lookup
        #[arg(long = "explain-options")]
        explain_options: bool,

        /// Engine root directory (defaults to the current directory)
        #[arg(long)]
        root: Option<PathBuf>,

        /// Path to the configuration file, overrides <root>/strata.yaml
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn parse_render_as(name: &str) -> Result<RenderAs, String> {
    RenderAs::from_name(name).map_err(|e| e.to_string())
}

/// Run the CLI with the given arguments.
///
/// Exit codes: 0 when a value was found, 1 when nothing was found and no
/// default exists, 2 on usage errors (clap), 3 on any other failure.
pub fn run() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Lookup {
            names,
            value_type,
            merge,
            default,
            render_as,
            variables,
            var_paths,
            explain,
            explain_options,
            root,
            config,
        } => {
            let options = CommandOptions {
                value_type,
                merge,
                default,
                var_paths,
                variables,
                render_as,
                explain,
                explain_options,
            };
            let root = root.unwrap_or_else(|| PathBuf::from("."));

            let session = {
                let mut builder = Session::builder().root(root);
                if let Some(config) = config {
                    builder = builder.config_path(config);
                }
                match builder.build() {
                    Ok(session) => session,
                    Err(e) => return fail(e),
                }
            };

            let mut out = std::io::stdout();
            match strata_core::lookup_and_render(&session, &options, &names, None, &mut out) {
                Ok(true) => ExitCode::SUCCESS,
                Ok(false) => ExitCode::from(1),
                Err(e) => fail(e),
            }
        }
    }
}

fn fail(e: strata_core::Error) -> ExitCode {
    eprintln!("{} {}", "error:".red().bold(), e);
    ExitCode::from(3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_lookup_flags() {
        let cli = Cli::try_parse_from([
            "strata",
            "lookup",
            "db.host",
            "--merge",
            "deep",
            "--var",
            "node:web01",
            "--render-as",
            "json",
            "--explain",
        ])
        .unwrap();

        let Commands::Lookup {
            names,
            merge,
            variables,
            render_as,
            explain,
            ..
        } = cli.command;
        assert_eq!(names, vec!["db.host"]);
        assert_eq!(merge.as_deref(), Some("deep"));
        assert_eq!(variables, vec!["node:web01"]);
        assert_eq!(render_as, Some(RenderAs::Json));
        assert!(explain);
    }

    #[test]
    fn test_lookup_requires_a_name() {
        assert!(Cli::try_parse_from(["strata", "lookup"]).is_err());
    }
}
