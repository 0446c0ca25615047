use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod export;
mod import;

use commands::{PropagateArgs, Session};
use config::AppConfig;

#[derive(Parser)]
#[command(name = "ydna")]
#[command(about = "Propagate Y-DNA haplogroups along Geni paternal lines", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = "config.json")]
    config: PathBuf,
    /// Database file, overriding the configuration
    #[arg(long, global = true)]
    database: Option<PathBuf>,
    #[arg(long, global = true)]
    debug: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show a profile
    Profile {
        id: String,
        /// Print the profile as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show parents, partners and children of a profile
    Family { id: String },
    /// Walk the paternal line upward
    Ancestors {
        id: String,
        #[arg(short, long)]
        generations: Option<u32>,
        #[arg(short, long)]
        export: Option<PathBuf>,
    },
    /// Walk the paternal line downward
    Descendants {
        id: String,
        #[arg(short, long)]
        generations: Option<u32>,
        #[arg(short, long)]
        export: Option<PathBuf>,
    },
    /// Record a tested haplogroup and spread it along the paternal line
    Propagate {
        id: String,
        haplogroup: String,
        #[arg(short, long, default_value = "FTDNA")]
        source: String,
        #[arg(long, conflicts_with = "down_only")]
        up_only: bool,
        #[arg(long)]
        down_only: bool,
        #[arg(short, long)]
        export: Option<PathBuf>,
    },
    /// Label the whole paternal tree from its oldest known ancestor
    FullTree {
        id: String,
        haplogroup: String,
        #[arg(short, long, default_value = "FTDNA")]
        source: String,
        /// Skip profiles already explored for this haplogroup
        #[arg(long)]
        resume: bool,
        #[arg(short, long)]
        export: Option<PathBuf>,
    },
    /// Import tested haplogroups from CSV
    Import { file: PathBuf },
    /// Build and record a paternal tree
    Tree {
        id: String,
        #[arg(long)]
        haplogroup: Option<String>,
        #[arg(long)]
        name: Option<String>,
        #[arg(short, long)]
        export: Option<PathBuf>,
    },
    /// Show database statistics
    Stats,
    /// Search the directory by name
    Search { name: String },
    /// Export profiles carrying a haplogroup to CSV
    Export { haplogroup: String, output: PathBuf },
    /// List surnames shared by two haplogroup families
    Connections { first: String, second: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let mut config = AppConfig::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    if let Some(database) = cli.database {
        config.database.path = database;
    }
    let session = Session::open(config)?;

    match cli.command {
        Commands::Profile { id, json } => commands::profile(&session, &id, json),
        Commands::Family { id } => commands::family(&session, &id),
        Commands::Ancestors {
            id,
            generations,
            export,
        } => commands::ancestors(&session, &id, generations, export.as_deref()),
        Commands::Descendants {
            id,
            generations,
            export,
        } => commands::descendants(&session, &id, generations, export.as_deref()),
        Commands::Propagate {
            id,
            haplogroup,
            source,
            up_only,
            down_only,
            export,
        } => commands::propagate(
            &session,
            PropagateArgs {
                id: &id,
                haplogroup: &haplogroup,
                source: &source,
                up: !down_only,
                down: !up_only,
                output: export.as_deref(),
            },
        ),
        Commands::FullTree {
            id,
            haplogroup,
            source,
            resume,
            export,
        } => commands::full_tree(&session, &id, &haplogroup, &source, resume, export),
        Commands::Import { file } => commands::import(&session, &file),
        Commands::Tree {
            id,
            haplogroup,
            name,
            export,
        } => commands::tree(
            &session,
            &id,
            haplogroup.as_deref(),
            name.as_deref(),
            export.as_deref(),
        ),
        Commands::Stats => commands::stats(&session),
        Commands::Search { name } => commands::search(&session, &name),
        Commands::Export { haplogroup, output } => {
            commands::export_csv(&session, &haplogroup, &output)
        }
        Commands::Connections { first, second } => {
            commands::connections(&session, &first, &second)
        }
    }
}

/// Logs go to stderr. `--debug` wins over `RUST_LOG`, which wins over
/// `YDNA_LOG_LEVEL`.
fn init_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        let level = std::env::var("YDNA_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn propagate_direction_flags_conflict() {
        let parsed = Cli::try_parse_from([
            "ydna", "propagate", "profile-1", "R-M269", "--up-only", "--down-only",
        ]);
        assert!(parsed.is_err());

        let cli = Cli::try_parse_from(["ydna", "propagate", "profile-1", "R-M269", "-s", "YFull"])
            .expect("parse");
        match cli.command {
            Commands::Propagate {
                source,
                up_only,
                down_only,
                ..
            } => {
                assert_eq!(source, "YFull");
                assert!(!up_only && !down_only);
            }
            _ => panic!("expected propagate"),
        }
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli = Cli::try_parse_from([
            "ydna",
            "full-tree",
            "6000000012",
            "R-M269",
            "--resume",
            "--database",
            "lineage.db",
            "-e",
            "out.csv",
        ])
        .expect("parse");

        assert_eq!(cli.database, Some(PathBuf::from("lineage.db")));
        assert_eq!(cli.config, PathBuf::from("config.json"));
        match cli.command {
            Commands::FullTree { resume, export, .. } => {
                assert!(resume);
                assert_eq!(export, Some(PathBuf::from("out.csv")));
            }
            _ => panic!("expected full-tree"),
        }
    }
}
