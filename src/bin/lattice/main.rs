//! lattice CLI tool
//!
//! Command-line interface for building a configuration tree from a TOML schema file.
//!
//! ## Commands
//!
//! - `show <schemas>`: Build, sanity-check and print the tree with diagnostics
//! - `history <schemas>`: Print the assignment history as JSON
//! - `export <schemas>`: Print the resolved tree as TOML
//!
//! Every command accepts `--overrides <file>` and any number of `-s key=value`
//! assignments, applied in that order after the schema defaults.

use clap::{Parser, Subcommand};
use lattice_config::{
    config::{self, SchemaFile},
    ConfigTree, LatticeError, Overrides,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "lattice")]
#[command(author, version, about = "A tool for inspecting hierarchical configuration trees", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct Source {
    /// Schema file declaring the configuration
    schemas: PathBuf,

    /// Schema to build (default: the file's `root`)
    #[arg(long)]
    root: Option<String>,

    /// TOML file of overrides merged after the defaults
    #[arg(short, long)]
    overrides: Option<PathBuf>,

    /// `dotted.key=value` assignment, applied after the overrides file
    #[arg(short, long = "set")]
    set: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the tree, check every reference and print it
    Show {
        #[command(flatten)]
        source: Source,

        /// Also report fields whose path contains this string
        #[arg(short, long)]
        query: Option<String>,

        /// Only print the subtree at this dotted path
        #[arg(long)]
        key: Option<String>,
    },

    /// Print the assignment history of every field as JSON
    History {
        #[command(flatten)]
        source: Source,
    },

    /// Print the resolved tree as TOML
    Export {
        #[command(flatten)]
        source: Source,
    },
}

fn build(source: &Source) -> Result<ConfigTree, LatticeError> {
    let file = SchemaFile::load(&source.schemas)?;
    let schema = match &source.root {
        Some(name) => file.get(name)?,
        None => file.root_schema()?,
    };

    let mut overrides = match &source.overrides {
        Some(path) => config::load_overrides(path)?,
        None => Overrides::new(),
    };
    config::deep_merge(
        &mut overrides,
        config::merge_assignments(source.set.iter().map(String::as_str))?,
    );
    tracing::info!(
        "Building {} with {} top-level override(s)",
        schema.name(),
        overrides.len()
    );
    ConfigTree::build_with(schema, &overrides)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Show { source, query, key } => {
            let tree = build(&source)?;
            let node = match &key {
                Some(key) => tree.lookup(key)?.as_node().ok_or_else(|| {
                    LatticeError::Custom(format!("'{key}' is not a nested configuration"))
                })?,
                None => tree.root(),
            };

            let failures = tree.sanity_report();
            print!("{}", tree.render(node));
            for report in tree.diagnose_node(node, query.as_deref()) {
                println!();
                print!("{report}");
            }
            if !failures.is_empty() {
                eprintln!();
                for (path, err) in &failures {
                    eprintln!("Error: {path}: {err}");
                }
                std::process::exit(1);
            }
        }
        Commands::History { source } => {
            let tree = build(&source)?;
            println!("{}", serde_json::to_string_pretty(&tree.all_history())?);
        }
        Commands::Export { source } => {
            let tree = build(&source)?;
            tree.sanity_check()?;
            print!("{}", toml::to_string(&tree.to_toml(tree.root())?)?);
        }
    }

    Ok(())
}
