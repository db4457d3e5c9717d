use std::{error::Error, path::PathBuf};

use bsite_motifs::{
    config::AnalysisConfig,
    predictions::learning_curve,
    report::{classification_table, curve_table, map_tables},
    EmbeddingMap, EmbeddingTable, MatchPolicy, Motif,
};
use clap::{Parser, Subcommand};
use log::info;

#[derive(Debug, Parser)]
#[command(name = "bsite-motifs", version, about = "B-site ordering motifs in learned crystal embeddings")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the rock-salt, layered and columnar flags of every row.
    Classify {
        /// Embedding table (JSON).
        embeddings: PathBuf,
    },
    /// Fit a 2D PCA on the embeddings and report spreads and motif directions.
    Map {
        /// Embedding table (JSON).
        embeddings: PathBuf,
        /// Analysis settings (YAML).
        #[arg(long)]
        config: Option<PathBuf>,
        /// Motifs to compute directions for, overriding the configuration.
        #[arg(long, value_delimiter = ',')]
        motifs: Vec<Motif>,
        /// Fail when a formula has more than one row showing a motif.
        #[arg(long)]
        unique: bool,
        /// Print JSON instead of tables.
        #[arg(long)]
        json: bool,
    },
    /// Mean and spread of the test error over the best models of each configured run.
    LearningCurve {
        /// Analysis settings (YAML).
        #[arg(long)]
        config: PathBuf,
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<AnalysisConfig, Box<dyn Error>> {
    Ok(match path {
        Some(path) => AnalysisConfig::from_path(path)?,
        None => AnalysisConfig::default(),
    })
}

pub fn main() {
    _main().unwrap_or_else(|e| {
        eprintln!("ERROR: {}", e);
        std::process::exit(1);
    });
}

fn _main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Classify { embeddings } => {
            let mut table = EmbeddingTable::from_path(&embeddings)?;
            table.annotate_motifs()?;
            println!("{}", classification_table(&table)?);
        }
        Command::Map {
            embeddings,
            config,
            motifs,
            unique,
            json,
        } => {
            let config = load_config(config.as_ref())?;
            let motifs = if motifs.is_empty() {
                config.motifs.clone()
            } else {
                motifs
            };
            let policy = if unique {
                MatchPolicy::Unique
            } else {
                config.match_policy
            };

            let mut table = EmbeddingTable::from_path(&embeddings)?;
            table.annotate_motifs()?;
            let map = EmbeddingMap::build(&table, &motifs, policy)?;
            info!("built embedding map over {} formulas", map.formulas);
            if json {
                println!("{}", serde_json::to_string_pretty(&map)?);
            } else {
                println!("{}", map_tables(&map));
            }
        }
        Command::LearningCurve { config, json } => {
            let config = AnalysisConfig::from_path(&config)?;
            let curve = learning_curve(&config)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&curve)?);
            } else {
                println!("{}", curve_table(&curve));
            }
        }
    }
    Ok(())
}
