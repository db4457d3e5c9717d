//! Settings for an analysis run, read from YAML. Every field has a default, so an empty file is
//! a valid configuration.
//!
//! ```yaml
//! models_dir: ./best_models
//! model_type: CGCNN
//! target_prop: dft_e_hull
//! num_best_models: 3
//! test_set: test_set
//! match_policy: last_wins   # or: unique
//! motifs: [rock_salt, layered]
//! runs:
//!   - training_fraction: 1.0
//!     run_name: data_dft_e_hull_unrelaxed_CGCNN_1.0
//!   - training_fraction: 0.5
//!     run_name: data_dft_e_hull_unrelaxed_CGCNN_0.5
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{aggregate::MatchPolicy, motif::Motif};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One trained configuration: a training fraction and the directory its best models live in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Run {
    pub training_fraction: f64,
    pub run_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisConfig {
    /// Root of the saved models.
    pub models_dir: PathBuf,
    pub model_type: String,
    /// Property the models predict; predictions are in `predicted_<target_prop>`.
    pub target_prop: String,
    /// Number of `best_<k>` model directories per run.
    pub num_best_models: usize,
    /// Which evaluation set's predictions to read.
    pub test_set: String,
    pub runs: Vec<Run>,
    pub match_policy: MatchPolicy,
    /// Motif directions to compute for the embedding map.
    pub motifs: Vec<Motif>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            models_dir: PathBuf::from("./best_models"),
            model_type: "CGCNN".to_owned(),
            target_prop: "dft_e_hull".to_owned(),
            num_best_models: 3,
            test_set: "test_set".to_owned(),
            runs: vec![],
            match_policy: MatchPolicy::default(),
            motifs: vec![Motif::RockSalt, Motif::Layered],
        }
    }
}

impl AnalysisConfig {
    /// The usual sweep of training fractions.
    pub const DEFAULT_FRACTIONS: [f64; 4] = [1.0, 0.5, 0.25, 0.125];

    pub fn default_fractions() -> &'static [f64] {
        &Self::DEFAULT_FRACTIONS
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = if text.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(text)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.num_best_models == 0 {
            return Err(ConfigError::Invalid("num_best_models must be at least 1".into()));
        }
        for run in &self.runs {
            if !(run.training_fraction > 0.0 && run.training_fraction <= 1.0) {
                return Err(ConfigError::Invalid(format!(
                    "training fraction {} of run {:?} is not in (0, 1]",
                    run.training_fraction, run.run_name
                )));
            }
            if run.run_name.trim().is_empty() {
                return Err(ConfigError::Invalid("run with an empty run_name".into()));
            }
        }
        Ok(())
    }

    /// `<models_dir>/<model_type>/<run_name>`
    pub fn run_dir(&self, run: &Run) -> PathBuf {
        self.models_dir.join(&self.model_type).join(&run.run_name)
    }

    /// `<run_dir>/best_<k>`
    pub fn model_dir(&self, run: &Run, k: usize) -> PathBuf {
        self.run_dir(run).join(format!("best_{}", k))
    }

    /// `<model_dir>/<test_set>_predictions.json`
    pub fn predictions_path(&self, run: &Run, k: usize) -> PathBuf {
        self.model_dir(run, k)
            .join(format!("{}_predictions.json", self.test_set))
    }

    /// Column holding the model's predictions.
    pub fn predicted_column(&self) -> String {
        format!("predicted_{}", self.target_prop)
    }
}
