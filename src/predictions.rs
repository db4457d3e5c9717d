//! Error statistics of saved model predictions.
//!
//! Each run keeps its best few models in `best_<k>` directories, each with a prediction table for
//! the evaluation set. The table has the true value in `<target>` and the model's output in
//! `predicted_<target>`, which may be a scalar or a one-element list per row.

use std::{fs::File, io::BufReader, path::PathBuf};

use log::{debug, info};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::{
    config::{AnalysisConfig, Run},
    table::{records, TableError},
};

#[derive(Debug, Error)]
pub enum PredictionError {
    #[error("Column `{column}` in row {row} is not numeric")]
    NotNumeric { column: String, row: String },
    #[error("{predicted} predictions for {targets} targets")]
    LengthMismatch { predicted: usize, targets: usize },
    #[error("No predictions to score")]
    Empty,
    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Table(#[from] TableError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Appends the numbers in a cell, flattening one level of nesting.
fn push_numbers(cell: &Value, out: &mut Vec<f64>) -> Option<()> {
    match cell {
        Value::Array(items) => {
            for item in items {
                out.push(item.as_f64()?);
            }
            Some(())
        }
        other => {
            out.push(other.as_f64()?);
            Some(())
        }
    }
}

/// Mean absolute error between `predicted` and `target` columns of a prediction table.
pub fn mean_absolute_error(
    value: Value,
    target: &str,
    predicted: &str,
) -> Result<f64, PredictionError> {
    let mut truth = vec![];
    let mut pred = vec![];
    for (row, record) in records(value, &[target, predicted])? {
        let not_numeric = |column: &str| PredictionError::NotNumeric {
            column: column.to_owned(),
            row: row.clone(),
        };
        let t = record.get(target).and_then(Value::as_f64);
        truth.push(t.ok_or_else(|| not_numeric(target))?);
        let cell = record.get(predicted).unwrap_or(&Value::Null);
        push_numbers(cell, &mut pred).ok_or_else(|| not_numeric(predicted))?;
    }

    if pred.len() != truth.len() {
        return Err(PredictionError::LengthMismatch {
            predicted: pred.len(),
            targets: truth.len(),
        });
    }
    if truth.is_empty() {
        return Err(PredictionError::Empty);
    }
    let total: f64 = pred.iter().zip(&truth).map(|(p, t)| (p - t).abs()).sum();
    Ok(total / truth.len() as f64)
}

/// Spread of the error over the best models of one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorStats {
    pub mean: f64,
    /// Population standard deviation.
    pub std: f64,
    pub per_model: Vec<f64>,
}

impl ErrorStats {
    pub fn from_errors(per_model: Vec<f64>) -> Option<Self> {
        if per_model.is_empty() {
            return None;
        }
        let n = per_model.len() as f64;
        let mean = per_model.iter().sum::<f64>() / n;
        let var = per_model.iter().map(|e| (e - mean).powi(2)).sum::<f64>() / n;
        Some(Self {
            mean,
            std: var.sqrt(),
            per_model,
        })
    }
}

/// One point of a learning curve.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurvePoint {
    pub training_fraction: f64,
    pub run_name: String,
    pub stats: ErrorStats,
}

fn read_json(path: PathBuf) -> Result<Value, PredictionError> {
    let file = File::open(&path).map_err(|source| PredictionError::Io {
        path: path.clone(),
        source,
    })?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

/// Scores every best model of a run.
pub fn run_stats(config: &AnalysisConfig, run: &Run) -> Result<ErrorStats, PredictionError> {
    let predicted = config.predicted_column();
    let errors = (0..config.num_best_models)
        .map(|k| {
            let path = config.predictions_path(run, k);
            debug!("scoring {}", path.display());
            mean_absolute_error(read_json(path)?, &config.target_prop, &predicted)
        })
        .collect::<Result<Vec<_>, _>>()?;
    ErrorStats::from_errors(errors).ok_or(PredictionError::Empty)
}

/// Error statistics for every configured run, in configuration order.
pub fn learning_curve(config: &AnalysisConfig) -> Result<Vec<CurvePoint>, PredictionError> {
    config
        .runs
        .iter()
        .map(|run| {
            let stats = run_stats(config, run)?;
            info!(
                "{} (fraction {}): MAE {:.4} ± {:.4}",
                run.run_name, run.training_fraction, stats.mean, stats.std
            );
            Ok(CurvePoint {
                training_fraction: run.training_fraction,
                run_name: run.run_name.clone(),
                stats,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_mae_columns_with_nested_predictions() {
        let v = json!({
            "dft_e_hull": {"3": 0.1, "1": 0.2, "7": 0.0},
            "predicted_dft_e_hull": {"3": [0.15], "1": [0.1], "7": [0.0]},
        });
        let mae = mean_absolute_error(v, "dft_e_hull", "predicted_dft_e_hull").unwrap();
        assert_relative_eq!(mae, 0.05, epsilon = 1e-12);
    }

    #[test]
    fn test_mae_records_with_scalars() {
        let v = json!([
            {"e": 1.0, "predicted_e": 2.0},
            {"e": 1.0, "predicted_e": -1.0},
        ]);
        assert_relative_eq!(mean_absolute_error(v, "e", "predicted_e").unwrap(), 1.5);
    }

    #[test]
    fn test_mae_errors() {
        let missing = json!({"e": {"0": 1.0}});
        assert!(matches!(
            mean_absolute_error(missing, "e", "predicted_e"),
            Err(PredictionError::Table(TableError::SchemaMismatch { .. }))
        ));

        let bad = json!([{"e": 1.0, "predicted_e": "x"}]);
        assert!(matches!(
            mean_absolute_error(bad, "e", "predicted_e"),
            Err(PredictionError::NotNumeric { .. })
        ));

        let long = json!([{"e": 1.0, "predicted_e": [1.0, 2.0]}]);
        assert!(matches!(
            mean_absolute_error(long, "e", "predicted_e"),
            Err(PredictionError::LengthMismatch {
                predicted: 2,
                targets: 1
            })
        ));

        assert!(matches!(
            mean_absolute_error(json!([]), "e", "predicted_e"),
            Err(PredictionError::Empty)
        ));
    }

    #[test]
    fn test_error_stats() {
        let s = ErrorStats::from_errors(vec![1.0, 2.0, 3.0]).unwrap();
        assert_relative_eq!(s.mean, 2.0);
        assert_relative_eq!(s.std, (2.0f64 / 3.0).sqrt());
        assert_eq!(ErrorStats::from_errors(vec![]), None);
    }

    #[test]
    fn test_learning_curve_from_disk() {
        let root = std::env::temp_dir().join(format!("bsite-motifs-curve-{}", std::process::id()));
        let config = AnalysisConfig {
            models_dir: root.clone(),
            num_best_models: 2,
            runs: vec![
                Run {
                    training_fraction: 1.0,
                    run_name: "full".into(),
                },
                Run {
                    training_fraction: 0.5,
                    run_name: "half".into(),
                },
            ],
            ..AnalysisConfig::default()
        };
        for (run, errs) in config.runs.iter().zip([[0.1, 0.3], [0.4, 0.4]]) {
            for (k, err) in errs.iter().enumerate() {
                let path = config.predictions_path(run, k);
                std::fs::create_dir_all(path.parent().unwrap()).unwrap();
                let table = json!({
                    "dft_e_hull": {"0": 1.0, "1": 2.0},
                    "predicted_dft_e_hull": {"0": [1.0 + err], "1": [2.0 - err]},
                });
                std::fs::write(&path, table.to_string()).unwrap();
            }
        }

        let curve = learning_curve(&config).unwrap();
        std::fs::remove_dir_all(&root).unwrap();

        assert_eq!(curve.len(), 2);
        assert_eq!(curve[0].run_name, "full");
        assert_relative_eq!(curve[0].stats.mean, 0.2, epsilon = 1e-9);
        assert_relative_eq!(curve[0].stats.std, 0.1, epsilon = 1e-9);
        assert_relative_eq!(curve[1].stats.mean, 0.4, epsilon = 1e-9);
        assert_relative_eq!(curve[1].stats.std, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_missing_file() {
        let config = AnalysisConfig {
            models_dir: PathBuf::from("/nonexistent/bsite-motifs"),
            runs: vec![Run {
                training_fraction: 1.0,
                run_name: "x".into(),
            }],
            ..AnalysisConfig::default()
        };
        assert!(matches!(
            learning_curve(&config),
            Err(PredictionError::Io { .. })
        ));
    }
}
