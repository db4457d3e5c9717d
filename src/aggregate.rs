//! Motif directions in embedding space.
//!
//! For each formula, the rows of that formula are projected with the run's [`Projector`] and
//! their mean projected position is the formula's reference point. The row showing a motif is
//! located and its offset from the reference recorded. Averaging the offsets over all formulas
//! gives a characteristic direction for the motif. Exactly one offset is contributed per formula,
//! however many rows or sublattice sites the formula has.

use log::{debug, info};
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    motif::Motif,
    pca::{mean_point, PcaError, Projector},
    table::{EmbeddingRow, EmbeddingTable, TableError},
};

#[derive(Debug, Error)]
pub enum MotifError {
    #[error("No {motif} match found for formula {formula}")]
    MissingMotifMatch { motif: String, formula: String },
    #[error("{count} rows of formula {formula} are {motif}, expected exactly one")]
    AmbiguousMotifMatch {
        motif: String,
        formula: String,
        count: usize,
    },
    #[error("Table has no rows")]
    EmptyTable,
    #[error(transparent)]
    Table(#[from] TableError),
    #[error(transparent)]
    Pca(#[from] PcaError),
}

/// What to do when several rows of one formula show the motif.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    /// The last matching row in table order is used and earlier ones are ignored.
    #[default]
    LastWins,
    /// More than one matching row is an error.
    Unique,
}

/// The offset contributed by one formula.
#[derive(Debug, Clone, PartialEq)]
pub struct FormulaOffset {
    pub formula: String,
    /// Position in the table of the row that showed the motif.
    pub row: usize,
    pub offset: Vector2<f64>,
}

/// Per-formula offsets of the rows satisfying `predicate` from their formula's mean projection.
/// `label` names the motif in errors.
pub fn motif_offsets<P>(
    table: &EmbeddingTable,
    projector: &Projector,
    label: &str,
    policy: MatchPolicy,
    mut predicate: P,
) -> Result<Vec<FormulaOffset>, MotifError>
where
    P: FnMut(&EmbeddingRow) -> Result<bool, TableError>,
{
    let mut out = vec![];
    for (formula, indices) in table.formula_groups() {
        let projection = projector.project_rows(&table.embeddings_of(&indices))?;
        let reference = mean_point(&projection).ok_or(MotifError::EmptyTable)?;

        let mut matches = vec![];
        for (k, &i) in indices.iter().enumerate() {
            if predicate(&table.rows()[i])? {
                matches.push(k);
            }
        }

        let k = match (matches.as_slice(), policy) {
            ([], _) => {
                return Err(MotifError::MissingMotifMatch {
                    motif: label.to_owned(),
                    formula: formula.to_owned(),
                })
            }
            ([only], _) => *only,
            (many, MatchPolicy::Unique) => {
                return Err(MotifError::AmbiguousMotifMatch {
                    motif: label.to_owned(),
                    formula: formula.to_owned(),
                    count: many.len(),
                })
            }
            (many, MatchPolicy::LastWins) => {
                debug!(
                    "{} rows of {} are {}, using the last one",
                    many.len(),
                    formula,
                    label
                );
                many[many.len() - 1]
            }
        };

        out.push(FormulaOffset {
            formula: formula.to_owned(),
            row: indices[k],
            offset: projection[k] - reference,
        });
    }
    Ok(out)
}

/// Mean offset of the rows satisfying `predicate` over all formulas.
pub fn motif_vector<P>(
    table: &EmbeddingTable,
    projector: &Projector,
    label: &str,
    policy: MatchPolicy,
    predicate: P,
) -> Result<Vector2<f64>, MotifError>
where
    P: FnMut(&EmbeddingRow) -> Result<bool, TableError>,
{
    let offsets: Vec<Vector2<f64>> = motif_offsets(table, projector, label, policy, predicate)?
        .into_iter()
        .map(|o| o.offset)
        .collect();
    mean_point(&offsets).ok_or(MotifError::EmptyTable)
}

/// The characteristic direction of a motif, classifying rows that have not been annotated yet.
pub fn motif_direction(
    table: &EmbeddingTable,
    projector: &Projector,
    motif: Motif,
    policy: MatchPolicy,
) -> Result<Vector2<f64>, MotifError> {
    let v = motif_vector(table, projector, &motif.to_string(), policy, |row| {
        Ok(row.classification()?.holds(motif))
    })?;
    info!("{} direction: ({:.4}, {:.4})", motif, v.x, v.y);
    Ok(v)
}

/// How spread out one formula's rows are in the projection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormulaSpread {
    pub formula: String,
    pub rows: usize,
    /// Mean distance of the formula's rows from their own mean, divided by the mean distance of
    /// all rows from the global mean.
    pub relative_spread: f64,
}

fn mean_distance(points: &[Vector2<f64>], center: &Vector2<f64>) -> f64 {
    points.iter().map(|p| (p - center).norm()).sum::<f64>() / points.len() as f64
}

/// Relative spread of every formula. If all rows project to the same point every spread is 0.
pub fn formula_spread(
    table: &EmbeddingTable,
    projector: &Projector,
) -> Result<Vec<FormulaSpread>, MotifError> {
    let all: Vec<usize> = (0..table.len()).collect();
    let projection = projector.project_rows(&table.embeddings_of(&all))?;
    let center = mean_point(&projection).ok_or(MotifError::EmptyTable)?;
    let norm = mean_distance(&projection, &center);

    Ok(table
        .formula_groups()
        .into_iter()
        .map(|(formula, indices)| {
            let points: Vec<Vector2<f64>> = indices.iter().map(|&i| projection[i]).collect();
            let spread = match mean_point(&points) {
                Some(m) if norm > 0.0 => mean_distance(&points, &m) / norm,
                _ => 0.0,
            };
            FormulaSpread {
                formula: formula.to_owned(),
                rows: indices.len(),
                relative_spread: spread,
            }
        })
        .collect())
}

/// A motif direction together with how many formulas went into it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MotifDirection {
    pub motif: Motif,
    pub vector: [f64; 2],
    pub formulas: usize,
}

/// Everything the embedding figure shows, as numbers: the projection's quality, each formula's
/// spread and the requested motif directions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbeddingMap {
    pub rows: usize,
    pub formulas: usize,
    pub explained_variance_ratio: [f64; 2],
    pub mean_relative_spread: f64,
    pub spread: Vec<FormulaSpread>,
    pub directions: Vec<MotifDirection>,
}

impl EmbeddingMap {
    /// Fits a fresh projector on the whole table, then computes spreads and directions.
    pub fn build(
        table: &EmbeddingTable,
        motifs: &[Motif],
        policy: MatchPolicy,
    ) -> Result<Self, MotifError> {
        if table.is_empty() {
            return Err(MotifError::EmptyTable);
        }
        let projector = Projector::fit(&table.embedding_matrix()?)?;
        Self::with_projector(table, &projector, motifs, policy)
    }

    /// Like [`EmbeddingMap::build`] with an already fitted projector.
    pub fn with_projector(
        table: &EmbeddingTable,
        projector: &Projector,
        motifs: &[Motif],
        policy: MatchPolicy,
    ) -> Result<Self, MotifError> {
        let spread = formula_spread(table, projector)?;
        let mean_relative_spread =
            spread.iter().map(|s| s.relative_spread).sum::<f64>() / spread.len().max(1) as f64;

        let directions = motifs
            .iter()
            .map(|&motif| {
                let v = motif_direction(table, projector, motif, policy)?;
                Ok(MotifDirection {
                    motif,
                    vector: [v.x, v.y],
                    formulas: spread.len(),
                })
            })
            .collect::<Result<Vec<_>, MotifError>>()?;

        let ratio = projector.explained_variance_ratio();
        Ok(Self {
            rows: table.len(),
            formulas: spread.len(),
            explained_variance_ratio: [ratio.x, ratio.y],
            mean_relative_spread,
            spread,
            directions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        motif::{MotifClassification, Sublattice},
        structure::{Site, Structure},
    };
    use approx::assert_relative_eq;
    use nalgebra::{DVector, Point3};
    use pretty_assertions::assert_eq;

    fn flags(rocksalt: bool) -> MotifClassification {
        MotifClassification {
            is_rocksalt: rocksalt,
            is_layered: !rocksalt,
            is_column: false,
            sublattice_sites: 2,
        }
    }

    fn row(formula: &str, emb: &[f64], rocksalt: bool) -> EmbeddingRow {
        let mut r = EmbeddingRow::new(
            format!("{}-{}", formula, emb[0]),
            formula.parse().unwrap(),
            DVector::from_row_slice(emb),
        );
        r.classification = Some(flags(rocksalt));
        r
    }

    /// Two formulas, three rows each, one rock-salt row per formula.
    fn table() -> EmbeddingTable {
        EmbeddingTable::from_rows(vec![
            row("Fe2Mo2O12", &[1.0, 0.0, 0.5], false),
            row("Fe2Mo2O12", &[2.0, 1.0, 0.0], true),
            row("Fe2Mo2O12", &[0.0, 2.0, 1.0], false),
            row("Cr2Fe2O12", &[5.0, 5.0, 2.0], false),
            row("Cr2Fe2O12", &[4.0, 6.0, 0.0], false),
            row("Cr2Fe2O12", &[6.0, 3.0, 1.0], true),
        ])
    }

    fn expected_offset(
        t: &EmbeddingTable,
        p: &Projector,
        group: &[usize],
        hit: usize,
    ) -> Vector2<f64> {
        let proj = p.project_rows(&t.embeddings_of(group)).unwrap();
        proj[hit] - mean_point(&proj).unwrap()
    }

    #[test]
    fn test_one_offset_per_formula() {
        let t = table();
        let p = Projector::fit(&t.embedding_matrix().unwrap()).unwrap();
        let offsets = motif_offsets(&t, &p, "rock-salt", MatchPolicy::LastWins, |r| {
            Ok(r.classification()?.is_rocksalt)
        })
        .unwrap();
        assert_eq!(offsets.len(), 2);

        // formula groups come back alphabetically
        assert_eq!(offsets[0].formula, "Cr2Fe2O12");
        assert_eq!(offsets[0].row, 5);
        assert_eq!(offsets[1].row, 1);
        assert_relative_eq!(offsets[0].offset, expected_offset(&t, &p, &[3, 4, 5], 2));
        assert_relative_eq!(offsets[1].offset, expected_offset(&t, &p, &[0, 1, 2], 1));

        let v = motif_direction(&t, &p, Motif::RockSalt, MatchPolicy::LastWins).unwrap();
        assert_relative_eq!(v, (offsets[0].offset + offsets[1].offset) / 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_offsets_sum_to_zero_over_formula() {
        // every row flagged in turn: the offsets of one formula average to its reference
        let t = table();
        let p = Projector::fit(&t.embedding_matrix().unwrap()).unwrap();
        let mut total = Vector2::zeros();
        for pick in [0usize, 1, 2] {
            let v = motif_offsets(&t, &p, "pick", MatchPolicy::Unique, |r| {
                let group = t.formula_groups()[r.formula.as_str()].clone();
                let i = t.rows().iter().position(|x| x == r).unwrap();
                Ok(group[pick] == i)
            })
            .unwrap();
            total += v[0].offset;
        }
        approx::assert_abs_diff_eq!(total, Vector2::zeros(), epsilon = 1e-10);
    }

    #[test]
    fn test_missing_match() {
        let t = table();
        let p = Projector::fit(&t.embedding_matrix().unwrap()).unwrap();
        let err = motif_direction(&t, &p, Motif::Columnar, MatchPolicy::LastWins).unwrap_err();
        match err {
            MotifError::MissingMotifMatch { motif, formula } => {
                assert_eq!(motif, "columnar");
                assert_eq!(formula, "Cr2Fe2O12");
            }
            other => panic!("{}", other),
        }
    }

    #[test]
    fn test_last_match_wins_or_errors() {
        let t = table();
        let p = Projector::fit(&t.embedding_matrix().unwrap()).unwrap();
        // layered is set on the two non-rock-salt rows of each formula
        let offsets = motif_offsets(&t, &p, "layered", MatchPolicy::LastWins, |r| {
            Ok(r.classification()?.is_layered)
        })
        .unwrap();
        assert_eq!(offsets[0].row, 4);
        assert_eq!(offsets[1].row, 2);

        let err = motif_direction(&t, &p, Motif::Layered, MatchPolicy::Unique).unwrap_err();
        assert!(matches!(
            err,
            MotifError::AmbiguousMotifMatch { count: 2, .. }
        ));
    }

    #[test]
    fn test_unclassified_rows_are_a_schema_error() {
        let mut rows = table().rows().to_vec();
        rows[0].classification = None;
        let t = EmbeddingTable::from_rows(rows);
        let p = Projector::fit(&t.embedding_matrix().unwrap()).unwrap();
        let err = motif_direction(&t, &p, Motif::RockSalt, MatchPolicy::LastWins).unwrap_err();
        assert!(matches!(err, MotifError::Table(TableError::SchemaMismatch { .. })));
    }

    #[test]
    fn test_classifies_on_demand() {
        // rows carry structures instead of stored flags
        let checker = Structure::new(vec![
            Site::new("Fe", Point3::new(0., 0., 0.)),
            Site::new("Mo", Point3::new(4., 0., 0.)),
            Site::new("Fe", Point3::new(4., 4., 0.)),
            Site::new("Mo", Point3::new(0., 4., 0.)),
        ]);
        let clustered = Structure::new(vec![
            Site::new("Fe", Point3::new(0., 0., 0.)),
            Site::new("Fe", Point3::new(4., 0., 0.)),
            Site::new("Mo", Point3::new(4., 4., 0.)),
            Site::new("Mo", Point3::new(0., 4., 0.)),
        ]);
        let b = Sublattice::new(["Fe", "Mo"]);
        let mk = |emb: [f64; 2], s: &Structure| {
            EmbeddingRow::new(
                format!("{:?}", emb),
                "Fe2Mo2".parse().unwrap(),
                DVector::from_row_slice(&emb),
            )
            .with_structure(s.clone(), b.clone())
        };
        let t = EmbeddingTable::from_rows(vec![
            mk([0.0, 0.0], &clustered),
            mk([2.0, 1.0], &checker),
            mk([1.0, 3.0], &clustered),
        ]);
        let p = Projector::fit(&t.embedding_matrix().unwrap()).unwrap();
        let v = motif_direction(&t, &p, Motif::RockSalt, MatchPolicy::Unique).unwrap();
        assert_relative_eq!(v, expected_offset(&t, &p, &[0, 1, 2], 1), epsilon = 1e-12);
    }

    #[test]
    fn test_spread() {
        let t = table();
        let p = Projector::fit(&t.embedding_matrix().unwrap()).unwrap();
        let spread = formula_spread(&t, &p).unwrap();
        assert_eq!(spread.len(), 2);
        assert!(spread.iter().all(|s| s.rows == 3));
        // the two formulas are far apart, so each is tight relative to the whole set
        assert!(spread.iter().all(|s| s.relative_spread > 0.0 && s.relative_spread < 1.0));
    }

    #[test]
    fn test_spread_of_identical_rows() {
        let t = EmbeddingTable::from_rows(vec![
            row("Fe2O3", &[1.0, 1.0], true),
            row("Fe2O3", &[1.0, 1.0], false),
            row("FeO", &[1.0, 1.0], true),
        ]);
        let p = Projector::fit(&t.embedding_matrix().unwrap()).unwrap();
        let spread = formula_spread(&t, &p).unwrap();
        assert!(spread.iter().all(|s| s.relative_spread == 0.0));
    }

    #[test]
    fn test_embedding_map() {
        let t = table();
        let map = EmbeddingMap::build(&t, &[Motif::RockSalt], MatchPolicy::LastWins).unwrap();
        assert_eq!(map.rows, 6);
        assert_eq!(map.formulas, 2);
        assert_eq!(map.directions.len(), 1);
        assert_eq!(map.directions[0].motif, Motif::RockSalt);
        assert!(map.explained_variance_ratio[0] >= map.explained_variance_ratio[1]);

        let err = EmbeddingMap::build(&t, &[Motif::Columnar], MatchPolicy::LastWins).unwrap_err();
        assert!(matches!(err, MotifError::MissingMotifMatch { .. }));

        let empty = EmbeddingTable::default();
        assert!(matches!(
            EmbeddingMap::build(&empty, &[], MatchPolicy::LastWins),
            Err(MotifError::EmptyTable)
        ));
    }
}
