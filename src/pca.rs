//! Two-component principal component analysis of learned embeddings.
//!
//! The basis is fit once per analysis run and is immutable afterwards; fitting again always goes
//! through [`Projector::fit`]. The sign of each axis is arbitrary in PCA. Here each component is
//! flipped so that its largest-magnitude coefficient is positive, which makes the result
//! reproducible, but consumers should still only rely on relative offsets between projected
//! points.

use std::cmp::Ordering;

use log::{debug, info};
use nalgebra::{DMatrix, DVector, RowDVector, Vector2, SVD};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PcaError {
    #[error("Need at least 2 rows and 2 columns to fit 2 components, got {rows}x{cols}")]
    TooSmall { rows: usize, cols: usize },
    #[error("Row {row} has length {found}, expected {expected}")]
    Ragged {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("Singular value decomposition did not converge")]
    NoConvergence,
}

/// A fitted 2D projection: the training mean and the two leading principal axes.
#[derive(Debug, Clone, PartialEq)]
pub struct Projector {
    mean: DVector<f64>,
    /// Principal axes as rows, in order of decreasing variance.
    components: [RowDVector<f64>; 2],
    explained_variance: Vector2<f64>,
    explained_variance_ratio: Vector2<f64>,
}

/// Stacks equal-length vectors as the rows of a matrix.
pub fn stack_rows(rows: &[DVector<f64>]) -> Result<DMatrix<f64>, PcaError> {
    let cols = rows.first().map_or(0, DVector::len);
    if let Some((row, v)) = rows.iter().enumerate().find(|(_, v)| v.len() != cols) {
        return Err(PcaError::Ragged {
            row,
            expected: cols,
            found: v.len(),
        });
    }
    Ok(DMatrix::from_fn(rows.len(), cols, |i, j| rows[i][j]))
}

/// Flips `v` so its largest-magnitude entry is positive. The first such entry wins ties.
fn flip_sign(v: RowDVector<f64>) -> RowDVector<f64> {
    let pivot = v
        .iter()
        .copied()
        .reduce(|best, x| if x.abs() > best.abs() { x } else { best })
        .unwrap_or(0.0);
    if pivot < 0.0 {
        -v
    } else {
        v
    }
}

impl Projector {
    /// Fits the projection to a matrix with one sample per row.
    pub fn fit(data: &DMatrix<f64>) -> Result<Self, PcaError> {
        let (rows, cols) = data.shape();
        if rows < 2 || cols < 2 {
            return Err(PcaError::TooSmall { rows, cols });
        }

        let mean: DVector<f64> = data.row_mean().transpose();
        let centered = DMatrix::from_fn(rows, cols, |i, j| data[(i, j)] - mean[j]);
        let total_ss = centered.norm_squared();

        let svd = SVD::try_new(centered, false, true, f64::EPSILON, 0)
            .ok_or(PcaError::NoConvergence)?;
        let v_t = svd.v_t.ok_or(PcaError::NoConvergence)?;
        let sv = svd.singular_values;

        // nalgebra makes no promise about the order of singular values
        let mut order: Vec<usize> = (0..sv.len()).collect();
        order.sort_by(|&a, &b| sv[b].partial_cmp(&sv[a]).unwrap_or(Ordering::Equal));

        let components = [
            flip_sign(v_t.row(order[0]).into_owned()),
            flip_sign(v_t.row(order[1]).into_owned()),
        ];
        let ss = Vector2::new(sv[order[0]].powi(2), sv[order[1]].powi(2));
        let explained_variance = ss / (rows - 1) as f64;
        let explained_variance_ratio = if total_ss > 0.0 {
            ss / total_ss
        } else {
            Vector2::zeros()
        };

        info!(
            "fit PCA on {}x{} embeddings, explained variance ratio {:.4} / {:.4}",
            rows, cols, explained_variance_ratio.x, explained_variance_ratio.y
        );

        Ok(Self {
            mean,
            components,
            explained_variance,
            explained_variance_ratio,
        })
    }

    /// Fits the projection to a list of equal-length vectors.
    pub fn fit_rows(rows: &[DVector<f64>]) -> Result<Self, PcaError> {
        Self::fit(&stack_rows(rows)?)
    }

    /// Dimension of the embedding space the projector was fit on.
    pub fn input_dim(&self) -> usize {
        self.mean.len()
    }

    pub fn mean(&self) -> &DVector<f64> {
        &self.mean
    }

    pub fn components(&self) -> &[RowDVector<f64>; 2] {
        &self.components
    }

    /// Variance along each of the two axes (with the n - 1 denominator).
    pub fn explained_variance(&self) -> Vector2<f64> {
        self.explained_variance
    }

    /// Fraction of the total variance captured by each axis.
    pub fn explained_variance_ratio(&self) -> Vector2<f64> {
        self.explained_variance_ratio
    }

    /// Projects a single embedding.
    pub fn project(&self, x: &DVector<f64>) -> Result<Vector2<f64>, PcaError> {
        if x.len() != self.input_dim() {
            return Err(PcaError::Ragged {
                row: 0,
                expected: self.input_dim(),
                found: x.len(),
            });
        }
        let centered = x - &self.mean;
        Ok(Vector2::new(
            self.components[0].dot(&centered.transpose()),
            self.components[1].dot(&centered.transpose()),
        ))
    }

    /// Projects several embeddings, keeping their order.
    pub fn project_rows(&self, rows: &[&DVector<f64>]) -> Result<Vec<Vector2<f64>>, PcaError> {
        rows.iter()
            .enumerate()
            .map(|(row, x)| {
                self.project(x).map_err(|e| match e {
                    PcaError::Ragged {
                        expected, found, ..
                    } => PcaError::Ragged {
                        row,
                        expected,
                        found,
                    },
                    other => other,
                })
            })
            .inspect(|p| {
                if let Ok(p) = p {
                    debug!("projected to ({:.4}, {:.4})", p.x, p.y);
                }
            })
            .collect()
    }
}

/// Arithmetic mean of 2D points. `None` when there are none.
pub fn mean_point(points: &[Vector2<f64>]) -> Option<Vector2<f64>> {
    if points.is_empty() {
        return None;
    }
    let sum = points.iter().fold(Vector2::zeros(), |acc, p| acc + p);
    Some(sum / points.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn sample() -> Vec<DVector<f64>> {
        vec![
            DVector::from_vec(vec![1.0, 0.1, 3.0, 0.0]),
            DVector::from_vec(vec![2.0, -0.2, 2.5, 1.0]),
            DVector::from_vec(vec![3.0, 0.3, 2.0, 0.0]),
            DVector::from_vec(vec![4.0, 0.0, 1.5, 1.0]),
            DVector::from_vec(vec![5.0, -0.1, 1.0, 0.5]),
        ]
    }

    #[test]
    fn test_line_is_first_axis() {
        // all points on the line t * (3, 4) in the first two dims, small noise in the third
        let rows: Vec<DVector<f64>> = (0..6)
            .map(|t| {
                let t = t as f64;
                let noise = if t as i64 % 2 == 0 { 0.01 } else { -0.01 };
                DVector::from_vec(vec![3.0 * t, 4.0 * t, noise])
            })
            .collect();
        let p = Projector::fit_rows(&rows).unwrap();
        let c0 = &p.components()[0];
        assert_relative_eq!(c0[0], 0.6, epsilon = 1e-4);
        assert_relative_eq!(c0[1], 0.8, epsilon = 1e-4);
        assert!(p.explained_variance_ratio().x > 0.999);
        assert!(p.explained_variance().x >= p.explained_variance().y);

        // distances along the line are preserved on the first axis
        let a = p.project(&rows[1]).unwrap();
        let b = p.project(&rows[3]).unwrap();
        assert_relative_eq!((b.x - a.x).abs(), 10.0, epsilon = 1e-4);
    }

    #[test]
    fn test_components_orthonormal() {
        let p = Projector::fit_rows(&sample()).unwrap();
        let [c0, c1] = p.components();
        assert_relative_eq!(c0.norm(), 1.0, epsilon = 1e-10);
        assert_relative_eq!(c1.norm(), 1.0, epsilon = 1e-10);
        assert_abs_diff_eq!(c0.dot(c1), 0.0, epsilon = 1e-10);
    }

    #[test]
    fn test_mean_projects_to_origin() {
        let rows = sample();
        let p = Projector::fit_rows(&rows).unwrap();
        let origin = p.project(p.mean()).unwrap();
        assert_abs_diff_eq!(origin, Vector2::zeros(), epsilon = 1e-12);

        let refs: Vec<&DVector<f64>> = rows.iter().collect();
        let projected = p.project_rows(&refs).unwrap();
        assert_abs_diff_eq!(mean_point(&projected).unwrap(), Vector2::zeros(), epsilon = 1e-10);
    }

    #[test]
    fn test_too_small() {
        let one = vec![DVector::from_vec(vec![1.0, 2.0])];
        assert_eq!(
            Projector::fit_rows(&one),
            Err(PcaError::TooSmall { rows: 1, cols: 2 })
        );
        let narrow = vec![DVector::from_vec(vec![1.0]), DVector::from_vec(vec![2.0])];
        assert_eq!(
            Projector::fit_rows(&narrow),
            Err(PcaError::TooSmall { rows: 2, cols: 1 })
        );
    }

    #[test]
    fn test_ragged() {
        let rows = vec![
            DVector::from_vec(vec![1.0, 2.0]),
            DVector::from_vec(vec![1.0, 2.0, 3.0]),
        ];
        assert_eq!(
            stack_rows(&rows),
            Err(PcaError::Ragged {
                row: 1,
                expected: 2,
                found: 3
            })
        );

        let p = Projector::fit_rows(&sample()).unwrap();
        let short = DVector::from_vec(vec![1.0]);
        let good = sample()[0].clone();
        assert_eq!(
            p.project_rows(&[&good, &short]),
            Err(PcaError::Ragged {
                row: 1,
                expected: 4,
                found: 1
            })
        );
    }

    #[test]
    fn test_largest_coefficient_positive() {
        let p = Projector::fit_rows(&sample()).unwrap();
        for c in p.components() {
            let pivot = c
                .iter()
                .copied()
                .reduce(|best, x| if x.abs() > best.abs() { x } else { best })
                .unwrap();
            assert!(pivot > 0.0);
        }
    }

    #[test]
    fn test_mean_point() {
        assert_eq!(mean_point(&[]), None);
        let m = mean_point(&[Vector2::new(1.0, 2.0), Vector2::new(3.0, -2.0)]).unwrap();
        assert_eq!(m, Vector2::new(2.0, 0.0));
    }

    prop_compose! {
        fn embeddings()(dim in 2usize..6, n in 3usize..12)
            (rows in prop::collection::vec(prop::collection::vec(-10f64..10f64, dim), n))
            -> Vec<DVector<f64>> {
            rows.into_iter().map(DVector::from_vec).collect()
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]
        #[test]
        fn test_refit_is_deterministic(rows in embeddings()) {
            let refs: Vec<&DVector<f64>> = rows.iter().collect();
            let a = Projector::fit_rows(&rows).unwrap().project_rows(&refs).unwrap();
            let b = Projector::fit_rows(&rows).unwrap().project_rows(&refs).unwrap();
            prop_assert_eq!(a, b);
        }

        #[test]
        fn test_ratios_bounded(rows in embeddings()) {
            let p = Projector::fit_rows(&rows).unwrap();
            let r = p.explained_variance_ratio();
            prop_assert!(r.x >= r.y - 1e-12);
            prop_assert!(r.x + r.y <= 1.0 + 1e-9);
        }
    }
}
