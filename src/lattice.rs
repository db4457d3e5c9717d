//! The periodic lattice a structure's fractional coordinates are expressed in. The interchange
//! format lists lattice vectors as rows; internally they are kept as the columns of a matrix, so
//! that converting fractional to Cartesian coordinates is a single matrix-vector product.

use crate::units::{angstroms, Length};
use nalgebra::{Matrix3, Point3, Vector3};
use thiserror::Error;

/// Lattice parameters below this volume (in cubic angstroms) are treated as degenerate.
const MIN_VOLUME: f64 = 1e-8;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LatticeError {
    #[error("Angles cannot be satisfied: {0}, {1}, {2}")]
    InvalidAngles(f64, f64, f64),
    #[error("Lattice vectors are linearly dependent (volume {0} Å³)")]
    Singular(f64),
}

/// A particular basis of a 3D lattice, in angstroms.
#[derive(Debug, Clone, PartialEq)]
pub struct Lattice {
    m: Matrix3<f64>,
}

impl Lattice {
    /// A new lattice from a matrix whose columns are the basis vectors. Fails if the vectors
    /// don't span space.
    pub fn new(m: Matrix3<f64>) -> Result<Self, LatticeError> {
        let volume = m.determinant().abs();
        if volume < MIN_VOLUME {
            return Err(LatticeError::Singular(volume));
        }
        Ok(Self { m })
    }

    /// A new lattice from the row-vector layout used by the structure interchange format.
    pub fn from_rows(rows: [[f64; 3]; 3]) -> Result<Self, LatticeError> {
        let cols = rows.map(Vector3::from);
        Self::new(Matrix3::from_columns(&cols))
    }

    /// Initializes from a, b, c, α, β, γ, choosing the rotation in which `a` lies along x and `b`
    /// in the xy-plane. [AFlow](https://aflow.org/prototype-encyclopedia/triclinic_lattice.html)
    /// gives the formulae.
    ///
    /// This is fallible: [not all combinations give valid unit
    /// cells.](https://journals.iucr.org/a/issues/2011/01/00/au5114/au5114.pdf).
    ///
    /// Assumes inputs are in angstroms and degrees.
    pub fn try_from_parameters(
        a: f64,
        b: f64,
        c: f64,
        alpha: f64,
        beta: f64,
        gamma: f64,
    ) -> Result<Self, LatticeError> {
        let (alpha, beta, gamma) = (alpha % 360., beta % 360., gamma % 360.);
        for expr in &[
            alpha + beta + gamma,
            alpha + beta - gamma,
            alpha - beta + gamma,
            -alpha + beta + gamma,
        ] {
            if !(0f64..360f64).contains(expr) {
                return Err(LatticeError::InvalidAngles(alpha, beta, gamma));
            }
        }
        let (cos_a, cos_b) = (alpha.to_radians().cos(), beta.to_radians().cos());
        let (sin_y, cos_y) = gamma.to_radians().sin_cos();

        let a_vec = Vector3::x().scale(a);
        let b_vec = Vector3::new(cos_y, sin_y, 0.).scale(b);
        let cy = (cos_a - cos_b * cos_y) / sin_y;
        let c_vec = Vector3::new(cos_b, cy, (1. - cos_b * cos_b - cy * cy).sqrt()).scale(c);

        Self::new(Matrix3::from_columns(&[a_vec, b_vec, c_vec]))
    }

    /// The basis vectors as matrix columns.
    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.m
    }

    /// Gets the lengths of the three basis vectors.
    pub fn abc(&self) -> (Length, Length, Length) {
        (
            angstroms(self.m.column(0).norm()),
            angstroms(self.m.column(1).norm()),
            angstroms(self.m.column(2).norm()),
        )
    }

    /// Gets the angles (α, β, γ) in degrees.
    pub fn angles(&self) -> (f64, f64, f64) {
        let (a, b, c) = (self.m.column(0), self.m.column(1), self.m.column(2));
        (
            b.angle(&c).to_degrees(),
            c.angle(&a).to_degrees(),
            a.angle(&b).to_degrees(),
        )
    }

    /// Volume of the unit cell, in cubic angstroms.
    pub fn volume(&self) -> f64 {
        self.m.determinant().abs()
    }

    /// Maps fractional coordinates to Cartesian coordinates.
    pub fn to_cartesian(&self, frac: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.m * frac.coords)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::angstrom;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn test_single_param_roundtrip(a: f64, b: f64, c: f64, alpha: f64, beta: f64, gamma: f64) {
        let lat = Lattice::try_from_parameters(a, b, c, alpha, beta, gamma)
            .unwrap_or_else(|e| panic!("{}", e));
        let (a1, b1, c1) = lat.abc();
        let (alpha1, beta1, gamma1) = lat.angles();
        assert_relative_eq!(a1.get::<angstrom>(), a, max_relative = 1e-6);
        assert_relative_eq!(b1.get::<angstrom>(), b, max_relative = 1e-6);
        assert_relative_eq!(c1.get::<angstrom>(), c, max_relative = 1e-6);
        assert_relative_eq!(alpha1, alpha, max_relative = 1e-6);
        assert_relative_eq!(beta1, beta, max_relative = 1e-6);
        assert_relative_eq!(gamma1, gamma, max_relative = 1e-6);
    }

    #[test]
    fn test_cubic_roundtrip() {
        test_single_param_roundtrip(8.0, 8.0, 8.0, 90., 90., 90.);
    }

    #[test]
    fn test_rows_to_cartesian() {
        let lat = Lattice::from_rows([[8., 0., 0.], [0., 8., 0.], [0., 0., 16.]]).unwrap();
        let p = lat.to_cartesian(&Point3::new(0.5, 0.25, 0.5));
        assert_relative_eq!(p, Point3::new(4.0, 2.0, 8.0));
        assert_relative_eq!(lat.volume(), 1024.0);
    }

    #[test]
    fn test_rows_are_basis_vectors() {
        // a skewed cell: the second row is the b vector
        let lat = Lattice::from_rows([[4., 0., 0.], [2., 4., 0.], [0., 0., 4.]]).unwrap();
        let p = lat.to_cartesian(&Point3::new(0., 1., 0.));
        assert_relative_eq!(p, Point3::new(2.0, 4.0, 0.0));
    }

    #[test]
    fn test_singular_rejected() {
        let res = Lattice::from_rows([[1., 0., 0.], [2., 0., 0.], [0., 0., 1.]]);
        assert!(matches!(res, Err(LatticeError::Singular(_))));
    }

    #[test]
    fn test_invalid_angles() {
        let res = Lattice::try_from_parameters(1., 1., 1., 170., 170., 170.);
        assert!(matches!(res, Err(LatticeError::InvalidAngles(..))));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]
        #[test]
        fn test_orthorhombic_roundtrip(
            a in 0.5f64..=20f64,
            b in 0.5f64..=20f64,
            c in 0.5f64..=20f64,
            gamma in 60f64..=120f64,
        ) {
            test_single_param_roundtrip(a, b, c, 90., 90., gamma)
        }
    }
}
