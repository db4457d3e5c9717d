//! Module to deal with units, using zero-cost compile-time checking to ensure dimensionality is
//! correct. All distances in this crate are in angstroms.

pub use uom::si::f64::*;
pub use uom::si::length::angstrom;

/// Distance between nearest B-site neighbors in the unrelaxed double-perovskite cell.
pub const NN_DISTANCE_ANGSTROM: f64 = 4.0;

/// Distance between next-nearest B-site neighbors: the face diagonal, √2 times
/// [`NN_DISTANCE_ANGSTROM`], truncated as the dataset was generated with it.
pub const NEXT_NN_DISTANCE_ANGSTROM: f64 = 5.6568;

/// Tolerance used when looking for any same-species nearest neighbor in the rock-salt test.
pub const ROCKSALT_TOLERANCE_ANGSTROM: f64 = 0.1;

/// Tolerance used when counting neighbors for the layered and columnar tests. Deliberately
/// tighter than [`ROCKSALT_TOLERANCE_ANGSTROM`]; the two must not be unified.
pub const SHELL_TOLERANCE_ANGSTROM: f64 = 0.01;

/// Convenience constructor for a length in angstroms.
pub fn angstroms(value: f64) -> Length {
    Length::new::<angstrom>(value)
}

/// A spherical shell around a site: every point whose distance from the center lies strictly
/// within `tolerance` of `radius`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Shell {
    radius: Length,
    tolerance: Length,
}

impl Shell {
    pub fn new(radius: Length, tolerance: Length) -> Self {
        Self { radius, tolerance }
    }

    /// The nearest-neighbor shell with the loose rock-salt tolerance.
    pub fn rocksalt_nearest() -> Self {
        Self::new(
            angstroms(NN_DISTANCE_ANGSTROM),
            angstroms(ROCKSALT_TOLERANCE_ANGSTROM),
        )
    }

    /// The nearest-neighbor shell with the tight counting tolerance.
    pub fn nearest() -> Self {
        Self::new(
            angstroms(NN_DISTANCE_ANGSTROM),
            angstroms(SHELL_TOLERANCE_ANGSTROM),
        )
    }

    /// The next-nearest-neighbor shell with the tight counting tolerance.
    pub fn next_nearest() -> Self {
        Self::new(
            angstroms(NEXT_NN_DISTANCE_ANGSTROM),
            angstroms(SHELL_TOLERANCE_ANGSTROM),
        )
    }

    pub fn radius(&self) -> Length {
        self.radius
    }

    pub fn tolerance(&self) -> Length {
        self.tolerance
    }

    /// Whether a distance falls inside the shell. The bounds are open.
    pub fn contains(&self, dist: Length) -> bool {
        (dist - self.radius).abs() < self.tolerance
    }
}
