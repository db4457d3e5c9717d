//! Crystal structures as consumed by the classifier: an ordered list of sites, each with a
//! species label and Cartesian coordinates in angstroms.
//!
//! Structures arrive as the dictionary form of the usual materials-structure interchange schema
//! (`lattice.matrix`, `sites[].species`, `sites[].abc`, `sites[].xyz`). A flat
//! `{"species": [...], "coords": [...]}` form is also accepted.

use std::fmt::Display;

use nalgebra::Point3;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::{
    lattice::{Lattice, LatticeError},
    units::{angstroms, Length},
};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StructureError {
    #[error("Malformed structure: {0}")]
    Malformed(String),
    #[error("Site {0} has no species")]
    NoSpecies(usize),
    #[error("Site {0} is disordered (more than one species)")]
    Disordered(usize),
    #[error("Site {0} has neither Cartesian coordinates nor fractional coordinates with a lattice")]
    MissingCoords(usize),
    #[error("Species and coordinate lists differ in length: {0} vs {1}")]
    LengthMismatch(usize, usize),
    #[error(transparent)]
    Lattice(#[from] LatticeError),
}

/// A single occupied position.
#[derive(Debug, Clone, PartialEq)]
pub struct Site {
    species: String,
    coords: Point3<f64>,
}

impl Site {
    pub fn new(species: impl Into<String>, coords: Point3<f64>) -> Self {
        Self {
            species: species.into(),
            coords,
        }
    }

    /// The species label, e.g. `Fe` or `Fe3+`.
    pub fn species(&self) -> &str {
        &self.species
    }

    /// Cartesian coordinates, in angstroms.
    pub fn coords(&self) -> &Point3<f64> {
        &self.coords
    }
}

/// An ordered set of sites, optionally with the lattice they were expressed in.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Structure {
    lattice: Option<Lattice>,
    sites: Vec<Site>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawStructure {
    Interchange {
        lattice: Option<RawLattice>,
        sites: Vec<RawSite>,
    },
    Flat {
        species: Vec<String>,
        coords: Vec<[f64; 3]>,
    },
}

#[derive(Debug, Deserialize)]
struct RawLattice {
    matrix: Option<[[f64; 3]; 3]>,
    a: Option<f64>,
    b: Option<f64>,
    c: Option<f64>,
    alpha: Option<f64>,
    beta: Option<f64>,
    gamma: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawSite {
    species: Vec<RawSpecies>,
    abc: Option<[f64; 3]>,
    xyz: Option<[f64; 3]>,
}

#[derive(Debug, Deserialize)]
struct RawSpecies {
    element: String,
    oxidation_state: Option<f64>,
}

impl RawLattice {
    fn build(self) -> Result<Option<Lattice>, LatticeError> {
        if let Some(rows) = self.matrix {
            return Lattice::from_rows(rows).map(Some);
        }
        match (self.a, self.b, self.c, self.alpha, self.beta, self.gamma) {
            (Some(a), Some(b), Some(c), Some(alpha), Some(beta), Some(gamma)) => {
                Lattice::try_from_parameters(a, b, c, alpha, beta, gamma).map(Some)
            }
            _ => Ok(None),
        }
    }
}

/// Decimal places kept when printing a fractional oxidation state.
const OXIDATION_DECIMALS: i32 = 8;

/// Prints a charge magnitude the way formula coefficients are printed: a magnitude of one is
/// left implicit, whole numbers drop the decimal point, anything else is rounded.
fn fmt_magnitude(mag: f64) -> String {
    if (mag - 1.0).abs() < 1e-8 {
        String::new()
    } else if (mag - mag.round()).abs() < 1e-8 {
        format!("{}", mag.round() as i64)
    } else {
        let scale = 10f64.powi(OXIDATION_DECIMALS);
        format!("{}", (mag * scale).round() / scale)
    }
}

impl Display for RawSpecies {
    /// Element symbol, then the oxidation state as magnitude and sign if there is one: `Fe3+`,
    /// `Na+`, `O2-`.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.element)?;
        if let Some(oxi) = self.oxidation_state {
            let sign = if oxi >= 0.0 { '+' } else { '-' };
            write!(f, "{}{}", fmt_magnitude(oxi.abs()), sign)?;
        }
        Ok(())
    }
}

impl Structure {
    pub fn new(sites: Vec<Site>) -> Self {
        Self {
            lattice: None,
            sites,
        }
    }

    pub fn with_lattice(mut self, lattice: Lattice) -> Self {
        self.lattice = Some(lattice);
        self
    }

    /// Reads the dictionary form of a structure. When a site has fractional coordinates and the
    /// structure has a lattice, the Cartesian coordinates are recomputed from them; the stored
    /// `xyz` is only used otherwise.
    pub fn from_dict(value: &Value) -> Result<Self, StructureError> {
        let raw = RawStructure::deserialize(value)
            .map_err(|e| StructureError::Malformed(e.to_string()))?;

        match raw {
            RawStructure::Flat { species, coords } => {
                if species.len() != coords.len() {
                    return Err(StructureError::LengthMismatch(species.len(), coords.len()));
                }
                let sites = species
                    .into_iter()
                    .zip(coords)
                    .map(|(sp, xyz)| Site::new(sp, Point3::from(xyz)))
                    .collect();
                Ok(Self::new(sites))
            }
            RawStructure::Interchange { lattice, sites } => {
                let lattice = match lattice {
                    Some(raw) => raw.build()?,
                    None => None,
                };

                let mut out = Vec::with_capacity(sites.len());
                for (i, site) in sites.into_iter().enumerate() {
                    let species = match site.species.as_slice() {
                        [] => return Err(StructureError::NoSpecies(i)),
                        [sp] => sp.to_string(),
                        _ => return Err(StructureError::Disordered(i)),
                    };
                    let coords = match (&lattice, site.abc, site.xyz) {
                        (Some(lat), Some(abc), _) => lat.to_cartesian(&Point3::from(abc)),
                        (_, _, Some(xyz)) => Point3::from(xyz),
                        _ => return Err(StructureError::MissingCoords(i)),
                    };
                    out.push(Site::new(species, coords));
                }

                Ok(Self {
                    lattice,
                    sites: out,
                })
            }
        }
    }

    pub fn lattice(&self) -> Option<&Lattice> {
        self.lattice.as_ref()
    }

    pub fn sites(&self) -> &[Site] {
        &self.sites
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    /// Species labels in site order.
    pub fn species(&self) -> impl Iterator<Item = &str> + '_ {
        self.sites.iter().map(Site::species)
    }

    /// Straight-line distance between two sites. Periodic images are not considered.
    pub fn distance(&self, i: usize, j: usize) -> Length {
        angstroms(nalgebra::distance(
            self.sites[i].coords(),
            self.sites[j].coords(),
        ))
    }
}
