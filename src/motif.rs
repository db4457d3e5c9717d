//! Classification of B-site ordering in double perovskites by counting same-species neighbors
//! in two distance shells.
//!
//! Every site whose species is in the [`Sublattice`] is examined, and a motif holds only if no
//! examined site disqualifies it:
//!
//! - rock-salt: no same-species neighbor within [`Shell::rocksalt_nearest`].
//! - layered: exactly 2 same-species nearest neighbors and 1 next-nearest neighbor.
//! - columnar: exactly 1 same-species nearest neighbor and 1 next-nearest neighbor.
//!
//! A structure with no sublattice sites therefore satisfies all three motifs. This is
//! intentional and is reported by [`MotifClassification::is_vacuous`]; callers that want it to be
//! an error use [`classify_strict`].

use std::{collections::BTreeSet, fmt::Display, str::FromStr};

use log::warn;
use phf::phf_map;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{structure::Structure, units::Shell};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClassifyError {
    #[error("No site belongs to the sublattice {0}")]
    EmptySublattice(Sublattice),
    #[error("Unknown motif: {0:?}")]
    UnknownMotif(String),
}

/// A B-site ordering pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Motif {
    /// Alternating arrangement with no same-species nearest neighbor.
    RockSalt,
    /// Same-species planes: 2 nearest and 1 next-nearest same-species neighbors.
    Layered,
    /// Same-species columns: 1 nearest and 1 next-nearest same-species neighbors.
    Columnar,
}

/// Accepted spellings of each motif, as used in configuration and on the command line.
static MOTIF_NAMES: phf::Map<&'static str, Motif> = phf_map! {
    "rocksalt" => Motif::RockSalt,
    "rock-salt" => Motif::RockSalt,
    "rock_salt" => Motif::RockSalt,
    "rs" => Motif::RockSalt,
    "layered" => Motif::Layered,
    "layer" => Motif::Layered,
    "columnar" => Motif::Columnar,
    "column" => Motif::Columnar,
    "col" => Motif::Columnar,
};

impl Motif {
    pub const ALL: [Motif; 3] = [Motif::RockSalt, Motif::Layered, Motif::Columnar];

    /// Name of the derived boolean column this motif adds to an embedding table.
    pub fn column_name(&self) -> &'static str {
        match self {
            Motif::RockSalt => "is_rocksalt",
            Motif::Layered => "is_layered",
            Motif::Columnar => "is_column",
        }
    }
}

impl FromStr for Motif {
    type Err = ClassifyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MOTIF_NAMES
            .get(s.trim().to_ascii_lowercase().as_str())
            .copied()
            .ok_or_else(|| ClassifyError::UnknownMotif(s.to_owned()))
    }
}

impl Display for Motif {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Motif::RockSalt => "rock-salt",
            Motif::Layered => "layered",
            Motif::Columnar => "columnar",
        };
        write!(f, "{}", name)
    }
}

/// The species occupying the B site. Only sites of these species are examined.
#[derive(Debug, Clone, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
pub struct Sublattice(BTreeSet<String>);

impl Sublattice {
    pub fn new<S: Into<String>, I: IntoIterator<Item = S>>(species: I) -> Self {
        Self(species.into_iter().map(Into::into).collect())
    }

    pub fn contains(&self, species: &str) -> bool {
        self.0.contains(species)
    }

    pub fn species(&self) -> impl Iterator<Item = &str> + '_ {
        self.0.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Indices of the structure's sites that belong to this sublattice.
    pub fn sites<'a>(&'a self, structure: &'a Structure) -> impl Iterator<Item = usize> + 'a {
        structure
            .species()
            .enumerate()
            .filter(move |(_, sp)| self.contains(sp))
            .map(|(i, _)| i)
    }
}

impl Display for Sublattice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.species().collect();
        write!(f, "{{{}}}", names.join(", "))
    }
}

/// Same-species neighbor counts of one site in the two tight shells.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShellCounts {
    pub nearest: usize,
    pub next_nearest: usize,
}

/// Counts the same-species neighbors of site `i` in [`Shell::nearest`] and
/// [`Shell::next_nearest`].
pub fn shell_counts(structure: &Structure, i: usize) -> ShellCounts {
    let (nn, next_nn) = (Shell::nearest(), Shell::next_nearest());
    let species = structure.sites()[i].species();

    let mut counts = ShellCounts::default();
    for (j, site) in structure.sites().iter().enumerate() {
        if j == i || site.species() != species {
            continue;
        }
        let dist = structure.distance(i, j);
        if nn.contains(dist) {
            counts.nearest += 1;
        } else if next_nn.contains(dist) {
            counts.next_nearest += 1;
        }
    }
    counts
}

/// Whether site `i` has any same-species neighbor in the loose rock-salt shell.
pub fn has_rocksalt_neighbor(structure: &Structure, i: usize) -> bool {
    let shell = Shell::rocksalt_nearest();
    let species = structure.sites()[i].species();
    structure
        .sites()
        .iter()
        .enumerate()
        .any(|(j, site)| j != i && site.species() == species && shell.contains(structure.distance(i, j)))
}

/// Rock-salt ordering: no sublattice site has a same-species nearest neighbor.
pub fn is_rocksalt(structure: &Structure, sublattice: &Sublattice) -> bool {
    !sublattice
        .sites(structure)
        .any(|i| has_rocksalt_neighbor(structure, i))
}

fn all_sites_have(structure: &Structure, sublattice: &Sublattice, wanted: ShellCounts) -> bool {
    sublattice
        .sites(structure)
        .all(|i| shell_counts(structure, i) == wanted)
}

/// Layered ordering: every sublattice site has 2 nearest and 1 next-nearest same-species
/// neighbors.
pub fn is_layered(structure: &Structure, sublattice: &Sublattice) -> bool {
    all_sites_have(
        structure,
        sublattice,
        ShellCounts {
            nearest: 2,
            next_nearest: 1,
        },
    )
}

/// Columnar ordering: every sublattice site has 1 nearest and 1 next-nearest same-species
/// neighbors.
pub fn is_columnar(structure: &Structure, sublattice: &Sublattice) -> bool {
    all_sites_have(
        structure,
        sublattice,
        ShellCounts {
            nearest: 1,
            next_nearest: 1,
        },
    )
}

/// The result of running all three tests on one structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotifClassification {
    pub is_rocksalt: bool,
    pub is_layered: bool,
    pub is_column: bool,
    /// How many sites the tests examined.
    pub sublattice_sites: usize,
}

impl MotifClassification {
    /// Whether the structure satisfies the given motif.
    pub fn holds(&self, motif: Motif) -> bool {
        match motif {
            Motif::RockSalt => self.is_rocksalt,
            Motif::Layered => self.is_layered,
            Motif::Columnar => self.is_column,
        }
    }

    /// True when no site was examined, so every motif holds trivially.
    pub fn is_vacuous(&self) -> bool {
        self.sublattice_sites == 0
    }
}

/// Classifies a structure. A structure with no sublattice sites comes back with every motif
/// true; see [`MotifClassification::is_vacuous`].
pub fn classify(structure: &Structure, sublattice: &Sublattice) -> MotifClassification {
    let sublattice_sites = sublattice.sites(structure).count();
    if sublattice_sites == 0 {
        warn!(
            "no site of {} in a {}-site structure, all motifs hold vacuously",
            sublattice,
            structure.len()
        );
    }
    MotifClassification {
        is_rocksalt: is_rocksalt(structure, sublattice),
        is_layered: is_layered(structure, sublattice),
        is_column: is_columnar(structure, sublattice),
        sublattice_sites,
    }
}

/// Like [`classify`], but an empty sublattice is an error.
pub fn classify_strict(
    structure: &Structure,
    sublattice: &Sublattice,
) -> Result<MotifClassification, ClassifyError> {
    let out = classify(structure, sublattice);
    if out.is_vacuous() {
        Err(ClassifyError::EmptySublattice(sublattice.clone()))
    } else {
        Ok(out)
    }
}
