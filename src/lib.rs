//! Structural-motif analysis of learned crystal embeddings for double perovskites.
//!
//! The pieces, leaves first:
//!
//! - [`motif`]: classifies the B-site ordering of a [`structure::Structure`] as rock-salt,
//!   layered or columnar by counting same-species neighbors in two distance shells.
//! - [`pca`]: a two-component principal-component [`pca::Projector`] fit on the embeddings.
//! - [`aggregate`]: per-formula offsets of motif rows from the formula's mean projection, and
//!   their mean, the motif's direction in embedding space.
//! - [`predictions`]: error statistics of saved model predictions across training fractions.

pub mod aggregate;
pub mod config;
pub mod lattice;
pub mod motif;
pub mod parsing;
pub mod pca;
pub mod predictions;
pub mod report;
pub mod structure;
pub mod table;
pub mod units;

pub use aggregate::{motif_direction, motif_vector, EmbeddingMap, MatchPolicy, MotifError};
pub use motif::{classify, Motif, MotifClassification, Sublattice};
pub use pca::Projector;
pub use structure::Structure;
pub use table::{EmbeddingTable, TableError};
