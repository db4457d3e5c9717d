//! The embedding table: one row per crystal, read once from an embedding artifact and held in
//! memory for an analysis run.
//!
//! The artifact is a pandas-style JSON table in either `columns` orientation
//! (`{"formula": {"0": ..., "1": ...}, ...}`) or `records` orientation
//! (`[{"formula": ..., ...}, ...]`). Row order is the order the rows appear in the file.
//!
//! Columns used:
//!
//! | column             | required          | content                                     |
//! |--------------------|-------------------|---------------------------------------------|
//! | `formula`          | always            | chemical formula string                     |
//! | `embedding_0`      | always            | embedding; if nested, the first element     |
//! | `crystal_id`       | no                | integer id                                  |
//! | `unrelaxed_struct` | to classify       | structure dictionary (or a JSON string of it) |
//! | `composition`      | to classify       | `composition.sites.B` lists the B species   |

use std::{collections::BTreeMap, fs::File, io::BufReader, io::Read, path::Path};

use log::{debug, info};
use nalgebra::{DMatrix, DVector};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{
    motif::{classify, MotifClassification, Sublattice},
    parsing::Formula,
    pca::{stack_rows, PcaError},
    structure::{Structure, StructureError},
};

pub const FORMULA: &str = "formula";
pub const EMBEDDING: &str = "embedding_0";
pub const CRYSTAL_ID: &str = "crystal_id";
pub const STRUCTURE: &str = "unrelaxed_struct";
pub const COMPOSITION: &str = "composition";
/// Path of the B-site species inside the `composition` column.
pub const B_SITES: &str = "composition.sites.B";

#[derive(Debug, Error)]
pub enum TableError {
    #[error("Missing or malformed `{field}` ({location}): {reason}")]
    SchemaMismatch {
        field: String,
        location: String,
        reason: String,
    },
    #[error("Table has no rows")]
    Empty,
    #[error("Expected {expected} values, one per row, got {found}")]
    LengthMismatch { expected: usize, found: usize },
    #[error("Bad structure in row {row}: {source}")]
    Structure {
        row: String,
        #[source]
        source: StructureError,
    },
    #[error(transparent)]
    Pca(#[from] PcaError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn mismatch(field: &str, location: impl Into<String>, reason: impl Into<String>) -> TableError {
    TableError::SchemaMismatch {
        field: field.to_owned(),
        location: location.into(),
        reason: reason.into(),
    }
}

/// One crystal: its formula, embedding and, when available, what is needed to classify it.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRow {
    /// The row's key in the source table.
    pub index: String,
    pub crystal_id: Option<i64>,
    pub formula: Formula,
    pub embedding: DVector<f64>,
    pub structure: Option<Structure>,
    pub sublattice: Option<Sublattice>,
    /// Derived motif columns, filled in by [`EmbeddingTable::annotate_motifs`].
    pub classification: Option<MotifClassification>,
}

impl EmbeddingRow {
    pub fn new(index: impl Into<String>, formula: Formula, embedding: DVector<f64>) -> Self {
        Self {
            index: index.into(),
            crystal_id: None,
            formula,
            embedding,
            structure: None,
            sublattice: None,
            classification: None,
        }
    }

    pub fn with_structure(mut self, structure: Structure, sublattice: Sublattice) -> Self {
        self.structure = Some(structure);
        self.sublattice = Some(sublattice);
        self
    }

    /// The row's motif classification: the stored one, or computed from its structure.
    pub fn classification(&self) -> Result<MotifClassification, TableError> {
        if let Some(c) = self.classification {
            return Ok(c);
        }
        let location = format!("row {}", self.index);
        let structure = self
            .structure
            .as_ref()
            .ok_or_else(|| mismatch(STRUCTURE, location.as_str(), "needed to classify"))?;
        let sublattice = self
            .sublattice
            .as_ref()
            .ok_or_else(|| mismatch(B_SITES, location.as_str(), "needed to classify"))?;
        Ok(classify(structure, sublattice))
    }
}

/// Reads the embedding vector out of an `embedding_0` cell.
fn parse_embedding(cell: &Value, location: &str) -> Result<DVector<f64>, TableError> {
    let outer = cell
        .as_array()
        .ok_or_else(|| mismatch(EMBEDDING, location, "not a list"))?;
    let inner = match outer.first() {
        Some(Value::Array(first)) => first,
        Some(_) => outer,
        None => return Err(mismatch(EMBEDDING, location, "empty list")),
    };
    let values: Option<Vec<f64>> = inner.iter().map(Value::as_f64).collect();
    let values = values.ok_or_else(|| mismatch(EMBEDDING, location, "non-numeric entry"))?;
    if values.is_empty() {
        return Err(mismatch(EMBEDDING, location, "empty embedding"));
    }
    Ok(DVector::from_vec(values))
}

/// Reads the B-site species out of a `composition` cell.
fn parse_sublattice(cell: &Value, location: &str) -> Result<Sublattice, TableError> {
    let b = cell
        .get("sites")
        .and_then(|sites| sites.get("B"))
        .ok_or_else(|| mismatch(B_SITES, location, "no sites.B entry"))?;
    match b {
        Value::Array(list) => {
            let names: Option<Vec<&str>> = list.iter().map(Value::as_str).collect();
            names
                .map(Sublattice::new)
                .ok_or_else(|| mismatch(B_SITES, location, "non-string species"))
        }
        Value::Object(map) => Ok(Sublattice::new(map.keys().cloned())),
        Value::String(one) => Ok(Sublattice::new([one.as_str()])),
        _ => Err(mismatch(B_SITES, location, "not a species list")),
    }
}

fn parse_structure(cell: &Value, index: &str) -> Result<Structure, TableError> {
    let wrap = |source: StructureError| TableError::Structure {
        row: index.to_owned(),
        source,
    };
    match cell {
        Value::String(text) => {
            let inner: Value = serde_json::from_str(text)
                .map_err(|e| wrap(StructureError::Malformed(e.to_string())))?;
            Structure::from_dict(&inner).map_err(wrap)
        }
        other => Structure::from_dict(other).map_err(wrap),
    }
}

fn parse_row(index: String, record: &Map<String, Value>) -> Result<EmbeddingRow, TableError> {
    let location = format!("row {}", index);
    let present = |key: &str| record.get(key).filter(|v| !v.is_null());

    let formula = present(FORMULA)
        .ok_or_else(|| mismatch(FORMULA, location.as_str(), "missing"))?
        .as_str()
        .ok_or_else(|| mismatch(FORMULA, location.as_str(), "not a string"))?
        .parse::<Formula>()
        .map_err(|e| mismatch(FORMULA, location.as_str(), e.to_string()))?;

    let embedding = parse_embedding(
        present(EMBEDDING).ok_or_else(|| mismatch(EMBEDDING, location.as_str(), "missing"))?,
        &location,
    )?;

    let crystal_id = match present(CRYSTAL_ID) {
        Some(v) => Some(
            v.as_i64()
                .ok_or_else(|| mismatch(CRYSTAL_ID, location.as_str(), "not an integer"))?,
        ),
        None => None,
    };

    let structure = present(STRUCTURE)
        .map(|cell| parse_structure(cell, &index))
        .transpose()?;
    let sublattice = present(COMPOSITION)
        .map(|cell| parse_sublattice(cell, &location))
        .transpose()?;

    Ok(EmbeddingRow {
        index,
        crystal_id,
        formula,
        embedding,
        structure,
        sublattice,
        classification: None,
    })
}

/// Turns either table orientation into `(index, record)` pairs in file order. In `columns`
/// orientation the `required` columns must exist and the first of them fixes the row order.
pub(crate) fn records(
    value: Value,
    required: &[&str],
) -> Result<Vec<(String, Map<String, Value>)>, TableError> {
    match value {
        Value::Array(rows) => rows
            .into_iter()
            .enumerate()
            .map(|(i, row)| match row {
                Value::Object(map) => Ok((i.to_string(), map)),
                _ => Err(mismatch("record", format!("row {}", i), "not an object")),
            })
            .collect(),
        Value::Object(columns) => {
            for &name in required {
                if !columns.contains_key(name) {
                    return Err(mismatch(name, "table", "column missing"));
                }
            }
            let mut by_column: Vec<(String, Map<String, Value>)> = Vec::new();
            for (name, column) in columns {
                match column {
                    Value::Object(cells) => by_column.push((name, cells)),
                    _ => return Err(mismatch(&name, "table", "column is not an index map")),
                }
            }
            let key = required.first().copied().unwrap_or_default();
            let order: Vec<String> = by_column
                .iter()
                .find(|(name, _)| name == key)
                .map(|(_, cells)| cells.keys().cloned().collect())
                .unwrap_or_default();
            Ok(order
                .into_iter()
                .map(|idx| {
                    let record: Map<String, Value> = by_column
                        .iter()
                        .map(|(name, cells)| {
                            (name.clone(), cells.get(&idx).cloned().unwrap_or(Value::Null))
                        })
                        .collect();
                    (idx, record)
                })
                .collect())
        }
        _ => Err(mismatch("table", "top level", "neither a column map nor a record list")),
    }
}

/// All rows of one analysis run, in file order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EmbeddingTable {
    rows: Vec<EmbeddingRow>,
}

impl EmbeddingTable {
    pub fn from_rows(rows: Vec<EmbeddingRow>) -> Self {
        Self { rows }
    }

    /// Parses a table from JSON in either orientation.
    pub fn from_json(value: Value) -> Result<Self, TableError> {
        let rows = records(value, &[FORMULA, EMBEDDING])?
            .into_iter()
            .map(|(index, record)| parse_row(index, &record))
            .collect::<Result<Vec<_>, _>>()?;
        if rows.is_empty() {
            return Err(TableError::Empty);
        }
        Ok(Self { rows })
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, TableError> {
        Self::from_json(serde_json::from_reader(reader)?)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, TableError> {
        let path = path.as_ref();
        let table = Self::from_reader(BufReader::new(File::open(path)?))?;
        info!(
            "loaded {} rows ({} formulas) from {}",
            table.len(),
            table.formula_groups().len(),
            path.display()
        );
        Ok(table)
    }

    pub fn rows(&self) -> &[EmbeddingRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Row indices grouped by formula string. Within a group, indices are in file order.
    pub fn formula_groups(&self) -> BTreeMap<&str, Vec<usize>> {
        let mut groups: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (i, row) in self.rows.iter().enumerate() {
            groups.entry(row.formula.as_str()).or_default().push(i);
        }
        groups
    }

    /// Embeddings of the given rows.
    pub fn embeddings_of(&self, indices: &[usize]) -> Vec<&DVector<f64>> {
        indices.iter().map(|&i| &self.rows[i].embedding).collect()
    }

    /// All embeddings stacked as matrix rows.
    pub fn embedding_matrix(&self) -> Result<DMatrix<f64>, TableError> {
        let rows: Vec<DVector<f64>> = self.rows.iter().map(|r| r.embedding.clone()).collect();
        Ok(stack_rows(&rows)?)
    }

    /// Classifies every row and stores the result as its derived motif columns.
    pub fn annotate_motifs(&mut self) -> Result<(), TableError> {
        let mut vacuous = 0;
        for row in self.rows.iter_mut() {
            let c = row.classification()?;
            if c.is_vacuous() {
                vacuous += 1;
            }
            row.classification = Some(c);
        }
        debug!(
            "annotated {} rows with motif columns, {} with an empty sublattice",
            self.rows.len(),
            vacuous
        );
        Ok(())
    }

    /// Each value minus the lowest value among rows with the same formula, so the most stable
    /// polymorph of each composition sits at zero.
    pub fn relative_to_ground_state(&self, values: &[f64]) -> Result<Vec<f64>, TableError> {
        if values.len() != self.rows.len() {
            return Err(TableError::LengthMismatch {
                expected: self.rows.len(),
                found: values.len(),
            });
        }
        let mut ground: BTreeMap<&str, f64> = BTreeMap::new();
        for (row, &v) in self.rows.iter().zip(values) {
            ground
                .entry(row.formula.as_str())
                .and_modify(|g| *g = g.min(v))
                .or_insert(v);
        }
        Ok(self
            .rows
            .iter()
            .zip(values)
            .map(|(row, &v)| v - ground[row.formula.as_str()])
            .collect())
    }
}
