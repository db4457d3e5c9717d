//! Plain-text tables for the command-line tool.

use tabled::{settings::Style, Table, Tabled};

use crate::{
    aggregate::EmbeddingMap,
    predictions::CurvePoint,
    table::{EmbeddingTable, TableError},
};

#[derive(Tabled)]
struct ClassificationRow {
    #[tabled(rename = "index")]
    index: String,
    #[tabled(rename = "crystal id")]
    crystal_id: String,
    formula: String,
    #[tabled(rename = "B sites")]
    sites: usize,
    #[tabled(rename = "rock-salt")]
    rocksalt: bool,
    layered: bool,
    columnar: bool,
}

/// One line per row with its three motif flags. Rows not yet annotated are classified here.
pub fn classification_table(table: &EmbeddingTable) -> Result<String, TableError> {
    let rows = table
        .rows()
        .iter()
        .map(|row| {
            let c = row.classification()?;
            Ok(ClassificationRow {
                index: row.index.clone(),
                crystal_id: row.crystal_id.map_or_else(|| "-".to_owned(), |id| id.to_string()),
                formula: row.formula.to_string(),
                sites: c.sublattice_sites,
                rocksalt: c.is_rocksalt,
                layered: c.is_layered,
                columnar: c.is_column,
            })
        })
        .collect::<Result<Vec<_>, TableError>>()?;
    Ok(Table::new(rows).with(Style::modern()).to_string())
}

#[derive(Tabled)]
struct DirectionRow {
    motif: String,
    #[tabled(rename = "PC1")]
    x: String,
    #[tabled(rename = "PC2")]
    y: String,
    length: String,
}

#[derive(Tabled)]
struct SummaryRow {
    quantity: &'static str,
    value: String,
}

/// Summary of an embedding map followed by its motif directions.
pub fn map_tables(map: &EmbeddingMap) -> String {
    let summary = vec![
        SummaryRow {
            quantity: "rows",
            value: map.rows.to_string(),
        },
        SummaryRow {
            quantity: "formulas",
            value: map.formulas.to_string(),
        },
        SummaryRow {
            quantity: "explained variance (PC1)",
            value: format!("{:.4}", map.explained_variance_ratio[0]),
        },
        SummaryRow {
            quantity: "explained variance (PC2)",
            value: format!("{:.4}", map.explained_variance_ratio[1]),
        },
        SummaryRow {
            quantity: "mean relative spread",
            value: format!("{:.4}", map.mean_relative_spread),
        },
    ];
    let directions: Vec<DirectionRow> = map
        .directions
        .iter()
        .map(|d| DirectionRow {
            motif: d.motif.to_string(),
            x: format!("{:+.4}", d.vector[0]),
            y: format!("{:+.4}", d.vector[1]),
            length: format!("{:.4}", d.vector[0].hypot(d.vector[1])),
        })
        .collect();

    format!(
        "{}\n{}",
        Table::new(summary).with(Style::modern()),
        Table::new(directions).with(Style::modern())
    )
}

#[derive(Tabled)]
struct CurveRow {
    #[tabled(rename = "training fraction")]
    fraction: f64,
    run: String,
    #[tabled(rename = "MAE")]
    mean: String,
    #[tabled(rename = "std")]
    std: String,
    models: usize,
}

pub fn curve_table(points: &[CurvePoint]) -> String {
    let rows: Vec<CurveRow> = points
        .iter()
        .map(|p| CurveRow {
            fraction: p.training_fraction,
            run: p.run_name.clone(),
            mean: format!("{:.4}", p.stats.mean),
            std: format!("{:.4}", p.stats.std),
            models: p.stats.per_model.len(),
        })
        .collect();
    Table::new(rows).with(Style::modern()).to_string()
}
