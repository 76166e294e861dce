//! Tabular export of annotated cells and assigned foci.
//!
//! Columns are the input columns (after renaming) followed by the derived
//! ones. A caller-provided selection picks and orders output columns by their
//! output names.

use crate::error::{EngineError, ErrorCode};
use crate::foci::FociTable;
use crate::lineage_annotate::CellTable;
use crate::record_store::RecordStore;
use crate::shape::ShapeMetrics;
use crate::table::{format_float, format_optional, header_matches, write_csv};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};

pub const CELL_ID: &str = "cellId";
pub const AREA_UM: &str = "Area (um)";
pub const ASPECT_RATIO: &str = "Aspect Ratio";
pub const SHAPE: &str = "Shape";
pub const TIME_HR: &str = "Time (hr)";
pub const RELATIVE_TIME: &str = "Relative Time";
pub const PARENT: &str = "Parent";
pub const PARENT_AREA: &str = "Parent Area";

pub const DERIVED_CELL_COLUMNS: [&str; 8] = [
    CELL_ID,
    AREA_UM,
    ASPECT_RATIO,
    SHAPE,
    TIME_HR,
    RELATIVE_TIME,
    PARENT,
    PARENT_AREA,
];

pub const DERIVED_FOCI_COLUMNS: [&str; 4] = [CELL_ID, AREA_UM, ASPECT_RATIO, SHAPE];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnRename {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSpec {
    /// Output column names in output order; `None` exports everything.
    pub columns: Option<Vec<String>>,
    /// Applied to input headers; `from` also matches `<from>_<digits>`.
    pub renames: Vec<ColumnRename>,
}

impl Default for ExportSpec {
    fn default() -> Self {
        let rename = |from: &str, to: &str| ColumnRename {
            from: from.to_string(),
            to: to.to_string(),
        };
        Self {
            columns: None,
            renames: vec![
                rename("TrackObjects_Label", "Lineage"),
                rename("AreaShape_Solidity", "Solidity"),
                rename("AreaShape_FormFactor", "Circularity"),
            ],
        }
    }
}

impl ExportSpec {
    fn rename_header(&self, header: &str) -> Result<String, EngineError> {
        for rename in &self.renames {
            if header_matches(header, &rename.from)? {
                return Ok(rename.to.clone());
            }
        }
        Ok(header.to_string())
    }

    /// Output headers and, for each, the position in the full row.
    fn layout(
        &self,
        input_headers: &[String],
        derived: &[&str],
    ) -> Result<(Vec<String>, Vec<usize>), EngineError> {
        let mut all = input_headers
            .iter()
            .map(|h| self.rename_header(h))
            .collect::<Result<Vec<_>, _>>()?;
        all.extend(derived.iter().map(|s| s.to_string()));

        let Some(wanted) = &self.columns else {
            let positions = (0..all.len()).collect();
            return Ok((all, positions));
        };
        let duplicates: Vec<&String> = wanted.iter().duplicates().collect();
        if !duplicates.is_empty() {
            return Err(EngineError::invalid_input(format!(
                "Export columns listed more than once: {}",
                duplicates.iter().join(", ")
            )));
        }
        let mut positions = Vec::with_capacity(wanted.len());
        for name in wanted {
            let idx = all.iter().position(|h| h == name).ok_or_else(|| {
                EngineError::new(
                    ErrorCode::InvalidInput,
                    format!("Unknown export column '{name}'"),
                )
            })?;
            positions.push(idx);
        }
        Ok((wanted.clone(), positions))
    }
}

fn shape_cells(metrics: &ShapeMetrics) -> [String; 3] {
    [
        format_float(metrics.area_um),
        format_float(metrics.aspect_ratio),
        metrics.shape.as_str().to_string(),
    ]
}

fn project(row: Vec<String>, positions: &[usize]) -> Vec<String> {
    positions.iter().map(|idx| row[*idx].clone()).collect()
}

pub fn write_cells_to<W: Write>(
    writer: W,
    store: &RecordStore,
    cells: &CellTable,
    spec: &ExportSpec,
) -> Result<usize, EngineError> {
    let (headers, positions) = spec.layout(store.table().headers(), &DERIVED_CELL_COLUMNS)?;
    let rows = cells.rows.iter().map(|row| {
        let record = store.get(row.record);
        let mut full = store
            .table()
            .rows()
            .get(record.row)
            .cloned()
            .unwrap_or_default();
        full.resize(store.table().headers().len(), String::new());
        full.push(row.cell_id.to_string());
        full.extend(shape_cells(&record.metrics));
        full.push(format_float(row.time_hr));
        full.push(format_float(row.relative_time));
        full.push(format_optional(row.parent));
        full.push(row.parent_area.map(format_float).unwrap_or_default());
        project(full, &positions)
    });
    write_csv(writer, &headers, rows)?;
    Ok(cells.len())
}

pub fn write_foci_to<W: Write>(
    writer: W,
    foci: &FociTable,
    spec: &ExportSpec,
) -> Result<usize, EngineError> {
    let (headers, positions) = spec.layout(foci.table().headers(), &DERIVED_FOCI_COLUMNS)?;
    let sorted = foci.sorted_by_cell();
    let rows = sorted.iter().map(|focus| {
        let mut full = foci
            .table()
            .rows()
            .get(focus.row)
            .cloned()
            .unwrap_or_default();
        full.resize(foci.table().headers().len(), String::new());
        full.push(format_optional(focus.cell_id));
        full.extend(shape_cells(&focus.metrics));
        project(full, &positions)
    });
    write_csv(writer, &headers, rows)?;
    Ok(sorted.len())
}

fn create(path: &str) -> Result<BufWriter<File>, EngineError> {
    File::create(path).map(BufWriter::new).map_err(|e| {
        EngineError::new(ErrorCode::Io, format!("Could not create '{path}': {e}"))
    })
}

pub fn write_cells(
    path: &str,
    store: &RecordStore,
    cells: &CellTable,
    spec: &ExportSpec,
) -> Result<usize, EngineError> {
    write_cells_to(create(path)?, store, cells, spec)
}

pub fn write_foci(path: &str, foci: &FociTable, spec: &ExportSpec) -> Result<usize, EngineError> {
    write_foci_to(create(path)?, foci, spec)
}
