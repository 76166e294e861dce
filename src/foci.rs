//! Sub-cellular foci and their assignment to reconstructed cells.

use crate::error::{EngineError, ErrorCode};
use crate::lineage_annotate::CellTable;
use crate::lineage_seed::CellId;
use crate::record_store::{RecordKey, RecordStore, parse_measurements};
use crate::shape::{Measured, Measurements, ShapeMetrics};
use crate::table::{RawTable, parse_index, parse_optional_index};
use celltrace_protocol::ColumnMap;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct FociRecord {
    pub row: usize,
    pub frame: i64,
    /// Object number of the enclosing cell in the same frame.
    pub parent_object_id: Option<i64>,
    pub measurements: Measurements,
    pub metrics: ShapeMetrics,
    pub cell_id: Option<CellId>,
}

impl Measured for FociRecord {
    fn measurements(&self) -> &Measurements {
        &self.measurements
    }

    fn set_metrics(&mut self, metrics: ShapeMetrics) {
        self.metrics = metrics;
    }
}

#[derive(Debug, Clone, Default)]
pub struct FociTable {
    table: RawTable,
    records: Vec<FociRecord>,
}

impl FociTable {
    pub fn from_table(table: RawTable, columns: &ColumnMap) -> Result<Self, EngineError> {
        let frame = table.require_column(&columns.frame)?;
        let parent = table.require_column(&columns.foci_parent)?;
        let area = table.require_column(&columns.area)?;
        let major_axis = table.require_column(&columns.major_axis)?;
        let minor_axis = table.require_column(&columns.minor_axis)?;
        let center_x = table.require_column(&columns.center_x)?;
        let center_y = table.require_column(&columns.center_y)?;

        let mut records = Vec::with_capacity(table.len());
        for row in 0..table.len() {
            let cells = &table.rows()[row];
            let headers = table.headers();
            records.push(FociRecord {
                row,
                frame: parse_index(&cells[frame], &headers[frame], row)?,
                parent_object_id: parse_optional_index(&cells[parent], &headers[parent], row)?,
                measurements: parse_measurements(
                    &table, row, area, major_axis, minor_axis, center_x, center_y,
                )?,
                metrics: ShapeMetrics::default(),
                cell_id: None,
            });
        }
        Ok(Self { table, records })
    }

    pub fn from_path(path: &str, columns: &ColumnMap) -> Result<Self, EngineError> {
        Self::from_table(RawTable::from_path(path)?, columns)
    }

    pub fn table(&self) -> &RawTable {
        &self.table
    }

    pub fn records(&self) -> &[FociRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn normalize(&mut self, pixel_to_micron: f64) {
        crate::shape::normalize(&mut self.records, pixel_to_micron);
    }

    /// Foci ordered by cell id, unassigned last, input order within a cell.
    pub fn sorted_by_cell(&self) -> Vec<&FociRecord> {
        let mut sorted: Vec<&FociRecord> = self.records.iter().collect();
        sorted.sort_by_key(|f| (f.cell_id.is_none(), f.cell_id));
        sorted
    }
}

/// (frame, object number) → cell id for every annotated instance.
pub fn cell_keys(store: &RecordStore, cells: &CellTable) -> Vec<(RecordKey, CellId)> {
    cells
        .rows
        .iter()
        .map(|row| (store.get(row.record).key(), row.cell_id))
        .collect()
}

/// Assigns each focus the cell it sits in. A focus without a candidate stays
/// unassigned; a focus with several candidates aborts the whole assignment.
/// Returns the number of assigned foci.
pub fn assign_foci(
    cells: &[(RecordKey, CellId)],
    foci: &mut FociTable,
) -> Result<usize, EngineError> {
    let mut candidates: HashMap<RecordKey, Vec<CellId>> = HashMap::with_capacity(cells.len());
    for (key, cell_id) in cells {
        candidates.entry(*key).or_default().push(*cell_id);
    }

    let mut assigned = Vec::with_capacity(foci.len());
    for focus in &foci.records {
        let Some(parent) = focus.parent_object_id else {
            assigned.push(None);
            continue;
        };
        match candidates.get(&(focus.frame, parent)).map(|v| v.as_slice()) {
            None | Some([]) => assigned.push(None),
            Some([cell_id]) => assigned.push(Some(*cell_id)),
            Some(ids) => {
                return Err(EngineError::new(
                    ErrorCode::AmbiguousFociMatch,
                    format!(
                        "Focus in row {} (frame {}, parent object {parent}) matches {} cells: {}",
                        focus.row,
                        focus.frame,
                        ids.len(),
                        ids.iter()
                            .map(|id| id.to_string())
                            .collect::<Vec<_>>()
                            .join(", ")
                    ),
                ));
            }
        }
    }

    for (focus, cell_id) in foci.records.iter_mut().zip(assigned) {
        focus.cell_id = cell_id;
    }
    let count = foci.records.iter().filter(|f| f.cell_id.is_some()).count();
    if count < foci.len() {
        log::warn!("{} of {} foci have no enclosing cell", foci.len() - count, foci.len());
    }
    Ok(count)
}
