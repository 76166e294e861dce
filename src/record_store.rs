//! The object-measurement table as a working store for reconstruction.
//!
//! Records are never removed; assigning one to a track claims it, and every
//! lookup skips claimed records. Lookups go through indices built once in
//! scan order (frame, then object number, then input row), so the first
//! candidate returned is always the first one a linear scan would meet.

use crate::error::{EngineError, ErrorCode};
use crate::shape::{Measured, Measurements, ShapeMetrics};
use crate::table::{RawTable, parse_index, parse_measurement, parse_optional_index};
use celltrace_protocol::{ColumnMap, LinkType};
use itertools::Itertools;
use std::collections::HashMap;

pub type RecordId = usize;

/// (frame, object number)
pub type RecordKey = (i64, i64);

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectRecord {
    /// Row in the source table, for pass-through columns.
    pub row: usize,
    pub frame: i64,
    pub object_id: i64,
    pub link_type: LinkType,
    pub parent_frame: i64,
    pub parent_object_id: i64,
    pub track_label: Option<i64>,
    pub measurements: Measurements,
    pub metrics: ShapeMetrics,
}

impl ObjectRecord {
    pub fn key(&self) -> RecordKey {
        (self.frame, self.object_id)
    }

    pub fn parent_key(&self) -> RecordKey {
        (self.parent_frame, self.parent_object_id)
    }
}

impl Measured for ObjectRecord {
    fn measurements(&self) -> &Measurements {
        &self.measurements
    }

    fn set_metrics(&mut self, metrics: ShapeMetrics) {
        self.metrics = metrics;
    }
}

/// Resolved column positions for one table.
struct CellColumns {
    frame: usize,
    object_id: usize,
    tracking: Option<TrackingColumns>,
    area: usize,
    major_axis: usize,
    minor_axis: usize,
    center_x: usize,
    center_y: usize,
}

struct TrackingColumns {
    link_type: usize,
    parent_frame: usize,
    parent_object_id: usize,
    track_label: usize,
}

impl TrackingColumns {
    fn resolve(table: &RawTable, columns: &ColumnMap) -> Result<Self, EngineError> {
        Ok(Self {
            link_type: table.require_column(&columns.link_type)?,
            parent_frame: table.require_column(&columns.parent_frame)?,
            parent_object_id: table.require_column(&columns.parent_object_id)?,
            track_label: table.require_column(&columns.track_label)?,
        })
    }
}

impl CellColumns {
    /// Tracking columns are mandatory for time-lapse data only; a snapshot
    /// table may come straight from IdentifyPrimaryObjects.
    fn resolve(
        table: &RawTable,
        columns: &ColumnMap,
        require_tracking: bool,
    ) -> Result<Self, EngineError> {
        let tracking = match TrackingColumns::resolve(table, columns) {
            Ok(tracking) => Some(tracking),
            Err(e) if require_tracking || e.code != ErrorCode::NotFound => return Err(e),
            Err(_) => None,
        };
        Ok(Self {
            frame: table.require_column(&columns.frame)?,
            object_id: table.require_column(&columns.object_id)?,
            tracking,
            area: table.require_column(&columns.area)?,
            major_axis: table.require_column(&columns.major_axis)?,
            minor_axis: table.require_column(&columns.minor_axis)?,
            center_x: table.require_column(&columns.center_x)?,
            center_y: table.require_column(&columns.center_y)?,
        })
    }
}

pub fn parse_measurements(
    table: &RawTable,
    row: usize,
    area: usize,
    major_axis: usize,
    minor_axis: usize,
    center_x: usize,
    center_y: usize,
) -> Result<Measurements, EngineError> {
    let cells = &table.rows()[row];
    let headers = table.headers();
    let value = |idx: usize| parse_measurement(&cells[idx], &headers[idx], row);
    Ok(Measurements {
        area_px: value(area)?,
        major_axis: value(major_axis)?,
        minor_axis: value(minor_axis)?,
        center_x: value(center_x)?,
        center_y: value(center_y)?,
    })
}

fn parse_record(
    table: &RawTable,
    c: &CellColumns,
    row: usize,
) -> Result<ObjectRecord, EngineError> {
    let cells = &table.rows()[row];
    let headers = table.headers();
    let index = |idx: usize| parse_index(&cells[idx], &headers[idx], row);
    let optional = |idx: usize| parse_optional_index(&cells[idx], &headers[idx], row);

    let (link_type, parent_frame, parent_object_id, track_label) = match &c.tracking {
        Some(t) => {
            let code = index(t.link_type)?;
            let link_type = LinkType::from_code(code).ok_or_else(|| {
                EngineError::invalid_input(format!(
                    "Row {row}: unknown link type {code} in '{}'",
                    headers[t.link_type]
                ))
            })?;
            (
                link_type,
                optional(t.parent_frame)?.unwrap_or(0),
                optional(t.parent_object_id)?.unwrap_or(0),
                optional(t.track_label)?,
            )
        }
        None => (LinkType::Start, 0, 0, None),
    };

    Ok(ObjectRecord {
        row,
        frame: index(c.frame)?,
        object_id: index(c.object_id)?,
        link_type,
        parent_frame,
        parent_object_id,
        track_label,
        measurements: parse_measurements(
            table,
            row,
            c.area,
            c.major_axis,
            c.minor_axis,
            c.center_x,
            c.center_y,
        )?,
        metrics: ShapeMetrics::default(),
    })
}

#[derive(Debug, Clone, Default)]
pub struct RecordStore {
    table: RawTable,
    records: Vec<ObjectRecord>,
    claimed: Vec<bool>,
    claimed_count: usize,
    by_parent: HashMap<(i64, i64, i64), Vec<RecordId>>,
    by_sibling: HashMap<(i64, i64, LinkType), Vec<RecordId>>,
}

impl RecordStore {
    pub fn from_table(
        table: RawTable,
        columns: &ColumnMap,
        require_tracking: bool,
    ) -> Result<Self, EngineError> {
        let c = CellColumns::resolve(&table, columns, require_tracking)?;
        let records = (0..table.len())
            .map(|row| parse_record(&table, &c, row))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(table, records))
    }

    pub fn from_path(
        path: &str,
        columns: &ColumnMap,
        require_tracking: bool,
    ) -> Result<Self, EngineError> {
        Self::from_table(RawTable::from_path(path)?, columns, require_tracking)
    }

    pub fn new(table: RawTable, mut records: Vec<ObjectRecord>) -> Self {
        records.sort_by(|a, b| a.key().cmp(&b.key()).then(a.row.cmp(&b.row)));

        let mut by_key: HashMap<RecordKey, Vec<RecordId>> = HashMap::new();
        let mut by_parent: HashMap<(i64, i64, i64), Vec<RecordId>> = HashMap::new();
        let mut by_sibling: HashMap<(i64, i64, LinkType), Vec<RecordId>> = HashMap::new();
        for (id, record) in records.iter().enumerate() {
            by_key.entry(record.key()).or_default().push(id);
            if let Some(label) = record.track_label {
                by_parent
                    .entry((record.parent_frame, record.parent_object_id, label))
                    .or_default()
                    .push(id);
            }
            by_sibling
                .entry((record.frame, record.parent_object_id, record.link_type))
                .or_default()
                .push(id);
        }
        for ((frame, object_id), ids) in by_key.iter().filter(|(_, ids)| ids.len() > 1) {
            log::warn!(
                "frame {frame} object {object_id} appears {} times in the input",
                ids.len()
            );
        }

        Self {
            table,
            claimed: vec![false; records.len()],
            claimed_count: 0,
            records,
            by_parent,
            by_sibling,
        }
    }

    pub fn table(&self) -> &RawTable {
        &self.table
    }

    pub fn records(&self) -> &[ObjectRecord] {
        &self.records
    }

    pub fn get(&self, id: RecordId) -> &ObjectRecord {
        &self.records[id]
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

    /// Releases every record for a fresh reconstruction.
    pub fn reset_claims(&mut self) {
        self.claimed.iter_mut().for_each(|c| *c = false);
        self.claimed_count = 0;
    }

    pub fn is_claimed(&self, id: RecordId) -> bool {
        self.claimed[id]
    }

    /// Returns false if the record already belongs to a track.
    pub fn claim(&mut self, id: RecordId) -> bool {
        if self.claimed[id] {
            return false;
        }
        self.claimed[id] = true;
        self.claimed_count += 1;
        true
    }

    pub fn claimed_count(&self) -> usize {
        self.claimed_count
    }

    pub fn unclaimed_ids(&self) -> impl Iterator<Item = RecordId> + '_ {
        self.claimed
            .iter()
            .enumerate()
            .filter(|(_, claimed)| !**claimed)
            .map(|(id, _)| id)
    }

    fn unclaimed<'a>(&'a self, ids: Option<&'a Vec<RecordId>>) -> Vec<RecordId> {
        ids.map(|ids| ids.iter().copied().filter(|id| !self.claimed[*id]).collect())
            .unwrap_or_default()
    }

    /// Unclaimed records whose parent is (frame, object_id) and whose track
    /// label equals `label`. A missing label never matches.
    pub fn successors(&self, frame: i64, object_id: i64, label: Option<i64>) -> Vec<RecordId> {
        let Some(label) = label else {
            return vec![];
        };
        self.unclaimed(self.by_parent.get(&(frame, object_id, label)))
    }

    /// Unclaimed records in `frame` sharing `parent_object_id` with the
    /// given link type.
    pub fn siblings(
        &self,
        frame: i64,
        parent_object_id: i64,
        link_type: LinkType,
    ) -> Vec<RecordId> {
        self.unclaimed(self.by_sibling.get(&(frame, parent_object_id, link_type)))
    }

    /// Merge and gap records per link type, in link code order.
    pub fn unhandled_link_counts(&self) -> Vec<(LinkType, usize)> {
        self.records
            .iter()
            .map(|r| r.link_type)
            .filter(|l| l.is_unhandled())
            .counts()
            .into_iter()
            .sorted_by_key(|(l, _)| l.code())
            .collect()
    }
}
